//! Small helpers for credential validation and token handling.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Create a new high-entropy token for refresh tokens and ticket values.
///
/// The raw value is only returned to the caller; the database stores a hash.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token so raw values never touch the database.
/// The hash is used for lookups when the value is presented again.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Dispatch a ticket-bearing email through the mail collaborator.
///
/// Called inside the ticket's transaction: a delivery error fails the request
/// and the rollback removes the ticket, so a retry re-issues a fresh one.
#[allow(clippy::too_many_arguments)]
pub(super) fn send_ticket_mail(
    state: &super::state::AuthState,
    to: &str,
    locale: &str,
    display_name: &str,
    template: crate::mail::TemplateName,
    ticket: &str,
    redirect_to: &str,
    new_email: Option<String>,
) -> Result<()> {
    let link = crate::mail::build_action_link(state.config().server_url(), ticket, redirect_to);
    let message = crate::mail::MailMessage {
        to: to.to_string(),
        locale: locale.to_string(),
        template,
        data: crate::mail::TemplateData {
            link,
            display_name: display_name.to_string(),
            email: to.to_string(),
            new_email,
            client_url: state.config().client_url().to_string(),
        },
    };
    state.mailer().send(&message)
}

/// Extract a bearer token from the Authorization header.
pub(super) fn extract_bearer_token(headers: &axum::http::HeaderMap) -> Option<String> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
