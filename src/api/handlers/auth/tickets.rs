//! Single-use, purpose-scoped tickets.
//!
//! A ticket authorizes exactly one state transition (verify an email, reset a
//! password, confirm an email change, sign in via magic link, answer an MFA
//! challenge). The raw value is purpose-prefixed and only its SHA-256 digest
//! is stored. A user holds at most one active ticket per purpose; issuing a
//! new one replaces the previous row. Consumption is a conditional delete in
//! the same transaction as the transition it authorizes, so a value can never
//! be consumed twice.

use anyhow::Result;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::storage;
use super::utils::{generate_token, hash_token};

/// Purposes a ticket can be scoped to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TicketKind {
    VerifyEmail,
    PasswordReset,
    EmailChange,
    MagicLink,
    MfaChallenge,
}

impl TicketKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify-email",
            Self::PasswordReset => "reset-password",
            Self::EmailChange => "change-email",
            Self::MagicLink => "magic-link",
            Self::MfaChallenge => "mfa-challenge",
        }
    }

    #[must_use]
    pub fn from_prefix(value: &str) -> Option<Self> {
        match value {
            "verify-email" => Some(Self::VerifyEmail),
            "reset-password" => Some(Self::PasswordReset),
            "change-email" => Some(Self::EmailChange),
            "magic-link" => Some(Self::MagicLink),
            "mfa-challenge" => Some(Self::MfaChallenge),
            _ => None,
        }
    }
}

/// Split a raw ticket value into its purpose and opaque remainder.
///
/// Returns `None` when the value carries no known purpose prefix.
pub(super) fn parse_ticket(raw: &str) -> Option<TicketKind> {
    let (prefix, rest) = raw.split_once(':')?;
    if rest.is_empty() {
        return None;
    }
    TicketKind::from_prefix(prefix)
}

/// Issue a ticket for a user and purpose inside an open transaction.
///
/// Replaces any previous active ticket for the same purpose. Returns the raw
/// value for the emailed link; only its digest is persisted.
///
/// # Errors
/// Returns an error if token generation or the upsert fails.
pub(super) async fn issue(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    kind: TicketKind,
    ttl_seconds: i64,
) -> Result<String> {
    let raw = format!("{}:{}", kind.as_str(), generate_token()?);
    let token_hash = hash_token(&raw);
    storage::upsert_ticket(tx, user_id, kind.as_str(), &token_hash, ttl_seconds).await?;
    Ok(raw)
}

/// Consume a ticket inside an open transaction.
///
/// Fails (returns `None`) when the value has no valid prefix, the prefix does
/// not match the expected purpose, the digest is unknown, or the ticket has
/// expired. On success the row is gone: a second consumption of the same
/// value always returns `None`, even from a concurrent request, because the
/// conditional delete is linearizable per row.
///
/// # Errors
/// Returns an error only on database failure.
pub(super) async fn consume(
    tx: &mut Transaction<'_, Postgres>,
    raw: &str,
    expected: TicketKind,
) -> Result<Option<Uuid>> {
    if parse_ticket(raw) != Some(expected) {
        return Ok(None);
    }
    let token_hash = hash_token(raw);
    storage::consume_ticket(tx, &token_hash, expected.as_str()).await
}

/// Look up the owner of a still-valid ticket without consuming it.
///
/// Used by the MFA challenge flow, where a wrong code must leave the ticket
/// valid for retry.
///
/// # Errors
/// Returns an error only on database failure.
pub(super) async fn peek(
    pool: &sqlx::PgPool,
    raw: &str,
    expected: TicketKind,
) -> Result<Option<Uuid>> {
    if parse_ticket(raw) != Some(expected) {
        return Ok(None);
    }
    let token_hash = hash_token(raw);
    storage::lookup_ticket(pool, &token_hash, expected.as_str()).await
}
