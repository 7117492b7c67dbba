//! Credential validation: password strength, role legality, email policy.
//!
//! These gates run before any row is created or mutated. Role validation is a
//! privilege-escalation control: the requested default role must be a member
//! of the requested allowed roles, which must be a subset of the configured
//! allowed roles.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;

use super::breach::BreachChecker;
use super::errors::ApiError;
use super::state::AuthConfig;
use super::types::SignUpOptionsPayload;

/// Resolved signup options with every default filled in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedOptions {
    pub display_name: String,
    pub locale: String,
    pub default_role: String,
    pub allowed_roles: Vec<String>,
    pub redirect_to: String,
}

/// Validate a candidate password against length and corpus policy.
///
/// Must run before hashing; a corpus hit never reaches the hasher.
pub(super) async fn validate_new_password(
    config: &AuthConfig,
    breach: &BreachChecker,
    password: &str,
) -> Result<(), ApiError> {
    if password.len() < config.password_min_length() {
        return Err(ApiError::PasswordTooShort);
    }

    if breach
        .is_breached(password)
        .await
        .context("breached-password lookup failed")?
    {
        return Err(ApiError::PasswordBreached);
    }

    Ok(())
}

/// Hash a password with Argon2id and a per-call random salt.
///
/// # Errors
/// Returns an error if hashing fails.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored hash.
#[must_use]
pub(super) fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Fill defaults and enforce role/locale legality for signup-shaped requests.
///
/// Fails with `RoleNotAllowed` when a requested role is outside the configured
/// set, and `DefaultRoleMustBeInAllowedRoles` when the containment between
/// default and allowed roles does not hold. A disallowed locale falls back to
/// the default instead of failing.
pub(super) fn resolve_signup_options(
    config: &AuthConfig,
    options: Option<SignUpOptionsPayload>,
    default_display_name: &str,
) -> Result<ResolvedOptions, ApiError> {
    let options = options.unwrap_or_default();

    let default_role = options
        .default_role
        .unwrap_or_else(|| config.default_role().to_string());

    let allowed_roles = match options.allowed_roles {
        Some(requested) => {
            for role in &requested {
                if !config.allowed_roles().contains(role) {
                    return Err(ApiError::RoleNotAllowed);
                }
            }
            requested
        }
        None => config.allowed_roles().to_vec(),
    };

    if !allowed_roles.contains(&default_role) {
        return Err(ApiError::DefaultRoleMustBeInAllowedRoles);
    }

    let locale = options
        .locale
        .filter(|locale| config.allowed_locales().contains(locale))
        .unwrap_or_else(|| config.default_locale().to_string());

    let display_name = options
        .display_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| default_display_name.to_string());

    let redirect_to = options
        .redirect_to
        .unwrap_or_else(|| config.client_url().to_string());

    Ok(ResolvedOptions {
        display_name,
        locale,
        default_role,
        allowed_roles,
        redirect_to,
    })
}

/// Allow-list gate: when exact emails or domains are configured, the email
/// must match one of them. Empty lists allow everyone.
#[must_use]
pub(super) fn email_allowed(config: &AuthConfig, email_normalized: &str) -> bool {
    let emails = config.allowed_emails();
    let domains = config.allowed_email_domains();
    if emails.is_empty() && domains.is_empty() {
        return true;
    }

    if emails.iter().any(|allowed| allowed == email_normalized) {
        return true;
    }

    email_normalized
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domains.iter().any(|allowed| allowed == domain))
}
