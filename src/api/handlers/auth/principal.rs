//! Resolve the authenticated user behind a bearer access token.

use axum::http::HeaderMap;
use sqlx::PgPool;
use uuid::Uuid;

use super::errors::ApiError;
use super::state::AuthState;
use super::storage::{self, AuthUserRow};
use super::utils::extract_bearer_token;

/// Verify the bearer token and load the live user row.
///
/// The token is checked offline first (signature, expiry); the row is then
/// re-read so policy checks run against live state, not stale claims.
///
/// # Errors
/// `Unauthorized` for missing/invalid tokens or unknown users,
/// `DisabledUser` when the account has been disabled since issuance.
pub(super) async fn require_user(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<AuthUserRow, ApiError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(ApiError::Unauthorized);
    };

    let claims = state
        .jwt()
        .verify(&token)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| ApiError::Unauthorized)?;

    let Some(user) = storage::get_user_by_id(pool, user_id).await? else {
        return Err(ApiError::Unauthorized);
    };

    if user.disabled {
        return Err(ApiError::DisabledUser);
    }

    Ok(user)
}

/// Anonymous users may not perform credentialed-account operations.
pub(super) fn ensure_not_anonymous(user: &AuthUserRow) -> Result<(), ApiError> {
    if user.is_anonymous {
        return Err(ApiError::ForbiddenAnonymous);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(is_anonymous: bool) -> AuthUserRow {
        AuthUserRow {
            id: Uuid::new_v4(),
            disabled: false,
            display_name: "Anonymous User".to_string(),
            avatar_url: String::new(),
            locale: "en".to_string(),
            email: None,
            new_email: None,
            password_hash: None,
            email_verified: false,
            is_anonymous,
            default_role: "anonymous".to_string(),
            totp_secret: None,
            active_mfa_type: None,
        }
    }

    #[test]
    fn anonymous_gate() {
        assert!(ensure_not_anonymous(&user(false)).is_ok());
        let err = ensure_not_anonymous(&user(true)).expect_err("anonymous rejected");
        assert!(matches!(err, ApiError::ForbiddenAnonymous));
    }
}
