//! Session issuance, refresh, and revocation.
//!
//! A session is a signed access token plus a refresh token row. Refresh
//! tokens rotate on every use: the conditional update in storage is the
//! replay guard, so a captured old value loses the race exactly once.

use sqlx::PgPool;

use super::errors::ApiError;
use super::prune;
use super::state::AuthState;
use super::storage::{self, AuthUserRow};
use super::types::{SessionPayload, UserResponse};
use super::utils::hash_token;

/// Load a user's allowed roles, always including the default role.
async fn allowed_roles(pool: &PgPool, user: &AuthUserRow) -> Result<Vec<String>, ApiError> {
    let mut roles = storage::get_user_roles(pool, user.id).await?;
    if !roles.contains(&user.default_role) {
        roles.push(user.default_role.clone());
    }
    Ok(roles)
}

fn user_response(user: &AuthUserRow, roles: Vec<String>) -> UserResponse {
    UserResponse {
        id: user.id.to_string(),
        display_name: user.display_name.clone(),
        avatar_url: user.avatar_url.clone(),
        locale: user.locale.clone(),
        email: user.email.clone(),
        email_verified: user.email_verified,
        is_anonymous: user.is_anonymous,
        default_role: user.default_role.clone(),
        roles,
    }
}

/// Issue a fresh session for a user.
///
/// # Errors
/// Fails with `DisabledUser` for disabled accounts and propagates storage
/// failures as internal errors.
pub(super) async fn new_session(
    pool: &PgPool,
    state: &AuthState,
    user: &AuthUserRow,
) -> Result<SessionPayload, ApiError> {
    if user.disabled {
        return Err(ApiError::DisabledUser);
    }

    let roles = allowed_roles(pool, user).await?;

    let refresh_token = storage::insert_refresh_token(
        pool,
        user.id,
        state.config().refresh_token_ttl_seconds(),
    )
    .await?;

    storage::touch_last_seen(pool, user.id).await?;

    let (access_token, expires_in) = state.jwt().sign(
        user.id,
        roles.clone(),
        user.default_role.clone(),
        user.is_anonymous,
        state.config().access_token_ttl_seconds(),
    )?;

    Ok(SessionPayload {
        access_token,
        access_token_expires_in: expires_in,
        refresh_token,
        user: user_response(user, roles),
    })
}

/// Exchange a refresh token for a new session, rotating the token value.
///
/// Role claims are re-read from live state here; this is the point where a
/// disabled or demoted user loses access.
pub(super) async fn refresh_session(
    pool: &PgPool,
    state: &AuthState,
    refresh_token: &str,
) -> Result<SessionPayload, ApiError> {
    let token_hash = hash_token(refresh_token);

    let Some(user) = storage::get_user_by_refresh_token(pool, &token_hash).await? else {
        return Err(ApiError::InvalidRefreshToken);
    };

    if user.disabled {
        return Err(ApiError::DisabledUser);
    }

    // Rotation may still miss if a concurrent refresh with the same value won
    // the race; that request got the new token, this one is a replay.
    let Some(new_refresh_token) = storage::rotate_refresh_token(
        pool,
        &token_hash,
        state.config().refresh_token_ttl_seconds(),
    )
    .await?
    else {
        return Err(ApiError::InvalidRefreshToken);
    };

    let roles = allowed_roles(pool, &user).await?;

    let (access_token, expires_in) = state.jwt().sign(
        user.id,
        roles.clone(),
        user.default_role.clone(),
        user.is_anonymous,
        state.config().access_token_ttl_seconds(),
    )?;

    storage::touch_last_seen(pool, user.id).await?;

    // Opportunistic cleanup; never blocks or fails this request.
    if state.pruner().should_prune() {
        prune::spawn_prune(pool.clone());
    }

    Ok(SessionPayload {
        access_token,
        access_token_expires_in: expires_in,
        refresh_token: new_refresh_token,
        user: user_response(&user, roles),
    })
}

/// Revoke one refresh token, or every token of its owning user.
///
/// Idempotent: revoking an unknown token succeeds as a no-op.
pub(super) async fn revoke_session(
    pool: &PgPool,
    refresh_token: &str,
    all: bool,
) -> Result<(), ApiError> {
    let token_hash = hash_token(refresh_token);
    if all {
        storage::delete_all_refresh_tokens(pool, &token_hash).await?;
    } else {
        storage::delete_refresh_token(pool, &token_hash).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> AuthUserRow {
        AuthUserRow {
            id: Uuid::new_v4(),
            disabled: false,
            display_name: "Jane Doe".to_string(),
            avatar_url: String::new(),
            locale: "en".to_string(),
            email: Some("jane@acme.com".to_string()),
            new_email: None,
            password_hash: None,
            email_verified: true,
            is_anonymous: false,
            default_role: "user".to_string(),
            totp_secret: None,
            active_mfa_type: None,
        }
    }

    #[test]
    fn user_response_carries_roles() {
        let user = user();
        let response = user_response(&user, vec!["user".to_string(), "me".to_string()]);
        assert_eq!(response.id, user.id.to_string());
        assert_eq!(response.roles, vec!["user", "me"]);
        assert_eq!(response.default_role, "user");
        assert!(!response.is_anonymous);
    }

    // Lifecycle model for revocation semantics: one token, revoke one vs all.
    // The storage layer's conditional statements provide the same guarantees
    // against the real database.
    mod revocation_model {
        use std::collections::{HashMap, HashSet};
        use uuid::Uuid;

        #[derive(Default)]
        struct TokenStore {
            tokens: HashMap<String, Uuid>,
        }

        impl TokenStore {
            fn insert(&mut self, user: Uuid, value: &str) {
                self.tokens.insert(value.to_string(), user);
            }

            fn revoke(&mut self, value: &str, all: bool) {
                if all {
                    if let Some(owner) = self.tokens.get(value).copied() {
                        self.tokens.retain(|_, user| *user != owner);
                    }
                } else {
                    self.tokens.remove(value);
                }
            }

            fn refresh(&mut self, value: &str) -> Option<String> {
                let owner = self.tokens.remove(value)?;
                let new_value = format!("{value}+rotated");
                self.tokens.insert(new_value.clone(), owner);
                Some(new_value)
            }
        }

        #[test]
        fn revoke_all_only_affects_owner() {
            let alice = Uuid::new_v4();
            let bob = Uuid::new_v4();
            let mut store = TokenStore::default();
            store.insert(alice, "alice-1");
            store.insert(alice, "alice-2");
            store.insert(bob, "bob-1");

            store.revoke("alice-1", true);

            assert!(store.refresh("alice-1").is_none());
            assert!(store.refresh("alice-2").is_none());
            assert!(store.refresh("bob-1").is_some());
        }

        #[test]
        fn revoke_single_leaves_other_devices() {
            let alice = Uuid::new_v4();
            let mut store = TokenStore::default();
            store.insert(alice, "alice-1");
            store.insert(alice, "alice-2");

            store.revoke("alice-1", false);

            assert!(store.refresh("alice-1").is_none());
            assert!(store.refresh("alice-2").is_some());
        }

        #[test]
        fn revoke_is_idempotent() {
            let mut store = TokenStore::default();
            store.revoke("unknown", false);
            store.revoke("unknown", true);
            assert!(store.tokens.is_empty());
        }

        #[test]
        fn rotation_consumes_old_value() {
            let alice = Uuid::new_v4();
            let mut store = TokenStore::default();
            store.insert(alice, "alice-1");

            let rotated = store.refresh("alice-1").expect("first refresh");
            // The old value lost the race; only the rotated one works.
            assert!(store.refresh("alice-1").is_none());
            assert!(store.refresh(&rotated).is_some());

            let mut seen = HashSet::new();
            seen.insert(rotated);
            assert_eq!(seen.len(), 1);
        }
    }
}
