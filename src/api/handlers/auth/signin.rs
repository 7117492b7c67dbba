//! Sign-in endpoints: password, anonymous, magic link, and TOTP challenge.

use anyhow::Context;
use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::mail::TemplateName;

use super::credentials::{email_allowed, resolve_signup_options, verify_password};
use super::errors::{ApiError, ErrorResponse};
use super::mfa;
use super::sessions;
use super::state::AuthState;
use super::storage::{self, AuthUserRow, InsertUserOutcome, InsertUserParams};
use super::tickets::{self, TicketKind};
use super::types::{
    MfaChallengePayload, SignInAnonymousRequest, SignInEmailPasswordRequest, SignInMfaTotpRequest,
    SignInPasswordlessEmailRequest, SignInResponse,
};
use super::utils::{normalize_email, send_ticket_mail, valid_email};

/// Policy checks shared by the credentialed sign-in paths.
fn validate_signin_user(state: &AuthState, user: &AuthUserRow) -> Result<(), ApiError> {
    if user.disabled {
        return Err(ApiError::DisabledUser);
    }
    if state.config().require_email_verification() && !user.email_verified {
        return Err(ApiError::UnverifiedUser);
    }
    Ok(())
}

fn session_response(session: super::types::SessionPayload) -> Response {
    (
        StatusCode::OK,
        Json(SignInResponse {
            session: Some(session),
            mfa: None,
        }),
    )
        .into_response()
}

/// Email/password sign-in.
///
/// With MFA active the primary factor alone never yields a session; the
/// caller gets a short-lived challenge ticket to answer with a TOTP code.
#[utoipa::path(
    post,
    path = "/signin/email-password",
    request_body = SignInEmailPasswordRequest,
    responses(
        (status = 200, description = "Session or MFA challenge", body = SignInResponse),
        (status = 401, description = "Invalid credentials or account state", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn sign_in_email_password(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignInEmailPasswordRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::InvalidEmailPassword);
    }

    let Some(user) = storage::get_user_by_email(&pool, &email).await? else {
        return Err(ApiError::InvalidEmailPassword);
    };

    let Some(password_hash) = user.password_hash.as_deref() else {
        return Err(ApiError::InvalidEmailPassword);
    };
    if !verify_password(&request.password, password_hash) {
        return Err(ApiError::InvalidEmailPassword);
    }

    validate_signin_user(&state, &user)?;

    if state.config().mfa_enabled() && user.active_mfa_type.as_deref() == Some("totp") {
        let ttl = state.config().mfa_challenge_ttl_seconds();
        let mut tx = pool.begin().await.context("begin mfa challenge")?;
        let ticket = tickets::issue(&mut tx, user.id, TicketKind::MfaChallenge, ttl).await?;
        tx.commit().await.context("commit mfa challenge")?;

        info!(user_id = %user.id, "password accepted, awaiting second factor");
        return Ok((
            StatusCode::OK,
            Json(SignInResponse {
                session: None,
                mfa: Some(MfaChallengePayload {
                    ticket,
                    ticket_expires_in: ttl,
                }),
            }),
        )
            .into_response());
    }

    let session = sessions::new_session(&pool, &state, &user).await?;
    Ok(session_response(session))
}

/// Anonymous sign-in: creates a throwaway identity and issues a session.
#[utoipa::path(
    post,
    path = "/signin/anonymous",
    request_body = SignInAnonymousRequest,
    responses(
        (status = 200, description = "Session for a fresh anonymous user", body = SignInResponse),
        (status = 409, description = "Anonymous users are disabled", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn sign_in_anonymous(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignInAnonymousRequest>>,
) -> Result<Response, ApiError> {
    if !state.config().anonymous_users_enabled() {
        return Err(ApiError::DisabledEndpoint);
    }

    let request = payload.map(|Json(request)| request).unwrap_or_default();

    let options = resolve_signup_options(
        state.config(),
        Some(super::types::SignUpOptionsPayload {
            display_name: request.display_name,
            locale: request.locale,
            // Anonymous identities never pick roles.
            default_role: None,
            allowed_roles: None,
            redirect_to: None,
        }),
        "Anonymous User",
    )?;

    let anonymous_role = state.config().anonymous_role().to_string();

    let mut tx = pool.begin().await.context("begin anonymous signup")?;
    let outcome = storage::insert_user(
        &mut tx,
        InsertUserParams {
            display_name: options.display_name,
            avatar_url: String::new(),
            locale: options.locale,
            email: None,
            password_hash: None,
            email_verified: false,
            is_anonymous: true,
            disabled: false,
            default_role: anonymous_role.clone(),
            roles: vec![anonymous_role],
        },
    )
    .await?;
    tx.commit().await.context("commit anonymous signup")?;

    let user_id = match outcome {
        InsertUserOutcome::Created(user_id) => user_id,
        InsertUserOutcome::EmailTaken => {
            // No email is inserted for anonymous users.
            return Err(ApiError::Internal(anyhow::anyhow!(
                "unexpected unique violation on anonymous signup"
            )));
        }
    };

    let Some(user) = storage::get_user_by_id(&pool, user_id).await? else {
        return Err(ApiError::Internal(anyhow::anyhow!(
            "user row missing after anonymous signup"
        )));
    };

    let session = sessions::new_session(&pool, &state, &user).await?;
    Ok(session_response(session))
}

/// Request a magic-link sign-in email.
///
/// Always acknowledges with 204, whether or not the address maps to an
/// account, so the endpoint cannot be used to enumerate users. Unknown
/// addresses register a new account when signup policy allows it.
#[utoipa::path(
    post,
    path = "/signin/passwordless/email",
    request_body = SignInPasswordlessEmailRequest,
    responses(
        (status = 204, description = "Magic link accepted"),
        (status = 400, description = "Malformed request", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn sign_in_passwordless_email(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignInPasswordlessEmailRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Shape-only rejection; reveals nothing about account existence.
        return Err(ApiError::InvalidRequest);
    }

    let options = resolve_signup_options(state.config(), request.options, &email)?;
    let ttl = state.config().magic_link_ttl_seconds();

    if let Some(user) = storage::get_user_by_email(&pool, &email).await? {
        if user.disabled {
            // Keep the response opaque for disabled accounts.
            warn!(user_id = %user.id, "magic link requested for disabled user");
            return Ok(StatusCode::NO_CONTENT.into_response());
        }

        let mut tx = pool.begin().await.context("begin magic link")?;
        let ticket = tickets::issue(&mut tx, user.id, TicketKind::MagicLink, ttl).await?;
        if let Err(err) = send_ticket_mail(
            &state,
            &email,
            &user.locale,
            &user.display_name,
            TemplateName::MagicLink,
            &ticket,
            &options.redirect_to,
            None,
        ) {
            let _ = tx.rollback().await;
            return Err(ApiError::Internal(
                err.context("failed to dispatch magic link email"),
            ));
        }
        tx.commit().await.context("commit magic link")?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    if state.config().disable_signup() || !email_allowed(state.config(), &email) {
        // Uniform ack; nothing is created.
        warn!("magic link requested for unregistrable address");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut tx = pool.begin().await.context("begin magic link signup")?;
    let outcome = storage::insert_user(
        &mut tx,
        InsertUserParams {
            display_name: options.display_name.clone(),
            avatar_url: String::new(),
            locale: options.locale.clone(),
            email: Some(email.clone()),
            password_hash: None,
            email_verified: false,
            is_anonymous: false,
            disabled: state.config().disable_new_users(),
            default_role: options.default_role.clone(),
            roles: options.allowed_roles.clone(),
        },
    )
    .await?;
    let user_id = match outcome {
        InsertUserOutcome::Created(user_id) => user_id,
        InsertUserOutcome::EmailTaken => {
            // Lost the race with a concurrent signup; the account exists now.
            let _ = tx.rollback().await;
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
    };
    let ticket = tickets::issue(&mut tx, user_id, TicketKind::MagicLink, ttl).await?;
    if let Err(err) = send_ticket_mail(
        &state,
        &email,
        &options.locale,
        &options.display_name,
        TemplateName::MagicLink,
        &ticket,
        &options.redirect_to,
        None,
    ) {
        let _ = tx.rollback().await;
        return Err(ApiError::Internal(
            err.context("failed to dispatch magic link email"),
        ));
    }
    tx.commit().await.context("commit magic link signup")?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Answer an MFA challenge with a TOTP code.
///
/// A wrong code leaves the challenge ticket untouched so the user can retry
/// until the ticket expires; a correct code consumes it exactly once.
#[utoipa::path(
    post,
    path = "/signin/mfa/totp",
    request_body = SignInMfaTotpRequest,
    responses(
        (status = 200, description = "Session", body = SignInResponse),
        (status = 401, description = "Invalid ticket or code", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn sign_in_mfa_totp(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignInMfaTotpRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let raw = request.ticket.trim();
    if raw.is_empty() {
        return Err(ApiError::InvalidTicket);
    }

    let Some(user_id) = tickets::peek(&pool, raw, TicketKind::MfaChallenge).await? else {
        return Err(ApiError::InvalidTicket);
    };

    let Some(user) = storage::get_user_by_id(&pool, user_id).await? else {
        return Err(ApiError::InvalidTicket);
    };

    let Some(secret) = user.totp_secret.as_deref() else {
        return Err(ApiError::NoTotpSecret);
    };

    if !mfa::verify_code(secret, request.otp.trim())? {
        // Ticket stays valid for retry.
        return Err(ApiError::InvalidTotp);
    }

    let mut tx = pool.begin().await.context("begin mfa verification")?;
    if tickets::consume(&mut tx, raw, TicketKind::MfaChallenge)
        .await?
        .is_none()
    {
        // A concurrent request consumed the challenge first.
        let _ = tx.rollback().await;
        return Err(ApiError::InvalidTicket);
    }
    tx.commit().await.context("commit mfa verification")?;

    let session = sessions::new_session(&pool, &state, &user).await?;
    Ok(session_response(session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::tests::{lazy_pool, test_config, test_state, test_state_with};

    #[tokio::test]
    async fn missing_payload_rejected() {
        let response = sign_in_email_password(Extension(lazy_pool()), Extension(test_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_email_is_invalid_credentials() {
        let response = sign_in_email_password(
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(SignInEmailPasswordRequest {
                email: "not-an-email".to_string(),
                password: "whatever".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn anonymous_signin_disabled_by_default() {
        let response = sign_in_anonymous(Extension(lazy_pool()), Extension(test_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn magic_link_rejects_malformed_email() {
        let response = sign_in_passwordless_email(
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(SignInPasswordlessEmailRequest {
                email: "broken".to_string(),
                options: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mfa_totp_rejects_unprefixed_ticket() {
        let response = sign_in_mfa_totp(
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(SignInMfaTotpRequest {
                ticket: "no-such-prefix".to_string(),
                otp: "000000".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unverified_user_blocked_when_verification_required() {
        let state = test_state_with(test_config().with_require_email_verification(true));
        let user = AuthUserRow {
            id: uuid::Uuid::new_v4(),
            disabled: false,
            display_name: "Jane Doe".to_string(),
            avatar_url: String::new(),
            locale: "en".to_string(),
            email: Some("jane@acme.com".to_string()),
            new_email: None,
            password_hash: None,
            email_verified: false,
            is_anonymous: false,
            default_role: "user".to_string(),
            totp_secret: None,
            active_mfa_type: None,
        };
        let err = validate_signin_user(&state, &user).expect_err("unverified");
        assert!(matches!(err, ApiError::UnverifiedUser));

        let mut disabled = user;
        disabled.disabled = true;
        let err = validate_signin_user(&state, &disabled).expect_err("disabled");
        assert!(matches!(err, ApiError::DisabledUser));
    }
}
