//! Account-management endpoints: password reset, email change, verification
//! resend, and anonymous-user promotion.

use anyhow::Context;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::mail::TemplateName;

use super::credentials::{
    email_allowed, hash_password, resolve_signup_options, validate_new_password,
};
use super::errors::{ApiError, ErrorResponse};
use super::principal::{ensure_not_anonymous, require_user};
use super::state::AuthState;
use super::storage::{self, DeanonymizeOutcome, DeanonymizeParams};
use super::tickets::{self, TicketKind};
use super::types::{
    DeanonymizeRequest, EmailChangeRequest, PasswordResetRequest, SendVerificationEmailRequest,
    SetPasswordRequest,
};
use super::utils::{normalize_email, send_ticket_mail, valid_email};

/// Request a password-reset email.
///
/// Always acknowledges with 204, whether or not the address maps to an
/// account, so the endpoint cannot be used to enumerate users.
#[utoipa::path(
    post,
    path = "/user/password/reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 204, description = "Reset accepted")
    ),
    tag = "auth"
)]
pub async fn password_reset(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Uniform ack for malformed addresses; nothing to probe.
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let Some(user) = storage::get_user_by_email(&pool, &email).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    if user.disabled || user.password_hash.is_none() {
        warn!(user_id = %user.id, "password reset requested for ineligible user");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut tx = pool.begin().await.context("begin password reset")?;
    let ticket = tickets::issue(
        &mut tx,
        user.id,
        TicketKind::PasswordReset,
        state.config().ticket_ttl_seconds(),
    )
    .await?;

    if let Err(err) = send_ticket_mail(
        &state,
        &email,
        &user.locale,
        &user.display_name,
        TemplateName::PasswordReset,
        &ticket,
        state.config().client_url(),
        None,
    ) {
        let _ = tx.rollback().await;
        return Err(ApiError::Internal(
            err.context("failed to dispatch password reset email"),
        ));
    }

    tx.commit().await.context("commit password reset")?;
    info!(user_id = %user.id, "password reset ticket issued");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Set a new password, authorized by a reset ticket or a bearer token.
///
/// The ticket is consumed in the same transaction that rotates the password
/// hash; a replayed reset link finds the ticket gone.
#[utoipa::path(
    post,
    path = "/user/password",
    request_body = SetPasswordRequest,
    responses(
        (status = 204, description = "Password updated"),
        (status = 400, description = "Weak password", body = ErrorResponse),
        (status = 401, description = "Invalid ticket or unauthorized", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn set_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SetPasswordRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    validate_new_password(state.config(), state.breach(), &request.new_password).await?;
    let password_hash = hash_password(&request.new_password)?;

    if let Some(raw) = request.ticket.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        let mut tx = pool.begin().await.context("begin password change")?;
        let Some(user_id) = tickets::consume(&mut tx, raw, TicketKind::PasswordReset).await? else {
            let _ = tx.rollback().await;
            return Err(ApiError::InvalidTicket);
        };
        storage::update_password(&mut tx, user_id, &password_hash).await?;
        tx.commit().await.context("commit password change")?;
        info!(user_id = %user_id, "password rotated via reset ticket");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let user = require_user(&headers, &pool, &state).await?;
    ensure_not_anonymous(&user)?;

    let mut tx = pool.begin().await.context("begin password change")?;
    storage::update_password(&mut tx, user.id, &password_hash).await?;
    tx.commit().await.context("commit password change")?;
    info!(user_id = %user.id, "password changed");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Request an email change for the authenticated user.
///
/// Stores the candidate address alongside a `change-email` ticket and mails
/// the confirmation link to the *new* address; nothing visible changes until
/// the ticket is consumed.
#[utoipa::path(
    post,
    path = "/user/email/change",
    request_body = EmailChangeRequest,
    responses(
        (status = 204, description = "Confirmation email dispatched"),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 409, description = "Email already in use", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn change_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailChangeRequest>>,
) -> Result<Response, ApiError> {
    let user = require_user(&headers, &pool, &state).await?;
    ensure_not_anonymous(&user)?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let new_email = normalize_email(&request.new_email);
    if !valid_email(&new_email) {
        return Err(ApiError::InvalidRequest);
    }

    if storage::email_exists(&pool, &new_email).await? {
        return Err(ApiError::EmailAlreadyInUse);
    }

    let mut tx = pool.begin().await.context("begin email change")?;
    storage::set_new_email(&mut tx, user.id, &new_email).await?;
    let ticket = tickets::issue(
        &mut tx,
        user.id,
        TicketKind::EmailChange,
        state.config().ticket_ttl_seconds(),
    )
    .await?;

    if let Err(err) = send_ticket_mail(
        &state,
        &new_email,
        &user.locale,
        &user.display_name,
        TemplateName::EmailChange,
        &ticket,
        state.config().client_url(),
        Some(new_email.clone()),
    ) {
        let _ = tx.rollback().await;
        return Err(ApiError::Internal(
            err.context("failed to dispatch email change confirmation"),
        ));
    }

    tx.commit().await.context("commit email change")?;
    info!(user_id = %user.id, "email change requested");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Resend the verification email.
///
/// Uniform 204 regardless of account existence or verification state.
#[utoipa::path(
    post,
    path = "/user/email/send-verification-email",
    request_body = SendVerificationEmailRequest,
    responses(
        (status = 204, description = "Resend accepted")
    ),
    tag = "auth"
)]
pub async fn send_verification_email(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendVerificationEmailRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let Some(user) = storage::get_user_by_email(&pool, &email).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    if user.disabled || user.email_verified {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut tx = pool.begin().await.context("begin verification resend")?;
    let ticket = tickets::issue(
        &mut tx,
        user.id,
        TicketKind::VerifyEmail,
        state.config().ticket_ttl_seconds(),
    )
    .await?;

    if let Err(err) = send_ticket_mail(
        &state,
        &email,
        &user.locale,
        &user.display_name,
        TemplateName::VerifyEmail,
        &ticket,
        state.config().client_url(),
        None,
    ) {
        let _ = tx.rollback().await;
        return Err(ApiError::Internal(
            err.context("failed to dispatch verification email"),
        ));
    }

    tx.commit().await.context("commit verification resend")?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Promote the authenticated anonymous user to a credentialed account.
///
/// The same user row is mutated in place, so the user id and everything
/// hanging off it survive the transition. Validation gates run strictly
/// before the mutation; the anonymity predicate inside the update closes the
/// race against a concurrent promotion.
#[utoipa::path(
    post,
    path = "/user/deanonymize",
    request_body = DeanonymizeRequest,
    responses(
        (status = 204, description = "Promotion accepted"),
        (status = 400, description = "Weak password or not anonymous", body = ErrorResponse),
        (status = 409, description = "Email already in use", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn deanonymize(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<DeanonymizeRequest>>,
) -> Result<Response, ApiError> {
    if !state.config().anonymous_users_enabled() {
        return Err(ApiError::DisabledEndpoint);
    }

    let user = require_user(&headers, &pool, &state).await?;
    if !user.is_anonymous {
        return Err(ApiError::UserNotAnonymous);
    }

    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::InvalidRequest);
    }
    if !email_allowed(state.config(), &email) {
        return Err(ApiError::EmailNotAllowed);
    }
    if storage::email_exists(&pool, &email).await? {
        return Err(ApiError::EmailAlreadyInUse);
    }

    let options = resolve_signup_options(state.config(), request.options, &email)?;

    validate_new_password(state.config(), state.breach(), &request.password).await?;
    let password_hash = hash_password(&request.password)?;

    let require_verification = state.config().require_email_verification();

    let mut tx = pool.begin().await.context("begin deanonymization")?;
    let outcome = storage::deanonymize_user(
        &mut tx,
        DeanonymizeParams {
            user_id: user.id,
            email: email.clone(),
            password_hash,
            display_name: options.display_name.clone(),
            locale: options.locale.clone(),
            email_verified: !require_verification,
            default_role: options.default_role.clone(),
            roles: options.allowed_roles.clone(),
        },
    )
    .await?;

    match outcome {
        DeanonymizeOutcome::Updated => {}
        DeanonymizeOutcome::EmailTaken => {
            let _ = tx.rollback().await;
            return Err(ApiError::EmailAlreadyInUse);
        }
        DeanonymizeOutcome::NotAnonymous => {
            let _ = tx.rollback().await;
            return Err(ApiError::UserNotAnonymous);
        }
    }

    // Sessions minted for the anonymous identity are no longer honored.
    storage::delete_user_refresh_tokens(&mut tx, user.id).await?;

    if require_verification {
        let ticket = tickets::issue(
            &mut tx,
            user.id,
            TicketKind::VerifyEmail,
            state.config().ticket_ttl_seconds(),
        )
        .await?;

        if let Err(err) = send_ticket_mail(
            &state,
            &email,
            &options.locale,
            &options.display_name,
            TemplateName::VerifyEmail,
            &ticket,
            &options.redirect_to,
            None,
        ) {
            let _ = tx.rollback().await;
            return Err(ApiError::Internal(
                err.context("failed to dispatch verification email"),
            ));
        }
    }

    tx.commit().await.context("commit deanonymization")?;
    info!(user_id = %user.id, "anonymous user promoted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::tests::{lazy_pool, test_config, test_state, test_state_with};

    #[tokio::test]
    async fn password_reset_malformed_email_still_acks() {
        let response = password_reset(
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(PasswordResetRequest {
                email: "broken".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn set_password_weak_password_rejected_before_ticket_lookup() {
        let response = set_password(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(SetPasswordRequest {
                new_password: "short".to_string(),
                ticket: Some("reset-password:abc".to_string()),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn set_password_breached_password_rejected() {
        let response = set_password(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(SetPasswordRequest {
                new_password: "correct horse battery staple".to_string(),
                ticket: Some("reset-password:abc".to_string()),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn change_email_requires_bearer() {
        let response = change_email(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(EmailChangeRequest {
                new_email: "new@acme.com".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deanonymize_disabled_without_anonymous_users() {
        let response = deanonymize(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(DeanonymizeRequest {
                email: "a@x.com".to_string(),
                password: "Str0ng!Pass".to_string(),
                options: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn deanonymize_requires_bearer_when_enabled() {
        let state = test_state_with(test_config().with_anonymous_users_enabled(true));
        let response = deanonymize(
            HeaderMap::new(),
            Extension(lazy_pool()),
            Extension(state),
            Some(Json(DeanonymizeRequest {
                email: "a@x.com".to_string(),
                password: "Str0ng!Pass".to_string(),
                options: None,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
