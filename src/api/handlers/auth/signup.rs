//! Registration endpoint.

use anyhow::{Context, anyhow};
use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::mail::TemplateName;

use super::credentials::{
    email_allowed, hash_password, resolve_signup_options, validate_new_password,
};
use super::errors::{ApiError, ErrorResponse};
use super::sessions;
use super::state::AuthState;
use super::storage::{self, InsertUserOutcome, InsertUserParams};
use super::tickets::{self, TicketKind};
use super::types::{SignUpRequest, SignUpResponse};
use super::utils::{normalize_email, send_ticket_mail, valid_email};

/// Register a new email/password user.
///
/// All policy gates (signup toggle, allow-list, role containment, password
/// strength) run before the insert; the unique index on email closes the
/// check/insert race at commit time. With verification required, the
/// verification ticket and its email are part of the same transaction, so a
/// failed dispatch leaves no half-registered state behind.
#[utoipa::path(
    post,
    path = "/signup/email-password",
    request_body = SignUpRequest,
    responses(
        (status = 200, description = "Session or pending-verification ack", body = SignUpResponse),
        (status = 400, description = "Validation or policy failure", body = ErrorResponse),
        (status = 403, description = "Signup disabled or email not allowed", body = ErrorResponse),
        (status = 409, description = "Email already in use", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn sign_up_email_password(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignUpRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    if state.config().disable_signup() {
        return Err(ApiError::SignupDisabled);
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(ApiError::InvalidEmailPassword);
    }
    if !email_allowed(state.config(), &email) {
        return Err(ApiError::EmailNotAllowed);
    }

    let options = resolve_signup_options(state.config(), request.options, &email)?;

    validate_new_password(state.config(), state.breach(), &request.password).await?;
    let password_hash = hash_password(&request.password)?;

    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let outcome = storage::insert_user(
        &mut tx,
        InsertUserParams {
            display_name: options.display_name.clone(),
            avatar_url: String::new(),
            locale: options.locale.clone(),
            email: Some(email.clone()),
            password_hash: Some(password_hash),
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
            let _ = tx.rollback().await;
            return Err(ApiError::EmailAlreadyInUse);
        }
    };

    if state.config().require_email_verification() {
        let ticket = tickets::issue(
            &mut tx,
            user_id,
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

        tx.commit().await.context("commit signup transaction")?;
        info!(user_id = %user_id, "signup accepted, pending email verification");
        return Ok((StatusCode::OK, Json(SignUpResponse { session: None })).into_response());
    }

    tx.commit().await.context("commit signup transaction")?;

    let Some(user) = storage::get_user_by_id(&pool, user_id).await? else {
        return Err(ApiError::Internal(anyhow!("user row missing after signup")));
    };

    let session = sessions::new_session(&pool, &state, &user).await?;
    Ok((
        StatusCode::OK,
        Json(SignUpResponse {
            session: Some(session),
        }),
    )
        .into_response())
}
