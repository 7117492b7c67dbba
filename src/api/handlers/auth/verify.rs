//! Ticket verification endpoint.
//!
//! Consumes a purpose-prefixed ticket and applies the transition it
//! authorizes in the same transaction: marking the email verified, completing
//! an email change, or signing in via magic link. Password-reset tickets are
//! not accepted here; they are consumed by the password endpoint together
//! with the new password.

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

use super::errors::{ApiError, ErrorResponse};
use super::sessions;
use super::state::AuthState;
use super::storage;
use super::tickets::{self, TicketKind};
use super::types::{SignInResponse, VerifyTicketRequest};

#[utoipa::path(
    post,
    path = "/verify",
    request_body = VerifyTicketRequest,
    responses(
        (status = 200, description = "Transition applied; session issued", body = SignInResponse),
        (status = 401, description = "Invalid or expired ticket", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyTicketRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let raw = request.ticket.trim();
    if raw.is_empty() {
        return Err(ApiError::InvalidTicket);
    }

    let Some(kind) = tickets::parse_ticket(raw) else {
        return Err(ApiError::InvalidTicket);
    };

    let mut tx = pool.begin().await.context("begin verify transaction")?;

    let user_id = match kind {
        TicketKind::VerifyEmail | TicketKind::MagicLink => {
            let Some(user_id) = tickets::consume(&mut tx, raw, kind).await? else {
                let _ = tx.rollback().await;
                return Err(ApiError::InvalidTicket);
            };
            // Magic links prove inbox ownership just like verification links.
            storage::set_email_verified(&mut tx, user_id).await?;
            user_id
        }
        TicketKind::EmailChange => {
            let Some(user_id) = tickets::consume(&mut tx, raw, kind).await? else {
                let _ = tx.rollback().await;
                return Err(ApiError::InvalidTicket);
            };
            if !storage::confirm_email_change(&mut tx, user_id).await? {
                // No pending change to apply; leave the ticket unconsumed.
                let _ = tx.rollback().await;
                return Err(ApiError::InvalidTicket);
            }
            user_id
        }
        TicketKind::PasswordReset | TicketKind::MfaChallenge => {
            let _ = tx.rollback().await;
            return Err(ApiError::InvalidTicket);
        }
    };

    tx.commit().await.context("commit verify transaction")?;
    info!(user_id = %user_id, purpose = kind.as_str(), "ticket consumed");

    let Some(user) = storage::get_user_by_id(&pool, user_id).await? else {
        return Err(ApiError::Internal(anyhow!("user row missing after verify")));
    };

    let session = sessions::new_session(&pool, &state, &user).await?;
    Ok((
        StatusCode::OK,
        Json(SignInResponse {
            session: Some(session),
            mfa: None,
        }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::tests::{lazy_pool, test_state};

    #[tokio::test]
    async fn missing_payload_rejected() {
        let response = verify(Extension(lazy_pool()), Extension(test_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_ticket_rejected() {
        let response = verify(
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(VerifyTicketRequest {
                ticket: "  ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_prefix_rejected_before_database() {
        // The lazy pool never connects, so a 401 proves the prefix gate ran.
        let response = verify(
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(VerifyTicketRequest {
                ticket: "bogus:value".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
