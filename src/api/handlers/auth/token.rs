//! Refresh and sign-out endpoints.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;

use super::errors::{ApiError, ErrorResponse};
use super::sessions;
use super::state::AuthState;
use super::types::{RefreshTokenRequest, SessionPayload, SignOutRequest};

/// Exchange a refresh token for a new session.
#[utoipa::path(
    post,
    path = "/token",
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New session with rotated refresh token", body = SessionPayload),
        (status = 401, description = "Invalid refresh token or disabled account", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn token(
    pool: Extension<PgPool>,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshTokenRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let refresh_token = request.refresh_token.trim();
    if refresh_token.is_empty() {
        return Err(ApiError::InvalidRefreshToken);
    }

    let session = sessions::refresh_session(&pool, &state, refresh_token).await?;
    Ok((StatusCode::OK, Json(session)).into_response())
}

/// Revoke a refresh token, or every token of its owner with `all`.
#[utoipa::path(
    post,
    path = "/signout",
    request_body = SignOutRequest,
    responses(
        (status = 204, description = "Signed out (idempotent)")
    ),
    tag = "auth"
)]
pub async fn sign_out(
    pool: Extension<PgPool>,
    payload: Option<Json<SignOutRequest>>,
) -> Result<Response, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::InvalidRequest);
    };

    let refresh_token = request.refresh_token.trim();
    if refresh_token.is_empty() {
        // Nothing to revoke; sign-out is idempotent.
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    sessions::revoke_session(&pool, refresh_token, request.all).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::tests::{lazy_pool, test_state};

    #[tokio::test]
    async fn token_missing_payload_rejected() {
        let response = token(Extension(lazy_pool()), Extension(test_state()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn token_empty_value_rejected() {
        let response = token(
            Extension(lazy_pool()),
            Extension(test_state()),
            Some(Json(RefreshTokenRequest {
                refresh_token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sign_out_empty_value_is_noop() {
        let response = sign_out(
            Extension(lazy_pool()),
            Some(Json(SignOutRequest {
                refresh_token: String::new(),
                all: true,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
