//! Error taxonomy for the auth endpoints.
//!
//! Every failure a caller can see maps to one stable error code and HTTP
//! status. Lookup failures stay deliberately vague: "invalid or expired" never
//! distinguishes absent from expired, so callers cannot probe for existence.
//! Upstream failures (database, mail) are logged with context and surfaced as
//! a generic internal error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("The request payload is incorrect")]
    InvalidRequest,
    #[error("Incorrect email or password")]
    InvalidEmailPassword,
    #[error("Email already in use")]
    EmailAlreadyInUse,
    #[error("Password is too short")]
    PasswordTooShort,
    #[error("Password found in breached-password corpus")]
    PasswordBreached,
    #[error("Email is not allowed to register")]
    EmailNotAllowed,
    #[error("Role not allowed")]
    RoleNotAllowed,
    #[error("Default role must be in allowed roles")]
    DefaultRoleMustBeInAllowedRoles,
    #[error("Sign up is disabled")]
    SignupDisabled,
    #[error("This endpoint is disabled")]
    DisabledEndpoint,
    #[error("User is disabled")]
    DisabledUser,
    #[error("User is not verified")]
    UnverifiedUser,
    #[error("Forbidden, user is anonymous")]
    ForbiddenAnonymous,
    #[error("Logged in user is not anonymous")]
    UserNotAnonymous,
    #[error("Invalid or expired ticket")]
    InvalidTicket,
    #[error("Invalid or expired refresh token")]
    InvalidRefreshToken,
    #[error("Invalid TOTP code")]
    InvalidTotp,
    #[error("User does not have a TOTP secret")]
    NoTotpSecret,
    #[error("TOTP MFA is already active")]
    TotpAlreadyActive,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Resource not found")]
    NotFound,
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// Wire shape for error responses.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest
            | Self::PasswordTooShort
            | Self::PasswordBreached
            | Self::RoleNotAllowed
            | Self::DefaultRoleMustBeInAllowedRoles
            | Self::UserNotAnonymous
            | Self::NoTotpSecret
            | Self::TotpAlreadyActive => StatusCode::BAD_REQUEST,
            Self::InvalidEmailPassword
            | Self::DisabledUser
            | Self::UnverifiedUser
            | Self::InvalidTicket
            | Self::InvalidRefreshToken
            | Self::InvalidTotp
            | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::SignupDisabled | Self::ForbiddenAnonymous | Self::EmailNotAllowed => {
                StatusCode::FORBIDDEN
            }
            Self::EmailAlreadyInUse | Self::DisabledEndpoint => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid-request",
            Self::InvalidEmailPassword => "invalid-email-password",
            Self::EmailAlreadyInUse => "email-already-in-use",
            Self::EmailNotAllowed => "email-not-allowed",
            Self::NotFound => "not-found",
            Self::PasswordTooShort => "password-too-short",
            Self::PasswordBreached => "password-breached",
            Self::RoleNotAllowed => "role-not-allowed",
            Self::DefaultRoleMustBeInAllowedRoles => "default-role-must-be-in-allowed-roles",
            Self::SignupDisabled => "signup-disabled",
            Self::DisabledEndpoint => "disabled-endpoint",
            Self::DisabledUser => "disabled-user",
            Self::UnverifiedUser => "unverified-user",
            Self::ForbiddenAnonymous => "forbidden-anonymous",
            Self::UserNotAnonymous => "user-not-anonymous",
            Self::InvalidTicket => "invalid-ticket",
            Self::InvalidRefreshToken => "invalid-refresh-token",
            Self::InvalidTotp => "invalid-totp",
            Self::NoTotpSecret => "no-totp-secret",
            Self::TotpAlreadyActive => "totp-already-active",
            Self::Unauthorized => "unauthorized",
            Self::Internal(_) => "internal-server-error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            // Only the generic message leaves the process; details go to the log.
            error!("Internal error: {err:#}");
        }
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::ApiError;
    use axum::http::StatusCode;

    #[test]
    fn lookup_failures_are_indistinguishable() {
        // Absent and expired tickets share one code and message.
        let err = ApiError::InvalidTicket;
        assert_eq!(err.code(), "invalid-ticket");
        assert_eq!(err.to_string(), "Invalid or expired ticket");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = ApiError::InvalidRefreshToken;
        assert_eq!(err.to_string(), "Invalid or expired refresh token");
    }

    #[test]
    fn policy_failures_are_bad_requests() {
        assert_eq!(
            ApiError::PasswordTooShort.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::PasswordBreached.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::DefaultRoleMustBeInAllowedRoles.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn conflict_and_forbidden_mapping() {
        assert_eq!(ApiError::EmailAlreadyInUse.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::SignupDisabled.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::ForbiddenAnonymous.status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn internal_error_conceals_detail() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.7"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error");
    }
}
