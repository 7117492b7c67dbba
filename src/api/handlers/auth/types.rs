//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Optional signup-shaped options shared by registration, magic-link, and
/// deanonymization requests. Missing fields fall back to configured defaults.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, Default)]
pub struct SignUpOptionsPayload {
    pub display_name: Option<String>,
    pub locale: Option<String>,
    pub default_role: Option<String>,
    pub allowed_roles: Option<Vec<String>>,
    pub redirect_to: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub options: Option<SignUpOptionsPayload>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInEmailPasswordRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct SignInAnonymousRequest {
    pub display_name: Option<String>,
    pub locale: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInPasswordlessEmailRequest {
    pub email: String,
    pub options: Option<SignUpOptionsPayload>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInMfaTotpRequest {
    pub ticket: String,
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignOutRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub all: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyTicketRequest {
    pub ticket: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SetPasswordRequest {
    pub new_password: String,
    /// Single-use reset ticket; when absent the caller must be authenticated.
    pub ticket: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EmailChangeRequest {
    pub new_email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SendVerificationEmailRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeanonymizeRequest {
    pub email: String,
    pub password: String,
    pub options: Option<SignUpOptionsPayload>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaGenerateResponse {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaActivateRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub locale: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub is_anonymous: bool,
    pub default_role: String,
    pub roles: Vec<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionPayload {
    pub access_token: String,
    pub access_token_expires_in: i64,
    pub refresh_token: String,
    pub user: UserResponse,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MfaChallengePayload {
    pub ticket: String,
    pub ticket_expires_in: i64,
}

/// Sign-in outcome: a session, or an MFA challenge to answer first.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInResponse {
    pub session: Option<SessionPayload>,
    pub mfa: Option<MfaChallengePayload>,
}

/// Sign-up outcome: a session, or a pending-verification acknowledgement
/// (`session` is null until the emailed ticket is consumed).
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignUpResponse {
    pub session: Option<SessionPayload>,
}
