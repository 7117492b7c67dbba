use crate::{
    api,
    api::handlers::auth::{AuthConfig, AuthState, BreachChecker, JwtKeys, SampledPruner},
    cli::commands::auth::Options,
    mail::LogMailer,
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth: Options,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth = args.auth;

    let config = AuthConfig::new(auth.server_url, auth.client_url)
        .with_access_token_ttl_seconds(auth.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(auth.refresh_token_ttl_seconds)
        .with_ticket_ttl_seconds(auth.ticket_ttl_seconds)
        .with_password_min_length(auth.password_min_length)
        .with_default_role(auth.default_role)
        .with_allowed_roles(auth.allowed_roles)
        .with_allowed_emails(auth.allowed_emails)
        .with_allowed_email_domains(auth.allowed_email_domains)
        .with_require_email_verification(auth.require_email_verification)
        .with_disable_signup(auth.disable_signup)
        .with_disable_new_users(auth.disable_new_users)
        .with_anonymous_users_enabled(auth.anonymous_users_enabled)
        .with_mfa_enabled(auth.mfa_enabled);

    let jwt = JwtKeys::from_secret(&SecretString::from(auth.jwt_secret));

    let breach = if auth.breach_check_enabled {
        BreachChecker::range_api()?
    } else {
        BreachChecker::Disabled
    };

    let state = AuthState::new(
        config,
        jwt,
        Arc::new(LogMailer),
        breach,
        Arc::new(SampledPruner::new(auth.prune_probability)),
    );

    api::serve(args.port, args.dsn, state).await
}
