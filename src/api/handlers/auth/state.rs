//! Auth state and configuration.
//!
//! Feature toggles and policy values are carried in an explicit [`AuthConfig`]
//! value object handed to the state at construction, never read ambiently, so
//! the policy gates stay unit-testable without process-level mutation.

use std::sync::Arc;

use crate::mail::Mailer;

use super::breach::BreachChecker;
use super::jwt::JwtKeys;
use super::prune::TokenPruner;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_TICKET_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_MFA_CHALLENGE_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_PASSWORD_MIN_LENGTH: usize = 9;
const DEFAULT_ROLE: &str = "user";
const DEFAULT_ANONYMOUS_ROLE: &str = "anonymous";
const DEFAULT_LOCALE: &str = "en";
const DEFAULT_TOTP_ISSUER: &str = "aliro";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    server_url: String,
    client_url: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    ticket_ttl_seconds: i64,
    magic_link_ttl_seconds: i64,
    mfa_challenge_ttl_seconds: i64,
    password_min_length: usize,
    default_role: String,
    anonymous_role: String,
    allowed_roles: Vec<String>,
    allowed_emails: Vec<String>,
    allowed_email_domains: Vec<String>,
    allowed_locales: Vec<String>,
    default_locale: String,
    require_email_verification: bool,
    disable_signup: bool,
    disable_new_users: bool,
    anonymous_users_enabled: bool,
    mfa_enabled: bool,
    totp_issuer: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(server_url: String, client_url: String) -> Self {
        Self {
            server_url,
            client_url,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            ticket_ttl_seconds: DEFAULT_TICKET_TTL_SECONDS,
            magic_link_ttl_seconds: DEFAULT_TICKET_TTL_SECONDS,
            mfa_challenge_ttl_seconds: DEFAULT_MFA_CHALLENGE_TTL_SECONDS,
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            default_role: DEFAULT_ROLE.to_string(),
            anonymous_role: DEFAULT_ANONYMOUS_ROLE.to_string(),
            allowed_roles: vec![DEFAULT_ROLE.to_string(), "me".to_string()],
            allowed_emails: Vec::new(),
            allowed_email_domains: Vec::new(),
            allowed_locales: vec![DEFAULT_LOCALE.to_string()],
            default_locale: DEFAULT_LOCALE.to_string(),
            require_email_verification: false,
            disable_signup: false,
            disable_new_users: false,
            anonymous_users_enabled: false,
            mfa_enabled: false,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_ticket_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ticket_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_magic_link_ttl_seconds(mut self, seconds: i64) -> Self {
        self.magic_link_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mfa_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.mfa_challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = length;
        self
    }

    #[must_use]
    pub fn with_default_role(mut self, role: String) -> Self {
        self.default_role = role;
        self
    }

    #[must_use]
    pub fn with_allowed_roles(mut self, roles: Vec<String>) -> Self {
        if !roles.is_empty() {
            self.allowed_roles = roles;
        }
        self
    }

    #[must_use]
    pub fn with_allowed_emails(mut self, emails: Vec<String>) -> Self {
        self.allowed_emails = emails;
        self
    }

    #[must_use]
    pub fn with_allowed_email_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_email_domains = domains;
        self
    }

    #[must_use]
    pub fn with_allowed_locales(mut self, locales: Vec<String>) -> Self {
        if !locales.is_empty() {
            self.allowed_locales = locales;
        }
        self
    }

    #[must_use]
    pub fn with_require_email_verification(mut self, required: bool) -> Self {
        self.require_email_verification = required;
        self
    }

    #[must_use]
    pub fn with_disable_signup(mut self, disabled: bool) -> Self {
        self.disable_signup = disabled;
        self
    }

    #[must_use]
    pub fn with_disable_new_users(mut self, disabled: bool) -> Self {
        self.disable_new_users = disabled;
        self
    }

    #[must_use]
    pub fn with_anonymous_users_enabled(mut self, enabled: bool) -> Self {
        self.anonymous_users_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_mfa_enabled(mut self, enabled: bool) -> Self {
        self.mfa_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    #[must_use]
    pub fn client_url(&self) -> &str {
        &self.client_url
    }

    pub(super) fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    pub(super) fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    pub(super) fn ticket_ttl_seconds(&self) -> i64 {
        self.ticket_ttl_seconds
    }

    pub(super) fn magic_link_ttl_seconds(&self) -> i64 {
        self.magic_link_ttl_seconds
    }

    pub(super) fn mfa_challenge_ttl_seconds(&self) -> i64 {
        self.mfa_challenge_ttl_seconds
    }

    pub(super) fn password_min_length(&self) -> usize {
        self.password_min_length
    }

    pub(super) fn default_role(&self) -> &str {
        &self.default_role
    }

    pub(super) fn anonymous_role(&self) -> &str {
        &self.anonymous_role
    }

    pub(super) fn allowed_roles(&self) -> &[String] {
        &self.allowed_roles
    }

    pub(super) fn allowed_emails(&self) -> &[String] {
        &self.allowed_emails
    }

    pub(super) fn allowed_email_domains(&self) -> &[String] {
        &self.allowed_email_domains
    }

    pub(super) fn allowed_locales(&self) -> &[String] {
        &self.allowed_locales
    }

    pub(super) fn default_locale(&self) -> &str {
        &self.default_locale
    }

    pub(super) fn require_email_verification(&self) -> bool {
        self.require_email_verification
    }

    pub(super) fn disable_signup(&self) -> bool {
        self.disable_signup
    }

    pub(super) fn disable_new_users(&self) -> bool {
        self.disable_new_users
    }

    pub(super) fn anonymous_users_enabled(&self) -> bool {
        self.anonymous_users_enabled
    }

    pub(super) fn mfa_enabled(&self) -> bool {
        self.mfa_enabled
    }

    pub(super) fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }
}

pub struct AuthState {
    config: AuthConfig,
    jwt: JwtKeys,
    mailer: Arc<dyn Mailer>,
    breach: BreachChecker,
    pruner: Arc<dyn TokenPruner>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        jwt: JwtKeys,
        mailer: Arc<dyn Mailer>,
        breach: BreachChecker,
        pruner: Arc<dyn TokenPruner>,
    ) -> Self {
        Self {
            config,
            jwt,
            mailer,
            breach,
            pruner,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn jwt(&self) -> &JwtKeys {
        &self.jwt
    }

    pub(super) fn mailer(&self) -> &dyn Mailer {
        self.mailer.as_ref()
    }

    pub(super) fn breach(&self) -> &BreachChecker {
        &self.breach
    }

    pub(super) fn pruner(&self) -> &dyn TokenPruner {
        self.pruner.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::prune::NeverPruner;
    use crate::mail::LogMailer;
    use secrecy::SecretString;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new(
            "http://localhost:8090".to_string(),
            "http://localhost:3000".to_string(),
        );

        assert_eq!(config.access_token_ttl_seconds(), 900);
        assert_eq!(config.refresh_token_ttl_seconds(), 2_592_000);
        assert_eq!(config.ticket_ttl_seconds(), 3600);
        assert_eq!(config.magic_link_ttl_seconds(), 3600);
        assert_eq!(config.password_min_length(), 9);
        assert_eq!(config.default_role(), "user");
        assert_eq!(config.anonymous_role(), "anonymous");
        assert!(!config.require_email_verification());
        assert!(!config.mfa_enabled());

        let config = config
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(120)
            .with_ticket_ttl_seconds(180)
            .with_magic_link_ttl_seconds(240)
            .with_password_min_length(12)
            .with_require_email_verification(true)
            .with_mfa_enabled(true);

        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 120);
        assert_eq!(config.ticket_ttl_seconds(), 180);
        assert_eq!(config.magic_link_ttl_seconds(), 240);
        assert_eq!(config.password_min_length(), 12);
        assert!(config.require_email_verification());
        assert!(config.mfa_enabled());
    }

    #[test]
    fn empty_role_list_keeps_defaults() {
        let config = AuthConfig::new(
            "http://localhost:8090".to_string(),
            "http://localhost:3000".to_string(),
        )
        .with_allowed_roles(Vec::new());
        assert_eq!(config.allowed_roles(), ["user", "me"]);
    }

    #[test]
    fn auth_state_exposes_collaborators() {
        let config = AuthConfig::new(
            "http://localhost:8090".to_string(),
            "http://localhost:3000".to_string(),
        );
        let jwt = JwtKeys::from_secret(&SecretString::from(
            "0123456789abcdef0123456789abcdef".to_string(),
        ));
        let state = AuthState::new(
            config,
            jwt,
            Arc::new(LogMailer),
            BreachChecker::Disabled,
            Arc::new(NeverPruner),
        );
        assert_eq!(state.config().client_url(), "http://localhost:3000");
        assert!(!state.pruner().should_prune());
    }
}
