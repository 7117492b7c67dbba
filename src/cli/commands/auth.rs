//! Auth-related CLI arguments: URLs, token lifetimes, policy toggles, roles.

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

pub const ARG_SERVER_URL: &str = "server-url";
pub const ARG_CLIENT_URL: &str = "client-url";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_TICKET_TTL: &str = "ticket-ttl";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_DEFAULT_ROLE: &str = "default-role";
pub const ARG_ALLOWED_ROLES: &str = "allowed-roles";
pub const ARG_ALLOWED_EMAILS: &str = "allowed-emails";
pub const ARG_ALLOWED_EMAIL_DOMAINS: &str = "allowed-email-domains";
pub const ARG_REQUIRE_EMAIL_VERIFICATION: &str = "require-email-verification";
pub const ARG_DISABLE_SIGNUP: &str = "disable-signup";
pub const ARG_DISABLE_NEW_USERS: &str = "disable-new-users";
pub const ARG_ENABLE_ANONYMOUS: &str = "enable-anonymous-users";
pub const ARG_ENABLE_MFA: &str = "enable-mfa";
pub const ARG_DISABLE_BREACH_CHECK: &str = "disable-breach-check";
pub const ARG_PRUNE_PROBABILITY: &str = "prune-probability";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SERVER_URL)
                .long(ARG_SERVER_URL)
                .help("Public base URL of this service, used in emailed action links")
                .default_value("http://localhost:8090")
                .env("ALIRO_SERVER_URL"),
        )
        .arg(
            Arg::new(ARG_CLIENT_URL)
                .long(ARG_CLIENT_URL)
                .help("Frontend base URL, used for CORS and redirect targets")
                .default_value("http://localhost:3000")
                .env("ALIRO_CLIENT_URL"),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign access tokens")
                .env("ALIRO_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token lifetime in seconds")
                .default_value("900")
                .env("ALIRO_ACCESS_TOKEN_TTL")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token lifetime in seconds")
                .default_value("2592000")
                .env("ALIRO_REFRESH_TOKEN_TTL")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TICKET_TTL)
                .long(ARG_TICKET_TTL)
                .help("Ticket lifetime in seconds for email-driven flows")
                .default_value("3600")
                .env("ALIRO_TICKET_TTL")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum accepted password length")
                .default_value("9")
                .env("ALIRO_PASSWORD_MIN_LENGTH")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_DEFAULT_ROLE)
                .long(ARG_DEFAULT_ROLE)
                .help("Role assigned when signup options omit one")
                .default_value("user")
                .env("ALIRO_DEFAULT_ROLE"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_ROLES)
                .long(ARG_ALLOWED_ROLES)
                .help("Comma-separated set of roles users may request")
                .default_value("user,me")
                .env("ALIRO_ALLOWED_ROLES"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_EMAILS)
                .long(ARG_ALLOWED_EMAILS)
                .help("Comma-separated allow-list of emails permitted to sign up (empty allows all)")
                .env("ALIRO_ALLOWED_EMAILS"),
        )
        .arg(
            Arg::new(ARG_ALLOWED_EMAIL_DOMAINS)
                .long(ARG_ALLOWED_EMAIL_DOMAINS)
                .help("Comma-separated allow-list of email domains permitted to sign up")
                .env("ALIRO_ALLOWED_EMAIL_DOMAINS"),
        )
        .arg(
            Arg::new(ARG_REQUIRE_EMAIL_VERIFICATION)
                .long(ARG_REQUIRE_EMAIL_VERIFICATION)
                .help("Require a verified email before issuing sessions")
                .env("ALIRO_REQUIRE_EMAIL_VERIFICATION")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_DISABLE_SIGNUP)
                .long(ARG_DISABLE_SIGNUP)
                .help("Reject new registrations")
                .env("ALIRO_DISABLE_SIGNUP")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_DISABLE_NEW_USERS)
                .long(ARG_DISABLE_NEW_USERS)
                .help("Create new users in the disabled state")
                .env("ALIRO_DISABLE_NEW_USERS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_ENABLE_ANONYMOUS)
                .long(ARG_ENABLE_ANONYMOUS)
                .help("Allow anonymous sign-in and later deanonymization")
                .env("ALIRO_ENABLE_ANONYMOUS_USERS")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_ENABLE_MFA)
                .long(ARG_ENABLE_MFA)
                .help("Enable TOTP multi-factor enrollment and challenges")
                .env("ALIRO_ENABLE_MFA")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_DISABLE_BREACH_CHECK)
                .long(ARG_DISABLE_BREACH_CHECK)
                .help("Skip the breached-password corpus lookup")
                .env("ALIRO_DISABLE_BREACH_CHECK")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_PRUNE_PROBABILITY)
                .long(ARG_PRUNE_PROBABILITY)
                .help("Fraction of refresh calls that trigger expired-token pruning")
                .default_value("0.1")
                .env("ALIRO_PRUNE_PROBABILITY")
                .value_parser(clap::value_parser!(f64)),
        )
}

/// Parsed auth options, consumed by the server action.
#[derive(Debug)]
pub struct Options {
    pub server_url: String,
    pub client_url: String,
    pub jwt_secret: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub ticket_ttl_seconds: i64,
    pub password_min_length: usize,
    pub default_role: String,
    pub allowed_roles: Vec<String>,
    pub allowed_emails: Vec<String>,
    pub allowed_email_domains: Vec<String>,
    pub require_email_verification: bool,
    pub disable_signup: bool,
    pub disable_new_users: bool,
    pub anonymous_users_enabled: bool,
    pub mfa_enabled: bool,
    pub breach_check_enabled: bool,
    pub prune_probability: f64,
}

impl Options {
    /// Extract auth options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let server_url = matches
            .get_one::<String>(ARG_SERVER_URL)
            .cloned()
            .context("missing required argument: --server-url")?;
        let client_url = matches
            .get_one::<String>(ARG_CLIENT_URL)
            .cloned()
            .context("missing required argument: --client-url")?;
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .cloned()
            .context("missing required argument: --jwt-secret")?;

        Ok(Self {
            server_url,
            client_url,
            jwt_secret,
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .unwrap_or(900),
            refresh_token_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL)
                .copied()
                .unwrap_or(2_592_000),
            ticket_ttl_seconds: matches
                .get_one::<i64>(ARG_TICKET_TTL)
                .copied()
                .unwrap_or(3600),
            password_min_length: matches
                .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                .copied()
                .unwrap_or(9),
            default_role: matches
                .get_one::<String>(ARG_DEFAULT_ROLE)
                .cloned()
                .unwrap_or_else(|| "user".to_string()),
            allowed_roles: split_list(matches.get_one::<String>(ARG_ALLOWED_ROLES)),
            allowed_emails: split_list(matches.get_one::<String>(ARG_ALLOWED_EMAILS)),
            allowed_email_domains: split_list(matches.get_one::<String>(ARG_ALLOWED_EMAIL_DOMAINS)),
            require_email_verification: matches.get_flag(ARG_REQUIRE_EMAIL_VERIFICATION),
            disable_signup: matches.get_flag(ARG_DISABLE_SIGNUP),
            disable_new_users: matches.get_flag(ARG_DISABLE_NEW_USERS),
            anonymous_users_enabled: matches.get_flag(ARG_ENABLE_ANONYMOUS),
            mfa_enabled: matches.get_flag(ARG_ENABLE_MFA),
            breach_check_enabled: !matches.get_flag(ARG_DISABLE_BREACH_CHECK),
            prune_probability: matches
                .get_one::<f64>(ARG_PRUNE_PROBABILITY)
                .copied()
                .unwrap_or(0.1),
        })
    }
}

fn split_list(value: Option<&String>) -> Vec<String> {
    value
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> clap::ArgMatches {
        let command = with_args(clap::Command::new("aliro"));
        let mut full = vec!["aliro", "--jwt-secret", "0123456789abcdef0123456789abcdef"];
        full.extend_from_slice(args);
        command.get_matches_from(full)
    }

    #[test]
    fn defaults_applied() {
        temp_env::with_vars(
            [
                ("ALIRO_ALLOWED_ROLES", None::<&str>),
                ("ALIRO_ALLOWED_EMAILS", None),
                ("ALIRO_ENABLE_MFA", None),
            ],
            || {
                let options = Options::parse(&matches(&[])).expect("options");
                assert_eq!(options.access_token_ttl_seconds, 900);
                assert_eq!(options.refresh_token_ttl_seconds, 2_592_000);
                assert_eq!(options.ticket_ttl_seconds, 3600);
                assert_eq!(options.password_min_length, 9);
                assert_eq!(options.default_role, "user");
                assert_eq!(options.allowed_roles, vec!["user", "me"]);
                assert!(options.allowed_emails.is_empty());
                assert!(!options.mfa_enabled);
                assert!(options.breach_check_enabled);
            },
        );
    }

    #[test]
    fn lists_are_split_and_trimmed() {
        let options = Options::parse(&matches(&[
            "--allowed-roles",
            "user, editor ,me",
            "--allowed-email-domains",
            "example.com, acme.dev",
        ]))
        .expect("options");
        assert_eq!(options.allowed_roles, vec!["user", "editor", "me"]);
        assert_eq!(options.allowed_email_domains, vec!["example.com", "acme.dev"]);
    }

    #[test]
    fn toggles_flip() {
        let options = Options::parse(&matches(&[
            "--disable-signup",
            "--enable-mfa",
            "--disable-breach-check",
        ]))
        .expect("options");
        assert!(options.disable_signup);
        assert!(options.mfa_enabled);
        assert!(!options.breach_check_enabled);
    }
}
