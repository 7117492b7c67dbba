//! Mail dispatch boundary for ticket-driven flows.
//!
//! Handlers build a [`MailMessage`] with a template name, recipient, and the
//! template locals (action link, display name, ticket), then hand it to a
//! [`Mailer`]. The mailer decides how to deliver (SMTP, API, etc.) and returns
//! `Ok`/`Err`; a delivery error fails the surrounding request so the caller
//! can retry and obtain a fresh ticket instead of waiting on mail that never
//! arrives.
//!
//! The default for local dev is [`LogMailer`], which logs and returns `Ok(())`.

use anyhow::Result;
use serde::Serialize;
use tracing::info;

/// Templates the engine can dispatch. One per ticket-driven transition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TemplateName {
    VerifyEmail,
    PasswordReset,
    EmailChange,
    MagicLink,
}

impl TemplateName {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VerifyEmail => "verify-email",
            Self::PasswordReset => "password-reset",
            Self::EmailChange => "email-change",
            Self::MagicLink => "magic-link",
        }
    }
}

/// Locals handed to the template renderer.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TemplateData {
    pub link: String,
    pub display_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_email: Option<String>,
    pub client_url: String,
}

/// A single outbound message.
#[derive(Clone, Debug)]
pub struct MailMessage {
    pub to: String,
    pub locale: String,
    pub template: TemplateName,
    pub data: TemplateData,
}

/// Mail delivery abstraction.
pub trait Mailer: Send + Sync {
    /// Deliver a message or return an error to fail the surrounding request.
    ///
    /// # Errors
    /// Returns an error when the message could not be handed off for delivery.
    fn send(&self, message: &MailMessage) -> Result<()>;
}

/// Local dev mailer that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            to = %message.to,
            locale = %message.locale,
            template = %message.template.as_str(),
            link = %message.data.link,
            "mail send stub"
        );
        Ok(())
    }
}

/// Build the action link included in outbound emails.
///
/// The link lands on this service's `/verify` endpoint, which consumes the
/// ticket and redirects to the client.
#[must_use]
pub fn build_action_link(server_url: &str, ticket: &str, redirect_to: &str) -> String {
    let base = server_url.trim_end_matches('/');
    format!("{base}/verify?ticket={ticket}&redirectTo={redirect_to}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_names_are_stable() {
        assert_eq!(TemplateName::VerifyEmail.as_str(), "verify-email");
        assert_eq!(TemplateName::PasswordReset.as_str(), "password-reset");
        assert_eq!(TemplateName::EmailChange.as_str(), "email-change");
        assert_eq!(TemplateName::MagicLink.as_str(), "magic-link");
    }

    #[test]
    fn action_link_trims_trailing_slash() {
        let link = build_action_link("https://auth.aliro.dev/", "abc", "https://app.aliro.dev");
        assert_eq!(
            link,
            "https://auth.aliro.dev/verify?ticket=abc&redirectTo=https://app.aliro.dev"
        );
    }

    #[test]
    fn log_mailer_accepts_messages() {
        let mailer = LogMailer;
        let message = MailMessage {
            to: "alice@example.com".to_string(),
            locale: "en".to_string(),
            template: TemplateName::VerifyEmail,
            data: TemplateData {
                link: "https://auth.aliro.dev/verify?ticket=abc".to_string(),
                display_name: "alice@example.com".to_string(),
                email: "alice@example.com".to_string(),
                new_email: None,
                client_url: "https://app.aliro.dev".to_string(),
            },
        };
        assert!(mailer.send(&message).is_ok());
    }
}
