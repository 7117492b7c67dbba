//! Breached-password corpus lookup.
//!
//! Uses the public k-anonymity range API: only the first five characters of
//! the candidate's SHA-1 digest leave the process. A lookup failure is an
//! error, not a pass; the policy gate must not silently degrade.

use anyhow::{Context, Result};
use sha1::{Digest, Sha1};
use std::time::Duration;

const RANGE_API_BASE: &str = "https://api.pwnedpasswords.com/range";
const LOOKUP_TIMEOUT_SECONDS: u64 = 5;

/// Corpus lookup strategy, injected into the credential validator.
pub enum BreachChecker {
    /// No lookup; every password passes this gate.
    Disabled,
    /// k-anonymity range API client.
    RangeApi(reqwest::Client),
    /// Fixed corpus, used in tests to force deterministic outcomes.
    #[cfg(test)]
    Fixed(Vec<String>),
}

impl BreachChecker {
    /// Build the range API client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn range_api() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECONDS))
            .build()
            .context("failed to build breach lookup client")?;
        Ok(Self::RangeApi(client))
    }

    /// Check whether a password appears in the breached corpus.
    ///
    /// # Errors
    /// Returns an error if the corpus is unreachable or responds malformed.
    pub async fn is_breached(&self, password: &str) -> Result<bool> {
        match self {
            Self::Disabled => Ok(false),
            Self::RangeApi(client) => {
                let hash = hex::encode(Sha1::digest(password.as_bytes())).to_uppercase();
                let (prefix, suffix) = hash.split_at(5);

                let body = client
                    .get(format!("{RANGE_API_BASE}/{prefix}"))
                    .send()
                    .await
                    .context("breach corpus request failed")?
                    .error_for_status()
                    .context("breach corpus returned an error status")?
                    .text()
                    .await
                    .context("failed to read breach corpus response")?;

                Ok(suffix_in_range(&body, suffix))
            }
            #[cfg(test)]
            Self::Fixed(corpus) => Ok(corpus.iter().any(|entry| entry == password)),
        }
    }
}

/// Parse a `SUFFIX:COUNT` range response and look for the digest suffix.
fn suffix_in_range(body: &str, suffix: &str) -> bool {
    body.lines().any(|line| {
        line.split_once(':')
            .is_some_and(|(line_suffix, _count)| line_suffix.eq_ignore_ascii_case(suffix))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_digest_format() {
        // "password" SHA-1 = 5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8
        let hash = hex::encode(Sha1::digest(b"password")).to_uppercase();
        assert_eq!(hash, "5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8");
        assert_eq!(&hash[..5], "5BAA6");
    }

    #[test]
    fn suffix_match_in_range_body() {
        let body = "0018A45C4D1DEF81644B54AB7F969B88D65:1\n\
                    1E4C9B93F3F0682250B6CF8331B7EE68FD8:3730471\n\
                    011053FD0102E94D6AE2F8B83D76FAF94F6:1";
        assert!(suffix_in_range(body, "1E4C9B93F3F0682250B6CF8331B7EE68FD8"));
        assert!(!suffix_in_range(body, "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"));
    }

    #[tokio::test]
    async fn disabled_checker_passes_everything() {
        let checker = BreachChecker::Disabled;
        assert!(!checker.is_breached("password").await.expect("check"));
    }

    #[tokio::test]
    async fn fixed_checker_matches_exact_entries() {
        let checker = BreachChecker::Fixed(vec!["hunter2".to_string()]);
        assert!(checker.is_breached("hunter2").await.expect("check"));
        assert!(!checker.is_breached("Str0ng!Pass").await.expect("check"));
    }
}
