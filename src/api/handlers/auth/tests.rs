//! Shared test fixtures and lifecycle-model tests for the auth engine.

use super::breach::BreachChecker;
use super::jwt::JwtKeys;
use super::prune::NeverPruner;
use super::state::{AuthConfig, AuthState};
use crate::mail::LogMailer;
use secrecy::SecretString;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Pool that never connects; handler tests must fail before touching it.
pub(crate) fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://postgres@localhost/postgres")
        .expect("lazy pool")
}

pub(crate) fn test_config() -> AuthConfig {
    AuthConfig::new(
        "http://localhost:8090".to_string(),
        "http://localhost:3000".to_string(),
    )
}

pub(crate) fn test_state() -> Arc<AuthState> {
    test_state_with(test_config())
}

pub(crate) fn test_state_with(config: AuthConfig) -> Arc<AuthState> {
    let jwt = JwtKeys::from_secret(&SecretString::from(
        "0123456789abcdef0123456789abcdef".to_string(),
    ));
    Arc::new(AuthState::new(
        config,
        jwt,
        Arc::new(LogMailer),
        BreachChecker::Fixed(vec!["correct horse battery staple".to_string()]),
        Arc::new(NeverPruner),
    ))
}

/// In-memory model of the ticket table's single-use semantics.
///
/// The real guard is the conditional delete in storage; this model pins the
/// behavior the SQL must provide: one active ticket per (user, purpose),
/// at-most-once consumption, and strict expiry.
mod ticket_model {
    use crate::api::handlers::auth::utils::hash_token;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct TicketTable {
        // (user, purpose) -> (digest, expires_at)
        rows: HashMap<(Uuid, &'static str), (Vec<u8>, i64)>,
        now: i64,
        counter: u64,
    }

    impl TicketTable {
        fn new() -> Self {
            Self {
                rows: HashMap::new(),
                now: 0,
                counter: 0,
            }
        }

        fn issue(&mut self, user: Uuid, purpose: &'static str, ttl: i64) -> String {
            self.counter += 1;
            let raw = format!("{purpose}:token-{}", self.counter);
            self.rows
                .insert((user, purpose), (hash_token(&raw), self.now + ttl));
            raw
        }

        fn consume(&mut self, raw: &str, purpose: &'static str) -> Option<Uuid> {
            let digest = hash_token(raw);
            let mut found = None;
            for (key, (row_digest, expires_at)) in &self.rows {
                if key.1 == purpose && *row_digest == digest && self.now < *expires_at {
                    found = Some(*key);
                    break;
                }
            }
            let key = found?;
            self.rows.remove(&key);
            Some(key.0)
        }
    }

    #[test]
    fn second_consumption_always_fails() {
        let user = Uuid::new_v4();
        let mut table = TicketTable::new();
        let raw = table.issue(user, "verify-email", 3600);

        assert_eq!(table.consume(&raw, "verify-email"), Some(user));
        assert_eq!(table.consume(&raw, "verify-email"), None);
    }

    #[test]
    fn expiry_edges() {
        let user = Uuid::new_v4();
        let mut table = TicketTable::new();

        let raw = table.issue(user, "reset-password", 3600);
        table.now = 3599;
        assert_eq!(table.consume(&raw, "reset-password"), Some(user));

        let raw = table.issue(user, "reset-password", 3600);
        table.now += 3601;
        assert_eq!(table.consume(&raw, "reset-password"), None);
    }

    #[test]
    fn wrong_purpose_fails() {
        let user = Uuid::new_v4();
        let mut table = TicketTable::new();
        let raw = table.issue(user, "verify-email", 3600);
        assert_eq!(table.consume(&raw, "reset-password"), None);
        // Still consumable under its own purpose.
        assert_eq!(table.consume(&raw, "verify-email"), Some(user));
    }

    #[test]
    fn reissue_invalidates_prior_value() {
        let user = Uuid::new_v4();
        let mut table = TicketTable::new();
        let first = table.issue(user, "verify-email", 3600);
        let second = table.issue(user, "verify-email", 3600);

        assert_eq!(table.consume(&first, "verify-email"), None);
        assert_eq!(table.consume(&second, "verify-email"), Some(user));
    }

    #[test]
    fn purposes_are_independent_per_user() {
        let user = Uuid::new_v4();
        let mut table = TicketTable::new();
        let verify = table.issue(user, "verify-email", 3600);
        let reset = table.issue(user, "reset-password", 3600);

        assert_eq!(table.consume(&verify, "verify-email"), Some(user));
        assert_eq!(table.consume(&reset, "reset-password"), Some(user));
    }
}
