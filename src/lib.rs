//! # Aliro (Credential & Session Lifecycle Engine)
//!
//! `aliro` turns an email/password (or passwordless, TOTP, anonymous) identity
//! claim into a live, renewable session, and manages the security-sensitive
//! state transitions around it: registration, email verification, password
//! reset, email change, TOTP enrollment, anonymous-user deanonymization, and
//! session revocation.
//!
//! ## Tickets
//!
//! Every email-driven transition is authorized by a **ticket**: a single-use,
//! purpose-scoped, time-bounded capability value. Only a SHA-256 digest of the
//! ticket is stored; consumption is a conditional delete executed in the same
//! transaction as the state change it authorizes, so the same value can never
//! be consumed twice, even under concurrent requests.
//!
//! ## Sessions
//!
//! A session is a short-lived signed access token (identity and role claims)
//! plus a long-lived refresh token row. Refresh tokens rotate on every use via
//! a conditional update, narrowing the replay window; revocation deletes one
//! token or all of a user's tokens and is idempotent. Expired rows are pruned
//! opportunistically by a small random fraction of refresh calls.
//!
//! ## Policy gates
//!
//! Passwords are rejected when too short or present in the public
//! breached-password corpus, before hashing (Argon2id, per-call random salt).
//! Requested roles must satisfy `default role ∈ allowed roles ⊆ configured
//! allowed roles` before any user row is created.

pub mod api;
pub mod cli;
pub mod mail;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
