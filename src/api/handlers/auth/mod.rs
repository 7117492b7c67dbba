//! Auth handlers and supporting modules.
//!
//! This module coordinates the credential and session lifecycle: registration,
//! sign-in (password, anonymous, magic link, TOTP challenge), refresh-token
//! rotation and revocation, ticket-driven email flows, and anonymous-user
//! promotion.
//!
//! ## Single-use guarantees
//!
//! Tickets and refresh tokens are stored as SHA-256 digests and consumed or
//! rotated through conditional statements, so concurrent attempts with the
//! same value succeed at most once. Ticket consumption always shares a
//! transaction with the state change it authorizes.
//!
//! ## Configuration
//!
//! All policy toggles live in [`AuthConfig`], passed in at construction. No
//! handler reads process-wide state, which keeps the gates testable without
//! environment mutation.

pub(crate) mod breach;
pub(crate) mod credentials;
mod errors;
pub(crate) mod jwt;
pub(crate) mod mfa;
pub(crate) mod principal;
pub(crate) mod prune;
pub(crate) mod sessions;
pub(crate) mod signin;
pub(crate) mod signup;
mod state;
mod storage;
pub(crate) mod tickets;
pub(crate) mod token;
pub(crate) mod types;
pub(crate) mod user;
mod utils;
pub(crate) mod verify;

pub use breach::BreachChecker;
pub use errors::{ApiError, ErrorResponse};
pub use jwt::JwtKeys;
pub use prune::{AlwaysPruner, NeverPruner, SampledPruner, TokenPruner};
pub use state::{AuthConfig, AuthState};
pub use tickets::TicketKind;

#[cfg(test)]
pub(crate) mod tests;
