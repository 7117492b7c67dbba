//! API handlers for the credential and session lifecycle engine.
//!
//! Route handlers are thin: they validate the input shape and dispatch into
//! the auth modules, which own policy gates, ticket and session semantics,
//! and storage access.

pub mod auth;
pub mod health;
pub mod root;
