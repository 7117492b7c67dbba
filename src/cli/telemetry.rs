//! Tracing initialization for the CLI.
//!
//! Log level comes from the `-v` verbosity flags (or `ALIRO_LOG_LEVEL`); the
//! output format defaults to compact text and switches to JSON when
//! `ALIRO_LOG_FORMAT=json` is set, so structured logs can be shipped as-is.

use anyhow::Result;
use std::env::var;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn build_filter(level: Option<Level>) -> EnvFilter {
    level.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        |level| {
            EnvFilter::new(format!(
                "{}={level},tower_http={level}",
                env!("CARGO_PKG_NAME")
            ))
        },
    )
}

/// Initialize the tracing subscriber.
///
/// # Errors
/// Returns an error if a global subscriber is already installed.
pub fn init(level: Option<Level>) -> Result<()> {
    let filter = build_filter(level);

    let json = var("ALIRO_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()?;
    }

    Ok(())
}
