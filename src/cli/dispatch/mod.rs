//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8090);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        auth: auth_opts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_action_built_from_args() {
        let command = crate::cli::commands::new();
        let matches = command.get_matches_from(vec![
            "aliro",
            "--dsn",
            "postgres://user@localhost:5432/aliro",
            "--jwt-secret",
            "0123456789abcdef0123456789abcdef",
        ]);
        let action = handler(&matches).expect("action");
        let Action::Server(args) = action;
        assert_eq!(args.port, 8090);
        assert_eq!(args.dsn, "postgres://user@localhost:5432/aliro");
        assert_eq!(args.auth.default_role, "user");
    }

    #[test]
    fn jwt_secret_required() {
        temp_env::with_vars([("ALIRO_JWT_SECRET", None::<&str>)], || {
            let command = crate::cli::commands::new();
            let result = command.try_get_matches_from(vec![
                "aliro",
                "--dsn",
                "postgres://user@localhost:5432/aliro",
            ]);
            assert!(result.is_err());
        });
    }
}
