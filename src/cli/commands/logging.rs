use clap::{Arg, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("ALIRO_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::validator_log_level;

    fn parse(level: &str) -> Result<Option<u8>, clap::Error> {
        let command = clap::Command::new("test").arg(
            clap::Arg::new("level")
                .long("level")
                .value_parser(validator_log_level()),
        );
        let matches = command.try_get_matches_from(["test", "--level", level])?;
        Ok(matches.get_one::<u8>("level").copied())
    }

    #[test]
    fn log_level_names_parse() {
        for (name, expected) in [
            ("error", 0u8),
            ("warn", 1),
            ("info", 2),
            ("debug", 3),
            ("trace", 4),
        ] {
            assert_eq!(parse(name).ok().flatten(), Some(expected));
        }
    }

    #[test]
    fn numeric_log_levels_parse() {
        assert_eq!(parse("0").ok().flatten(), Some(0));
        assert_eq!(parse("5").ok().flatten(), Some(5));
    }

    #[test]
    fn invalid_log_level_rejected() {
        assert!(parse("verbose").is_err());
        assert!(parse("6").is_err());
    }
}
