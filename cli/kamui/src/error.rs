//! Command-line usage errors

use thiserror::Error;

/// Problems with the arguments themselves, reported before anything runs.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("flag {0} requires a value")]
    MissingValue(String),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_name_the_offending_argument() {
        assert_eq!(
            UsageError::UnknownCommand("deploy".into()).to_string(),
            "unknown command: deploy"
        );
        assert_eq!(
            UsageError::MissingValue("--config".into()).to_string(),
            "flag --config requires a value"
        );
        assert!(
            UsageError::UnknownFlag("--verbose".into())
                .to_string()
                .contains("--verbose")
        );
    }
}
