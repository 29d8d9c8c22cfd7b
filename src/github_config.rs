//! Environment-driven configuration helpers.
//!
//! Every `*::from_env()` in this crate goes through these helpers, so that
//! missing and malformed variables are reported the same way everywhere.

use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Error loading configuration from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("missing required env var: {0}")]
    MissingEnv(&'static str),
    /// Invalid environment variable value.
    #[error("invalid env var {key}={value:?}: {reason}")]
    InvalidEnv {
        /// The environment variable key.
        key: &'static str,
        /// The environment variable value.
        value: String,
        /// The reason for invalidity.
        reason: &'static str,
    },
}

/// Load `.env` from the current directory if present. A missing file is not an error.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

pub(crate) fn must_env(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingEnv(key))
}

pub(crate) fn opt_env(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn string_env(key: &'static str, default: &str) -> String {
    opt_env(key).unwrap_or_else(|| default.to_string())
}

fn parse_number<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|v| {
        v.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
            key,
            value: v,
            reason: "expected an unsigned integer",
        })
    })
    .transpose()
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

pub(crate) fn parse_u64_env(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    Ok(parse_number(key, opt_env(key))?.unwrap_or(default))
}

pub(crate) fn parse_opt_u64_env(key: &'static str) -> Result<Option<u64>, ConfigError> {
    parse_number(key, opt_env(key))
}

pub(crate) fn parse_u32_env(key: &'static str, default: u32) -> Result<u32, ConfigError> {
    Ok(parse_number(key, opt_env(key))?.unwrap_or(default))
}

pub(crate) fn parse_bool_env(key: &'static str, default: bool) -> bool {
    opt_env(key).map_or(default, |v| parse_flag(&v))
}

pub(crate) fn split_csv_env(key: &'static str, default: &str) -> Vec<String> {
    let raw = string_env(key, default);
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_var() {
        assert_eq!(
            must_env("GH_RECONCILER_TEST_SURELY_UNSET"),
            Err(ConfigError::MissingEnv("GH_RECONCILER_TEST_SURELY_UNSET"))
        );
    }

    #[test]
    fn numeric_defaults_and_errors() {
        assert_eq!(parse_u64_env("GH_RECONCILER_TEST_U64_UNSET", 42), Ok(42));
        assert_eq!(parse_opt_u64_env("GH_RECONCILER_TEST_U64_UNSET"), Ok(None));

        let err = parse_number::<u32>("GITHUB_POLL_MAX_ATTEMPTS", Some("nope".into())).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                key: "GITHUB_POLL_MAX_ATTEMPTS",
                value: "nope".into(),
                reason: "expected an unsigned integer",
            }
        );
        assert_eq!(
            parse_number::<u64>("GITHUB_POLL_TIMEOUT_MS", Some(" 1500 ".into())),
            Ok(Some(1500))
        );
    }

    #[test]
    fn csv_and_flags() {
        assert_eq!(
            split_csv_env("GH_RECONCILER_TEST_CSV_UNSET", "push, pull_request,,"),
            vec!["push".to_string(), "pull_request".to_string()]
        );
        assert!(parse_flag("YES"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("off"));
        assert!(!parse_bool_env("GH_RECONCILER_TEST_BOOL_UNSET", false));
    }
}
