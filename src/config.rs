use std::env;

use crate::backend::RetryPolicy;

/// Enables per-call tracing when set to a truthy value.
pub const VERBOSE_VAR: &str = "TRACEGATE_VERBOSE";

/// Set to `esrch` to retry requests that fail with `ESRCH`.
pub const RETRY_VAR: &str = "TRACEGATE_RETRY";

/// Gateway configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Config {
    /// Log every call made through the gateway, not just the failed ones.
    pub verbose: bool,

    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Self {
        let verbose = env::var(VERBOSE_VAR).map(|v| parse_flag(&v)).unwrap_or(false);
        let retry = env::var(RETRY_VAR).map(|v| parse_retry(&v)).unwrap_or_default();

        Self { verbose, retry }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_retry(value: &str) -> RetryPolicy {
    if value.trim().eq_ignore_ascii_case("esrch") {
        RetryPolicy::on_esrch()
    } else {
        RetryPolicy::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.verbose);
        assert_eq!(config.retry, RetryPolicy::Never);
    }

    #[test]
    fn test_parse_flag() {
        for v in &["1", "true", "TRUE", " yes ", "on"] {
            assert!(parse_flag(v), "{:?}", v);
        }

        for v in &["", "0", "false", "off", "verbose"] {
            assert!(!parse_flag(v), "{:?}", v);
        }
    }

    #[test]
    fn test_parse_retry() {
        assert_eq!(parse_retry("esrch"), RetryPolicy::on_esrch());
        assert_eq!(parse_retry("ESRCH"), RetryPolicy::on_esrch());
        assert_eq!(parse_retry("always"), RetryPolicy::Never);
        assert_eq!(parse_retry(""), RetryPolicy::Never);
    }
}
