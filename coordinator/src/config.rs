//! Coordinator configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use txncoord_common::constants;

/// When a participant whose last send failed retryably is contacted again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Only when that participant sends another vote.
    OnDuplicateVote,
    /// On a background timer with exponential backoff.
    Continuous,
}

impl FromStr for RetryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on-vote" => Ok(RetryMode::OnDuplicateVote),
            "continuous" => Ok(RetryMode::Continuous),
            other => Err(format!("Unknown retry mode: {other}")),
        }
    }
}

impl fmt::Display for RetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryMode::OnDuplicateVote => write!(f, "on-vote"),
            RetryMode::Continuous => write!(f, "continuous"),
        }
    }
}

/// Retry configuration for decision delivery.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry strategy.
    pub mode: RetryMode,
    /// Delay before the first background retry.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between background retries.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            mode: RetryMode::Continuous,
            initial_backoff: constants::initial_retry_backoff(),
            max_backoff: constants::max_retry_backoff(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Main coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline applied when a creator does not supply one.
    pub default_commit_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Enable metrics export.
    pub metrics_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_commit_timeout: constants::default_commit_timeout(),
            retry: RetryConfig::default(),
            metrics_enabled: true,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("TXNCOORD_COMMIT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.default_commit_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(mode) = std::env::var("TXNCOORD_RETRY_MODE") {
            if let Ok(mode) = mode.parse() {
                config.retry.mode = mode;
            }
        }

        if let Ok(ms) = std::env::var("TXNCOORD_RETRY_BACKOFF_MS") {
            if let Ok(ms) = ms.parse() {
                config.retry.initial_backoff = Duration::from_millis(ms);
            }
        }

        if let Ok(ms) = std::env::var("TXNCOORD_RETRY_MAX_BACKOFF_MS") {
            if let Ok(ms) = ms.parse() {
                config.retry.max_backoff = Duration::from_millis(ms);
            }
        }

        if let Ok(enabled) = std::env::var("TXNCOORD_METRICS_ENABLED") {
            config.metrics_enabled = enabled.parse().unwrap_or(true);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_commit_timeout.is_zero() {
            return Err("Commit timeout cannot be zero".to_string());
        }

        if self.retry.initial_backoff.is_zero() {
            return Err("Retry backoff cannot be zero".to_string());
        }

        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err("Initial retry backoff cannot exceed max backoff".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.mode, RetryMode::Continuous);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = CoordinatorConfig::default();
        config.retry.initial_backoff = Duration::from_secs(10);
        config.retry.max_backoff = Duration::from_secs(1);
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.default_commit_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_mode_parse() {
        assert_eq!("on-vote".parse::<RetryMode>(), Ok(RetryMode::OnDuplicateVote));
        assert_eq!("continuous".parse::<RetryMode>(), Ok(RetryMode::Continuous));
        assert!("sometimes".parse::<RetryMode>().is_err());
        assert_eq!(RetryMode::OnDuplicateVote.to_string(), "on-vote");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            mode: RetryMode::Continuous,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        };

        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(800));
        assert_eq!(retry.backoff(4), Duration::from_millis(1000));
        assert_eq!(retry.backoff(200), Duration::from_millis(1000));
    }
}
