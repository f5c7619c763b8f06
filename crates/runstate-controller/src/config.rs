//! Configuration for the reactive controller and the pull collector
//!
//! Defines reconcile intervals, source timeouts, retry backoff and the pull
//! cache staleness window.

use crate::ControllerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the reactive controller
///
/// # Examples
///
/// ```
/// use runstate_controller::ControllerConfig;
///
/// let config = ControllerConfig::default();
/// assert_eq!(config.reconcile_interval_secs, 30);
/// assert_eq!(config.reconcile_interval(), std::time::Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How often to list every entity and reconcile missing ones (seconds)
    /// Default: 30
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Upper bound for a single list/get call (seconds)
    /// Default: 10
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,

    /// How long terminating markers and not-found tombstones are kept (seconds)
    /// Must exceed the source timeout so in-flight stale updates are fenced
    /// Default: 300
    #[serde(default = "default_tombstone_ttl")]
    pub tombstone_ttl_secs: u64,

    /// First retry delay after a transient failure (milliseconds)
    /// Default: 500
    #[serde(default = "default_retry_base")]
    pub retry_base_millis: u64,

    /// Retry delay cap (seconds)
    /// Default: 60
    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,

    /// Retries per reconciliation before leaving it to the next resync
    /// Default: 5
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_source_timeout() -> u64 {
    10
}

fn default_tombstone_ttl() -> u64 {
    300
}

fn default_retry_base() -> u64 {
    500
}

fn default_retry_max() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    5
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            source_timeout_secs: default_source_timeout(),
            tombstone_ttl_secs: default_tombstone_ttl(),
            retry_base_millis: default_retry_base(),
            retry_max_secs: default_retry_max(),
            max_retries: default_max_retries(),
        }
    }
}

impl ControllerConfig {
    /// Check invariants between fields
    ///
    /// # Errors
    /// Returns [`ControllerError::Config`] describing the first violation
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.reconcile_interval_secs == 0 {
            return Err(ControllerError::Config(
                "reconcile_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.source_timeout_secs == 0 {
            return Err(ControllerError::Config(
                "source_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.tombstone_ttl_secs <= self.source_timeout_secs {
            return Err(ControllerError::Config(format!(
                "tombstone_ttl_secs ({}) must exceed source_timeout_secs ({})",
                self.tombstone_ttl_secs, self.source_timeout_secs
            )));
        }
        Ok(())
    }

    /// Get reconcile interval as Duration
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Get source timeout as Duration
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    /// Get tombstone TTL as Duration
    pub fn tombstone_ttl(&self) -> Duration {
        Duration::from_secs(self.tombstone_ttl_secs)
    }

    /// Delay before retry number `attempt` (0-based): exponential, capped
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.retry_base_millis);
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        base.saturating_mul(factor)
            .min(Duration::from_secs(self.retry_max_secs))
    }
}

/// Configuration for the pull-mode collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Maximum age of a cached collection before a fresh listing is forced
    /// (seconds). 0 disables caching: every scrape lists.
    /// Default: 5
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age_secs: u64,

    /// Upper bound for the listing call (seconds)
    /// Default: 10
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
}

fn default_cache_max_age() -> u64 {
    5
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cache_max_age_secs: default_cache_max_age(),
            source_timeout_secs: default_source_timeout(),
        }
    }
}

impl CollectorConfig {
    /// Check invariants between fields
    ///
    /// # Errors
    /// Returns [`ControllerError::Config`] if the timeout is zero
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.source_timeout_secs == 0 {
            return Err(ControllerError::Config(
                "collector source_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Get cache max age as Duration
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    /// Get source timeout as Duration
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.reconcile_interval_secs, 30);
        assert_eq!(config.source_timeout_secs, 10);
        assert_eq!(config.tombstone_ttl_secs, 300);
        assert_eq!(config.max_retries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_tombstone_ttl() {
        let config = ControllerConfig {
            tombstone_ttl_secs: 10,
            source_timeout_secs: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = ControllerConfig {
            reconcile_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_backoff() {
        let config = ControllerConfig {
            retry_base_millis: 100,
            retry_max_secs: 1,
            ..Default::default()
        };
        assert_eq!(config.retry_delay(0), Duration::from_millis(100));
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(3), Duration::from_millis(800));
        assert_eq!(config.retry_delay(4), Duration::from_secs(1));
        assert_eq!(config.retry_delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{ "reconcile_interval_secs": 15 }"#).unwrap();
        assert_eq!(config.reconcile_interval_secs, 15);
        assert_eq!(config.source_timeout_secs, 10);

        let collector: CollectorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(collector, CollectorConfig::default());
    }

    #[test]
    fn test_collector_durations() {
        let config = CollectorConfig {
            cache_max_age_secs: 0,
            source_timeout_secs: 3,
        };
        assert_eq!(config.cache_max_age(), Duration::ZERO);
        assert_eq!(config.source_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }
}
