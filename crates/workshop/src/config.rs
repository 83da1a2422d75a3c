//! Workshop configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pool limits
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use workshop::WorkshopConfig;
///
/// let config = WorkshopConfig::new()
///     .with_max_quota(16)
///     .with_max_idle_duration(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkshopConfig {
    /// Maximum number of simultaneously registered workers
    pub max_quota: usize,

    /// How long an unused worker may idle before it becomes eligible for
    /// eviction; also the reaper sweep period
    #[serde(with = "duration_millis")]
    pub max_idle_duration: Duration,
}

impl Default for WorkshopConfig {
    fn default() -> Self {
        Self {
            max_quota: 64,
            max_idle_duration: Duration::from_secs(3 * 60),
        }
    }
}

impl WorkshopConfig {
    /// Create a new configuration with default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker quota
    pub fn with_max_quota(mut self, max_quota: usize) -> Self {
        self.max_quota = max_quota;
        self
    }

    /// Set the idle timeout
    pub fn with_max_idle_duration(mut self, max_idle_duration: Duration) -> Self {
        self.max_idle_duration = max_idle_duration;
        self
    }

    /// Replace zero values with the defaults
    pub(crate) fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_quota == 0 {
            self.max_quota = defaults.max_quota;
        }
        if self.max_idle_duration.is_zero() {
            self.max_idle_duration = defaults.max_idle_duration;
        }
        self
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkshopConfig::default();
        assert_eq!(config.max_quota, 64);
        assert_eq!(config.max_idle_duration, Duration::from_secs(180));
    }

    #[test]
    fn test_config_builder() {
        let config = WorkshopConfig::new()
            .with_max_quota(8)
            .with_max_idle_duration(Duration::from_millis(250));

        assert_eq!(config.max_quota, 8);
        assert_eq!(config.max_idle_duration, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_values_normalize_to_defaults() {
        let config = WorkshopConfig::new()
            .with_max_quota(0)
            .with_max_idle_duration(Duration::ZERO)
            .normalized();

        assert_eq!(config, WorkshopConfig::default());
    }

    #[test]
    fn test_normalize_keeps_explicit_values() {
        let config = WorkshopConfig::new()
            .with_max_quota(2)
            .with_max_idle_duration(Duration::from_millis(100))
            .normalized();

        assert_eq!(config.max_quota, 2);
        assert_eq!(config.max_idle_duration, Duration::from_millis(100));
    }
}
