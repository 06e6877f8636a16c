//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::error::CoordinatorError;

/// Ordered values whose change forces an immediate re-fetch
///
/// Elements must be scalars (null, bool, number, string); they are compared
/// element-wise by value, with numbers compared numerically so `1` and `1.0`
/// are the same key.
pub type DependencyKey = Vec<serde_json::Value>;

/// What a manual trigger does when a fetch is already in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManualTriggerMode {
    /// Start another call alongside; the last one to complete wins
    #[default]
    Overlap,
    /// Abort the in-flight calls and discard their results
    CancelPrevious,
}

/// Bounded exponential backoff for the automatic schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Upper bound for the stretched delay in milliseconds
    #[serde(rename = "max-interval-ms", default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_interval_ms() -> u64 {
    debug!("default_max_interval_ms: called");
    5 * 60 * 1000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl BackoffConfig {
    /// Delay for the next automatic tick after `failures` consecutive failures
    pub fn delay(&self, interval: Duration, failures: u32) -> Duration {
        let max = Duration::from_millis(self.max_interval_ms);
        if failures == 0 {
            return interval;
        }
        let factor = 1u32 << failures.min(31);
        interval.checked_mul(factor).unwrap_or(max).min(max).max(interval)
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Polling period override in milliseconds; None follows the global settings
    #[serde(rename = "interval-ms", default)]
    pub interval_ms: Option<u64>,

    /// Whether automatic polling starts enabled for this instance
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Initial dependency key
    #[serde(rename = "dependency-key", default)]
    pub dependency_key: DependencyKey,

    /// Bound on each producer call in milliseconds (None waits forever)
    #[serde(rename = "timeout-ms", default)]
    pub timeout_ms: Option<u64>,

    /// Behaviour of manual triggers that overlap an in-flight fetch
    #[serde(rename = "manual-trigger", default)]
    pub manual_trigger: ManualTriggerMode,

    /// Optional backoff of the automatic schedule after failures
    #[serde(default)]
    pub backoff: Option<BackoffConfig>,
}

fn default_enabled() -> bool {
    debug!("default_enabled: called");
    true
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            interval_ms: None,
            enabled: true,
            dependency_key: Vec::new(),
            timeout_ms: None,
            manual_trigger: ManualTriggerMode::Overlap,
            backoff: None,
        }
    }
}

impl CoordinatorConfig {
    /// Get the interval override as a Duration
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms.map(Duration::from_millis)
    }

    /// Get the producer timeout as a Duration
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Override the polling interval, widening the backoff cap if it would
    /// otherwise fall below the new interval
    pub fn with_interval(mut self, interval_ms: u64) -> Self {
        debug!(interval_ms, "CoordinatorConfig::with_interval: called");
        self.interval_ms = Some(interval_ms);
        if let Some(backoff) = &mut self.backoff
            && backoff.max_interval_ms < interval_ms
        {
            backoff.max_interval_ms = interval_ms;
        }
        self
    }

    /// Check the configuration before a Coordinator is built from it
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        debug!(?self.interval_ms, ?self.timeout_ms, "CoordinatorConfig::validate: called");
        if self.interval_ms == Some(0) {
            return Err(CoordinatorError::InvalidConfiguration(
                "interval-ms must be greater than zero".to_string(),
            ));
        }

        if self.timeout_ms == Some(0) {
            return Err(CoordinatorError::InvalidConfiguration(
                "timeout-ms must be greater than zero".to_string(),
            ));
        }

        validate_key(&self.dependency_key)?;

        if let Some(backoff) = &self.backoff {
            if backoff.max_interval_ms == 0 {
                return Err(CoordinatorError::InvalidConfiguration(
                    "backoff max-interval-ms must be greater than zero".to_string(),
                ));
            }
            if let Some(interval_ms) = self.interval_ms
                && backoff.max_interval_ms < interval_ms
            {
                return Err(CoordinatorError::InvalidConfiguration(format!(
                    "backoff max-interval-ms ({}) is below interval-ms ({})",
                    backoff.max_interval_ms, interval_ms
                )));
            }
        }

        Ok(())
    }
}

/// Compare two dependency keys element-wise
pub fn same_key(a: &[serde_json::Value], b: &[serde_json::Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_scalar(x, y))
}

fn same_scalar(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x != y => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        _ => a == b,
    }
}

/// Reject dependency keys containing arrays or objects
pub fn validate_key(key: &[serde_json::Value]) -> Result<(), CoordinatorError> {
    for (index, value) in key.iter().enumerate() {
        if value.is_array() || value.is_object() {
            return Err(CoordinatorError::InvalidConfiguration(format!(
                "dependency key element {} is not a scalar: {}",
                index, value
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.interval_ms, None);
        assert!(config.enabled);
        assert!(config.dependency_key.is_empty());
        assert_eq!(config.timeout(), None);
        assert_eq!(config.manual_trigger, ManualTriggerMode::Overlap);
        assert!(config.backoff.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interval_duration() {
        let config = CoordinatorConfig {
            interval_ms: Some(5000),
            ..Default::default()
        };
        assert_eq!(config.interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = CoordinatorConfig {
            interval_ms: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoordinatorError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = CoordinatorConfig {
            timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_scalar_key_rejected() {
        let config = CoordinatorConfig {
            dependency_key: vec![json!(1), json!({"lot": "A"})],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("element 1"));

        assert!(validate_key(&[json!(null), json!(true), json!(2.5), json!("x")]).is_ok());
    }

    #[test]
    fn test_backoff_below_interval_rejected() {
        let config = CoordinatorConfig {
            interval_ms: Some(10_000),
            backoff: Some(BackoffConfig { max_interval_ms: 5_000 }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let backoff = BackoffConfig { max_interval_ms: 60_000 };
        let interval = Duration::from_secs(10);

        assert_eq!(backoff.delay(interval, 0), Duration::from_secs(10));
        assert_eq!(backoff.delay(interval, 1), Duration::from_secs(20));
        assert_eq!(backoff.delay(interval, 2), Duration::from_secs(40));
        assert_eq!(backoff.delay(interval, 3), Duration::from_secs(60));
        assert_eq!(backoff.delay(interval, 40), Duration::from_secs(60));
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
interval-ms: 5000
enabled: false
dependency-key: [1, "lot-a"]
timeout-ms: 15000
manual-trigger: cancel-previous
backoff:
  max-interval-ms: 120000
"#;
        let config: CoordinatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.interval_ms, Some(5000));
        assert!(!config.enabled);
        assert_eq!(config.dependency_key, vec![json!(1), json!("lot-a")]);
        assert_eq!(config.timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.manual_trigger, ManualTriggerMode::CancelPrevious);
        assert_eq!(config.backoff, Some(BackoffConfig { max_interval_ms: 120_000 }));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CoordinatorConfig = serde_yaml::from_str("timeout-ms: 1000").unwrap();
        assert!(config.enabled);
        assert_eq!(config.interval_ms, None);
        assert_eq!(config.manual_trigger, ManualTriggerMode::Overlap);
    }

    #[test]
    fn test_same_key_compares_numbers_numerically() {
        assert!(same_key(&[json!(1), json!("A")], &[json!(1.0), json!("A")]));
        assert!(same_key(&[], &[]));
        assert!(!same_key(&[json!(1)], &[json!(1.5)]));
        assert!(!same_key(&[json!(1)], &[json!("1")]));
        assert!(!same_key(&[json!(1)], &[json!(1), json!(2)]));
        assert!(!same_key(&[json!(null)], &[json!(false)]));
    }

    #[test]
    fn test_with_interval_widens_backoff_cap() {
        let config = CoordinatorConfig {
            backoff: Some(BackoffConfig::default()),
            ..Default::default()
        }
        .with_interval(600_000);
        assert_eq!(config.interval_ms, Some(600_000));
        assert_eq!(config.backoff, Some(BackoffConfig { max_interval_ms: 600_000 }));
        assert!(config.validate().is_ok());

        let config = CoordinatorConfig {
            backoff: Some(BackoffConfig { max_interval_ms: 60_000 }),
            ..Default::default()
        }
        .with_interval(1000);
        assert_eq!(config.backoff.map(|b| b.max_interval_ms), Some(60_000));
    }

    proptest! {
        #[test]
        fn prop_backoff_delay_within_bounds(interval_ms in 1u64..100_000, failures in 0u32..64) {
            let backoff = BackoffConfig { max_interval_ms: 300_000 };
            let interval = Duration::from_millis(interval_ms);
            let delay = backoff.delay(interval, failures);
            prop_assert!(delay >= interval);
            prop_assert!(delay <= Duration::from_millis(300_000).max(interval));
        }
    }
}
