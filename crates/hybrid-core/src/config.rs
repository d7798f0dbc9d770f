//! Runtime configuration
//!
//! [`FlowConfig`] holds the tunables shared by every primitive of a run:
//! grace periods for cooperative cancellation, default fan-out concurrency
//! and the default failure policy. Primitives may override each value.

use crate::error::{HybridError, HybridResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// How a fan-out reacts to a failing child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop siblings and re-raise the first failure
    #[default]
    FailFast,
    /// Record failures and continue with the survivors
    BestEffort,
}

impl FromStr for FailurePolicy {
    type Err = HybridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "best_effort" => Ok(Self::BestEffort),
            other => Err(HybridError::Config(format!("unknown failure policy: {other}"))),
        }
    }
}

/// Flow configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// How long racing branches wait for losers after the decisive child
    pub race_grace_period_ms: u64,
    /// How long a fail-fast fan-out waits for stopped siblings
    pub stop_grace_period_ms: u64,
    /// Default concurrency bound for `Map` (`None` = unbounded)
    pub map_max_concurrency: Option<usize>,
    /// Default failure policy for fan-outs
    pub failure_policy: FailurePolicy,
}

impl FlowConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With racing grace period
    #[inline]
    #[must_use]
    pub fn with_race_grace_period(mut self, grace: Duration) -> Self {
        self.race_grace_period_ms = duration_to_ms(grace);
        self
    }

    /// With fail-fast stop grace period
    #[inline]
    #[must_use]
    pub fn with_stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period_ms = duration_to_ms(grace);
        self
    }

    /// With default map concurrency
    #[inline]
    #[must_use]
    pub fn with_map_max_concurrency(mut self, max: usize) -> Self {
        self.map_max_concurrency = Some(max.max(1));
        self
    }

    /// With default failure policy
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Racing grace period
    #[inline]
    #[must_use]
    pub fn race_grace_period(&self) -> Duration {
        Duration::from_millis(self.race_grace_period_ms)
    }

    /// Fail-fast stop grace period
    #[inline]
    #[must_use]
    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    /// Parse configuration from TOML
    ///
    /// Missing keys fall back to defaults.
    ///
    /// # Errors
    /// `Config` if the document is malformed
    pub fn from_toml_str(text: &str) -> HybridResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| HybridError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables
    ///
    /// Reads the following variables over the defaults:
    /// - `HYBRID_RACE_GRACE_MS`
    /// - `HYBRID_STOP_GRACE_MS`
    /// - `HYBRID_MAP_MAX_CONCURRENCY`
    /// - `HYBRID_FAILURE_POLICY` (`fail_fast` or `best_effort`)
    ///
    /// # Errors
    /// `Config` if a variable is set but cannot be parsed
    pub fn from_env() -> HybridResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> HybridResult<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("HYBRID_RACE_GRACE_MS") {
            config.race_grace_period_ms = parse_var("HYBRID_RACE_GRACE_MS", &value)?;
        }
        if let Some(value) = lookup("HYBRID_STOP_GRACE_MS") {
            config.stop_grace_period_ms = parse_var("HYBRID_STOP_GRACE_MS", &value)?;
        }
        if let Some(value) = lookup("HYBRID_MAP_MAX_CONCURRENCY") {
            config.map_max_concurrency = Some(parse_var("HYBRID_MAP_MAX_CONCURRENCY", &value)?);
        }
        if let Some(value) = lookup("HYBRID_FAILURE_POLICY") {
            config.failure_policy = value.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> HybridResult<()> {
        if self.map_max_concurrency == Some(0) {
            return Err(HybridError::Config(
                "map_max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            race_grace_period_ms: 100,
            stop_grace_period_ms: 100,
            map_max_concurrency: None,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> HybridResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HybridError::Config(format!("{key}: cannot parse {value:?}")))
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn flow_config_defaults() {
        let config = FlowConfig::new();
        assert_eq!(config.race_grace_period(), Duration::from_millis(100));
        assert_eq!(config.stop_grace_period(), Duration::from_millis(100));
        assert_eq!(config.map_max_concurrency, None);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn flow_config_builder() {
        let config = FlowConfig::new()
            .with_race_grace_period(Duration::from_millis(20))
            .with_map_max_concurrency(0)
            .with_failure_policy(FailurePolicy::BestEffort);

        assert_eq!(config.race_grace_period_ms, 20);
        assert_eq!(config.map_max_concurrency, Some(1));
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);
    }

    #[test]
    fn flow_config_from_toml() {
        let config = FlowConfig::from_toml_str(
            r#"
            race_grace_period_ms = 250
            failure_policy = "best_effort"
            "#,
        )
        .unwrap();

        assert_eq!(config.race_grace_period_ms, 250);
        assert_eq!(config.stop_grace_period_ms, 100);
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);

        assert!(FlowConfig::from_toml_str("map_max_concurrency = 0").is_err());
        assert!(FlowConfig::from_toml_str("race_grace_period_ms = \"soon\"").is_err());
    }

    #[test]
    fn flow_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("HYBRID_RACE_GRACE_MS", "5"),
            ("HYBRID_MAP_MAX_CONCURRENCY", "4"),
            ("HYBRID_FAILURE_POLICY", "best-effort"),
        ]
        .into_iter()
        .collect();

        let config = FlowConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.race_grace_period_ms, 5);
        assert_eq!(config.map_max_concurrency, Some(4));
        assert_eq!(config.failure_policy, FailurePolicy::BestEffort);

        let bad = FlowConfig::from_lookup(|k| (k == "HYBRID_STOP_GRACE_MS").then(|| "x".to_string()));
        assert!(matches!(bad, Err(HybridError::Config(_))));
    }
}
