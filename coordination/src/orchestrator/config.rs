//! Orchestrator settings

use std::time::Duration;

use crate::agent::RuntimeConfig;
use crate::consensus::AggregatorConfig;

/// Default aggregate confidence below which rule findings are merged
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Default wall-clock budget for the agent fan-out of one run
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub confidence_threshold: f64,
    pub run_timeout: Duration,
    /// When off, every usable agent gets weight 1.0
    pub enable_cross_validation: bool,
    /// When off, low confidence is reported but rules are not merged.
    /// Invalid snapshots and total agent failure always fall back.
    pub fallback_to_rules: bool,
    pub aggregator: AggregatorConfig,
    pub runtime: RuntimeConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            enable_cross_validation: true,
            fallback_to_rules: true,
            aggregator: AggregatorConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.aggregator.top_n = top_n.max(1);
        self
    }

    pub fn with_cross_validation(mut self, enabled: bool) -> Self {
        self.enable_cross_validation = enabled;
        self
    }

    pub fn with_fallback_to_rules(mut self, enabled: bool) -> Self {
        self.fallback_to_rules = enabled;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.run_timeout, Duration::from_secs(300));
        assert_eq!(config.aggregator.top_n, 10);
        assert_eq!(config.runtime.fallback_confidence, 0.5);
        assert!(config.enable_cross_validation);
        assert!(config.fallback_to_rules);
    }

    #[test]
    fn test_builders_clamp() {
        let config = OrchestratorConfig::default()
            .with_confidence_threshold(1.4)
            .with_top_n(0);
        assert_eq!(config.confidence_threshold, 1.0);
        assert_eq!(config.aggregator.top_n, 1);
    }
}
