//! Layered configuration: defaults, TOML file, `SYSGRAPH_*` environment,
//! then command-line flags (applied by the caller).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sysgraph_coordination::agent::RuntimeConfig;
use sysgraph_coordination::rules::evaluator::DEFAULT_BOOST_THRESHOLD;
use sysgraph_coordination::OrchestratorConfig;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "SYSGRAPH_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Agent roster and pipeline knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentsSection {
    /// Role names, in roster order
    pub enabled: Vec<String>,
    pub consensus_threshold: f64,
    pub top_n: usize,
    pub reasoning_timeout_secs: u64,
    pub min_stage_confidence: f64,
    pub min_thoughts: usize,
    pub fallback_confidence: f64,
    pub stage_retries: u32,
    pub enable_cross_validation: bool,
    pub fallback_to_rules: bool,
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            enabled: vec!["hardware".into(), "system".into(), "network".into()],
            consensus_threshold: 0.7,
            top_n: 10,
            reasoning_timeout_secs: 300,
            min_stage_confidence: 0.3,
            min_thoughts: 2,
            fallback_confidence: 0.5,
            stage_retries: 1,
            enable_cross_validation: true,
            fallback_to_rules: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RulesSection {
    /// Built-in rules always run; `false` only logs a warning
    pub enable_builtin: bool,
    /// Rule files or directories merged after the built-ins
    pub external: Vec<PathBuf>,
    /// Fired rules more confident than this get a x1.1 boost
    pub confidence_boost_threshold: f64,
}

impl Default for RulesSection {
    fn default() -> Self {
        Self {
            enable_builtin: true,
            external: Vec::new(),
            confidence_boost_threshold: DEFAULT_BOOST_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
    /// JSONL mirror of the audit log
    pub audit_log: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            audit_log: None,
        }
    }
}

/// Top-level sysgraph configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SysgraphConfig {
    pub agents: AgentsSection,
    pub rules: RulesSection,
    pub logging: LoggingSection,
}

impl SysgraphConfig {
    /// Defaults, then the optional file, then the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `SYSGRAPH_*` overrides read through `lookup`
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, value)) = get("AGENTS") {
            self.agents.enabled = split_list(&value);
        }
        if let Some((key, value)) = get("CONFIDENCE_THRESHOLD") {
            self.agents.consensus_threshold = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("TOP_N") {
            self.agents.top_n = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("RUN_TIMEOUT_SECS") {
            self.agents.reasoning_timeout_secs = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("FALLBACK_CONFIDENCE") {
            self.agents.fallback_confidence = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("STAGE_RETRIES") {
            self.agents.stage_retries = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("CROSS_VALIDATION") {
            self.agents.enable_cross_validation = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("FALLBACK_TO_RULES") {
            self.agents.fallback_to_rules = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = get("RULE_BOOST_THRESHOLD") {
            self.rules.confidence_boost_threshold = parse_env(&key, &value)?;
        }
        if let Some((_, value)) = get("RULES") {
            self.rules.external.extend(split_list(&value).into_iter().map(PathBuf::from));
        }
        if let Some((_, value)) = get("LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some((_, value)) = get("AUDIT_LOG") {
            self.logging.audit_log = Some(PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let agents = &self.agents;
        if agents.enabled.is_empty() {
            return Err(ConfigError::Invalid("agents.enabled must not be empty".into()));
        }
        for (name, value) in [
            ("agents.consensus_threshold", agents.consensus_threshold),
            ("agents.min_stage_confidence", agents.min_stage_confidence),
            ("agents.fallback_confidence", agents.fallback_confidence),
            (
                "rules.confidence_boost_threshold",
                self.rules.confidence_boost_threshold,
            ),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 0..=1, got {value}"
                )));
            }
        }
        if agents.top_n == 0 {
            return Err(ConfigError::Invalid("agents.top_n must be at least 1".into()));
        }
        if agents.reasoning_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "agents.reasoning_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let agents = &self.agents;
        let mut runtime = RuntimeConfig::default()
            .with_gate(agents.min_stage_confidence, agents.min_thoughts)
            .with_fallback_confidence(agents.fallback_confidence);
        runtime.stage_retries = agents.stage_retries;

        OrchestratorConfig::default()
            .with_confidence_threshold(agents.consensus_threshold)
            .with_run_timeout(Duration::from_secs(agents.reasoning_timeout_secs))
            .with_top_n(agents.top_n)
            .with_cross_validation(agents.enable_cross_validation)
            .with_fallback_to_rules(agents.fallback_to_rules)
            .with_runtime(runtime)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = SysgraphConfig::from_toml_str(
            r#"
            [agents]
            consensus_threshold = 0.6
            top_n = 3
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("SYSGRAPH_CONFIDENCE_THRESHOLD", "0.8"),
            ("SYSGRAPH_AGENTS", "hardware,network"),
        ]
        .into_iter()
        .collect();

        config
            .apply_env_with(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.agents.consensus_threshold, 0.8);
        assert_eq!(config.agents.top_n, 3);
        assert_eq!(config.agents.enabled, vec!["hardware", "network"]);
    }

    #[test]
    fn test_boost_threshold_layering_and_bounds() {
        let mut config = SysgraphConfig::default();
        assert_eq!(config.rules.confidence_boost_threshold, 0.8);

        config
            .apply_env_with(|key| {
                (key == "SYSGRAPH_RULE_BOOST_THRESHOLD").then(|| "0.65".to_string())
            })
            .unwrap();
        assert_eq!(config.rules.confidence_boost_threshold, 0.65);

        let config = SysgraphConfig::from_toml_str(
            r#"
            [rules]
            confidence_boost_threshold = 1.5
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = SysgraphConfig::default();
        let err = config
            .apply_env_with(|key| (key == "SYSGRAPH_TOP_N").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "SYSGRAPH_TOP_N"));
    }
}
