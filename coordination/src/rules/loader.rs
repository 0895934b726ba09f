//! Ingestion of external rule sets
//!
//! Accepts YAML or JSON, either a bare list of rules or a document with a
//! top-level `rules` key:
//!
//! ```yaml
//! rules:
//!   - id: swap_pressure
//!     category: memory
//!     condition: { metric: swap.usage_percent, op: ">", threshold: 50 }
//!     action: { severity: medium, message: "Swap usage at {value}%" }
//! ```
//!
//! Every rule is validated; a file with any invalid rule is rejected as a
//! whole so a typo never silently disables a check.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use super::rule::Rule;
use super::{RuleError, RuleResult};

/// Accepted document shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RuleDocument {
    Wrapped { rules: Vec<Rule> },
    List(Vec<Rule>),
}

impl RuleDocument {
    pub fn into_rules(self) -> Vec<Rule> {
        match self {
            Self::Wrapped { rules } | Self::List(rules) => rules,
        }
    }
}

/// Outcome of loading every rule file in a directory
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub loaded_files: Vec<String>,
    pub total_rules: usize,
    pub errors: Vec<RuleError>,
}

impl IngestionSummary {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse and validate rules from YAML (JSON is accepted too, being valid YAML)
pub fn parse_yaml(raw: &str, source_path: Option<&str>) -> RuleResult<Vec<Rule>> {
    let doc: RuleDocument = serde_yaml::from_str(raw).map_err(|e| RuleError::Parse {
        source_path: source_path.map(str::to_string),
        detail: format!("YAML parse error: {e}"),
    })?;
    validate_set(doc.into_rules())
}

/// Parse and validate rules from JSON
pub fn parse_json(raw: &str, source_path: Option<&str>) -> RuleResult<Vec<Rule>> {
    let doc: RuleDocument = serde_json::from_str(raw).map_err(|e| RuleError::Parse {
        source_path: source_path.map(str::to_string),
        detail: format!("JSON parse error: {e}"),
    })?;
    validate_set(doc.into_rules())
}

/// Load one rule file; the format follows the extension
pub fn load_file(path: &Path) -> RuleResult<Vec<Rule>> {
    let path_display = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| RuleError::Io {
        path: path_display.clone(),
        detail: e.to_string(),
    })?;

    let rules = match extension(path) {
        "json" => parse_json(&content, Some(&path_display))?,
        _ => parse_yaml(&content, Some(&path_display))?,
    };
    debug!(path = %path_display, count = rules.len(), "Loaded rule file");
    Ok(rules)
}

/// Load every `*.yml`, `*.yaml` and `*.json` file in `dir`, in file-name order
pub fn load_directory(dir: &Path) -> RuleResult<(Vec<Rule>, IngestionSummary)> {
    if !dir.is_dir() {
        return Err(RuleError::Io {
            path: dir.display().to_string(),
            detail: "path is not a directory".to_string(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| RuleError::Io {
        path: dir.display().to_string(),
        detail: e.to_string(),
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| matches!(extension(p), "yml" | "yaml" | "json"))
        .collect();
    paths.sort();

    let mut summary = IngestionSummary::default();
    let mut rules = Vec::new();
    for path in paths {
        match load_file(&path) {
            Ok(mut loaded) => {
                summary.total_rules += loaded.len();
                summary.loaded_files.push(path.display().to_string());
                rules.append(&mut loaded);
            }
            Err(e) => {
                warn!(path = %path.display(), "Skipping rule file: {e}");
                summary.errors.push(e);
            }
        }
    }

    info!(
        files = summary.loaded_files.len(),
        rules = summary.total_rules,
        errors = summary.errors.len(),
        "Rule directory ingested"
    );
    Ok((rules, summary))
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

fn validate_set(rules: Vec<Rule>) -> RuleResult<Vec<Rule>> {
    let mut seen = HashSet::new();
    for rule in &rules {
        rule.validate()?;
        if !seen.insert(rule.id.as_str()) {
            return Err(RuleError::DuplicateId(rule.id.clone()));
        }
    }
    Ok(rules)
}
