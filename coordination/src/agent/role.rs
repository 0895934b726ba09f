//! Agent roles as data
//!
//! An agent is a role descriptor plus an identity. Adding a new kind of
//! analyst means registering a new descriptor, not writing a new type.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::stage::ReasoningStage;
use super::tools::DiagnosticTool;
use crate::findings::AgentId;
use crate::snapshot::Snapshot;

/// Errors from role lookup
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    #[error("unknown agent role: {0}")]
    UnknownRole(String),

    #[error("agent id '{0}' appears more than once in the roster")]
    DuplicateAgent(String),
}

/// Result type for role operations
pub type RoleResult<T> = Result<T, RoleError>;

const BASE_TEMPLATE: &str = "You are the {role} analyst of a system diagnosis team. \
Focus on: {focus}. Snapshot {collection_id} taken at {timestamp}. \
Current stage: {stage}.";

/// What an agent looks at, which tools it may call and how it is prompted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub name: String,
    /// Finding categories this role is responsible for
    pub focus: Vec<String>,
    /// Tools invoked, in order, during information gathering
    pub tools: Vec<DiagnosticTool>,
    /// Placeholders: `{role}`, `{focus}`, `{collection_id}`, `{timestamp}`, `{stage}`
    pub prompt_template: String,
}

impl RoleDescriptor {
    pub fn new(name: &str, focus: &[&str], tools: &[DiagnosticTool]) -> Self {
        Self {
            name: name.to_string(),
            focus: focus.iter().map(|f| f.to_string()).collect(),
            tools: tools.to_vec(),
            prompt_template: BASE_TEMPLATE.to_string(),
        }
    }

    pub fn with_prompt_template(mut self, template: &str) -> Self {
        self.prompt_template = template.to_string();
        self
    }

    pub fn hardware() -> Self {
        Self::new(
            "hardware",
            &["cpu", "memory", "disk"],
            &[
                DiagnosticTool::AnalyzeCpu,
                DiagnosticTool::AnalyzeMemory,
                DiagnosticTool::AnalyzeDisk,
            ],
        )
    }

    pub fn system() -> Self {
        Self::new(
            "system",
            &["system", "process", "cpu"],
            &[DiagnosticTool::AnalyzeProcesses, DiagnosticTool::AnalyzeCpu],
        )
    }

    pub fn network() -> Self {
        Self::new("network", &["network"], &[DiagnosticTool::AnalyzeNetwork])
    }

    /// Generalist that calls every tool
    pub fn validator() -> Self {
        Self::new(
            "validator",
            &["cpu", "memory", "disk", "system", "process", "network"],
            &[
                DiagnosticTool::AnalyzeCpu,
                DiagnosticTool::AnalyzeMemory,
                DiagnosticTool::AnalyzeDisk,
                DiagnosticTool::AnalyzeProcesses,
                DiagnosticTool::AnalyzeNetwork,
            ],
        )
    }

    pub fn covers(&self, category: &str) -> bool {
        self.focus.iter().any(|f| f == category)
    }

    pub fn render_prompt(&self, stage: ReasoningStage, snapshot: &Snapshot) -> String {
        self.prompt_template
            .replace("{role}", &self.name)
            .replace("{focus}", &self.focus.join(", "))
            .replace("{collection_id}", &snapshot.collection_id)
            .replace("{timestamp}", &snapshot.timestamp.to_rfc3339())
            .replace("{stage}", stage.as_str())
    }
}

/// One roster entry: an identity bound to a role
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub id: AgentId,
    pub role: Arc<RoleDescriptor>,
}

impl AgentSpec {
    pub fn new(id: impl Into<AgentId>, role: RoleDescriptor) -> Self {
        Self {
            id: id.into(),
            role: Arc::new(role),
        }
    }

    /// Identity equal to the role name
    pub fn from_role(role: RoleDescriptor) -> Self {
        Self::new(role.name.clone(), role)
    }
}

/// Named role descriptors available to a roster
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    roles: Vec<RoleDescriptor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the hardware, system, network and validator roles
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RoleDescriptor::hardware());
        registry.register(RoleDescriptor::system());
        registry.register(RoleDescriptor::network());
        registry.register(RoleDescriptor::validator());
        registry
    }

    /// Register a role, replacing any role with the same name
    pub fn register(&mut self, role: RoleDescriptor) {
        match self.roles.iter_mut().find(|r| r.name == role.name) {
            Some(existing) => *existing = role,
            None => self.roles.push(role),
        }
    }

    pub fn get(&self, name: &str) -> Option<&RoleDescriptor> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn role_names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name.as_str()).collect()
    }

    /// Build a roster, one agent per named role, in the given order
    pub fn roster<S: AsRef<str>>(&self, names: &[S]) -> RoleResult<Vec<AgentSpec>> {
        let mut specs: Vec<AgentSpec> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let role = self
                .get(name)
                .ok_or_else(|| RoleError::UnknownRole(name.to_string()))?;
            if specs.iter().any(|s| s.id == name) {
                return Err(RoleError::DuplicateAgent(name.to_string()));
            }
            specs.push(AgentSpec::from_role(role.clone()));
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_roster_order() {
        let registry = AgentRegistry::with_defaults();
        let roster = registry.roster(&["hardware", "system", "network"]).unwrap();
        let ids: Vec<&str> = roster.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["hardware", "system", "network"]);
        assert!(roster[0].role.covers("disk"));
    }

    #[test]
    fn test_roster_rejects_unknown_and_duplicate() {
        let registry = AgentRegistry::with_defaults();
        assert!(matches!(
            registry.roster(&["storage"]),
            Err(RoleError::UnknownRole(name)) if name == "storage"
        ));
        assert!(matches!(
            registry.roster(&["network", "network"]),
            Err(RoleError::DuplicateAgent(_))
        ));
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut registry = AgentRegistry::with_defaults();
        registry.register(RoleDescriptor::new("network", &["dns"], &[]));
        assert_eq!(registry.role_names().len(), 4);
        assert_eq!(registry.get("network").unwrap().focus, vec!["dns"]);
    }

    #[test]
    fn test_render_prompt_fills_placeholders() {
        let snap: Snapshot = serde_json::from_value(json!({
            "collection_id": "c-9",
            "hardware": {
                "cpu": { "usage_percent": 1.0, "core_count": 1 },
                "memory": { "total": 1, "usage_percent": 1.0 }
            }
        }))
        .unwrap();
        let prompt = RoleDescriptor::network()
            .with_prompt_template("{role}/{focus}/{collection_id}/{stage}")
            .render_prompt(ReasoningStage::Conclusion, &snap);
        assert_eq!(prompt, "network/network/c-9/conclusion");
    }
}
