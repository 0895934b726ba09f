//! Deterministic threshold-based backend
//!
//! Produces every stage from the tool observations alone, so a diagnosis can
//! run with no model attached. Each role only concludes on findings inside
//! its focus categories.

use async_trait::async_trait;

use super::backend::{BackendResult, InferenceBackend, StageOutput, StageRequest};
use super::stage::{ReasoningStage, StepKind};
use crate::findings::Finding;

#[derive(Debug, Clone, Default)]
pub struct HeuristicBackend;

impl HeuristicBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Findings from the request's tool results that fall in the role's focus,
/// first occurrence wins
fn focused_findings(request: &StageRequest) -> Vec<Finding> {
    let mut out: Vec<Finding> = Vec::new();
    for obs in &request.tool_results {
        for finding in &obs.findings {
            if request.role.covers(&finding.category)
                && !out.iter().any(|f| f.content_key() == finding.content_key())
            {
                out.push(finding.clone());
            }
        }
    }
    out
}

#[async_trait]
impl InferenceBackend for HeuristicBackend {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn run_stage(&self, request: &StageRequest) -> BackendResult<StageOutput> {
        let role = &request.role;
        let snap = &request.snapshot;
        let findings = focused_findings(request);
        let issues: Vec<&Finding> = findings.iter().filter(|f| f.is_issue()).collect();

        let output = match request.stage {
            ReasoningStage::ProblemUnderstanding => StageOutput::new()
                .thought(
                    StepKind::Observation,
                    format!(
                        "Assessing {} health for snapshot {}",
                        role.focus.join(", "),
                        snap.collection_id
                    ),
                )
                .thought(
                    StepKind::Deduction,
                    format!(
                        "{} tool(s) available for evidence: {}",
                        role.tools.len(),
                        role.tools
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                )
                .with_confidence(0.9),

            ReasoningStage::InformationGathering => {
                let mut out = StageOutput::new().thought(
                    StepKind::Observation,
                    format!("Collected {} tool observation(s)", request.tool_results.len()),
                );
                for obs in &request.tool_results {
                    out = out.thought(StepKind::Observation, obs.summary.clone());
                    for item in &obs.evidence {
                        out = out.evidence(item.clone());
                    }
                }
                if request.tool_results.is_empty() {
                    out = out.thought(StepKind::Observation, "No tool data was returned");
                }
                out.with_confidence(if request.tool_results.is_empty() { 0.4 } else { 0.85 })
            }

            ReasoningStage::HypothesisGeneration => {
                let mut out = StageOutput::new().thought(
                    StepKind::Abduction,
                    format!("{} candidate problem(s) in scope", issues.len()),
                );
                if issues.is_empty() {
                    out = out.thought(
                        StepKind::Abduction,
                        format!("Hypothesis: the {} subsystem is healthy", role.name),
                    );
                }
                for issue in &issues {
                    out = out
                        .thought(StepKind::Abduction, format!("Hypothesis: {}", issue.description))
                        .conclusion((*issue).clone());
                }
                out.with_confidence(0.75)
            }

            ReasoningStage::EvidenceAnalysis => {
                let mut out = StageOutput::new().thought(
                    StepKind::Induction,
                    "Weighing hypotheses against measured thresholds",
                );
                for issue in &issues {
                    out = out.thought(
                        StepKind::Deduction,
                        format!("{} is supported at {} severity", issue.description, issue.severity),
                    );
                }
                if issues.is_empty() {
                    out = out.thought(StepKind::Deduction, "All measured values are within limits");
                }
                out.with_confidence(0.8)
            }

            ReasoningStage::Conclusion => {
                let mut out = StageOutput::new()
                    .thought(
                        StepKind::Deduction,
                        format!("Concluded {} issue(s) for {}", issues.len(), role.name),
                    )
                    .thought(
                        StepKind::Deduction,
                        if issues.is_empty() {
                            "No action required".to_string()
                        } else {
                            format!("Most severe: {}", most_severe(&issues))
                        },
                    );
                for finding in findings.iter().cloned() {
                    out = out.conclusion(finding);
                }
                out.with_confidence(0.85)
            }

            ReasoningStage::Validation => StageOutput::new()
                .thought(
                    StepKind::Verification,
                    "Cross-checked conclusions against the raw metrics",
                )
                .thought(
                    StepKind::Verification,
                    format!("{} conclusion(s) remain consistent", issues.len()),
                )
                .with_confidence(0.85),
        };
        Ok(output)
    }
}

fn most_severe(issues: &[&Finding]) -> String {
    issues
        .iter()
        .max_by_key(|f| f.severity)
        .map(|f| f.description.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::role::RoleDescriptor;
    use crate::agent::tools::DiagnosticTool;
    use crate::snapshot::Snapshot;
    use serde_json::json;
    use std::sync::Arc;

    fn request(stage: ReasoningStage, role: RoleDescriptor) -> StageRequest {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "collection_id": "h-1",
            "hardware": {
                "cpu": { "usage_percent": 95.0, "core_count": 4 },
                "memory": { "total": 8589934592u64, "usage_percent": 30.0 }
            }
        }))
        .unwrap();
        let tool_results = role.tools.iter().map(|t| t.run(&snapshot)).collect();
        StageRequest {
            agent: role.name.clone(),
            role: Arc::new(role),
            stage,
            prompt: String::new(),
            running_summary: String::new(),
            tool_results,
            snapshot: Arc::new(snapshot),
        }
    }

    #[tokio::test]
    async fn test_every_stage_passes_default_gate() {
        let backend = HeuristicBackend::new();
        for stage in ReasoningStage::ALL {
            let out = backend
                .run_stage(&request(stage, RoleDescriptor::hardware()))
                .await
                .unwrap();
            assert!(out.thoughts.len() >= 2, "{stage} has too few thoughts");
            assert!(out.confidence.unwrap() >= 0.3);
            assert_eq!(out.steps.len(), out.thoughts.len());
        }
    }

    #[tokio::test]
    async fn test_conclusions_respect_role_focus() {
        let backend = HeuristicBackend::new();
        let hw = backend
            .run_stage(&request(ReasoningStage::Conclusion, RoleDescriptor::hardware()))
            .await
            .unwrap();
        assert!(hw.conclusions.iter().any(|f| f.category == "cpu" && f.is_issue()));

        let net = backend
            .run_stage(&request(ReasoningStage::Conclusion, RoleDescriptor::network()))
            .await
            .unwrap();
        assert!(net.conclusions.is_empty());
    }

    #[tokio::test]
    async fn test_default_tool_hook_runs_builtin_tool() {
        let backend = HeuristicBackend::new();
        let req = request(ReasoningStage::InformationGathering, RoleDescriptor::hardware());
        let obs = backend
            .invoke_tool(DiagnosticTool::AnalyzeCpu, &req.snapshot)
            .await
            .unwrap();
        assert_eq!(obs.tool, DiagnosticTool::AnalyzeCpu);
    }
}
