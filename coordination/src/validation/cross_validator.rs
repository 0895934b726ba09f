//! Pairwise cross-validation of agent runs

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use super::similarity::{conclusion_similarity, narrative_consistency};
use crate::agent::{AgentRun, AgentStatus};
use crate::findings::AgentId;

/// Errors from cross-validation
#[derive(Debug, thiserror::Error)]
pub enum CrossValidationError {
    #[error("agent '{0}' appears more than once")]
    DuplicateAgent(AgentId),

    #[error("non-finite score for agent '{agent}'")]
    NonFinite { agent: AgentId },
}

/// Result type for cross-validation
pub type CrossValidationResult<T> = Result<T, CrossValidationError>;

/// Scores of one unordered pair of runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    /// Narrative similarity, stage by stage
    pub consistency: f64,
    /// Similarity of final finding sets
    pub similarity: f64,
}

impl PairScore {
    pub fn combined(&self) -> f64 {
        (self.consistency + self.similarity) / 2.0
    }
}

/// Trust assigned to one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub agent: AgentId,
    /// Final trust weight in 0..=1; 0.0 excludes the agent from voting
    pub weight: f64,
    pub mean_consistency: f64,
    pub mean_similarity: f64,
    pub peers: usize,
    pub status: AgentStatus,
}

/// Derives trust weights from agreement between runs
#[derive(Debug, Clone)]
pub struct CrossValidator {
    enabled: bool,
}

impl CrossValidator {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Every usable run gets weight 1.0; no comparison is made
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Compare two runs. Symmetric in its arguments.
    pub fn pairwise(&self, a: &AgentRun, b: &AgentRun) -> PairScore {
        PairScore {
            consistency: narrative_consistency(a, b),
            similarity: conclusion_similarity(a.findings(), b.findings()),
        }
    }

    /// Verdicts for every completed or aborted run; failed runs are skipped.
    ///
    /// An agent's weight is the mean combined pair score over its peers,
    /// scaled by the fraction of stages it completed. No peers means 0.0.
    pub fn validate(
        &self,
        runs: &[AgentRun],
    ) -> CrossValidationResult<BTreeMap<AgentId, ValidationVerdict>> {
        let mut seen = HashSet::new();
        for run in runs {
            if !seen.insert(run.agent.as_str()) {
                return Err(CrossValidationError::DuplicateAgent(run.agent.clone()));
            }
        }

        let usable: Vec<&AgentRun> = runs.iter().filter(|r| r.is_usable()).collect();
        let mut verdicts = BTreeMap::new();

        for (i, run) in usable.iter().enumerate() {
            let verdict = if !self.enabled {
                ValidationVerdict {
                    agent: run.agent.clone(),
                    weight: 1.0,
                    mean_consistency: 1.0,
                    mean_similarity: 1.0,
                    peers: usable.len() - 1,
                    status: run.status,
                }
            } else {
                self.verdict_for(i, &usable)?
            };
            debug!(agent = %verdict.agent, weight = verdict.weight, peers = verdict.peers, "Verdict");
            verdicts.insert(run.agent.clone(), verdict);
        }
        Ok(verdicts)
    }

    fn verdict_for(
        &self,
        index: usize,
        usable: &[&AgentRun],
    ) -> CrossValidationResult<ValidationVerdict> {
        let run = usable[index];
        let scores: Vec<PairScore> = usable
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != index)
            .map(|(_, peer)| self.pairwise(run, peer))
            .collect();

        let peers = scores.len();
        let (mean_consistency, mean_similarity, mean_combined) = if peers == 0 {
            (0.0, 0.0, 0.0)
        } else {
            let n = peers as f64;
            (
                scores.iter().map(|s| s.consistency).sum::<f64>() / n,
                scores.iter().map(|s| s.similarity).sum::<f64>() / n,
                scores.iter().map(PairScore::combined).sum::<f64>() / n,
            )
        };

        // Aborted runs keep reduced influence in proportion to the stages they finished
        let influence = match run.status {
            AgentStatus::Aborted => run.completed_fraction(),
            _ => 1.0,
        };
        let weight = mean_combined * influence;

        if !weight.is_finite() {
            return Err(CrossValidationError::NonFinite {
                agent: run.agent.clone(),
            });
        }

        Ok(ValidationVerdict {
            agent: run.agent.clone(),
            weight: weight.clamp(0.0, 1.0),
            mean_consistency,
            mean_similarity,
            peers,
            status: run.status,
        })
    }
}

impl Default for CrossValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ConfidenceSource, ReasoningStage, StageResult};
    use crate::findings::{Finding, Severity};
    use chrono::Utc;

    fn run(agent: &str, status: AgentStatus, stages: usize, text: &str, finding: Finding) -> AgentRun {
        let stages = ReasoningStage::ALL
            .iter()
            .take(stages)
            .map(|stage| StageResult {
                stage: *stage,
                thoughts: vec![text.to_string(), format!("{text} again")],
                steps: Vec::new(),
                conclusions: vec![finding.clone()],
                confidence: 0.8,
                confidence_source: ConfidenceSource::Backend,
                evidence: Vec::new(),
                completed_at: Utc::now(),
            })
            .collect();
        AgentRun {
            agent: agent.to_string(),
            role: "test".to_string(),
            stages,
            status,
            confidence: 0.8,
            failure: None,
            gate_failure: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn cpu_high() -> Finding {
        Finding::issue("cpu", "CPU usage is high", Severity::High)
    }

    #[test]
    fn test_identical_runs_get_full_weight() {
        let runs = vec![
            run("a", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
            run("b", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
            run("c", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
        ];
        let verdicts = CrossValidator::new().validate(&runs).unwrap();
        for v in verdicts.values() {
            assert!((v.weight - 1.0).abs() < 1e-9);
            assert_eq!(v.peers, 2);
        }
    }

    #[test]
    fn test_lone_survivor_gets_zero_weight() {
        let mut failed = run("a", AgentStatus::Failed, 0, "", cpu_high());
        failed.confidence = 0.0;
        let runs = vec![
            failed.clone(),
            run("b", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
            AgentRun { agent: "c".into(), ..failed },
        ];
        let verdicts = CrossValidator::new().validate(&runs).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts["b"].weight, 0.0);
        assert_eq!(verdicts["b"].peers, 0);
    }

    #[test]
    fn test_pairwise_is_symmetric() {
        let a = run("a", AgentStatus::Completed, 6, "cpu is saturated", cpu_high());
        let b = run(
            "b",
            AgentStatus::Aborted,
            3,
            "memory pressure detected",
            Finding::issue("memory", "Memory is low", Severity::Medium),
        );
        let v = CrossValidator::new();
        let ab = v.pairwise(&a, &b);
        let ba = v.pairwise(&b, &a);
        assert_eq!(ab, ba);
        assert!((0.0..=1.0).contains(&ab.consistency));
        assert!((0.0..=1.0).contains(&ab.similarity));
    }

    #[test]
    fn test_aborted_run_has_reduced_influence() {
        let runs = vec![
            run("a", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
            run("b", AgentStatus::Aborted, 3, "cpu is saturated", cpu_high()),
        ];
        let verdicts = CrossValidator::new().validate(&runs).unwrap();
        assert!(verdicts["b"].weight < verdicts["a"].weight);
        // Symmetric pair score, so the gap comes only from the stage fraction
        assert!((verdicts["b"].weight - verdicts["a"].weight * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_run_aborted_before_any_stage_has_zero_weight() {
        let runs = vec![
            run("a", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
            run("b", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
            run("c", AgentStatus::Aborted, 0, "", cpu_high()),
        ];
        let verdicts = CrossValidator::new().validate(&runs).unwrap();
        assert_eq!(verdicts["c"].weight, 0.0);
        assert_eq!(verdicts["c"].peers, 2);
        assert!(verdicts["a"].weight > 0.0);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let runs = vec![
            run("a", AgentStatus::Completed, 6, "cpu is saturated", cpu_high()),
            run("b", AgentStatus::Completed, 5, "cpu looks busy today", cpu_high()),
        ];
        let v = CrossValidator::new();
        assert_eq!(v.validate(&runs).unwrap(), v.validate(&runs).unwrap());
    }

    #[test]
    fn test_duplicate_agents_are_rejected() {
        let runs = vec![
            run("a", AgentStatus::Completed, 6, "x", cpu_high()),
            run("a", AgentStatus::Completed, 6, "x", cpu_high()),
        ];
        assert!(matches!(
            CrossValidator::new().validate(&runs),
            Err(CrossValidationError::DuplicateAgent(_))
        ));
    }

    #[test]
    fn test_disabled_validator_trusts_everyone() {
        let runs = vec![
            run("a", AgentStatus::Completed, 6, "cpu", cpu_high()),
            run("b", AgentStatus::Aborted, 1, "totally different", cpu_high()),
        ];
        let verdicts = CrossValidator::disabled().validate(&runs).unwrap();
        assert!(verdicts.values().all(|v| v.weight == 1.0));
    }
}
