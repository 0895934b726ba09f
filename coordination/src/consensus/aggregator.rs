//! Weighted aggregation of agent findings
//!
//! ```text
//! contributions ──> drop weight 0 ──> group by (kind, category, text)
//!      ──> sum weights ──> rank (weight desc, earliest agent) ──> top N
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

use crate::findings::{AgentId, Finding, FindingKind};
use crate::rules::RuleFinding;

/// Errors from aggregation
#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("agent '{agent}' has invalid weight {weight}")]
    InvalidWeight { agent: AgentId, weight: f64 },

    #[error("agent '{agent}' has invalid confidence {confidence}")]
    InvalidConfidence { agent: AgentId, confidence: f64 },
}

/// Result type for aggregation
pub type AggregationResult<T> = Result<T, AggregationError>;

/// Weight given to every rule finding merged into a result
pub const RULE_FINDING_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Maximum issues and, separately, recommendations kept
    pub top_n: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { top_n: 10 }
    }
}

/// One agent's findings together with its trust weight
#[derive(Debug, Clone)]
pub struct AgentContribution {
    pub agent: AgentId,
    /// Position in the roster; lower wins ties
    pub rank: usize,
    pub weight: f64,
    pub confidence: f64,
    pub findings: Vec<Finding>,
}

/// Where a ranked finding came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FindingSource {
    Consensus,
    Rule { rule_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFinding {
    pub finding: Finding,
    pub weight: f64,
    /// Contributing agents in roster order; empty for rule findings
    pub contributors: Vec<AgentId>,
    #[serde(flatten)]
    pub source: FindingSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl RankedFinding {
    pub fn is_rule(&self) -> bool {
        matches!(self.source, FindingSource::Rule { .. })
    }
}

/// Ranked issues and recommendations of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub issues: Vec<RankedFinding>,
    pub recommendations: Vec<RankedFinding>,
    /// Agents with non-zero weight, in roster order
    pub participants: Vec<AgentId>,
    /// Weight-averaged agent confidence
    pub confidence: f64,
}

impl ConsensusResult {
    /// Rule-only result
    pub fn from_rules(findings: &[RuleFinding]) -> Self {
        let mut result = Self::default();
        result.append_rule_findings(findings);
        result
    }

    /// Append rule findings after the ranked agent findings. Never replaces
    /// and never truncates.
    pub fn append_rule_findings(&mut self, findings: &[RuleFinding]) {
        for rf in findings {
            let source = FindingSource::Rule {
                rule_id: rf.rule_id.clone(),
            };
            self.issues.push(RankedFinding {
                finding: rf.issue.clone(),
                weight: RULE_FINDING_WEIGHT,
                contributors: Vec::new(),
                source: source.clone(),
                evidence: Some(rf.evidence.clone()),
            });
            if let Some(rec) = &rf.recommendation {
                self.recommendations.push(RankedFinding {
                    finding: rec.clone(),
                    weight: RULE_FINDING_WEIGHT,
                    contributors: Vec::new(),
                    source,
                    evidence: None,
                });
            }
        }
    }

    pub fn top_issue(&self) -> Option<&RankedFinding> {
        self.issues.first()
    }

    pub fn has_rule_findings(&self) -> bool {
        self.issues.iter().chain(&self.recommendations).any(RankedFinding::is_rule)
    }
}

/// Accumulator for one merged finding
struct Group {
    finding: Finding,
    weight: f64,
    /// (rank, agent)
    contributors: Vec<(usize, AgentId)>,
}

impl Group {
    fn earliest_rank(&self) -> usize {
        self.contributors
            .iter()
            .map(|(rank, _)| *rank)
            .min()
            .unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsensusAggregator {
    config: AggregatorConfig,
}

impl ConsensusAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Merge weighted findings into ranked, de-duplicated issues and
    /// recommendations plus one aggregate confidence.
    pub fn aggregate(
        &self,
        contributions: &[AgentContribution],
    ) -> AggregationResult<ConsensusResult> {
        for c in contributions {
            if !c.weight.is_finite() || c.weight < 0.0 {
                return Err(AggregationError::InvalidWeight {
                    agent: c.agent.clone(),
                    weight: c.weight,
                });
            }
            if !c.confidence.is_finite() || !(0.0..=1.0).contains(&c.confidence) {
                return Err(AggregationError::InvalidConfidence {
                    agent: c.agent.clone(),
                    confidence: c.confidence,
                });
            }
        }

        let mut voting: Vec<&AgentContribution> =
            contributions.iter().filter(|c| c.weight > 0.0).collect();
        voting.sort_by_key(|c| c.rank);

        // Key: (kind, normalized category, normalized description)
        let mut groups: BTreeMap<(FindingKind, String, String), Group> = BTreeMap::new();
        for c in &voting {
            for finding in &c.findings {
                let group = groups.entry(finding.content_key()).or_insert_with(|| Group {
                    finding: finding.clone(),
                    weight: 0.0,
                    contributors: Vec::new(),
                });
                if finding.severity > group.finding.severity {
                    group.finding.severity = finding.severity;
                }
                // One agent repeating itself does not add weight
                if !group.contributors.iter().any(|(_, a)| a == &c.agent) {
                    group.weight += c.weight;
                    group.contributors.push((c.rank, c.agent.clone()));
                }
            }
        }

        let (issue_groups, rec_groups): (Vec<_>, Vec<_>) = groups
            .into_iter()
            .partition(|((kind, _, _), _)| *kind == FindingKind::Issue);

        let issues = self.rank(issue_groups);
        let recommendations = self.rank(rec_groups);

        let confidence = aggregate_confidence(&voting, &issues, &recommendations);
        let participants = voting.iter().map(|c| c.agent.clone()).collect();

        debug!(
            issues = issues.len(),
            recommendations = recommendations.len(),
            confidence,
            "Consensus aggregated"
        );

        Ok(ConsensusResult {
            issues,
            recommendations,
            participants,
            confidence,
        })
    }

    fn rank(&self, groups: Vec<((FindingKind, String, String), Group)>) -> Vec<RankedFinding> {
        let mut groups = groups;
        groups.sort_by(|(ka, a), (kb, b)| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.earliest_rank().cmp(&b.earliest_rank()))
                .then_with(|| ka.cmp(kb))
        });
        groups.truncate(self.config.top_n);

        groups
            .into_iter()
            .map(|(_, mut group)| {
                group.contributors.sort();
                RankedFinding {
                    finding: group.finding,
                    weight: group.weight,
                    contributors: group.contributors.into_iter().map(|(_, a)| a).collect(),
                    source: FindingSource::Consensus,
                    evidence: None,
                }
            })
            .collect()
    }
}

/// Weight-average of agent confidences over agents whose findings survived.
/// With no surviving findings at all, every voting agent counts.
fn aggregate_confidence(
    voting: &[&AgentContribution],
    issues: &[RankedFinding],
    recommendations: &[RankedFinding],
) -> f64 {
    let survived = |agent: &AgentId| {
        issues
            .iter()
            .chain(recommendations)
            .any(|f| f.contributors.contains(agent))
    };
    let any_findings = !issues.is_empty() || !recommendations.is_empty();

    let (num, den) = voting
        .iter()
        .filter(|c| !any_findings || survived(&c.agent))
        .fold((0.0, 0.0), |(num, den), c| {
            (num + c.weight * c.confidence, den + c.weight)
        });

    if den > 0.0 {
        (num / den).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Severity;

    fn contribution(agent: &str, rank: usize, weight: f64, confidence: f64, findings: Vec<Finding>) -> AgentContribution {
        AgentContribution {
            agent: agent.to_string(),
            rank,
            weight,
            confidence,
            findings,
        }
    }

    fn cpu() -> Finding {
        Finding::issue("cpu", "CPU usage is high", Severity::High)
    }

    #[test]
    fn test_agreeing_agents_merge_and_average_confidence() {
        let result = ConsensusAggregator::default()
            .aggregate(&[
                contribution("a", 0, 1.0, 0.8, vec![cpu()]),
                contribution("b", 1, 1.0, 0.75, vec![cpu()]),
                contribution("c", 2, 1.0, 0.9, vec![cpu()]),
            ])
            .unwrap();

        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].weight, 3.0);
        assert_eq!(result.issues[0].contributors, vec!["a", "b", "c"]);
        assert_eq!(result.top_issue().unwrap().finding.category, "cpu");
        assert!((result.confidence - 0.8166666).abs() < 1e-4);
    }

    #[test]
    fn test_distinct_findings_stay_separate_and_rank_by_weight() {
        let disk = Finding::issue("disk", "Disk / is full", Severity::Critical);
        let result = ConsensusAggregator::default()
            .aggregate(&[
                contribution("a", 0, 0.4, 0.8, vec![cpu()]),
                contribution("b", 1, 0.9, 0.8, vec![disk.clone()]),
            ])
            .unwrap();
        assert_eq!(result.issues[0].finding, disk);
        assert_eq!(result.issues[1].finding, cpu());
    }

    #[test]
    fn test_ties_break_on_earliest_agent() {
        let mem = Finding::issue("memory", "Memory is low", Severity::High);
        let result = ConsensusAggregator::default()
            .aggregate(&[
                contribution("late", 5, 0.5, 0.8, vec![cpu()]),
                contribution("early", 1, 0.5, 0.8, vec![mem.clone()]),
            ])
            .unwrap();
        assert_eq!(result.issues[0].finding, mem);
    }

    #[test]
    fn test_zero_weight_agents_do_not_vote() {
        let result = ConsensusAggregator::default()
            .aggregate(&[contribution("a", 0, 0.0, 0.9, vec![cpu()])])
            .unwrap();
        assert!(result.issues.is_empty());
        assert!(result.participants.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_truncates_issues_and_recommendations_separately() {
        let findings: Vec<Finding> = (0..5)
            .flat_map(|i| {
                vec![
                    Finding::issue("cpu", format!("issue {i}"), Severity::Low),
                    Finding::recommendation("cpu", format!("fix {i}"), Severity::Low),
                ]
            })
            .collect();
        let result = ConsensusAggregator::new(AggregatorConfig { top_n: 3 })
            .aggregate(&[contribution("a", 0, 1.0, 0.7, findings)])
            .unwrap();
        assert_eq!(result.issues.len(), 3);
        assert_eq!(result.recommendations.len(), 3);
    }

    #[test]
    fn test_ranking_is_deterministic_across_input_order() {
        let mem = Finding::issue("memory", "Memory is low", Severity::High);
        let a = contribution("a", 0, 0.5, 0.8, vec![cpu(), mem.clone()]);
        let b = contribution("b", 1, 0.5, 0.6, vec![mem, cpu()]);
        let agg = ConsensusAggregator::default();
        let forward = agg.aggregate(&[a.clone(), b.clone()]).unwrap();
        let reverse = agg.aggregate(&[b, a]).unwrap();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_merged_finding_keeps_highest_severity() {
        let low = Finding::issue("cpu", "CPU usage is high", Severity::Low);
        let result = ConsensusAggregator::default()
            .aggregate(&[
                contribution("a", 0, 1.0, 0.8, vec![low]),
                contribution("b", 1, 1.0, 0.8, vec![cpu()]),
            ])
            .unwrap();
        assert_eq!(result.issues[0].finding.severity, Severity::High);
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        let agg = ConsensusAggregator::default();
        assert!(matches!(
            agg.aggregate(&[contribution("a", 0, f64::NAN, 0.5, vec![])]),
            Err(AggregationError::InvalidWeight { .. })
        ));
        assert!(matches!(
            agg.aggregate(&[contribution("a", 0, 0.5, 1.5, vec![])]),
            Err(AggregationError::InvalidConfidence { .. })
        ));
    }

    #[test]
    fn test_rule_findings_are_appended_not_substituted() {
        let mut result = ConsensusAggregator::default()
            .aggregate(&[contribution("a", 0, 0.3, 0.4, vec![cpu()])])
            .unwrap();
        let rule = RuleFinding {
            rule_id: "memory_usage_high".into(),
            issue: Finding::issue("memory", "Memory usage is high (95.0%)", Severity::High),
            recommendation: Some(Finding::recommendation("memory", "Add RAM", Severity::High)),
            evidence: "memory.usage_percent > 90 (observed 95)".into(),
            observed: 95.0,
            confidence: 0.8,
        };
        result.append_rule_findings(&[rule]);

        assert_eq!(result.issues.len(), 2);
        assert_eq!(result.issues[0].source, FindingSource::Consensus);
        assert_eq!(result.issues[1].weight, RULE_FINDING_WEIGHT);
        assert!(result.issues[1].is_rule());
        assert_eq!(result.recommendations.len(), 1);
        assert!(result.has_rule_findings());
    }
}
