//! Stateless rule evaluation over a snapshot

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::builtin::builtin_rules;
use super::rule::Rule;
use crate::findings::{Finding, Severity};
use crate::snapshot::Snapshot;

/// Default rule confidence above which a fired rule is boosted
pub const DEFAULT_BOOST_THRESHOLD: f64 = 0.8;

/// Multiplier applied to boosted rules, capped at 1.0
pub const CONFIDENCE_BOOST: f64 = 1.1;

/// Shared reference to a RuleEvaluator
pub type SharedRuleEvaluator = Arc<RuleEvaluator>;

/// One fired rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFinding {
    pub rule_id: String,
    pub issue: Finding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Finding>,
    /// `"<metric> <op> <threshold> (observed <value>)"`
    pub evidence: String,
    pub observed: f64,
    pub confidence: f64,
}

/// Counts over the active rule set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatistics {
    /// Rules that take part in evaluation
    pub total: usize,
    pub builtin: usize,
    pub external: usize,
    /// External rules switched off with `enabled: false`
    pub disabled: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Evaluates the built-in baseline plus any merged external rules
#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    rules: Vec<Rule>,
    builtin_count: usize,
    boost_threshold: f64,
}

impl RuleEvaluator {
    /// Evaluator with only the built-in baseline
    pub fn new() -> Self {
        let rules = builtin_rules();
        let builtin_count = rules.len();
        Self {
            rules,
            builtin_count,
            boost_threshold: DEFAULT_BOOST_THRESHOLD,
        }
    }

    /// Evaluator with the baseline plus `external`
    pub fn with_external(external: Vec<Rule>) -> Self {
        let mut evaluator = Self::new();
        evaluator.merge(external);
        evaluator
    }

    /// Rules whose confidence is strictly above `threshold` are boosted by
    /// [`CONFIDENCE_BOOST`] when they fire
    pub fn with_boost_threshold(mut self, threshold: f64) -> Self {
        self.boost_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn boost_threshold(&self) -> f64 {
        self.boost_threshold
    }

    /// Create a shared reference to this evaluator
    pub fn shared(self) -> SharedRuleEvaluator {
        Arc::new(self)
    }

    /// Merge external rules after the existing ones.
    ///
    /// A rule whose id is already present is skipped, so built-in rules
    /// always win. Returns the ids that were skipped.
    pub fn merge(&mut self, external: Vec<Rule>) -> Vec<String> {
        let mut known: HashSet<String> = self.rules.iter().map(|r| r.id.clone()).collect();
        let mut skipped = Vec::new();

        for rule in external {
            if known.contains(&rule.id) {
                warn!(rule_id = %rule.id, "External rule collides with an active rule, keeping existing");
                skipped.push(rule.id);
                continue;
            }
            known.insert(rule.id.clone());
            self.rules.push(rule);
        }
        skipped
    }

    /// All rules in evaluation order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of built-in rules at the head of `rules()`
    pub fn builtin_count(&self) -> usize {
        self.builtin_count
    }

    /// Whether `id` names one of the built-in rules
    pub fn is_builtin(&self, id: &str) -> bool {
        self.rules[..self.builtin_count].iter().any(|r| r.id == id)
    }

    /// Rules that take part in evaluation, in declaration order
    pub fn active_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .enumerate()
            // Built-in rules cannot be switched off
            .filter(|(i, rule)| *i < self.builtin_count || rule.enabled)
            .map(|(_, rule)| rule)
    }

    /// Active rules of one category
    pub fn rules_by_category(&self, category: &str) -> Vec<&Rule> {
        self.active_rules()
            .filter(|rule| rule.category == category)
            .collect()
    }

    pub fn statistics(&self) -> RuleStatistics {
        let mut stats = RuleStatistics {
            builtin: self.builtin_count.min(self.rules.len()),
            ..RuleStatistics::default()
        };
        for rule in self.active_rules() {
            stats.total += 1;
            *stats.by_category.entry(rule.category.clone()).or_insert(0) += 1;
            *stats.by_severity.entry(rule.action.severity).or_insert(0) += 1;
        }
        stats.external = stats.total - stats.builtin;
        stats.disabled = self.rules.len() - stats.total;
        stats
    }

    /// Fire every rule whose condition holds, in declaration order.
    ///
    /// Pure: the same snapshot always yields the same findings.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<RuleFinding> {
        let fired: Vec<RuleFinding> = self
            .active_rules()
            .filter_map(|rule| fire(rule, snapshot, self.boost_threshold))
            .collect();

        debug!(
            collection_id = %snapshot.collection_id,
            rules = self.rules.len(),
            fired = fired.len(),
            "Rules evaluated"
        );
        fired
    }
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn fire(rule: &Rule, snapshot: &Snapshot, boost_threshold: f64) -> Option<RuleFinding> {
    let observed = rule.condition.check(snapshot)?;

    let confidence = if rule.confidence > boost_threshold {
        (rule.confidence * CONFIDENCE_BOOST).min(1.0)
    } else {
        rule.confidence
    };

    let recommendation = rule
        .action
        .recommendation
        .as_ref()
        .map(|text| Finding::recommendation(&rule.category, text, rule.action.severity));

    Some(RuleFinding {
        rule_id: rule.id.clone(),
        issue: Finding::issue(
            &rule.category,
            rule.render_message(observed),
            rule.action.severity,
        ),
        recommendation,
        evidence: format!("{} (observed {observed})", rule.condition),
        observed,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Condition, Operator};
    use crate::snapshot::Metric;
    use serde_json::json;

    fn snapshot(cpu: f64, mem: f64) -> Snapshot {
        serde_json::from_value(json!({
            "collection_id": "eval",
            "hardware": {
                "cpu": { "usage_percent": cpu, "core_count": 4 },
                "memory": { "total": 1024, "usage_percent": mem }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_cpu_rule_fires_above_threshold() {
        let evaluator = RuleEvaluator::new();
        let findings = evaluator.evaluate(&snapshot(92.0, 30.0));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "cpu_usage_high");
        assert_eq!(findings[0].issue.category, "cpu");
        assert_eq!(findings[0].issue.severity, Severity::High);
        assert_eq!(findings[0].evidence, "cpu.usage_percent > 90 (observed 92)");
        assert!(findings[0].recommendation.is_some());
    }

    #[test]
    fn test_healthy_snapshot_fires_nothing() {
        assert!(RuleEvaluator::new().evaluate(&snapshot(20.0, 30.0)).is_empty());
    }

    #[test]
    fn test_declaration_order_is_firing_order() {
        let findings = RuleEvaluator::new().evaluate(&snapshot(95.0, 95.0));
        let ids: Vec<&str> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["cpu_usage_high", "memory_usage_high"]);
    }

    #[test]
    fn test_builtin_wins_on_collision() {
        let shadow = Rule::new(
            "cpu_usage_high",
            "cpu",
            Condition::new(Metric::CpuUsagePercent, Operator::Gt, 10.0),
            Severity::Low,
            "shadowed",
        );
        let extra = Rule::new(
            "cpu_busy",
            "cpu",
            Condition::new(Metric::CpuUsagePercent, Operator::Gt, 50.0),
            Severity::Low,
            "busy",
        );
        let mut evaluator = RuleEvaluator::new();
        let skipped = evaluator.merge(vec![shadow, extra]);
        assert_eq!(skipped, vec!["cpu_usage_high".to_string()]);

        let findings = evaluator.evaluate(&snapshot(60.0, 10.0));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "cpu_busy");
    }

    #[test]
    fn test_disabled_external_rule_is_skipped() {
        let rule = Rule::new(
            "cpu_busy",
            "cpu",
            Condition::new(Metric::CpuUsagePercent, Operator::Gt, 50.0),
            Severity::Low,
            "busy",
        )
        .with_enabled(false);
        let evaluator = RuleEvaluator::with_external(vec![rule]);
        assert!(evaluator.evaluate(&snapshot(60.0, 10.0)).is_empty());
    }

    #[test]
    fn test_confident_rules_are_boosted() {
        let rule = Rule::new(
            "cpu_busy",
            "cpu",
            Condition::new(Metric::CpuUsagePercent, Operator::Gt, 50.0),
            Severity::Low,
            "busy",
        )
        .with_confidence(0.9);
        let findings = RuleEvaluator::with_external(vec![rule]).evaluate(&snapshot(60.0, 10.0));
        assert!((findings[0].confidence - 0.99).abs() < 1e-9);
    }

    fn cpu_rule(id: &str, confidence: f64) -> Rule {
        Rule::new(
            id,
            "cpu",
            Condition::new(Metric::CpuUsagePercent, Operator::Gt, 50.0),
            Severity::Low,
            "busy",
        )
        .with_confidence(confidence)
    }

    #[test]
    fn test_boost_applies_strictly_above_threshold() {
        let evaluator = RuleEvaluator::with_external(vec![cpu_rule("cpu_busy", 0.8)]);
        assert_eq!(evaluator.boost_threshold(), DEFAULT_BOOST_THRESHOLD);
        let at_threshold = evaluator.evaluate(&snapshot(60.0, 10.0));
        assert!((at_threshold[0].confidence - 0.8).abs() < 1e-9);

        let lowered = evaluator.with_boost_threshold(0.79);
        let boosted = lowered.evaluate(&snapshot(60.0, 10.0));
        assert!((boosted[0].confidence - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_boost_is_capped_at_one() {
        let evaluator = RuleEvaluator::with_external(vec![cpu_rule("cpu_busy", 0.95)]);
        let findings = evaluator.evaluate(&snapshot(60.0, 10.0));
        assert_eq!(findings[0].confidence, 1.0);
    }

    #[test]
    fn test_statistics_count_active_rules() {
        let builtin = RuleEvaluator::new().rules().len();
        let evaluator = RuleEvaluator::with_external(vec![
            cpu_rule("cpu_busy", 0.5),
            cpu_rule("cpu_idle", 0.5).with_enabled(false),
        ]);

        let stats = evaluator.statistics();
        assert_eq!(stats.total, builtin + 1);
        assert_eq!(stats.builtin, builtin);
        assert_eq!(stats.external, 1);
        assert_eq!(stats.disabled, 1);
        assert_eq!(stats.by_category.values().sum::<usize>(), stats.total);
        assert_eq!(stats.by_severity.values().sum::<usize>(), stats.total);
        assert_eq!(stats.by_severity[&Severity::Critical], 3);

        let cpu = evaluator.rules_by_category("cpu");
        assert_eq!(stats.by_category["cpu"], cpu.len());
        assert!(cpu.iter().any(|r| r.id == "cpu_busy"));
        assert!(cpu.iter().all(|r| r.id != "cpu_idle"));
        assert!(evaluator.rules_by_category("gpu").is_empty());
        assert!(evaluator.is_builtin("cpu_usage_high"));
        assert!(!evaluator.is_builtin("cpu_busy"));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let evaluator = RuleEvaluator::new();
        let snap = snapshot(99.0, 97.0);
        let first = serde_json::to_vec(&evaluator.evaluate(&snap)).unwrap();
        let second = serde_json::to_vec(&evaluator.evaluate(&snap)).unwrap();
        assert_eq!(first, second);
    }
}
