//! Rendering of records, rule sets and progress events

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt::Write;

use sysgraph_coordination::snapshot::FieldViolation;
use sysgraph_coordination::{
    DiagnosisEvent, DiagnosisRecord, FindingSource, RankedFinding, ReasoningStage, Rule,
    RuleEvaluator, RuleStatistics,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

pub fn render_record(record: &DiagnosisRecord, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(record)?),
        ReportFormat::Text => Ok(record_text(record)?),
    }
}

fn record_text(record: &DiagnosisRecord) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "Diagnosis {} ({})", record.run_id, record.collection_id)?;
    writeln!(
        out,
        "  confidence {:.2}  health {:.2}  validated {}  rule engine {}",
        record.confidence, record.health_score, record.validated, record.rule_engine_used
    )?;
    if let Some(reason) = record.fallback_reason {
        writeln!(out, "  fallback: {reason}")?;
    }

    if !record.agents.is_empty() {
        writeln!(out, "\nAgents")?;
        for agent in &record.agents {
            write!(
                out,
                "  {:<12} {:<10} stages {}/{}  confidence {:.2}  weight {:.2}",
                agent.agent,
                agent.status.to_string(),
                agent.stages,
                ReasoningStage::COUNT,
                agent.confidence,
                agent.weight
            )?;
            match &agent.failure {
                Some(failure) => writeln!(out, "  ({failure})")?,
                None => writeln!(out)?,
            }
        }
    }

    write_findings(&mut out, "Issues", record.issues())?;
    write_findings(&mut out, "Recommendations", record.recommendations())?;
    writeln!(
        out,
        "\nAudit entries {}..={}",
        record.audit.first_seq, record.audit.last_seq
    )?;
    Ok(out)
}

fn write_findings(
    out: &mut String,
    title: &str,
    findings: &[RankedFinding],
) -> Result<(), std::fmt::Error> {
    writeln!(out, "\n{title}")?;
    if findings.is_empty() {
        writeln!(out, "  none")?;
        return Ok(());
    }
    for (i, ranked) in findings.iter().enumerate() {
        let source = match &ranked.source {
            FindingSource::Consensus => format!("agents: {}", ranked.contributors.join(", ")),
            FindingSource::Rule { rule_id } => format!("rule: {rule_id}"),
        };
        writeln!(
            out,
            "  {}. [{}] {}: {}  (weight {:.2}, {})",
            i + 1,
            ranked.finding.severity,
            ranked.finding.category,
            ranked.finding.description,
            ranked.weight,
            source
        )?;
        if let Some(evidence) = &ranked.evidence {
            writeln!(out, "     evidence: {evidence}")?;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RuleListing<'a> {
    builtin: bool,
    #[serde(flatten)]
    rule: &'a Rule,
}

/// List `rules`, flagging the ones `evaluator` treats as built-in
pub fn render_rules(
    evaluator: &RuleEvaluator,
    rules: &[&Rule],
    format: ReportFormat,
) -> Result<String> {
    let listing: Vec<RuleListing> = rules
        .iter()
        .copied()
        .map(|rule| RuleListing {
            builtin: evaluator.is_builtin(&rule.id),
            rule,
        })
        .collect();

    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(&listing)?),
        ReportFormat::Text => {
            let builtin = listing.iter().filter(|l| l.builtin).count();
            let mut out = String::new();
            writeln!(
                out,
                "{} rules ({} built-in, {} external)",
                listing.len(),
                builtin,
                listing.len() - builtin
            )?;
            for entry in &listing {
                let rule = entry.rule;
                writeln!(
                    out,
                    "  {:<24} {:<8} {:<10} {}{}{}",
                    rule.id,
                    rule.action.severity.to_string(),
                    rule.category,
                    rule.condition,
                    if entry.builtin { "  [builtin]" } else { "" },
                    if rule.enabled { "" } else { "  [disabled]" }
                )?;
            }
            Ok(out)
        }
    }
}

pub fn render_rule_statistics(stats: &RuleStatistics, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Json => Ok(serde_json::to_string_pretty(stats)?),
        ReportFormat::Text => {
            let mut out = String::new();
            writeln!(
                out,
                "{} active rules ({} built-in, {} external, {} disabled)",
                stats.total, stats.builtin, stats.external, stats.disabled
            )?;
            writeln!(out, "\nBy category")?;
            for (category, count) in &stats.by_category {
                writeln!(out, "  {category:<12} {count}")?;
            }
            writeln!(out, "\nBy severity")?;
            for (severity, count) in stats.by_severity.iter().rev() {
                writeln!(out, "  {:<12} {count}", severity.to_string())?;
            }
            Ok(out)
        }
    }
}

pub fn render_violations(violations: &[FieldViolation]) -> String {
    if violations.is_empty() {
        return "snapshot is valid".to_string();
    }
    let mut lines = vec![format!("{} violation(s):", violations.len())];
    lines.extend(violations.iter().map(|v| format!("  {v}")));
    lines.join("\n")
}

/// One stderr line for the events worth showing while a run is in progress
pub fn progress_line(event: &DiagnosisEvent) -> Option<String> {
    match event {
        DiagnosisEvent::RunStarted { agents, .. } => {
            Some(format!("starting diagnosis with {}", agents.join(", ")))
        }
        DiagnosisEvent::SnapshotRejected { violations, .. } => Some(format!(
            "snapshot rejected ({} violations), using rules only",
            violations.len()
        )),
        DiagnosisEvent::StageCompleted {
            agent,
            stage,
            stage_confidence,
            ..
        } => Some(format!(
            "[{agent}] {}/{} {stage} ({stage_confidence:.2})",
            stage.index() + 1,
            ReasoningStage::COUNT
        )),
        DiagnosisEvent::StageGateFailed { agent, failure, .. } => Some(format!(
            "[{agent}] {} rejected: {}",
            failure.stage, failure.reason
        )),
        DiagnosisEvent::AgentFinished {
            agent,
            status,
            confidence,
            failure,
            ..
        } => Some(match failure {
            Some(failure) => format!("[{agent}] {status}: {failure}"),
            None => format!("[{agent}] {status} ({confidence:.2})"),
        }),
        DiagnosisEvent::ConfidenceGateEvaluated {
            confidence,
            threshold,
            passed,
            ..
        } => Some(format!(
            "confidence {confidence:.2} {} threshold {threshold:.2}",
            if *passed { ">=" } else { "<" }
        )),
        DiagnosisEvent::RuleEngineInvoked { reason, fired, .. } => Some(format!(
            "rule engine ({reason}): {} rule(s) fired",
            fired.len()
        )),
        DiagnosisEvent::EmergencyFallback { reason, detail, .. } => {
            Some(format!("emergency fallback ({reason}): {detail}"))
        }
        _ => None,
    }
}
