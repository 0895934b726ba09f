//! Subcommand implementations

use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use sysgraph_coordination::rules::loader::{load_directory, load_file};
use sysgraph_coordination::{
    AgentRegistry, AuditLog, DiagnosisRecord, HeuristicBackend, Orchestrator, RuleEvaluator,
    Snapshot,
};

use crate::cli::{DiagnoseArgs, RulesArgs};
use crate::config::SysgraphConfig;
use crate::report::{self, progress_line};

/// Fold `diagnose` flags over the loaded config
pub fn apply_diagnose_flags(config: &mut SysgraphConfig, args: &DiagnoseArgs) {
    if let Some(threshold) = args.threshold {
        config.agents.consensus_threshold = threshold;
    }
    if let Some(secs) = args.timeout_secs {
        config.agents.reasoning_timeout_secs = secs;
    }
    if let Some(agents) = &args.agents {
        config.agents.enabled = agents.clone();
    }
    if let Some(path) = &args.audit_log {
        config.logging.audit_log = Some(path.clone());
    }
    config.rules.external.extend(args.rules.iter().cloned());
}

/// Built-in rules plus every external file or directory, in order
pub fn build_rule_evaluator(config: &SysgraphConfig) -> Result<RuleEvaluator> {
    if !config.rules.enable_builtin {
        warn!("rules.enable_builtin = false is ignored, built-in rules always run");
    }

    let mut evaluator =
        RuleEvaluator::new().with_boost_threshold(config.rules.confidence_boost_threshold);
    for path in &config.rules.external {
        let rules = if path.is_dir() {
            let (rules, summary) = load_directory(path)
                .with_context(|| format!("Failed to load rules from {}", path.display()))?;
            for err in &summary.errors {
                warn!(dir = %path.display(), "Rule file skipped: {err}");
            }
            rules
        } else {
            load_file(path).with_context(|| format!("Failed to load rules from {}", path.display()))?
        };
        let skipped = evaluator.merge(rules);
        if !skipped.is_empty() {
            warn!(path = %path.display(), skipped = ?skipped, "Rules shadowed by existing ids");
        }
    }
    Ok(evaluator)
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    Snapshot::from_json_str(&raw)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))
}

/// Run one diagnosis with the heuristic backend, printing progress to stderr
pub async fn run_diagnosis(
    config: &SysgraphConfig,
    snapshot: Snapshot,
    quiet: bool,
) -> Result<DiagnosisRecord> {
    let roster = AgentRegistry::with_defaults()
        .roster(&config.agents.enabled)
        .context("Invalid agent roster")?;
    let rules = build_rule_evaluator(config)?;
    let audit = match &config.logging.audit_log {
        Some(path) => AuditLog::with_jsonl(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?,
        None => AuditLog::new(),
    };

    let orchestrator = Orchestrator::new(
        roster,
        Arc::new(HeuristicBackend::new()),
        config.orchestrator_config(),
    )
    .with_rules(rules.shared())
    .with_audit(audit.shared())
    .shared();

    let mut events = orchestrator.run_diagnosis(snapshot);
    let mut record = None;
    while let Some(event) = events.next().await {
        if !quiet {
            if let Some(line) = progress_line(&event) {
                eprintln!("{line}");
            }
        }
        if let Some(done) = event.into_record() {
            record = Some(done);
        }
    }

    record.context("Diagnosis ended without a record")
}

pub async fn diagnose(config: &SysgraphConfig, args: &DiagnoseArgs) -> Result<DiagnosisRecord> {
    let snapshot = read_snapshot(&args.snapshot)?;
    let record = run_diagnosis(config, snapshot, args.quiet).await?;
    let rendered = report::render_record(&record, args.format)?;
    write_output(args.output.as_deref(), &rendered)?;
    info!(
        run_id = %record.run_id,
        issues = record.issues().len(),
        "Report written"
    );
    Ok(record)
}

pub fn rules(config: &SysgraphConfig, args: &RulesArgs) -> Result<String> {
    let mut config = config.clone();
    config.rules.external.extend(args.rules.iter().cloned());
    let evaluator = build_rule_evaluator(&config)?;
    if args.stats {
        return report::render_rule_statistics(&evaluator.statistics(), args.format);
    }
    let listed = match &args.category {
        Some(category) => evaluator.rules_by_category(category),
        None => evaluator.rules().iter().collect(),
    };
    report::render_rules(&evaluator, &listed, args.format)
}

/// Rendered violations and whether the snapshot is valid
pub fn check_snapshot(path: &Path) -> Result<(String, bool)> {
    let snapshot = read_snapshot(path)?;
    let violations = snapshot.violations();
    Ok((report::render_violations(&violations), violations.is_empty()))
}

fn write_output(path: Option<&Path>, content: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => {
            println!("{content}");
            Ok(())
        }
    }
}

