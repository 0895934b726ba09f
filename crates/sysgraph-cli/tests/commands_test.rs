//! Integration tests for the CLI commands

use sysgraph_cli::commands::{check_snapshot, read_snapshot, run_diagnosis};
use sysgraph_cli::report::{progress_line, render_record, render_rules};
use sysgraph_cli::cli::RulesArgs;
use sysgraph_cli::{ReportFormat, SysgraphConfig};
use sysgraph_coordination::{AuditLog, FallbackReason, FindingSource, Rule, RuleEvaluator};

const BUSY_SNAPSHOT: &str = r#"{
    "collection_id": "cli-node",
    "hardware": {
        "cpu": { "usage_percent": 97.0, "core_count": 4 },
        "memory": { "total": 8589934592, "usage_percent": 35.0 }
    },
    "system": { "host": { "hostname": "cli-node", "uptime_secs": 120 } },
    "network": { "interfaces": [ { "name": "eth0", "is_up": true } ] }
}"#;

const EXTRA_RULES: &str = r#"
rules:
  - id: few_cores
    category: cpu
    condition: { metric: cpu.core_count, op: "<", threshold: 8 }
    action: { severity: low, message: "Only {value} cores" }
  - id: cpu_usage_high
    category: cpu
    condition: { metric: cpu.usage_percent, op: ">", threshold: 10 }
    action: { severity: low, message: "shadowed" }
"#;

fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Test: a full run with the heuristic backend writes a JSONL audit trail
#[tokio::test]
async fn test_diagnosis_writes_audit_log() {
    let temp = tempfile::TempDir::new().unwrap();
    let snapshot = read_snapshot(&write(&temp, "snap.json", BUSY_SNAPSHOT)).unwrap();
    let audit_path = temp.path().join("audit.jsonl");

    let mut config = SysgraphConfig::default();
    config.logging.audit_log = Some(audit_path.clone());

    let record = run_diagnosis(&config, snapshot, true).await.unwrap();

    assert!(record.validated);
    assert_eq!(record.agents.len(), 3);
    assert!(record.issues().iter().any(|i| i.finding.category == "cpu"));

    let entries = sysgraph_coordination::audit::read_jsonl(&audit_path).unwrap();
    assert_eq!(entries.first().unwrap().event_type, "run_started");
    assert_eq!(entries.last().unwrap().event_type, "run_completed");
}

/// Test: an invalid snapshot still produces a rule-only report
#[tokio::test]
async fn test_invalid_snapshot_report() {
    let temp = tempfile::TempDir::new().unwrap();
    let invalid = BUSY_SNAPSHOT.replace("\"core_count\": 4", "\"core_count\": 0");
    let snapshot = read_snapshot(&write(&temp, "snap.json", &invalid)).unwrap();

    let record = run_diagnosis(&SysgraphConfig::default(), snapshot, true)
        .await
        .unwrap();

    assert_eq!(record.fallback_reason, Some(FallbackReason::InvalidSnapshot));
    let text = render_record(&record, ReportFormat::Text).unwrap();
    assert!(text.contains("fallback: invalid_snapshot"));
    assert!(text.contains("rule: cpu_usage_high"));

    let json = render_record(&record, ReportFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["validated"], false);
    assert_eq!(value["consensus"]["issues"][0]["source"], "rule");
}

/// Test: a snapshot without its hardware section is rejected, not a read error
#[tokio::test]
async fn test_snapshot_missing_hardware_is_rule_only() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = write(&temp, "bare.json", r#"{ "collection_id": "bare-node" }"#);

    let (report, valid) = check_snapshot(&path).unwrap();
    assert!(!valid);
    assert!(report.contains("hardware.cpu.usage_percent: is missing"));
    assert!(report.contains("hardware.memory.total"));

    let snapshot = read_snapshot(&path).unwrap();
    let record = run_diagnosis(&SysgraphConfig::default(), snapshot, true)
        .await
        .unwrap();

    assert_eq!(record.fallback_reason, Some(FallbackReason::InvalidSnapshot));
    assert!(record.rule_engine_used);
    assert!(!record.validated);
    assert!(record.agents.is_empty());
    assert!(record
        .issues()
        .iter()
        .all(|i| matches!(i.source, FindingSource::Rule { .. })));
}

/// Test: a file that is not JSON at all is still a read error
#[test]
fn test_malformed_snapshot_is_an_error() {
    let temp = tempfile::TempDir::new().unwrap();
    let err = read_snapshot(&write(&temp, "junk.json", "{ not json")).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse snapshot"));
}

/// Test: external rules are listed after the built-ins and cannot shadow them
#[test]
fn test_rules_listing_merges_external() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut config = SysgraphConfig::default();
    config.rules.external.push(write(&temp, "extra.yaml", EXTRA_RULES));

    let evaluator = sysgraph_cli::commands::build_rule_evaluator(&config).unwrap();
    let builtin = RuleEvaluator::new().rules().len();
    assert_eq!(evaluator.rules().len(), builtin + 1);
    assert_eq!(evaluator.rules()[builtin].id, "few_cores");

    let all: Vec<&Rule> = evaluator.rules().iter().collect();
    let text = render_rules(&evaluator, &all, ReportFormat::Text).unwrap();
    assert!(text.contains("few_cores"));
    assert!(!text.contains("shadowed"));

    let json = render_rules(&evaluator, &all, ReportFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value[0]["builtin"], true);
    assert_eq!(value[builtin]["builtin"], false);
}

/// Test: `rules --stats` and `rules --category` go through the evaluator queries
#[test]
fn test_rules_statistics_and_category_filter() {
    let temp = tempfile::TempDir::new().unwrap();
    let extra = write(&temp, "extra.yaml", EXTRA_RULES);
    let config = SysgraphConfig::default();

    let stats_args = RulesArgs {
        rules: vec![extra.clone()],
        category: None,
        stats: true,
        format: ReportFormat::Json,
    };
    let json = sysgraph_cli::commands::rules(&config, &stats_args).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let builtin = RuleEvaluator::new().rules().len() as u64;
    assert_eq!(value["total"], builtin + 1);
    assert_eq!(value["external"], 1);
    assert_eq!(value["by_severity"]["critical"], 3);

    let text = sysgraph_cli::commands::rules(
        &config,
        &RulesArgs {
            format: ReportFormat::Text,
            ..stats_args
        },
    )
    .unwrap();
    assert!(text.starts_with(&format!("{} active rules", builtin + 1)));
    assert!(text.contains("By severity"));

    let listed = sysgraph_cli::commands::rules(
        &config,
        &RulesArgs {
            rules: vec![extra],
            category: Some("network".to_string()),
            stats: false,
            format: ReportFormat::Json,
        },
    )
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&listed).unwrap();
    let rules = value.as_array().unwrap();
    assert!(!rules.is_empty());
    assert!(rules.iter().all(|r| r["category"] == "network"));
    assert!(rules.iter().all(|r| r["id"] != "few_cores"));
}

/// Test: an unreadable rule file is an error, not an empty rule set
#[test]
fn test_missing_rule_file_fails() {
    let mut config = SysgraphConfig::default();
    config.rules.external.push("/nonexistent/rules.yaml".into());
    assert!(sysgraph_cli::commands::build_rule_evaluator(&config).is_err());
}

/// Test: check-snapshot reports every violation
#[test]
fn test_check_snapshot() {
    let temp = tempfile::TempDir::new().unwrap();
    let (report, valid) = check_snapshot(&write(&temp, "ok.json", BUSY_SNAPSHOT)).unwrap();
    assert!(valid);
    assert_eq!(report, "snapshot is valid");

    let broken = BUSY_SNAPSHOT
        .replace("\"collection_id\": \"cli-node\"", "\"collection_id\": \"\"")
        .replace("\"usage_percent\": 97.0", "\"usage_percent\": 140.0");
    let (report, valid) = check_snapshot(&write(&temp, "bad.json", &broken)).unwrap();
    assert!(!valid);
    assert!(report.starts_with("2 violation(s):"));
    assert!(report.contains("collection_id"));
    assert!(report.contains("hardware.cpu.usage_percent"));
}

/// Test: progress lines exist for the key milestones only
#[tokio::test]
async fn test_progress_lines() {
    let temp = tempfile::TempDir::new().unwrap();
    let snapshot = read_snapshot(&write(&temp, "snap.json", BUSY_SNAPSHOT)).unwrap();
    let audit = AuditLog::new().shared();
    let orchestrator = sysgraph_coordination::Orchestrator::new(
        sysgraph_coordination::AgentRegistry::with_defaults()
            .roster(&["hardware"])
            .unwrap(),
        std::sync::Arc::new(sysgraph_coordination::HeuristicBackend::new()),
        SysgraphConfig::default().orchestrator_config(),
    )
    .with_audit(audit.clone());

    orchestrator.diagnose(snapshot).await;

    let lines: Vec<String> = audit
        .entries()
        .iter()
        .filter_map(|entry| progress_line(&entry.event))
        .collect();
    assert!(lines[0].starts_with("starting diagnosis with hardware"));
    assert!(lines.iter().any(|l| l.starts_with("[hardware] 6/6 validation")));
    assert!(audit
        .entries()
        .iter()
        .filter(|e| e.event_type == "run_completed")
        .all(|e| progress_line(&e.event).is_none()));
}
