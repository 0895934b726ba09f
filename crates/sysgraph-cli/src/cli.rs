//! Command-line arguments

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::report::ReportFormat;

#[derive(Debug, Parser)]
#[command(name = "sysgraph", version, about = "Multi-agent system diagnosis")]
pub struct Cli {
    /// TOML config file
    #[arg(long, global = true, env = "SYSGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Shorthand for --log-level debug
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Diagnose a snapshot with the agent roster and rule fallback
    Diagnose(DiagnoseArgs),
    /// List the active rule set
    Rules(RulesArgs),
    /// Check a snapshot against the mandatory-field contract
    CheckSnapshot {
        /// Snapshot JSON file
        path: PathBuf,
    },
}

#[derive(Debug, Args)]
pub struct DiagnoseArgs {
    /// Snapshot JSON file
    #[arg(long, short)]
    pub snapshot: PathBuf,

    /// Extra rule files or directories (YAML or JSON)
    #[arg(long = "rules")]
    pub rules: Vec<PathBuf>,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,

    /// Write the report here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Aggregate confidence below which rule findings are merged
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Budget for the agent fan-out
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Comma-separated roster, e.g. hardware,system,network
    #[arg(long, value_delimiter = ',')]
    pub agents: Option<Vec<String>>,

    /// Mirror the audit log to this JSONL file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Do not print progress to stderr
    #[arg(long, short)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct RulesArgs {
    /// Extra rule files or directories (YAML or JSON)
    #[arg(long = "rules")]
    pub rules: Vec<PathBuf>,

    /// Only list active rules of this category
    #[arg(long)]
    pub category: Option<String>,

    /// Print counts by category and severity instead of the rule list
    #[arg(long, conflicts_with = "category")]
    pub stats: bool,

    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub format: ReportFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diagnose() {
        let cli = Cli::try_parse_from([
            "sysgraph",
            "diagnose",
            "--snapshot",
            "snap.json",
            "--rules",
            "a.yaml",
            "--rules",
            "b.json",
            "--agents",
            "hardware,network",
            "--format",
            "json",
            "--debug",
        ])
        .unwrap();

        assert!(cli.debug);
        let Command::Diagnose(args) = cli.command else {
            panic!("expected diagnose");
        };
        assert_eq!(args.snapshot, PathBuf::from("snap.json"));
        assert_eq!(args.rules.len(), 2);
        assert_eq!(args.format, ReportFormat::Json);
        assert_eq!(
            args.agents,
            Some(vec!["hardware".to_string(), "network".to_string()])
        );
    }

    #[test]
    fn test_parse_rules_stats() {
        let cli = Cli::try_parse_from(["sysgraph", "rules", "--stats", "--format", "json"]).unwrap();
        let Command::Rules(args) = cli.command else {
            panic!("expected rules");
        };
        assert!(args.stats);
        assert_eq!(args.format, ReportFormat::Json);

        assert!(
            Cli::try_parse_from(["sysgraph", "rules", "--stats", "--category", "cpu"]).is_err()
        );
    }

    #[test]
    fn test_check_snapshot_takes_positional_path() {
        let cli = Cli::try_parse_from(["sysgraph", "check-snapshot", "snap.json"]).unwrap();
        assert!(matches!(cli.command, Command::CheckSnapshot { .. }));
    }
}
