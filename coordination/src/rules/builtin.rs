//! Baseline rules that are active in every evaluation

use super::rule::{Condition, Operator, Rule};
use crate::findings::Severity;
use crate::snapshot::Metric;

const THIRTY_DAYS_SECS: f64 = 30.0 * 24.0 * 3600.0;

/// Built-in rules in declaration order
pub fn builtin_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "cpu_usage_high",
            "cpu",
            Condition::new(Metric::CpuUsagePercent, Operator::Gt, 90.0),
            Severity::High,
            "CPU usage is high ({value}%)",
        )
        .with_recommendation("Identify CPU-heavy processes and reduce or reschedule the load"),
        Rule::new(
            "memory_usage_high",
            "memory",
            Condition::new(Metric::MemoryUsagePercent, Operator::Gt, 90.0),
            Severity::High,
            "Memory usage is high ({value}%)",
        )
        .with_recommendation("Close memory-heavy applications or add RAM"),
        Rule::new(
            "disk_space_critical",
            "disk",
            Condition::new(Metric::DiskMaxUsagePercent, Operator::Gt, 95.0),
            Severity::Critical,
            "Disk space is nearly exhausted ({value}% used)",
        )
        .with_recommendation("Free disk space by removing temporary files and old logs"),
        Rule::new(
            "cpu_temperature_high",
            "cpu",
            Condition::new(Metric::CpuTemperature, Operator::Gt, 80.0),
            Severity::High,
            "CPU temperature is high ({value}°C)",
        )
        .with_recommendation("Check cooling: fans, airflow and heatsink contact"),
        Rule::new(
            "uptime_too_long",
            "system",
            Condition::new(Metric::SystemUptimeSecs, Operator::Gt, THIRTY_DAYS_SECS),
            Severity::Medium,
            "System has been running for more than 30 days",
        )
        .with_recommendation("Schedule a maintenance reboot to apply pending updates"),
        Rule::new(
            "too_many_processes",
            "system",
            Condition::new(Metric::SystemProcessCount, Operator::Gt, 200.0),
            Severity::Medium,
            "Unusually many processes are running ({value})",
        )
        .with_recommendation("Review running services and stop unneeded ones"),
        Rule::new(
            "process_cpu_hog",
            "process",
            Condition::new(Metric::ProcessMaxCpuPercent, Operator::Gt, 80.0),
            Severity::Medium,
            "A single process is using {value}% CPU",
        )
        .with_recommendation("Inspect the top CPU process for runaway work"),
        Rule::new(
            "network_unreachable",
            "network",
            Condition::new(Metric::NetworkReachableRatio, Operator::Eq, 0.0),
            Severity::Critical,
            "No connectivity probe target is reachable",
        )
        .with_recommendation("Check cabling, Wi-Fi association, gateway and DNS settings"),
        Rule::new(
            "network_latency_high",
            "network",
            Condition::new(Metric::NetworkAvgLatencyMs, Operator::Gt, 200.0),
            Severity::Medium,
            "Average network latency is high ({value} ms)",
        )
        .with_recommendation("Check link quality and congestion on the local network"),
        Rule::new(
            "no_active_interface",
            "network",
            Condition::new(Metric::NetworkActiveInterfaces, Operator::Eq, 0.0),
            Severity::Critical,
            "No network interface is up",
        )
        .with_recommendation("Bring up a network interface or check the network driver"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_rules_are_valid_and_unique() {
        let rules = builtin_rules();
        let mut ids = HashSet::new();
        for rule in &rules {
            rule.validate().unwrap();
            assert!(ids.insert(rule.id.clone()), "duplicate id {}", rule.id);
        }
        assert_eq!(rules.len(), 10);
    }

    #[test]
    fn test_cpu_rule_is_first() {
        let rules = builtin_rules();
        assert_eq!(rules[0].id, "cpu_usage_high");
        assert_eq!(rules[0].condition.threshold, 90.0);
    }
}
