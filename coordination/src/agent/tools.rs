//! Built-in deterministic diagnostic tools
//!
//! Roles list the tools they may call. The runtime invokes them through the
//! inference backend at the information-gathering stage; the default backend
//! hook runs these implementations directly against the snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::findings::{Finding, Severity};
use crate::snapshot::{Metric, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticTool {
    AnalyzeCpu,
    AnalyzeMemory,
    AnalyzeDisk,
    AnalyzeNetwork,
    AnalyzeProcesses,
}

impl fmt::Display for DiagnosticTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnalyzeCpu => write!(f, "analyze_cpu"),
            Self::AnalyzeMemory => write!(f, "analyze_memory"),
            Self::AnalyzeDisk => write!(f, "analyze_disk"),
            Self::AnalyzeNetwork => write!(f, "analyze_network"),
            Self::AnalyzeProcesses => write!(f, "analyze_processes"),
        }
    }
}

/// Result of one tool call, fed into later stage requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolObservation {
    pub tool: DiagnosticTool,
    pub summary: String,
    pub findings: Vec<Finding>,
    pub evidence: Vec<String>,
}

impl DiagnosticTool {
    pub fn run(&self, snapshot: &Snapshot) -> ToolObservation {
        let mut obs = ToolObservation {
            tool: *self,
            summary: String::new(),
            findings: Vec::new(),
            evidence: Vec::new(),
        };
        match self {
            Self::AnalyzeCpu => analyze_cpu(snapshot, &mut obs),
            Self::AnalyzeMemory => analyze_memory(snapshot, &mut obs),
            Self::AnalyzeDisk => analyze_disk(snapshot, &mut obs),
            Self::AnalyzeNetwork => analyze_network(snapshot, &mut obs),
            Self::AnalyzeProcesses => analyze_processes(snapshot, &mut obs),
        }
        obs
    }
}

fn analyze_cpu(snap: &Snapshot, obs: &mut ToolObservation) {
    let cpu = &snap.hardware.cpu;
    obs.evidence.push(format!("cpu.usage_percent={:.1}", cpu.usage_percent));
    obs.evidence.push(format!("cpu.core_count={}", cpu.core_count));

    let mut notes = Vec::new();
    if cpu.usage_percent > 90.0 {
        notes.push("CPU usage is critically high".to_string());
        obs.findings.push(Finding::issue(
            "cpu",
            "CPU usage is high",
            Severity::High,
        ));
        obs.findings.push(Finding::recommendation(
            "cpu",
            "Identify CPU-heavy processes and reduce the load",
            Severity::High,
        ));
    } else if cpu.usage_percent > 70.0 {
        notes.push("CPU usage is elevated".to_string());
        obs.findings.push(Finding::issue(
            "cpu",
            "CPU usage is elevated",
            Severity::Medium,
        ));
    } else {
        notes.push("CPU usage is normal".to_string());
    }

    if cpu.core_count < 2 {
        notes.push("few CPU cores may limit multitasking".to_string());
    }
    if let Some(temp) = cpu.temperature {
        obs.evidence.push(format!("cpu.temperature={temp:.1}"));
        if temp > 80.0 {
            notes.push(format!("CPU temperature is high at {temp:.1}°C"));
            obs.findings.push(Finding::issue(
                "cpu",
                "CPU temperature is high",
                Severity::High,
            ));
        }
    }
    obs.summary = format!("CPU analysis: {}", notes.join("; "));
}

fn analyze_memory(snap: &Snapshot, obs: &mut ToolObservation) {
    let mem = &snap.hardware.memory;
    let total_gb = snap.metric(Metric::MemoryTotalGb).unwrap_or(0.0);
    obs.evidence.push(format!("memory.usage_percent={:.1}", mem.usage_percent));
    obs.evidence.push(format!("memory.total_gb={total_gb:.1}"));

    let mut notes = Vec::new();
    if mem.usage_percent > 90.0 {
        notes.push("memory usage is critically high".to_string());
        obs.findings.push(Finding::issue(
            "memory",
            "Memory usage is high",
            Severity::High,
        ));
        obs.findings.push(Finding::recommendation(
            "memory",
            "Close memory-heavy applications or add RAM",
            Severity::High,
        ));
    } else if mem.usage_percent > 80.0 {
        notes.push("memory usage is elevated".to_string());
        obs.findings.push(Finding::issue(
            "memory",
            "Memory usage is elevated",
            Severity::Medium,
        ));
    } else {
        notes.push("memory usage is normal".to_string());
    }

    if total_gb < 4.0 {
        notes.push("physical memory is small".to_string());
    }
    obs.summary = format!("Memory analysis: {}", notes.join("; "));
}

fn analyze_disk(snap: &Snapshot, obs: &mut ToolObservation) {
    let mut notes = Vec::new();
    for disk in &snap.hardware.disks {
        obs.evidence.push(format!(
            "{}.usage_percent={:.1}",
            disk.mountpoint, disk.usage_percent
        ));
        if disk.usage_percent > 95.0 {
            notes.push(format!("{} is almost full", disk.mountpoint));
            obs.findings.push(Finding::issue(
                "disk",
                format!("Disk {} is almost full", disk.mountpoint),
                Severity::Critical,
            ));
            obs.findings.push(Finding::recommendation(
                "disk",
                format!("Free space on {}", disk.mountpoint),
                Severity::Critical,
            ));
        } else if disk.usage_percent > 85.0 {
            notes.push(format!("{} is running low on space", disk.mountpoint));
            obs.findings.push(Finding::issue(
                "disk",
                format!("Disk {} is running low on space", disk.mountpoint),
                Severity::Medium,
            ));
        } else {
            notes.push(format!("{} has enough space", disk.mountpoint));
        }
    }
    if notes.is_empty() {
        notes.push("no disks reported".to_string());
    }
    obs.summary = format!("Disk analysis: {}", notes.join("; "));
}

fn analyze_network(snap: &Snapshot, obs: &mut ToolObservation) {
    let net = &snap.network;
    let mut notes = Vec::new();

    if net.connectivity.is_empty() {
        notes.push("no connectivity probes were run".to_string());
    } else {
        let reachable = net.connectivity.iter().filter(|p| p.is_reachable).count();
        obs.evidence
            .push(format!("reachable={reachable}/{}", net.connectivity.len()));
        if reachable == 0 {
            notes.push("every probe target is unreachable".to_string());
            obs.findings.push(Finding::issue(
                "network",
                "Network connectivity is down",
                Severity::Critical,
            ));
            obs.findings.push(Finding::recommendation(
                "network",
                "Check cabling, gateway and DNS settings",
                Severity::Critical,
            ));
        } else if reachable < net.connectivity.len() {
            notes.push("some probe targets are unreachable".to_string());
            obs.findings.push(Finding::issue(
                "network",
                "Partial network connectivity loss",
                Severity::Medium,
            ));
        } else {
            notes.push("connectivity is normal".to_string());
        }
    }

    if let Some(latency) = snap.metric(Metric::NetworkAvgLatencyMs) {
        obs.evidence.push(format!("avg_latency_ms={latency:.1}"));
        if latency > 200.0 {
            notes.push(format!("latency is high ({latency:.1} ms)"));
            obs.findings.push(Finding::issue(
                "network",
                "Network latency is high",
                Severity::Medium,
            ));
        }
    }

    if let Some(active) = snap.metric(Metric::NetworkActiveInterfaces) {
        if active == 0.0 {
            notes.push("no interface is up".to_string());
            obs.findings.push(Finding::issue(
                "network",
                "No active network interface",
                Severity::Critical,
            ));
        } else {
            notes.push(format!("{active} interface(s) up"));
        }
    }
    obs.summary = format!("Network analysis: {}", notes.join("; "));
}

fn analyze_processes(snap: &Snapshot, obs: &mut ToolObservation) {
    let procs = &snap.system.processes;
    obs.evidence.push(format!("process_count={}", procs.len()));

    let mut notes = vec![format!("{} processes running", procs.len())];
    let hogs: Vec<&str> = snap
        .top_processes_by_cpu(3)
        .into_iter()
        .filter(|p| p.cpu_percent > 80.0)
        .map(|p| p.name.as_str())
        .collect();
    if !hogs.is_empty() {
        notes.push(format!("high CPU processes: {}", hogs.join(", ")));
        obs.findings.push(Finding::issue(
            "process",
            "A process is monopolizing the CPU",
            Severity::Medium,
        ));
        obs.findings.push(Finding::recommendation(
            "process",
            "Inspect the top CPU process for runaway work",
            Severity::Medium,
        ));
    }
    if procs.len() > 200 {
        notes.push("process count is unusually high".to_string());
        obs.findings.push(Finding::issue(
            "system",
            "Too many processes are running",
            Severity::Medium,
        ));
    }
    obs.summary = format!("Process analysis: {}", notes.join("; "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(cpu: f64) -> Snapshot {
        serde_json::from_value(json!({
            "collection_id": "tools",
            "hardware": {
                "cpu": { "usage_percent": cpu, "core_count": 8 },
                "memory": { "total": 17179869184u64, "usage_percent": 50.0 },
                "disks": [ { "device": "d", "mountpoint": "/", "usage_percent": 97.0 } ]
            },
            "system": { "processes": [ { "pid": 7, "name": "miner", "cpu_percent": 95.0 } ] },
            "network": { "connectivity": [ { "host": "gw", "is_reachable": false } ] }
        }))
        .unwrap()
    }

    #[test]
    fn test_cpu_tool_flags_high_usage() {
        let obs = DiagnosticTool::AnalyzeCpu.run(&snapshot(92.0));
        assert!(obs.summary.contains("critically high"));
        assert_eq!(obs.findings[0].category, "cpu");
        assert_eq!(obs.findings[0].severity, Severity::High);
    }

    #[test]
    fn test_cpu_tool_is_quiet_when_idle() {
        let obs = DiagnosticTool::AnalyzeCpu.run(&snapshot(10.0));
        assert!(obs.findings.is_empty());
    }

    #[test]
    fn test_disk_network_and_process_tools() {
        let snap = snapshot(10.0);
        let disk = DiagnosticTool::AnalyzeDisk.run(&snap);
        assert_eq!(disk.findings[0].severity, Severity::Critical);

        let net = DiagnosticTool::AnalyzeNetwork.run(&snap);
        assert!(net.findings.iter().any(|f| f.description == "Network connectivity is down"));

        let procs = DiagnosticTool::AnalyzeProcesses.run(&snap);
        assert!(procs.summary.contains("miner"));
    }

    #[test]
    fn test_tool_names() {
        assert_eq!(DiagnosticTool::AnalyzeProcesses.to_string(), "analyze_processes");
    }
}
