//! Named scalar metrics derived from a snapshot
//!
//! Rules and diagnostic tools address telemetry through these names
//! (`cpu.usage_percent`, `network.avg_latency_ms`, ...) instead of walking the
//! snapshot structure themselves. Aggregates over lists (disks, processes,
//! probes) are folded here once.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Snapshot;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "cpu.usage_percent")]
    CpuUsagePercent,
    #[serde(rename = "cpu.core_count")]
    CpuCoreCount,
    #[serde(rename = "cpu.frequency_mhz")]
    CpuFrequencyMhz,
    #[serde(rename = "cpu.temperature")]
    CpuTemperature,
    #[serde(rename = "memory.usage_percent")]
    MemoryUsagePercent,
    #[serde(rename = "memory.total_gb")]
    MemoryTotalGb,
    #[serde(rename = "swap.usage_percent")]
    SwapUsagePercent,
    #[serde(rename = "disk.max_usage_percent")]
    DiskMaxUsagePercent,
    #[serde(rename = "system.uptime_secs")]
    SystemUptimeSecs,
    #[serde(rename = "system.process_count")]
    SystemProcessCount,
    #[serde(rename = "process.max_cpu_percent")]
    ProcessMaxCpuPercent,
    #[serde(rename = "process.max_memory_percent")]
    ProcessMaxMemoryPercent,
    #[serde(rename = "network.active_interfaces")]
    NetworkActiveInterfaces,
    #[serde(rename = "network.reachable_ratio")]
    NetworkReachableRatio,
    #[serde(rename = "network.avg_latency_ms")]
    NetworkAvgLatencyMs,
    #[serde(rename = "network.max_packet_loss")]
    NetworkMaxPacketLoss,
}

impl Metric {
    pub const ALL: [Metric; 16] = [
        Metric::CpuUsagePercent,
        Metric::CpuCoreCount,
        Metric::CpuFrequencyMhz,
        Metric::CpuTemperature,
        Metric::MemoryUsagePercent,
        Metric::MemoryTotalGb,
        Metric::SwapUsagePercent,
        Metric::DiskMaxUsagePercent,
        Metric::SystemUptimeSecs,
        Metric::SystemProcessCount,
        Metric::ProcessMaxCpuPercent,
        Metric::ProcessMaxMemoryPercent,
        Metric::NetworkActiveInterfaces,
        Metric::NetworkReachableRatio,
        Metric::NetworkAvgLatencyMs,
        Metric::NetworkMaxPacketLoss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuUsagePercent => "cpu.usage_percent",
            Self::CpuCoreCount => "cpu.core_count",
            Self::CpuFrequencyMhz => "cpu.frequency_mhz",
            Self::CpuTemperature => "cpu.temperature",
            Self::MemoryUsagePercent => "memory.usage_percent",
            Self::MemoryTotalGb => "memory.total_gb",
            Self::SwapUsagePercent => "swap.usage_percent",
            Self::DiskMaxUsagePercent => "disk.max_usage_percent",
            Self::SystemUptimeSecs => "system.uptime_secs",
            Self::SystemProcessCount => "system.process_count",
            Self::ProcessMaxCpuPercent => "process.max_cpu_percent",
            Self::ProcessMaxMemoryPercent => "process.max_memory_percent",
            Self::NetworkActiveInterfaces => "network.active_interfaces",
            Self::NetworkReachableRatio => "network.reachable_ratio",
            Self::NetworkAvgLatencyMs => "network.avg_latency_ms",
            Self::NetworkMaxPacketLoss => "network.max_packet_loss",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric: {0}")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

pub(super) fn read(snap: &Snapshot, metric: Metric) -> Option<f64> {
    let hw = &snap.hardware;
    let procs = &snap.system.processes;
    let net = &snap.network;

    match metric {
        // Absent mandatory percentages deserialize as NaN
        Metric::CpuUsagePercent => finite(hw.cpu.usage_percent),
        Metric::CpuCoreCount => Some(f64::from(hw.cpu.core_count)),
        Metric::CpuFrequencyMhz => hw.cpu.frequency_mhz,
        Metric::CpuTemperature => hw.cpu.temperature,
        Metric::MemoryUsagePercent => finite(hw.memory.usage_percent),
        Metric::MemoryTotalGb => Some(hw.memory.total as f64 / BYTES_PER_GB),
        Metric::SwapUsagePercent => (hw.memory.swap_total > 0)
            .then(|| hw.memory.swap_used as f64 / hw.memory.swap_total as f64 * 100.0),
        Metric::DiskMaxUsagePercent => max_of(hw.disks.iter().map(|d| d.usage_percent)),
        Metric::SystemUptimeSecs => snap.system.host.uptime_secs.map(|s| s as f64),
        Metric::SystemProcessCount => Some(procs.len() as f64),
        Metric::ProcessMaxCpuPercent => max_of(procs.iter().map(|p| p.cpu_percent)),
        Metric::ProcessMaxMemoryPercent => max_of(procs.iter().map(|p| p.memory_percent)),
        // An empty interface list means the collector reported nothing, not zero interfaces up
        Metric::NetworkActiveInterfaces => (!net.interfaces.is_empty())
            .then(|| net.interfaces.iter().filter(|i| i.is_up).count() as f64),
        Metric::NetworkReachableRatio => (!net.connectivity.is_empty()).then(|| {
            let reachable = net.connectivity.iter().filter(|p| p.is_reachable).count();
            reachable as f64 / net.connectivity.len() as f64
        }),
        Metric::NetworkAvgLatencyMs => {
            mean_of(net.connectivity.iter().filter_map(|p| p.latency_ms))
        }
        Metric::NetworkMaxPacketLoss => max_of(net.connectivity.iter().filter_map(|p| p.packet_loss)),
    }
}

fn max_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc, v| match acc {
        Some(m) if m >= v => Some(m),
        _ => Some(v),
    })
}

fn mean_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
