//! Telemetry snapshot consumed by a diagnosis run
//!
//! A [`Snapshot`] is produced by an external collector and handed to the
//! orchestrator. The core never mutates it; agents, tools and rules all read
//! the same `Arc<Snapshot>`.
//!
//! ```text
//! Snapshot
//! ├── hardware: cpu, memory, disks[]
//! ├── system:   host, processes[]
//! └── network:  interfaces[], connectivity[]
//! ```

mod metrics;

pub use metrics::{Metric, UnknownMetric};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Errors from snapshot parsing and validation
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot failed validation: {}", format_violations(.0))]
    Invalid(Vec<FieldViolation>),

    #[error("failed to parse snapshot: {0}")]
    Parse(String),
}

/// Result type for snapshot operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Shared read-only snapshot handle
pub type SharedSnapshot = Arc<Snapshot>;

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// One mandatory-field contract violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Point-in-time bundle of hardware, system and network observations.
///
/// Mandatory fields that are absent from the input still deserialize, to
/// values that [`Snapshot::violations`] reports, so a snapshot missing them
/// is rejected by validation rather than by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub collection_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub hardware: HardwareInfo,
    #[serde(default)]
    pub system: SystemInfo,
    #[serde(default)]
    pub network: NetworkInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HardwareInfo {
    #[serde(default)]
    pub cpu: CpuInfo,
    #[serde(default)]
    pub memory: MemoryInfo,
    #[serde(default)]
    pub disks: Vec<DiskInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuInfo {
    #[serde(default = "missing_percent")]
    pub usage_percent: f64,
    #[serde(default)]
    pub core_count: u32,
    #[serde(default)]
    pub frequency_mhz: Option<f64>,
    /// Package temperature in °C, when the platform exposes it
    #[serde(default)]
    pub temperature: Option<f64>,
    /// 1, 5 and 15 minute load averages
    #[serde(default)]
    pub load_average: Option<[f64; 3]>,
}

/// Memory figures in bytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInfo {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default = "missing_percent")]
    pub usage_percent: f64,
    #[serde(default)]
    pub swap_total: u64,
    #[serde(default)]
    pub swap_used: u64,
}

/// Placeholder for an absent mandatory percentage; never passes validation
fn missing_percent() -> f64 {
    f64::NAN
}

impl Default for CpuInfo {
    fn default() -> Self {
        Self {
            usage_percent: missing_percent(),
            core_count: 0,
            frequency_mhz: None,
            temperature: None,
            load_average: None,
        }
    }
}

impl Default for MemoryInfo {
    fn default() -> Self {
        Self {
            total: 0,
            available: 0,
            used: 0,
            usage_percent: missing_percent(),
            swap_total: 0,
            swap_used: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    pub device: String,
    pub mountpoint: String,
    #[serde(default)]
    pub filesystem: String,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub free: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default)]
    pub host: HostInfo,
    #[serde(default)]
    pub processes: Vec<ProcessInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub uptime_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub cpu_percent: f64,
    #[serde(default)]
    pub memory_percent: f64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub interfaces: Vec<InterfaceInfo>,
    #[serde(default)]
    pub connectivity: Vec<ConnectivityProbe>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub is_up: bool,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_recv: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityProbe {
    pub host: String,
    pub is_reachable: bool,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Packet loss as a percentage
    #[serde(default)]
    pub packet_loss: Option<f64>,
}

impl Snapshot {
    /// Parse a snapshot from JSON. Does not validate.
    pub fn from_json_str(raw: &str) -> SnapshotResult<Self> {
        serde_json::from_str(raw).map_err(|e| SnapshotError::Parse(e.to_string()))
    }

    /// Create a shared reference to this snapshot
    pub fn shared(self) -> SharedSnapshot {
        Arc::new(self)
    }

    /// Check the mandatory-field contract
    pub fn validate(&self) -> SnapshotResult<()> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SnapshotError::Invalid(violations))
        }
    }

    /// Every mandatory-field violation, in field order
    pub fn violations(&self) -> Vec<FieldViolation> {
        let mut out = Vec::new();

        if self.collection_id.trim().is_empty() {
            out.push(FieldViolation::new("collection_id", "must not be empty"));
        }

        let cpu = &self.hardware.cpu;
        check_percent(&mut out, "hardware.cpu.usage_percent", cpu.usage_percent);
        if cpu.core_count == 0 {
            out.push(FieldViolation::new(
                "hardware.cpu.core_count",
                "must be at least 1",
            ));
        }

        let mem = &self.hardware.memory;
        if mem.total == 0 {
            out.push(FieldViolation::new(
                "hardware.memory.total",
                "must be greater than 0",
            ));
        }
        check_percent(&mut out, "hardware.memory.usage_percent", mem.usage_percent);

        for (i, disk) in self.hardware.disks.iter().enumerate() {
            check_percent(
                &mut out,
                &format!("hardware.disks[{i}].usage_percent"),
                disk.usage_percent,
            );
        }

        out
    }

    /// Read a named scalar metric. `None` means the source data is absent.
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        metrics::read(self, metric)
    }

    /// Disk with the highest usage
    pub fn fullest_disk(&self) -> Option<&DiskInfo> {
        self.hardware
            .disks
            .iter()
            .max_by(|a, b| a.usage_percent.total_cmp(&b.usage_percent))
    }

    /// Processes sorted by CPU usage, highest first
    pub fn top_processes_by_cpu(&self, limit: usize) -> Vec<&ProcessInfo> {
        let mut procs: Vec<&ProcessInfo> = self.system.processes.iter().collect();
        procs.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        procs.truncate(limit);
        procs
    }
}

fn check_percent(out: &mut Vec<FieldViolation>, field: &str, value: f64) {
    if !value.is_finite() {
        out.push(FieldViolation::new(field, "is missing or not a finite number"));
    } else if !(0.0..=100.0).contains(&value) {
        out.push(FieldViolation::new(
            field,
            format!("{value} is outside 0..=100"),
        ));
    }
}
