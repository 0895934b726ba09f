//! Append-only audit log
//!
//! Every event of every run is appended here under a single lock, so the
//! sequence numbers give one total order that matches emission order. The
//! log can mirror entries to a JSONL file for later inspection; the file is
//! written outside that lock, in sequence order.
//!
//! Entries are kept in memory for the life of the `AuditLog` and are never
//! evicted, so a long-lived log grows without bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::events::{DiagnosisEvent, RunId};

/// Error type for audit operations
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to open audit file {path}: {detail}")]
    Open { path: String, detail: String },

    #[error("failed to read audit file {path}: {detail}")]
    Read { path: String, detail: String },

    #[error("malformed audit entry at line {line}: {detail}")]
    Parse { line: usize, detail: String },
}

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;

/// Shared reference to AuditLog
pub type SharedAuditLog = Arc<AuditLog>;

/// One logged event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub run_id: RunId,
    pub event_type: String,
    pub recorded_at: DateTime<Utc>,
    pub event: DiagnosisEvent,
}

/// Pointer from a record back to its audit entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRef {
    pub run_id: RunId,
    /// Sequence number of the run's first entry
    pub first_seq: u64,
    /// Sequence number of the last entry before the record was emitted
    pub last_seq: u64,
}

struct AuditInner {
    entries: Vec<AuditEntry>,
    next_seq: u64,
}

/// JSONL writer that puts lines in sequence order whatever order they
/// arrive in
struct Mirror {
    file: File,
    next_seq: u64,
    pending: BTreeMap<u64, Option<String>>,
}

impl Mirror {
    fn new(file: File) -> Self {
        Self {
            file,
            next_seq: 0,
            pending: BTreeMap::new(),
        }
    }

    /// `line` is `None` when the entry could not be serialized
    fn write(&mut self, seq: u64, line: Option<String>) {
        self.pending.insert(seq, line);
        while let Some(line) = self.pending.remove(&self.next_seq) {
            if let Some(line) = line {
                if let Err(e) = writeln!(self.file, "{line}") {
                    warn!(seq = self.next_seq, "Failed to mirror audit entry: {e}");
                }
            }
            self.next_seq += 1;
        }
    }
}

pub struct AuditLog {
    inner: Mutex<AuditInner>,
    mirror: Option<Mutex<Mirror>>,
    mirror_path: Option<PathBuf>,
}

impl AuditLog {
    /// In-memory log
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AuditInner {
                entries: Vec::new(),
                next_seq: 0,
            }),
            mirror: None,
            mirror_path: None,
        }
    }

    /// Log that also appends each entry as a JSON line to `path`
    pub fn with_jsonl(path: &Path) -> AuditResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| AuditError::Open {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;

        Ok(Self {
            inner: Mutex::new(AuditInner {
                entries: Vec::new(),
                next_seq: 0,
            }),
            mirror: Some(Mutex::new(Mirror::new(file))),
            mirror_path: Some(path.to_path_buf()),
        })
    }

    /// Create a shared reference to this log
    pub fn shared(self) -> SharedAuditLog {
        Arc::new(self)
    }

    pub fn mirror_path(&self) -> Option<&Path> {
        self.mirror_path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, AuditInner> {
        // A panic while holding the lock leaves the vector intact
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event; returns its sequence number
    pub fn append(&self, event: DiagnosisEvent) -> u64 {
        self.append_then(event, |_| {})
    }

    /// Append an event and run `forward` on it while still holding the lock,
    /// so downstream deliveries observe the same order as the log. The JSONL
    /// mirror is written after the lock is released.
    pub fn append_then<F>(&self, event: DiagnosisEvent, forward: F) -> u64
    where
        F: FnOnce(DiagnosisEvent),
    {
        let run_id = event.run_id();
        let event_type = event.event_type().to_string();

        let (seq, mirrored) = {
            let mut inner = self.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;

            let entry = AuditEntry {
                seq,
                run_id,
                event_type,
                recorded_at: Utc::now(),
                event,
            };
            debug!(seq, event_type = %entry.event_type, "Audit entry appended");

            let mirrored = self.mirror.is_some().then(|| entry.clone());
            let event = entry.event.clone();
            inner.entries.push(entry);
            forward(event);
            (seq, mirrored)
        };

        if let (Some(mirror), Some(entry)) = (&self.mirror, mirrored) {
            let line = serde_json::to_string(&entry)
                .map_err(|e| warn!(seq, "Failed to serialize audit entry: {e}"))
                .ok();
            mirror
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .write(seq, line);
        }
        seq
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries in sequence order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().entries.clone()
    }

    /// Entries of one run in sequence order
    pub fn entries_for_run(&self, run_id: RunId) -> Vec<AuditEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect()
    }

    /// Entries with `from <= seq <= to`
    pub fn range(&self, from: u64, to: u64) -> Vec<AuditEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| (from..=to).contains(&e.seq))
            .cloned()
            .collect()
    }

    /// Entry count per event type
    pub fn counts_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.lock().entries.iter() {
            *counts.entry(entry.event_type.clone()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Read back a JSONL audit file
pub fn read_jsonl(path: &Path) -> AuditResult<Vec<AuditEntry>> {
    let file = File::open(path).map_err(|e| AuditError::Read {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;

    let mut entries = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AuditError::Read {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| AuditError::Parse {
            line: i + 1,
            detail: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}
