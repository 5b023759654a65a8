//! Data models module
//!
//! Defines core data structures shared by every component:
//! - ProcessRecord: identity attributes of one running process
//! - ProcessSnapshot: point-in-time set of ProcessRecords
//! - ProcessEvent: lifecycle event derived from two snapshots
//! - MonitoringEpoch: identifier of one orchestrator run

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Identity attributes of a single running process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Process ID (PID)
    pub pid: u32,
    /// Process name as reported by the OS
    pub name: String,
    /// Full path to the executable (empty when the OS does not expose it)
    pub executable_path: PathBuf,
    /// Time the process started
    pub start_time: DateTime<Utc>,
    /// Code signing publisher, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

impl ProcessRecord {
    /// Executable file name, falling back to the OS process name
    pub fn executable_name(&self) -> &str {
        self.executable_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.name)
    }

    /// Whether the OS exposed an executable path for this process
    pub fn has_executable_path(&self) -> bool {
        !self.executable_path.as_os_str().is_empty()
    }

    /// Key used by the process tracker: PID paired with start time in seconds.
    /// A PID reused by a different process gets a different key.
    pub fn tracking_key(&self) -> ProcessKey {
        ProcessKey {
            pid: self.pid,
            start_secs: self.start_time.timestamp(),
        }
    }
}

/// Convert a start time in seconds since the Unix epoch into a timestamp
pub fn start_time_from_secs(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Snapshot key for a process within one monitoring epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessKey {
    pub pid: u32,
    pub start_secs: i64,
}

/// Snapshot of process state at a given moment
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    /// Map of (PID, start time) -> ProcessRecord for O(1) lookups
    pub processes: HashMap<ProcessKey, ProcessRecord>,
    /// Capture time of this snapshot
    pub timestamp: DateTime<Utc>,
    /// Duration taken to create this snapshot
    pub scan_duration: Duration,
}

impl ProcessSnapshot {
    /// Build a snapshot from enumerated records
    pub fn from_records(
        records: impl IntoIterator<Item = ProcessRecord>,
        timestamp: DateTime<Utc>,
        scan_duration: Duration,
    ) -> Self {
        let processes = records
            .into_iter()
            .map(|record| (record.tracking_key(), record))
            .collect();

        Self {
            processes,
            timestamp,
            scan_duration,
        }
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Look up a process by PID
    pub fn find_pid(&self, pid: u32) -> Option<&ProcessRecord> {
        self.processes.values().find(|record| record.pid == pid)
    }

    /// Records sorted by PID, for stable output
    pub fn sorted_records(&self) -> Vec<&ProcessRecord> {
        let mut records: Vec<_> = self.processes.values().collect();
        records.sort_by_key(|record| record.pid);
        records
    }
}

/// Lifecycle event produced by the process tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessEvent {
    /// A process appeared between two snapshots
    Started(ProcessRecord),
    /// A process disappeared between two snapshots.
    /// `end_time` is the capture time of the snapshot that noticed the absence.
    Ended { pid: u32, end_time: DateTime<Utc> },
}

impl ProcessEvent {
    pub fn pid(&self) -> u32 {
        match self {
            ProcessEvent::Started(record) => record.pid,
            ProcessEvent::Ended { pid, .. } => *pid,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProcessEvent::Started(_) => "started",
            ProcessEvent::Ended { .. } => "ended",
        }
    }

    /// Executable path for Started events
    pub fn executable_path(&self) -> Option<&Path> {
        match self {
            ProcessEvent::Started(record) => Some(&record.executable_path),
            ProcessEvent::Ended { .. } => None,
        }
    }
}

/// Identifier of one orchestrator run. PIDs are only unique within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoringEpoch(Uuid);

impl MonitoringEpoch {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MonitoringEpoch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MonitoringEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
