//! JSON log file event storage.
//!
//! Append-only JSON lines, one event per line, one file per UTC day.

use super::{EventStore, StorageError};
use crate::models::{MonitoringEpoch, ProcessEvent};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// A single line in the event log.
#[derive(Serialize)]
struct LogEntry<'a> {
    /// ISO 8601 time the event was written.
    timestamp: String,
    /// Orchestrator run that produced the event.
    epoch: MonitoringEpoch,
    /// The event being logged.
    event: &'a ProcessEvent,
}

struct OpenLog {
    date: String,
    writer: BufWriter<File>,
}

/// JSON event log storage.
pub struct JsonEventLog {
    /// Directory for log files.
    log_dir: PathBuf,
    epoch: MonitoringEpoch,
    current: Mutex<Option<OpenLog>>,
}

impl JsonEventLog {
    /// Create a new JSON event log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory cannot be created.
    pub fn new<P: AsRef<Path>>(log_dir: P, epoch: MonitoringEpoch) -> Result<Self, StorageError> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)?;

        Ok(Self {
            log_dir,
            epoch,
            current: Mutex::new(None),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the log file for a given date (`YYYY-MM-DD`).
    pub fn log_path_for(&self, date: &str) -> PathBuf {
        self.log_dir.join(format!("events-{date}.jsonl"))
    }

    fn open(&self, date: &str) -> Result<OpenLog, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path_for(date))?;

        Ok(OpenLog {
            date: date.to_string(),
            writer: BufWriter::new(file),
        })
    }
}

impl EventStore for JsonEventLog {
    fn persist_event(&self, event: &ProcessEvent) -> Result<(), StorageError> {
        let now = Utc::now();
        let today = now.format("%Y-%m-%d").to_string();

        let entry = LogEntry {
            timestamp: now.to_rfc3339(),
            epoch: self.epoch,
            event,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut current = self.current.lock();

        // Rotate to a new file when the date changes
        let needs_rotation = current.as_ref().map_or(true, |log| log.date != today);
        if needs_rotation {
            if let Some(log) = current.as_mut() {
                log.writer.flush()?;
            }
            *current = Some(self.open(&today)?);
        }

        if let Some(log) = current.as_mut() {
            log.writer.write_all(&line)?;
            // Flush per event: a crash loses at most the in-flight event
            log.writer.flush()?;
        }

        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        if let Some(log) = self.current.lock().as_mut() {
            log.writer.flush()?;
            log.writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}
