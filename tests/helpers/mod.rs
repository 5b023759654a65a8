//! Shared fixtures for orchestrator integration tests
#![allow(dead_code)]

use parking_lot::Mutex;
use procguard::models::{start_time_from_secs, ProcessEvent, ProcessRecord};
use procguard::platform::{Platform, PlatformCapabilities, PlatformError};
use procguard::storage::{EventStore, MemoryEventStore, StorageError};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Platform whose process table is driven by the test.
///
/// Each scan pops the next scripted table; once the script is exhausted the
/// last table keeps being returned. Terminated PIDs disappear from later
/// tables.
pub struct ScriptedPlatform {
    tables: Mutex<VecDeque<Vec<ProcessRecord>>>,
    last: Mutex<Vec<ProcessRecord>>,
    killed: Mutex<Vec<u32>>,
    gone: Mutex<HashSet<u32>>,
}

impl ScriptedPlatform {
    pub fn new(tables: Vec<Vec<ProcessRecord>>) -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(tables.into()),
            last: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            gone: Mutex::new(HashSet::new()),
        })
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().clone()
    }

    /// Scripted tables not yet served
    pub fn remaining(&self) -> usize {
        self.tables.lock().len()
    }
}

impl Platform for ScriptedPlatform {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            enumerate: true,
            terminate: true,
            publisher: false,
        }
    }

    fn list_processes(&self) -> Result<Vec<ProcessRecord>, PlatformError> {
        let mut last = self.last.lock();
        if let Some(next) = self.tables.lock().pop_front() {
            *last = next;
        }
        let gone = self.gone.lock();
        Ok(last.iter().filter(|r| !gone.contains(&r.pid)).cloned().collect())
    }

    fn terminate_process(&self, pid: u32) -> Result<(), PlatformError> {
        self.killed.lock().push(pid);
        if !self.gone.lock().insert(pid) {
            return Err(PlatformError::ProcessAlreadyGone { pid });
        }
        Ok(())
    }

    fn publisher_name(&self, _path: &Path) -> Result<String, PlatformError> {
        Err(PlatformError::Unsupported {
            operation: "publisher lookup",
            platform: "scripted",
        })
    }
}

/// In-memory store that takes a fixed time per write
pub struct SlowStore {
    pub inner: MemoryEventStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryEventStore::new(),
            delay,
        })
    }
}

impl EventStore for SlowStore {
    fn persist_event(&self, event: &ProcessEvent) -> Result<(), StorageError> {
        std::thread::sleep(self.delay);
        self.inner.persist_event(event)
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Store that rejects every write
pub struct BrokenStore;

impl EventStore for BrokenStore {
    fn persist_event(&self, _event: &ProcessEvent) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk detached".to_string()))
    }

    fn flush(&self) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("disk detached".to_string()))
    }
}

pub fn record(pid: u32, path: &str, start_secs: u64) -> ProcessRecord {
    let executable_path = PathBuf::from(path);
    ProcessRecord {
        pid,
        name: executable_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        executable_path,
        start_time: start_time_from_secs(start_secs),
        publisher: None,
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
