//! Process event logger
//!
//! Bus subscriber that hands every event to the configured [`EventStore`].
//! A failed write is reported and the event dropped; later events are still
//! attempted.

use crate::bus::Subscriber;
use crate::daemon::logging::DaemonLogger;
use crate::models::ProcessEvent;
use crate::storage::{EventStore, StorageError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const EVENT_LOGGER_NAME: &str = "event-logger";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventLoggerStats {
    pub persisted: u64,
    pub failed: u64,
}

pub struct ProcessEventLogger {
    store: Arc<dyn EventStore>,
    logger: DaemonLogger,
    persisted: AtomicU64,
    failed: AtomicU64,
}

impl ProcessEventLogger {
    pub fn new(store: Arc<dyn EventStore>, logger: DaemonLogger) -> Self {
        Self {
            store,
            logger,
            persisted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Forward buffered data to durable storage
    pub fn flush(&self) -> Result<(), StorageError> {
        self.store.flush()
    }

    pub fn stats(&self) -> EventLoggerStats {
        EventLoggerStats {
            persisted: self.persisted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn record_result(&self, event: &ProcessEvent, result: Result<(), StorageError>) {
        match result {
            Ok(()) => {
                self.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.logger.log_persistence_failure(event, &e.to_string());
            }
        }
    }
}

#[async_trait]
impl Subscriber for ProcessEventLogger {
    fn name(&self) -> &str {
        EVENT_LOGGER_NAME
    }

    async fn on_event(&self, event: ProcessEvent) {
        self.logger.log_process_event(&event);

        // Store writes are blocking I/O
        let store = Arc::clone(&self.store);
        let (event, result) = match tokio::task::spawn_blocking(move || {
            let result = store.persist_event(&event);
            (event, result)
        })
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.logger
                    .log_error("Event store write did not complete", Some(&e.to_string()));
                return;
            }
        };

        self.record_result(&event, result);
    }
}
