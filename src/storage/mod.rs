//! Storage collaborator for process event persistence.
//!
//! The monitoring core only needs `persist_event` and `flush`; query and
//! schema concerns belong to whatever sits behind the trait.
//! - JSON log files for append-only durable logs
//! - In-memory store for embedding and tests

pub mod json_log;
pub mod memory;

pub use json_log::JsonEventLog;
pub use memory::MemoryEventStore;

use crate::models::ProcessEvent;
use thiserror::Error;

/// Event store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for event storage backends.
pub trait EventStore: Send + Sync {
    /// Durably append one event.
    fn persist_event(&self, event: &ProcessEvent) -> Result<(), StorageError>;

    /// Flush any buffered data.
    fn flush(&self) -> Result<(), StorageError>;
}
