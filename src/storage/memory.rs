use super::{EventStore, StorageError};
use crate::models::ProcessEvent;
use parking_lot::Mutex;

/// Event store keeping everything in memory
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<ProcessEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every persisted event, in persistence order
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for MemoryEventStore {
    fn persist_event(&self, event: &ProcessEvent) -> Result<(), StorageError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
