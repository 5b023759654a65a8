use crate::models::{ProcessEvent, ProcessSnapshot};

/// Manages process state tracking between polling cycles
pub struct ProcessTracker {
    current_snapshot: Option<ProcessSnapshot>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self {
            current_snapshot: None,
        }
    }

    /// Whether a baseline snapshot has been recorded
    pub fn has_baseline(&self) -> bool {
        self.current_snapshot.is_some()
    }

    /// Compare the new snapshot with the previous one and derive lifecycle events.
    ///
    /// Ended events come first (ascending PID), then Started events (ascending
    /// PID), so a PID reused between two ticks is always closed before it is
    /// reopened.
    pub fn observe(&mut self, new_snapshot: ProcessSnapshot) -> Vec<ProcessEvent> {
        let events = match &self.current_snapshot {
            None => {
                // First snapshot - everything already running is the baseline,
                // reported as nothing to avoid flooding subscribers on startup
                Vec::new()
            }
            Some(previous) => diff(previous, &new_snapshot),
        };

        self.current_snapshot = Some(new_snapshot);
        events
    }
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn diff(previous: &ProcessSnapshot, current: &ProcessSnapshot) -> Vec<ProcessEvent> {
    let mut ended: Vec<u32> = previous
        .processes
        .iter()
        .filter(|(key, _)| !current.processes.contains_key(key))
        .map(|(_, record)| record.pid)
        .collect();
    ended.sort_unstable();

    let mut started: Vec<_> = current
        .processes
        .iter()
        .filter(|(key, _)| !previous.processes.contains_key(key))
        .map(|(_, record)| record.clone())
        .collect();
    started.sort_by_key(|record| record.pid);

    let mut events = Vec::with_capacity(ended.len() + started.len());
    events.extend(ended.into_iter().map(|pid| ProcessEvent::Ended {
        pid,
        end_time: current.timestamp,
    }));
    events.extend(started.into_iter().map(ProcessEvent::Started));
    events
}
