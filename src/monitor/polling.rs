use crate::bus::EventBus;
use crate::daemon::logging::DaemonLogger;
use crate::models::{ProcessEvent, ProcessRecord, ProcessSnapshot};
use crate::monitor::ProcessTracker;
use crate::platform::{Platform, PlatformError};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Upper bound on cached publisher lookups before the cache is reset
const PUBLISHER_CACHE_LIMIT: usize = 4096;

/// Captures point-in-time process snapshots from the platform
#[derive(Clone)]
pub struct SnapshotSource {
    platform: Arc<dyn Platform>,
}

impl SnapshotSource {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self { platform }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    /// Enumerate all live processes. Blocking.
    pub fn capture(&self) -> Result<ProcessSnapshot, PlatformError> {
        let timestamp = Utc::now();
        let scan_start = Instant::now();

        let records = self.platform.list_processes()?;

        Ok(ProcessSnapshot::from_records(records, timestamp, scan_start.elapsed()))
    }
}

/// Per-path cache of code signing publishers
///
/// Lookups stop for the rest of the run after the platform reports them as
/// unsupported.
pub struct PublisherCache {
    platform: Arc<dyn Platform>,
    entries: HashMap<PathBuf, Option<String>>,
    enabled: bool,
}

impl PublisherCache {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        let enabled = platform.capabilities().publisher;
        Self {
            platform,
            entries: HashMap::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fill in `record.publisher` when it can be determined. Blocking.
    pub fn enrich(&mut self, record: &mut ProcessRecord) {
        if !self.enabled || record.publisher.is_some() || !record.has_executable_path() {
            return;
        }

        if let Some(cached) = self.entries.get(&record.executable_path) {
            record.publisher = cached.clone();
            return;
        }

        let publisher = match self.platform.publisher_name(&record.executable_path) {
            Ok(name) => Some(name),
            Err(e) if e.is_unsupported() => {
                self.enabled = false;
                return;
            }
            // Unsigned or unreadable binaries have no publisher
            Err(_) => None,
        };

        if self.entries.len() >= PUBLISHER_CACHE_LIMIT {
            self.entries.clear();
        }
        self.entries
            .insert(record.executable_path.clone(), publisher.clone());
        record.publisher = publisher;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Counters shared between the poll loop and the orchestrator
#[derive(Debug, Default)]
pub struct PollCounters {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    events: AtomicU64,
    baseline: AtomicBool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub events: u64,
    pub has_baseline: bool,
}

impl PollCounters {
    pub fn snapshot(&self) -> PollStats {
        PollStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            has_baseline: self.baseline.load(Ordering::Relaxed),
        }
    }
}

/// Periodic snapshot, diff and publish cycle
pub struct PollLoop {
    source: SnapshotSource,
    tracker: ProcessTracker,
    publishers: Arc<Mutex<PublisherCache>>,
    bus: Arc<EventBus>,
    logger: DaemonLogger,
    interval: Duration,
    counters: Arc<PollCounters>,
}

impl PollLoop {
    pub fn new(source: SnapshotSource, bus: Arc<EventBus>, logger: DaemonLogger, interval: Duration) -> Self {
        let publishers = Arc::new(Mutex::new(PublisherCache::new(source.platform().clone())));
        Self {
            source,
            tracker: ProcessTracker::new(),
            publishers,
            bus,
            logger,
            interval,
            counters: Arc::new(PollCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<PollCounters> {
        Arc::clone(&self.counters)
    }

    /// Tick until the shutdown flag flips to true or its sender is dropped.
    ///
    /// The first tick fires immediately. A tick in progress is finished before
    /// the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        // A slow scan delays the schedule rather than bursting to catch up
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Run one cycle. Returns the number of events published.
    pub async fn tick(&mut self) -> usize {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let source = self.source.clone();
        let snapshot = match tokio::task::spawn_blocking(move || source.capture()).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => return self.tick_failed(&e.to_string()),
            Err(e) => return self.tick_failed(&format!("scan task failed: {}", e)),
        };

        let scanned = snapshot.len();
        let scan_ms = snapshot.scan_duration.as_millis() as u64;
        let mut events = self.tracker.observe(snapshot);
        self.counters.baseline.store(true, Ordering::Relaxed);

        if events.is_empty() {
            return 0;
        }

        let enrich = self.publishers.lock().is_enabled()
            && events
                .iter()
                .any(|e| matches!(e, ProcessEvent::Started(_)));
        if enrich {
            let publishers = Arc::clone(&self.publishers);
            events = match tokio::task::spawn_blocking(move || {
                let mut cache = publishers.lock();
                for event in events.iter_mut() {
                    if let ProcessEvent::Started(record) = event {
                        cache.enrich(record);
                    }
                }
                events
            })
            .await
            {
                Ok(events) => events,
                Err(e) => return self.tick_failed(&format!("publisher lookup failed: {}", e)),
            };
        }

        let count = events.len();
        self.logger.log_debug(
            "Process changes detected",
            serde_json::json!({
                "event": "tick",
                "processes": scanned,
                "changes": count,
                "scan_ms": scan_ms,
            }),
        );

        for event in events {
            self.bus.publish(event);
        }
        self.counters.events.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    fn tick_failed(&self, error: &str) -> usize {
        self.counters.failed_ticks.fetch_add(1, Ordering::Relaxed);
        self.logger.log_tick_failure(error);
        0
    }
}
