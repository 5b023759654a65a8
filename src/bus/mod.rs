//! Event bus distributing process events to subscribers
//!
//! Every subscriber owns a bounded queue drained by its own tokio task.
//! `publish` only enqueues, so a slow or stuck subscriber can neither stall
//! the poll loop nor delay other subscribers. Delivery to one subscriber is
//! FIFO; there is no ordering across subscribers.

mod queue;

use crate::daemon::logging::DaemonLogger;
use crate::models::ProcessEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use queue::{PushOutcome, SubscriberQueue};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

/// Default time a subscriber gets to drain its queue on unsubscribe
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Consumer of published process events
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Name used in logs and statistics
    fn name(&self) -> &str;

    /// Handle one event. Runs on the subscriber's own task.
    async fn on_event(&self, event: ProcessEvent);
}

/// Handle returned by [`EventBus::subscribe`], consumed by
/// [`EventBus::unsubscribe`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    name: Arc<str>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// How a subscriber's queue was wound down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queued event was handled
    Drained,
    /// The subscriber did not finish within the drain timeout and was aborted
    TimedOut { discarded: usize },
}

/// Queue statistics for one subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberStats {
    pub name: String,
    pub pending: usize,
    pub enqueued: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct Registration {
    name: Arc<str>,
    queue: Arc<SubscriberQueue>,
    worker: JoinHandle<()>,
    /// Handler task for the event currently being processed
    in_flight: Arc<Mutex<Option<AbortHandle>>>,
}

/// Process-wide broadcaster of [`ProcessEvent`]s
pub struct EventBus {
    subscribers: Mutex<BTreeMap<u64, Registration>>,
    next_id: AtomicU64,
    published: AtomicU64,
    queue_capacity: usize,
    drain_timeout: Duration,
    logger: DaemonLogger,
}

impl EventBus {
    pub fn new(queue_capacity: usize, logger: DaemonLogger) -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
            queue_capacity,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            logger,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Register a subscriber and start its worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = Arc::from(subscriber.name());
        let queue = Arc::new(SubscriberQueue::new(self.queue_capacity));
        let in_flight = Arc::new(Mutex::new(None));

        let worker = tokio::spawn(run_worker(
            subscriber,
            queue.clone(),
            in_flight.clone(),
            name.clone(),
            self.logger.clone(),
        ));

        self.subscribers.lock().insert(
            id,
            Registration {
                name: name.clone(),
                queue,
                worker,
                in_flight,
            },
        );

        self.logger.log_debug(
            "Subscriber registered",
            serde_json::json!({ "event": "subscriber_registered", "subscriber": &*name }),
        );

        Subscription { id, name }
    }

    /// Remove a subscriber, letting it drain what is already queued.
    /// Returns `None` if the subscription was already removed by `shutdown`.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Option<(SubscriberStats, DrainOutcome)> {
        let registration = self.subscribers.lock().remove(&subscription.id)?;
        self.drain_all(vec![registration]).await.pop()
    }

    /// Remove several subscribers at once. They drain in parallel and share
    /// one drain timeout; handles already removed are skipped.
    pub async fn unsubscribe_all(&self, subscriptions: Vec<Subscription>) -> Vec<(SubscriberStats, DrainOutcome)> {
        let registrations: Vec<Registration> = {
            let mut subscribers = self.subscribers.lock();
            subscriptions
                .iter()
                .filter_map(|subscription| subscribers.remove(&subscription.id))
                .collect()
        };
        self.drain_all(registrations).await
    }

    /// Deliver an event to every currently registered subscriber.
    /// Never blocks; returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: ProcessEvent) -> usize {
        let targets: Vec<(Arc<str>, Arc<SubscriberQueue>)> = self
            .subscribers
            .lock()
            .values()
            .map(|registration| (registration.name.clone(), registration.queue.clone()))
            .collect();

        self.published.fetch_add(1, Ordering::Relaxed);

        let mut queued = 0;
        for (name, queue) in targets {
            match queue.push(event.clone()) {
                PushOutcome::Queued => queued += 1,
                PushOutcome::Evicted => {
                    queued += 1;
                    let dropped = queue.dropped();
                    if dropped == 1 || dropped % 100 == 0 {
                        self.logger.log_overflow(&name, dropped);
                    }
                }
                PushOutcome::Closed => {}
            }
        }
        queued
    }

    /// Unregister every subscriber, draining all queues in parallel.
    /// Returns each subscriber's final queue statistics with its outcome.
    pub async fn shutdown(&self) -> Vec<(SubscriberStats, DrainOutcome)> {
        let registrations: Vec<Registration> = {
            let mut subscribers = self.subscribers.lock();
            std::mem::take(&mut *subscribers).into_values().collect()
        };
        self.drain_all(registrations).await
    }

    /// Close every queue first so all workers drain at the same time, then
    /// wait for them against a single deadline.
    async fn drain_all(&self, registrations: Vec<Registration>) -> Vec<(SubscriberStats, DrainOutcome)> {
        for registration in &registrations {
            registration.queue.close();
        }

        let deadline = Instant::now() + self.drain_timeout;
        let mut outcomes = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let queue = registration.queue.clone();
            let name = registration.name.to_string();
            let outcome = self.await_drain(registration, deadline).await;
            outcomes.push((queue_stats(name, &queue), outcome));
        }
        outcomes
    }

    async fn await_drain(&self, registration: Registration, deadline: Instant) -> DrainOutcome {
        let Registration {
            name,
            queue,
            mut worker,
            in_flight,
        } = registration;

        match tokio::time::timeout_at(deadline, &mut worker).await {
            Ok(_) => DrainOutcome::Drained,
            Err(_) => {
                worker.abort();
                // Once the worker is gone no new handler can be spawned
                let _ = worker.await;
                if let Some(handler) = in_flight.lock().take() {
                    handler.abort();
                }
                let discarded = queue.len();
                self.logger.log_error(
                    &format!("Subscriber {} did not drain in time", name),
                    Some(&format!("{} queued events discarded", discarded)),
                );
                DrainOutcome::TimedOut { discarded }
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Vec<SubscriberStats> {
        self.subscribers
            .lock()
            .values()
            .map(|registration| queue_stats(registration.name.to_string(), &registration.queue))
            .collect()
    }
}

fn queue_stats(name: String, queue: &SubscriberQueue) -> SubscriberStats {
    SubscriberStats {
        name,
        pending: queue.len(),
        enqueued: queue.enqueued(),
        delivered: queue.delivered(),
        dropped: queue.dropped(),
    }
}

async fn run_worker(
    subscriber: Arc<dyn Subscriber>,
    queue: Arc<SubscriberQueue>,
    in_flight: Arc<Mutex<Option<AbortHandle>>>,
    name: Arc<str>,
    logger: DaemonLogger,
) {
    while let Some(event) = queue.next().await {
        let handler = subscriber.clone();
        // Own task per event so a panicking handler only loses that event
        let task = tokio::spawn(async move { handler.on_event(event).await });
        *in_flight.lock() = Some(task.abort_handle());
        let result = task.await;
        in_flight.lock().take();
        if let Err(e) = result {
            logger.log_error(&format!("Subscriber {} failed handling an event", name), Some(&e.to_string()));
        }
        queue.mark_delivered();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::logging::LogLevel;
    use crate::models::{start_time_from_secs, ProcessRecord};
    use std::path::PathBuf;

    /// Subscriber recording every PID it receives
    struct Recorder {
        name: String,
        seen: Mutex<Vec<u32>>,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<u32> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_event(&self, event: ProcessEvent) {
            self.seen.lock().push(event.pid());
        }
    }

    /// Subscriber that never finishes handling its first event
    struct Stuck;

    #[async_trait]
    impl Subscriber for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn on_event(&self, _event: ProcessEvent) {
            std::future::pending::<()>().await;
        }
    }

    /// Subscriber that panics on every event
    struct Panicky;

    #[async_trait]
    impl Subscriber for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn on_event(&self, event: ProcessEvent) {
            panic!("cannot handle pid {}", event.pid());
        }
    }

    fn logger() -> DaemonLogger {
        DaemonLogger::new(LogLevel::Error)
    }

    fn started(pid: u32) -> ProcessEvent {
        ProcessEvent::Started(ProcessRecord {
            pid,
            name: format!("proc{pid}"),
            executable_path: PathBuf::from(format!("/bin/proc{pid}")),
            start_time: start_time_from_secs(1_000),
            publisher: None,
        })
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events_in_order() {
        let bus = EventBus::new(64, logger());
        let first = Recorder::new("first");
        let second = Recorder::new("second");
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        for pid in 1..=10 {
            assert_eq!(bus.publish(started(pid)), 2);
        }
        bus.shutdown().await;

        let expected: Vec<u32> = (1..=10).collect();
        assert_eq!(first.seen(), expected);
        assert_eq!(second.seen(), expected);
        assert_eq!(bus.published(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_subscriber_does_not_stall_others() {
        let bus = EventBus::new(128, logger()).with_drain_timeout(Duration::from_millis(200));
        let others: Vec<Arc<Recorder>> = (0..3).map(|i| Recorder::new(&format!("r{i}"))).collect();

        let stuck = Arc::new(Stuck);
        bus.subscribe(stuck.clone());
        for recorder in &others {
            bus.subscribe(recorder.clone());
        }

        let n = 100;
        for pid in 1..=n {
            bus.publish(started(pid));
        }

        let outcomes = bus.shutdown().await;
        let expected: Vec<u32> = (1..=n).collect();
        for recorder in &others {
            assert_eq!(recorder.seen(), expected, "{} missed events", recorder.name);
        }

        let stuck_outcome = outcomes.iter().find(|(stats, _)| stats.name == "stuck").unwrap();
        assert!(matches!(stuck_outcome.1, DrainOutcome::TimedOut { .. }));
        assert_eq!(
            outcomes.iter().filter(|(_, o)| *o == DrainOutcome::Drained).count(),
            others.len()
        );

        // The aborted worker and its pending handler both release the subscriber
        let deadline = Instant::now() + Duration::from_secs(2);
        while Arc::strong_count(&stuck) > 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&stuck), 1, "stuck handler still running after shutdown");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stuck_subscribers_share_one_drain_timeout() {
        let timeout = Duration::from_millis(300);
        let bus = EventBus::new(16, logger()).with_drain_timeout(timeout);
        for _ in 0..3 {
            bus.subscribe(Arc::new(Stuck));
        }
        bus.publish(started(1));
        tokio::task::yield_now().await;

        let begin = Instant::now();
        let outcomes = bus.shutdown().await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, o)| matches!(o, DrainOutcome::TimedOut { .. })));
        assert!(begin.elapsed() < timeout * 2, "drains ran one after another");
    }

    #[tokio::test]
    async fn test_publish_never_blocks_and_counts_overflow() {
        let bus = EventBus::new(4, logger()).with_drain_timeout(Duration::from_millis(50));
        bus.subscribe(Arc::new(Stuck));

        for pid in 1..=20 {
            bus.publish(started(pid));
        }
        tokio::task::yield_now().await;

        let stats = bus.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].enqueued, 20);
        // One event taken by the stuck handler, the rest bounded by capacity
        assert!(stats[0].pending <= 4);
        assert!(stats[0].dropped >= 15);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_drains_and_stops_delivery() {
        let bus = EventBus::new(16, logger());
        let recorder = Recorder::new("rec");
        let subscription = bus.subscribe(recorder.clone());
        assert_eq!(subscription.name(), "rec");

        bus.publish(started(1));
        bus.publish(started(2));
        let (stats, outcome) = bus.unsubscribe(subscription).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(stats.delivered, 2);
        assert_eq!(recorder.seen(), vec![1, 2]);

        assert_eq!(bus.publish(started(3)), 0);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(recorder.seen(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unsubscribe_after_shutdown_returns_none() {
        let bus = EventBus::new(16, logger());
        let subscription = bus.subscribe(Recorder::new("rec"));
        bus.shutdown().await;
        assert_eq!(bus.unsubscribe(subscription).await, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_all_leaves_other_subscribers() {
        let bus = EventBus::new(16, logger());
        let kept = Recorder::new("kept");
        let owned = vec![bus.subscribe(Recorder::new("a")), bus.subscribe(Recorder::new("b"))];
        bus.subscribe(kept.clone());

        bus.publish(started(1));
        let drained = bus.unsubscribe_all(owned).await;
        let mut names: Vec<_> = drained.iter().map(|(stats, _)| stats.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(started(2));
        bus.shutdown().await;
        assert_eq!(kept.seen(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new(16, logger());
        let recorder = Recorder::new("rec");
        bus.subscribe(Arc::new(Panicky));
        bus.subscribe(recorder.clone());

        for pid in 1..=3 {
            bus.publish(started(pid));
        }
        let outcomes = bus.shutdown().await;

        assert_eq!(recorder.seen(), vec![1, 2, 3]);
        assert!(outcomes.iter().all(|(_, o)| *o == DrainOutcome::Drained));
    }

    #[tokio::test]
    async fn test_late_subscriber_only_sees_later_events() {
        let bus = EventBus::new(16, logger());
        let early = Recorder::new("early");
        bus.subscribe(early.clone());
        bus.publish(started(1));

        let late = Recorder::new("late");
        bus.subscribe(late.clone());
        bus.publish(started(2));
        bus.shutdown().await;

        assert_eq!(early.seen(), vec![1, 2]);
        assert_eq!(late.seen(), vec![2]);
    }
}
