use crate::models::ProcessEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Bounded FIFO feeding one subscriber.
///
/// Holds at most `capacity` events. When full, pushing evicts the oldest
/// undelivered event and increments the overflow counter, so the publisher
/// never waits on a slow subscriber.
pub(crate) struct SubscriberQueue {
    events: Mutex<VecDeque<ProcessEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    enqueued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Result of a single push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest pending event
    Evicted,
    /// Queue already closed; event discarded
    Closed,
}

impl SubscriberQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn push(&self, event: ProcessEvent) -> PushOutcome {
        let outcome = {
            let mut events = self.events.lock();
            if self.closed.load(Ordering::Acquire) {
                return PushOutcome::Closed;
            }
            let outcome = if events.len() >= self.capacity {
                events.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Evicted
            } else {
                PushOutcome::Queued
            };
            events.push_back(event);
            outcome
        };

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        // Stores a permit when the worker is not waiting yet
        self.notify.notify_one();
        outcome
    }

    #[cfg(test)]
    pub(crate) fn pop(&self) -> Option<ProcessEvent> {
        self.events.lock().pop_front()
    }

    /// Wait until an event is pushed or the queue is closed.
    /// Returns `None` once the queue is closed and fully drained.
    pub(crate) async fn next(&self) -> Option<ProcessEvent> {
        loop {
            {
                let mut events = self.events.lock();
                if let Some(event) = events.pop_front() {
                    return Some(event);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn mark_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop accepting events. Pending events stay available for draining.
    pub(crate) fn close(&self) {
        {
            let _events = self.events.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.notify.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub(crate) fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ended(pid: u32) -> ProcessEvent {
        ProcessEvent::Ended {
            pid,
            end_time: Utc::now(),
        }
    }

    #[test]
    fn test_push_pop_is_fifo() {
        let queue = SubscriberQueue::new(4);
        for pid in 1..=3 {
            assert_eq!(queue.push(ended(pid)), PushOutcome::Queued);
        }
        let pids: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|e| e.pid()).collect();
        assert_eq!(pids, vec![1, 2, 3]);
    }

    #[test]
    fn test_full_queue_evicts_oldest_and_counts_overflow() {
        let queue = SubscriberQueue::new(2);
        queue.push(ended(1));
        queue.push(ended(2));
        assert_eq!(queue.push(ended(3)), PushOutcome::Evicted);
        assert_eq!(queue.push(ended(4)), PushOutcome::Evicted);

        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.enqueued(), 4);
        assert_eq!(queue.len(), 2);
        let pids: Vec<u32> = std::iter::from_fn(|| queue.pop()).map(|e| e.pid()).collect();
        assert_eq!(pids, vec![3, 4]);
    }

    #[test]
    fn test_zero_capacity_is_clamped_to_one() {
        let queue = SubscriberQueue::new(0);
        queue.push(ended(1));
        queue.push(ended(2));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().map(|e| e.pid()), Some(2));
    }

    #[test]
    fn test_closed_queue_rejects_push() {
        let queue = SubscriberQueue::new(2);
        queue.close();
        assert_eq!(queue.push(ended(1)), PushOutcome::Closed);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_next_drains_pending_events_after_close() {
        let queue = SubscriberQueue::new(8);
        queue.push(ended(1));
        queue.push(ended(2));
        queue.close();

        assert_eq!(queue.next().await.map(|e| e.pid()), Some(1));
        assert_eq!(queue.next().await.map(|e| e.pid()), Some(2));
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_next_wakes_on_push() {
        let queue = std::sync::Arc::new(SubscriberQueue::new(8));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await.map(|e| e.pid()) })
        };

        tokio::task::yield_now().await;
        queue.push(ended(11));
        assert_eq!(waiter.await.unwrap(), Some(11));
    }
}
