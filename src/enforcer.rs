//! Blocklist enforcer
//!
//! Subscribes to process events and terminates Started processes that match
//! the blocklist. Policy changes are not retroactive: a process is evaluated
//! once, when its Started event arrives.

use crate::bus::Subscriber;
use crate::daemon::logging::DaemonLogger;
use crate::models::{ProcessEvent, ProcessRecord};
use crate::platform::Platform;
use crate::policy::{BlockDecision, PolicyStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Subscriber name used by the enforcer
pub const ENFORCER_NAME: &str = "blocklist-enforcer";

/// Outcome of evaluating one observed process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Verdict {
    /// Not on the blocklist
    Allowed,
    /// On the blocklist but exempt from termination
    Protected { reason: String },
    /// Terminated, or already gone by the time termination was attempted
    Terminated {
        reason: String,
        already_gone: bool,
        attempts: u32,
    },
    /// Every termination attempt failed
    TerminationFailed {
        reason: String,
        error: String,
        attempts: u32,
    },
}

/// Enforcement counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnforcerStats {
    pub evaluated: u64,
    pub blocked: u64,
    pub terminated: u64,
    pub failed: u64,
    pub protected: u64,
}

#[derive(Default)]
struct Counters {
    evaluated: AtomicU64,
    blocked: AtomicU64,
    terminated: AtomicU64,
    failed: AtomicU64,
    protected: AtomicU64,
}

pub struct BlocklistEnforcer {
    policy: Arc<PolicyStore>,
    platform: Arc<dyn Platform>,
    logger: DaemonLogger,
    /// Extra attempts after the first failed termination
    max_retries: u32,
    protected_pids: HashSet<u32>,
    verdicts: Mutex<HashMap<u32, Verdict>>,
    counters: Counters,
}

impl BlocklistEnforcer {
    pub fn new(policy: Arc<PolicyStore>, platform: Arc<dyn Platform>, logger: DaemonLogger, max_retries: u32) -> Self {
        // Never kill ourselves or init
        let protected_pids = [std::process::id(), 1].into_iter().collect();

        Self {
            policy,
            platform,
            logger,
            max_retries,
            protected_pids,
            verdicts: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Exempt an additional PID from termination
    pub fn protect_pid(mut self, pid: u32) -> Self {
        self.protected_pids.insert(pid);
        self
    }

    /// Evaluate a newly started process and terminate it if blocked
    pub fn enforce(&self, record: &ProcessRecord) -> Verdict {
        self.counters.evaluated.fetch_add(1, Ordering::Relaxed);

        let Some(decision) = self.policy.is_blocked(record) else {
            return Verdict::Allowed;
        };
        self.counters.blocked.fetch_add(1, Ordering::Relaxed);

        if self.protected_pids.contains(&record.pid) {
            self.counters.protected.fetch_add(1, Ordering::Relaxed);
            self.logger.log_error(
                &format!("Refusing to terminate protected process (PID: {})", record.pid),
                Some(&format!("matched {}: {}", decision.matcher, decision.reason)),
            );
            return Verdict::Protected {
                reason: decision.reason,
            };
        }

        self.terminate(record, decision)
    }

    fn terminate(&self, record: &ProcessRecord, decision: BlockDecision) -> Verdict {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.platform.terminate_process(record.pid) {
                Ok(()) => return self.terminated(record, decision.reason, false, attempts),
                Err(e) if e.is_already_gone() => return self.terminated(record, decision.reason, true, attempts),
                Err(e) if e.is_unsupported() || attempts >= max_attempts => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    let error = e.to_string();
                    self.logger.log_termination_failed(
                        record.pid,
                        &record.executable_path,
                        &decision.reason,
                        &error,
                        attempts,
                    );
                    return Verdict::TerminationFailed {
                        reason: decision.reason,
                        error,
                        attempts,
                    };
                }
                Err(_) => continue,
            }
        }
    }

    fn terminated(&self, record: &ProcessRecord, reason: String, already_gone: bool, attempts: u32) -> Verdict {
        self.counters.terminated.fetch_add(1, Ordering::Relaxed);
        self.logger
            .log_termination(record.pid, &record.executable_path, &reason, already_gone);
        Verdict::Terminated {
            reason,
            already_gone,
            attempts,
        }
    }

    /// Recorded verdict for a PID still considered alive
    pub fn verdict(&self, pid: u32) -> Option<Verdict> {
        self.verdicts.lock().get(&pid).cloned()
    }

    /// Number of processes currently tracked
    pub fn tracked(&self) -> usize {
        self.verdicts.lock().len()
    }

    pub fn stats(&self) -> EnforcerStats {
        EnforcerStats {
            evaluated: self.counters.evaluated.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            terminated: self.counters.terminated.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            protected: self.counters.protected.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Subscriber for BlocklistEnforcer {
    fn name(&self) -> &str {
        ENFORCER_NAME
    }

    async fn on_event(&self, event: ProcessEvent) {
        match event {
            ProcessEvent::Started(record) => {
                let verdict = self.enforce(&record);
                self.verdicts.lock().insert(record.pid, verdict);
            }
            ProcessEvent::Ended { pid, .. } => {
                self.verdicts.lock().remove(&pid);
            }
        }
    }
}
