//! Daemon orchestration
//!
//! Wires the snapshot source, diff engine, event bus, policy store, enforcer
//! and event logger into one running monitor:
//! - Configuration loading and validation
//! - Start-once lifecycle with graceful, draining stop
//! - Structured logging through the platform log backend

pub mod config;
pub mod logging;

use crate::bus::{EventBus, SubscriberStats, Subscription, DEFAULT_DRAIN_TIMEOUT};
use crate::daemon::config::{ConfigError, DaemonConfiguration};
use crate::daemon::logging::DaemonLogger;
use crate::enforcer::{BlocklistEnforcer, EnforcerStats};
use crate::event_logger::{EventLoggerStats, ProcessEventLogger};
use crate::models::MonitoringEpoch;
use crate::monitor::polling::PollCounters;
use crate::monitor::{PollLoop, SnapshotSource};
use crate::platform::Platform;
use crate::policy::{BlocklistEntry, PolicyError, PolicyStore};
use crate::storage::EventStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Monitoring has already been started for this orchestrator")]
    AlreadyStarted,

    #[error("Monitoring is not running")]
    NotRunning,

    #[error("No tokio runtime available; start() must be called from within a runtime")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Point-in-time view of the daemon counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonStats {
    pub epoch: String,
    pub running: bool,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub events_published: u64,
    pub policy_entries: usize,
    pub subscribers: Vec<SubscriberStats>,
    pub enforcer: EnforcerStats,
    pub event_logger: EventLoggerStats,
}

/// Components that exist only while monitoring runs
struct Running {
    bus: Arc<EventBus>,
    enforcer: Arc<BlocklistEnforcer>,
    event_logger: Arc<ProcessEventLogger>,
    subscriptions: Vec<Subscription>,
    shutdown: watch::Sender<bool>,
    poll_task: Option<JoinHandle<()>>,
    poll_counters: Arc<PollCounters>,
}

/// Owns the monitoring pipeline for one run
pub struct Orchestrator {
    config: DaemonConfiguration,
    config_path: Option<PathBuf>,
    platform: Arc<dyn Platform>,
    store: Arc<dyn EventStore>,
    logger: DaemonLogger,
    policy: Arc<PolicyStore>,
    epoch: MonitoringEpoch,
    drain_timeout: Duration,
    started: bool,
    running: Option<Running>,
    final_stats: Option<DaemonStats>,
}

impl Orchestrator {
    /// Build an orchestrator with its policy store seeded from `config.blocklist`
    pub fn new(
        config: DaemonConfiguration,
        platform: Arc<dyn Platform>,
        store: Arc<dyn EventStore>,
        logger: DaemonLogger,
    ) -> Result<Self, DaemonError> {
        let policy = Arc::new(PolicyStore::with_entries(config.blocklist.iter().cloned())?);

        Ok(Self {
            config,
            config_path: None,
            platform,
            store,
            logger,
            policy,
            epoch: MonitoringEpoch::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            started: false,
            running: None,
            final_stats: None,
        })
    }

    /// Record where the configuration came from, for startup logging
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Tag persisted events with an existing epoch
    pub fn with_epoch(mut self, epoch: MonitoringEpoch) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn epoch(&self) -> MonitoringEpoch {
        self.epoch
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Shared policy store; edits apply to subsequent Started events
    pub fn policy(&self) -> Arc<PolicyStore> {
        Arc::clone(&self.policy)
    }

    /// Atomically replace the blocklist
    pub fn reload_policy(&self, entries: Vec<BlocklistEntry>, source: &str) -> Result<usize, DaemonError> {
        let count = self.policy.replace_all(entries)?;
        self.logger.log_policy_reload(count, source);
        Ok(count)
    }

    /// Begin monitoring. May be called once per orchestrator.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        if self.started {
            return Err(DaemonError::AlreadyStarted);
        }

        config::validate_interval(self.config.daemon.polling_interval)?;
        if self.config.daemon.queue_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity.into());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| DaemonError::NoRuntime)?;
        let _guard = runtime.enter();

        self.started = true;

        let capabilities = self.platform.capabilities();
        let missing = capabilities.missing();
        if !missing.is_empty() {
            self.logger.log_unsupported(self.platform.name(), &missing);
        }

        let bus = Arc::new(
            EventBus::new(self.config.daemon.queue_capacity, self.logger.clone())
                .with_drain_timeout(self.drain_timeout),
        );

        let enforcer = Arc::new(BlocklistEnforcer::new(
            Arc::clone(&self.policy),
            Arc::clone(&self.platform),
            self.logger.clone(),
            self.config.daemon.termination_retries,
        ));
        let event_logger = Arc::new(ProcessEventLogger::new(Arc::clone(&self.store), self.logger.clone()));

        let subscriptions = vec![bus.subscribe(enforcer.clone()), bus.subscribe(event_logger.clone())];

        let (shutdown, shutdown_rx) = watch::channel(false);
        let poll = PollLoop::new(
            SnapshotSource::new(Arc::clone(&self.platform)),
            Arc::clone(&bus),
            self.logger.clone(),
            self.config.polling_duration(),
        );
        let poll_counters = poll.counters();

        let poll_task = if capabilities.enumerate {
            Some(runtime.spawn(poll.run(shutdown_rx)))
        } else {
            None
        };

        self.logger.log_startup(
            self.config_path.as_deref(),
            std::process::id(),
            self.epoch,
            self.config.daemon.polling_interval,
        );

        self.running = Some(Running {
            bus,
            enforcer,
            event_logger,
            subscriptions,
            shutdown,
            poll_task,
            poll_counters,
        });
        Ok(())
    }

    /// Stop polling, drain every subscriber queue and flush the store.
    ///
    /// Returns the counters as of the end of the run.
    pub async fn stop(&mut self) -> Result<DaemonStats, DaemonError> {
        let mut running = self.running.take().ok_or(DaemonError::NotRunning)?;

        let _ = running.shutdown.send(true);
        if let Some(task) = running.poll_task.take() {
            if let Err(e) = task.await {
                self.logger.log_error("Poll loop terminated abnormally", Some(&e.to_string()));
            }
        }

        // Timeouts are logged by the bus
        let subscriptions = std::mem::take(&mut running.subscriptions);
        let mut drained = running.bus.unsubscribe_all(subscriptions).await;
        drained.extend(running.bus.shutdown().await);

        let event_logger = Arc::clone(&running.event_logger);
        match tokio::task::spawn_blocking(move || event_logger.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.logger.log_error("Failed to flush event store", Some(&e.to_string())),
            Err(e) => self.logger.log_error("Event store flush did not complete", Some(&e.to_string())),
        }

        let mut stats = self.collect_stats(Some(&running));
        stats.running = false;
        stats.subscribers = drained.into_iter().map(|(subscriber, _)| subscriber).collect();

        self.logger.log_shutdown("Stop requested");
        self.final_stats = Some(stats.clone());
        Ok(stats)
    }

    pub fn stats(&self) -> DaemonStats {
        match (&self.running, &self.final_stats) {
            (Some(running), _) => self.collect_stats(Some(running)),
            (None, Some(stats)) => DaemonStats {
                running: false,
                policy_entries: self.policy.len(),
                ..stats.clone()
            },
            (None, None) => self.collect_stats(None),
        }
    }

    fn collect_stats(&self, running: Option<&Running>) -> DaemonStats {
        let mut stats = DaemonStats {
            epoch: self.epoch.to_string(),
            running: running.is_some(),
            policy_entries: self.policy.len(),
            ..DaemonStats::default()
        };

        if let Some(running) = running {
            let poll = running.poll_counters.snapshot();
            stats.ticks = poll.ticks;
            stats.failed_ticks = poll.failed_ticks;
            stats.events_published = running.bus.published();
            stats.subscribers = running.bus.stats();
            stats.enforcer = running.enforcer.stats();
            stats.event_logger = running.event_logger.stats();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::logging::LogLevel;
    use crate::platform::UnsupportedPlatform;
    use crate::policy::Matcher;
    use crate::storage::MemoryEventStore;

    fn orchestrator(config: DaemonConfiguration) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::new(UnsupportedPlatform),
            Arc::new(MemoryEventStore::new()),
            DaemonLogger::new(LogLevel::Error),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut daemon = orchestrator(DaemonConfiguration::default());
        daemon.start().unwrap();
        assert!(matches!(daemon.start(), Err(DaemonError::AlreadyStarted)));

        daemon.stop().await.unwrap();
        // Start-once holds even after a stop
        assert!(matches!(daemon.start(), Err(DaemonError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_not_running() {
        let mut daemon = orchestrator(DaemonConfiguration::default());
        assert!(matches!(daemon.stop().await, Err(DaemonError::NotRunning)));
    }

    #[tokio::test]
    async fn test_double_stop_is_not_running() {
        let mut daemon = orchestrator(DaemonConfiguration::default());
        daemon.start().unwrap();
        assert!(daemon.is_running());
        daemon.stop().await.unwrap();
        assert!(!daemon.is_running());
        assert!(matches!(daemon.stop().await, Err(DaemonError::NotRunning)));
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let mut daemon = orchestrator(DaemonConfiguration::default());
        assert!(matches!(daemon.start(), Err(DaemonError::NoRuntime)));
        assert!(!daemon.is_running());
    }

    #[tokio::test]
    async fn test_invalid_interval_is_fatal_at_start() {
        let mut config = DaemonConfiguration::default();
        config.daemon.polling_interval = 0.0;
        let mut daemon = orchestrator(config);

        assert!(matches!(
            daemon.start(),
            Err(DaemonError::Config(ConfigError::InvalidInterval(_)))
        ));
        assert!(!daemon.is_running());
    }

    #[tokio::test]
    async fn test_unsupported_platform_runs_without_polling() {
        let mut daemon = orchestrator(DaemonConfiguration::default());
        daemon.start().unwrap();

        let stats = daemon.stats();
        assert!(stats.running);
        assert_eq!(stats.subscribers.len(), 2);
        assert_eq!(stats.ticks, 0);

        let final_stats = daemon.stop().await.unwrap();
        assert!(!final_stats.running);
        let mut drained: Vec<_> = final_stats.subscribers.iter().map(|s| s.name.as_str()).collect();
        drained.sort();
        assert_eq!(drained, vec!["blocklist-enforcer", "event-logger"]);
    }

    #[test]
    fn test_policy_seeded_from_config_and_reloadable() {
        let mut config = DaemonConfiguration::default();
        config.blocklist = vec![BlocklistEntry::new(Matcher::Path("/bin/evil".into()), "malware")];
        let daemon = orchestrator(config);

        assert_eq!(daemon.policy().len(), 1);

        let count = daemon
            .reload_policy(
                vec![
                    BlocklistEntry::new(Matcher::Name("xmrig".into()), "miner"),
                    BlocklistEntry::new(Matcher::Name("nc".into()), "netcat"),
                ],
                "test",
            )
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(daemon.stats().policy_entries, 2);
    }

    #[test]
    fn test_invalid_reload_keeps_existing_policy() {
        let mut config = DaemonConfiguration::default();
        config.blocklist = vec![BlocklistEntry::new(Matcher::Path("/bin/evil".into()), "malware")];
        let daemon = orchestrator(config);

        let result = daemon.reload_policy(vec![BlocklistEntry::new(Matcher::Path("relative".into()), "x")], "test");
        assert!(matches!(result, Err(DaemonError::Policy(PolicyError::RelativePath(_)))));
        assert_eq!(daemon.policy().len(), 1);
    }

    #[test]
    fn test_invalid_seed_policy_fails_construction() {
        let mut config = DaemonConfiguration::default();
        config.blocklist = vec![BlocklistEntry::new(Matcher::Name("   ".into()), "blank")];
        let result = Orchestrator::new(
            config,
            Arc::new(UnsupportedPlatform),
            Arc::new(MemoryEventStore::new()),
            DaemonLogger::new(LogLevel::Error),
        );
        assert!(matches!(result, Err(DaemonError::Policy(PolicyError::EmptyMatcher("name")))));
    }
}
