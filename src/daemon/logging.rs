//! Structured logging for daemon operation
//!
//! Every message goes through the `log` facade as `"<summary> | <json>"`.
//! On macOS the backend is the Unified Logging System; elsewhere it is a
//! `tracing-subscriber` formatter on stderr.

use crate::models::{MonitoringEpoch, ProcessEvent};
use anyhow::Result;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

/// Daemon logger sending structured events to the installed `log` backend
#[derive(Debug, Clone)]
pub struct DaemonLogger {
    /// Current logging level
    level: LogLevel,
}

/// Log levels for daemon operations, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Install the platform log backend. Call once per process.
///
/// Off macOS `RUST_LOG` overrides the configured level.
pub fn init_backend(subsystem: &str, level: LogLevel) -> Result<()> {
    // Validate subsystem format (should be reverse DNS)
    if !subsystem.contains('.') {
        anyhow::bail!("Subsystem must be in reverse DNS format (e.g., 'com.example.app')");
    }

    #[cfg(target_os = "macos")]
    {
        let logger = oslog::OsLogger::new(subsystem);
        log::set_boxed_logger(Box::new(logger)).map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
    }

    #[cfg(not(target_os = "macos"))]
    {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_str()));
        // Also installs the `log` -> `tracing` bridge
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set logger for {}: {}", subsystem, e))?;
    }

    log::set_max_level(level.to_filter());
    Ok(())
}

impl DaemonLogger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Log daemon startup event
    pub fn log_startup(&self, config_path: Option<&Path>, pid: u32, epoch: MonitoringEpoch, interval_secs: f64) {
        let message = json!({
            "event": "daemon_startup",
            "pid": pid,
            "epoch": epoch.to_string(),
            "config_path": config_path.map(|p| p.display().to_string()),
            "polling_interval": interval_secs,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon started", &message)
    }

    /// Log daemon shutdown event
    pub fn log_shutdown(&self, reason: &str) {
        let message = json!({
            "event": "daemon_shutdown",
            "reason": reason,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Daemon shutting down", &message)
    }

    /// Log a process lifecycle event
    pub fn log_process_event(&self, event: &ProcessEvent) {
        let summary = match event {
            ProcessEvent::Started(record) => {
                format!("Process started: {} (PID: {})", record.executable_name(), record.pid)
            }
            ProcessEvent::Ended { pid, .. } => format!("Process ended (PID: {})", pid),
        };
        let message = json!({
            "event": format!("process_{}", event.kind()),
            "process": event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Debug, &summary, &message)
    }

    /// Log a blocked process that was terminated
    pub fn log_termination(&self, pid: u32, executable_path: &Path, reason: &str, already_gone: bool) {
        let message = json!({
            "event": "process_terminated",
            "pid": pid,
            "executable_path": executable_path.display().to_string(),
            "reason": reason,
            "already_gone": already_gone,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(
            LogLevel::Warn,
            &format!("Blocked process terminated: {} (PID: {})", executable_path.display(), pid),
            &message,
        )
    }

    /// Log a blocked process that could not be terminated
    pub fn log_termination_failed(&self, pid: u32, executable_path: &Path, reason: &str, error: &str, attempts: u32) {
        let message = json!({
            "event": "termination_failed",
            "pid": pid,
            "executable_path": executable_path.display().to_string(),
            "reason": reason,
            "error": error,
            "attempts": attempts,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(
            LogLevel::Error,
            &format!("Failed to terminate blocked process {} (PID: {})", executable_path.display(), pid),
            &message,
        )
    }

    /// Log a skipped polling tick
    pub fn log_tick_failure(&self, error: &str) {
        let message = json!({
            "event": "scan_failed",
            "error": error,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Warn, "Process scan failed, skipping tick", &message)
    }

    /// Log events evicted from a full subscriber queue
    pub fn log_overflow(&self, subscriber: &str, dropped_total: u64) {
        let message = json!({
            "event": "subscriber_overflow",
            "subscriber": subscriber,
            "dropped_total": dropped_total,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(
            LogLevel::Warn,
            &format!("Subscriber {} queue full, dropping oldest events", subscriber),
            &message,
        )
    }

    /// Log an event that could not be persisted
    pub fn log_persistence_failure(&self, event: &ProcessEvent, error: &str) {
        let message = json!({
            "event": "persistence_failed",
            "process_event": event.kind(),
            "pid": event.pid(),
            "error": error,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Error, "Failed to persist process event", &message)
    }

    /// Log a blocklist change
    pub fn log_policy_reload(&self, entry_count: usize, source: &str) {
        let message = json!({
            "event": "policy_reloaded",
            "entries": entry_count,
            "source": source,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Blocklist updated", &message)
    }

    /// Log platform operations that are unavailable for this run
    pub fn log_unsupported(&self, platform: &str, features: &[&str]) {
        let message = json!({
            "event": "unsupported_platform",
            "platform": platform,
            "disabled": features,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(
            LogLevel::Warn,
            &format!("Features unavailable on {}: {}", platform, features.join(", ")),
            &message,
        )
    }

    /// Log error events
    pub fn log_error(&self, error_message: &str, context: Option<&str>) {
        let message = json!({
            "event": "error",
            "message": error_message,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Error, error_message, &message)
    }

    /// Log a free-form debug event
    pub fn log_debug(&self, summary: &str, data: serde_json::Value) {
        self.log_structured(LogLevel::Debug, summary, &data)
    }

    /// Send structured log message to the backend
    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) {
        // Skip logging if below configured level
        if !self.should_log(level) {
            return;
        }

        let full_message = format_structured(message, data);

        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Warn => warn!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
            LogLevel::Debug => debug!("{}", full_message),
        }
    }

    /// Check if we should log at this level
    pub fn should_log(&self, level: LogLevel) -> bool {
        level <= self.level
    }
}

fn format_structured(message: &str, data: &serde_json::Value) -> String {
    format!("{} | {}", message, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filtering() {
        let logger = DaemonLogger::new(LogLevel::Warn);
        assert!(logger.should_log(LogLevel::Error));
        assert!(logger.should_log(LogLevel::Warn));
        assert!(!logger.should_log(LogLevel::Info));
        assert!(!logger.should_log(LogLevel::Debug));

        let logger = DaemonLogger::new(LogLevel::Debug);
        assert!(logger.should_log(LogLevel::Debug));
    }

    #[test]
    fn test_structured_format() {
        let line = format_structured("Daemon started", &json!({"event": "daemon_startup", "pid": 1}));
        let (summary, payload) = line.split_once(" | ").unwrap();
        assert_eq!(summary, "Daemon started");
        let parsed: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed["event"], "daemon_startup");
    }

    #[test]
    fn test_log_level_deserializes_lowercase() {
        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_init_backend_rejects_non_reverse_dns_subsystem() {
        assert!(init_backend("procguard", LogLevel::Info).is_err());
    }

    #[test]
    fn test_level_names_match_log_filters() {
        for level in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug] {
            let parsed: log::LevelFilter = level.as_str().parse().unwrap();
            assert_eq!(parsed, level.to_filter());
        }
    }

    #[test]
    fn test_init_backend_installs_once() {
        init_backend("com.procguard.test", LogLevel::Warn).unwrap();
        assert_eq!(log::max_level(), log::LevelFilter::Warn);
        log::warn!("backend installed | {{}}");

        assert!(init_backend("com.procguard.test", LogLevel::Warn).is_err());
    }

    #[test]
    fn test_logging_without_backend_is_harmless() {
        let logger = DaemonLogger::new(LogLevel::Debug);
        logger.log_shutdown("test");
        logger.log_tick_failure("boom");
        logger.log_overflow("event-logger", 3);
        logger.log_unsupported("linux", &["publisher lookup"]);
    }
}
