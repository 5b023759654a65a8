//! Global constants for procguard
//!
//! Centralized location for application-wide constants

/// Application subsystem identifier for the system log
pub const APP_SUBSYSTEM: &str = "com.procguard.daemon";

/// Polling interval bounds in seconds
pub const MIN_POLLING_INTERVAL: f64 = 0.1;
pub const MAX_POLLING_INTERVAL: f64 = 300.0;

pub const DEFAULT_POLLING_INTERVAL: f64 = 2.0;

/// Events buffered per subscriber before the oldest is dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub const DEFAULT_TERMINATION_RETRIES: u32 = 1;
