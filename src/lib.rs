//! procguard - process lifecycle monitoring and blocklist enforcement
//!
//! This library exposes the monitoring pipeline used by the `procguard`
//! binary: process snapshots, lifecycle diffing, the event bus and its
//! enforcement and persistence subscribers.

#![forbid(unsafe_code)]

pub mod bus;
pub mod cli;
pub mod constants;
pub mod daemon;
pub mod enforcer;
pub mod event_logger;
pub mod models;
pub mod monitor;
pub mod output;
pub mod platform;
pub mod policy;
pub mod storage;
