//! Output formatting module
//!
//! Handles:
//! - Human-readable process table and blocklist listings
//! - JSON output for the snapshot command

use crate::models::{ProcessRecord, ProcessSnapshot};
use crate::policy::BlocklistEntry;
use anyhow::Result;
use serde::Serialize;
use std::io::Write;

/// JSON document printed by `snapshot --json`
#[derive(Debug, Serialize)]
pub struct SnapshotOutput<'a> {
    pub timestamp: String,
    pub process_count: usize,
    pub scan_duration_ms: u64,
    pub processes: Vec<&'a ProcessRecord>,
}

impl<'a> SnapshotOutput<'a> {
    pub fn new(snapshot: &'a ProcessSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp.to_rfc3339(),
            process_count: snapshot.len(),
            scan_duration_ms: snapshot.scan_duration.as_millis() as u64,
            processes: snapshot.sorted_records(),
        }
    }
}

pub fn format_snapshot_json<W: Write>(snapshot: &ProcessSnapshot, out: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, &SnapshotOutput::new(snapshot))?;
    writeln!(out)?;
    Ok(())
}

/// Format the process table in human-readable format
pub fn format_snapshot_human<W: Write>(snapshot: &ProcessSnapshot, out: &mut W) -> Result<()> {
    if snapshot.is_empty() {
        writeln!(out, "No processes found.")?;
        return Ok(());
    }

    writeln!(out, "{:>8}  {:<24}  {:<20}  PATH", "PID", "NAME", "STARTED")?;
    for record in snapshot.sorted_records() {
        let path = if record.has_executable_path() {
            record.executable_path.display().to_string()
        } else {
            "(unknown)".to_string()
        };
        writeln!(
            out,
            "{:>8}  {:<24}  {:<20}  {}",
            record.pid,
            truncate(&record.name, 24),
            record.start_time.format("%Y-%m-%d %H:%M:%S"),
            path
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Snapshot Summary:")?;
    writeln!(out, "  Processes: {}", snapshot.len())?;

    // Format duration nicely
    let duration_ms = snapshot.scan_duration.as_millis();
    if duration_ms < 1000 {
        writeln!(out, "  Duration: {}ms", duration_ms)?;
    } else {
        writeln!(out, "  Duration: {:.2}s", snapshot.scan_duration.as_secs_f64())?;
    }

    Ok(())
}

/// Format a validated blocklist for `check-config`
pub fn format_blocklist_human<W: Write>(entries: &[BlocklistEntry], out: &mut W) -> Result<()> {
    if entries.is_empty() {
        writeln!(out, "Blocklist is empty.")?;
        return Ok(());
    }

    writeln!(out, "Blocklist ({} entries):", entries.len())?;
    for entry in entries {
        writeln!(out, "  {}: {}", entry.matcher, entry.reason)?;
    }
    Ok(())
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut shortened: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    shortened.push('…');
    shortened
}
