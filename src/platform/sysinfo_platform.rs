//! Host platform backed by `sysinfo` for enumeration and by signals
//! (Unix) or `sysinfo` process handles (elsewhere) for termination

use super::{Platform, PlatformCapabilities, PlatformError};
use crate::models::{start_time_from_secs, ProcessRecord};
use parking_lot::Mutex;
use std::path::Path;
use sysinfo::{ProcessesToUpdate, System, ThreadKind};

/// Platform implementation for the host OS
pub struct SysinfoPlatform {
    system: Mutex<System>,
}

impl SysinfoPlatform {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SysinfoPlatform {
    fn name(&self) -> &'static str {
        std::env::consts::OS
    }

    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            enumerate: sysinfo::IS_SUPPORTED_SYSTEM,
            terminate: sysinfo::IS_SUPPORTED_SYSTEM || cfg!(unix),
            publisher: cfg!(target_os = "macos"),
        }
    }

    fn list_processes(&self) -> Result<Vec<ProcessRecord>, PlatformError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(PlatformError::Unsupported {
                operation: "process enumeration",
                platform: self.name(),
            });
        }

        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);

        // The table always contains at least this process
        if system.processes().is_empty() {
            return Err(PlatformError::ScanFailed("process table is empty".to_string()));
        }

        // Linux lists every task under /proc; user threads share their
        // owner's executable and would show up as separate processes
        let records = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind() != Some(ThreadKind::Userland))
            .map(|(pid, process)| ProcessRecord {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                executable_path: process.exe().map(Path::to_path_buf).unwrap_or_default(),
                start_time: start_time_from_secs(process.start_time()),
                publisher: None,
            })
            .collect();

        Ok(records)
    }

    #[cfg(unix)]
    fn terminate_process(&self, pid: u32) -> Result<(), PlatformError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // kill(0) and negative PIDs address process groups
        let raw = match i32::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => {
                return Err(PlatformError::TerminationDenied {
                    pid,
                    reason: "not a single-process PID".to_string(),
                })
            }
        };

        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(PlatformError::ProcessAlreadyGone { pid }),
            Err(Errno::EPERM) => Err(PlatformError::TerminationDenied {
                pid,
                reason: "permission denied".to_string(),
            }),
            Err(errno) => Err(PlatformError::Os(std::io::Error::from_raw_os_error(errno as i32))),
        }
    }

    #[cfg(not(unix))]
    fn terminate_process(&self, pid: u32) -> Result<(), PlatformError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(PlatformError::Unsupported {
                operation: "process termination",
                platform: self.name(),
            });
        }

        let target = sysinfo::Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

        match system.process(target) {
            None => Err(PlatformError::ProcessAlreadyGone { pid }),
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(PlatformError::TerminationDenied {
                pid,
                reason: "OS refused to terminate the process".to_string(),
            }),
        }
    }

    #[cfg(target_os = "macos")]
    fn publisher_name(&self, path: &Path) -> Result<String, PlatformError> {
        use std::process::Command;

        // codesign writes signature details to stderr
        let output = Command::new("codesign").arg("-dvv").arg(path).output()?;

        if !output.status.success() {
            return Err(PlatformError::PublisherLookup {
                path: path.display().to_string(),
                reason: "executable is not signed".to_string(),
            });
        }

        let details = String::from_utf8_lossy(&output.stderr);
        parse_codesign_authority(&details).ok_or_else(|| PlatformError::PublisherLookup {
            path: path.display().to_string(),
            reason: "no signing authority in signature".to_string(),
        })
    }

    #[cfg(not(target_os = "macos"))]
    fn publisher_name(&self, _path: &Path) -> Result<String, PlatformError> {
        Err(PlatformError::Unsupported {
            operation: "publisher lookup",
            platform: self.name(),
        })
    }
}

/// Extract the leaf signing authority from `codesign -dvv` output.
///
/// `Authority=Developer ID Application: Example Corp (ABCDE12345)` yields
/// `Example Corp`.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_codesign_authority(details: &str) -> Option<String> {
    let authority = details
        .lines()
        .find_map(|line| line.trim().strip_prefix("Authority="))?
        .trim();

    let name = authority
        .split_once(": ")
        .map(|(_, rest)| rest)
        .unwrap_or(authority);

    // Drop the trailing team identifier
    let name = match name.rfind(" (") {
        Some(idx) if name.ends_with(')') => &name[..idx],
        _ => name,
    };

    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
