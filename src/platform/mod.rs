//! Platform collaborator: OS process enumeration, termination and
//! executable publisher lookup
//!
//! Every OS-specific call goes through the [`Platform`] trait. A platform
//! without an implementation for an operation returns
//! [`PlatformError::Unsupported`] instead of silently succeeding.

mod sysinfo_platform;
mod unsupported;

pub use sysinfo_platform::SysinfoPlatform;
pub use unsupported::UnsupportedPlatform;

use crate::models::ProcessRecord;
use std::path::Path;

/// Errors reported by platform operations
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{operation} is not supported on {platform}")]
    Unsupported {
        operation: &'static str,
        platform: &'static str,
    },
    #[error("process {pid} has already exited")]
    ProcessAlreadyGone { pid: u32 },
    #[error("termination of process {pid} was denied: {reason}")]
    TerminationDenied { pid: u32, reason: String },
    #[error("process enumeration failed: {0}")]
    ScanFailed(String),
    #[error("publisher lookup failed for {path}: {reason}")]
    PublisherLookup { path: String, reason: String },
    #[error("OS error: {0}")]
    Os(#[from] std::io::Error),
}

impl PlatformError {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, PlatformError::Unsupported { .. })
    }

    pub fn is_already_gone(&self) -> bool {
        matches!(self, PlatformError::ProcessAlreadyGone { .. })
    }
}

/// Which operations a platform actually implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub enumerate: bool,
    pub terminate: bool,
    pub publisher: bool,
}

impl PlatformCapabilities {
    /// Names of unsupported operations, for one-time startup reporting
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.enumerate {
            missing.push("process enumeration");
        }
        if !self.terminate {
            missing.push("process termination");
        }
        if !self.publisher {
            missing.push("publisher lookup");
        }
        missing
    }
}

/// OS operations consumed by the monitoring core
pub trait Platform: Send + Sync {
    /// Short platform name used in logs and errors
    fn name(&self) -> &'static str;

    /// Operations this platform implements
    fn capabilities(&self) -> PlatformCapabilities;

    /// Enumerate every live process. Processes that exit mid-scan are omitted.
    fn list_processes(&self) -> Result<Vec<ProcessRecord>, PlatformError>;

    /// Forcefully terminate a process
    fn terminate_process(&self, pid: u32) -> Result<(), PlatformError>;

    /// Code signing publisher of an executable
    fn publisher_name(&self, path: &Path) -> Result<String, PlatformError>;
}

/// Platform implementation for the host OS
pub fn native() -> std::sync::Arc<dyn Platform> {
    std::sync::Arc::new(SysinfoPlatform::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_capabilities_lists_disabled_operations() {
        let caps = PlatformCapabilities {
            enumerate: true,
            terminate: false,
            publisher: false,
        };
        assert_eq!(caps.missing(), vec!["process termination", "publisher lookup"]);
    }

    #[test]
    fn test_error_classification() {
        let gone = PlatformError::ProcessAlreadyGone { pid: 7 };
        assert!(gone.is_already_gone());
        assert!(!gone.is_unsupported());

        let unsupported = PlatformError::Unsupported {
            operation: "publisher lookup",
            platform: "linux",
        };
        assert!(unsupported.is_unsupported());
        assert_eq!(unsupported.to_string(), "publisher lookup is not supported on linux");
    }
}
