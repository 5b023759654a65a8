use super::{Platform, PlatformCapabilities, PlatformError};
use crate::models::ProcessRecord;
use std::path::Path;

/// Platform with no implementation for any operation
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedPlatform;

impl UnsupportedPlatform {
    fn unsupported(&self, operation: &'static str) -> PlatformError {
        PlatformError::Unsupported {
            operation,
            platform: self.name(),
        }
    }
}

impl Platform for UnsupportedPlatform {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn capabilities(&self) -> PlatformCapabilities {
        PlatformCapabilities {
            enumerate: false,
            terminate: false,
            publisher: false,
        }
    }

    fn list_processes(&self) -> Result<Vec<ProcessRecord>, PlatformError> {
        Err(self.unsupported("process enumeration"))
    }

    fn terminate_process(&self, _pid: u32) -> Result<(), PlatformError> {
        Err(self.unsupported("process termination"))
    }

    fn publisher_name(&self, _path: &Path) -> Result<String, PlatformError> {
        Err(self.unsupported("publisher lookup"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_operation_is_unsupported() {
        let platform = UnsupportedPlatform;
        assert!(platform.list_processes().unwrap_err().is_unsupported());
        assert!(platform.terminate_process(1).unwrap_err().is_unsupported());
        assert!(platform.publisher_name(Path::new("/bin/sh")).unwrap_err().is_unsupported());
        assert_eq!(platform.capabilities().missing().len(), 3);
    }
}
