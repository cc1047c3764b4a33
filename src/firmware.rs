//! Firmware version bookkeeping and OTA image confirmation.
//!
//! On every boot the running version is compared with the one persisted
//! under `firmware/version`.  A difference means an update was installed:
//! the new version is stored and the upgrade logged.  The running image is
//! then marked valid so the bootloader does not roll back.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::{StorageError, StoragePort};
use crate::error;

pub const FIRMWARE_NAMESPACE: &str = "firmware";
pub const VERSION_KEY: &str = "version";

/// Version assumed when nothing was persisted yet.
pub const DEFAULT_VERSION: &str = "1.0.0";

pub const RUNNING_VERSION: &str = env!("CARGO_PKG_VERSION");

const MAX_VERSION_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootKind {
    /// Same version as the previous boot.
    Unchanged,
    /// A different image than last boot; holds the previous version.
    Upgraded { from: String },
}

/// Compare, persist and confirm the running firmware version.
pub fn confirm_boot(storage: &dyn StoragePort, running: &str) -> error::Result<BootKind> {
    let stored = match storage.read_to_vec(FIRMWARE_NAMESPACE, VERSION_KEY, MAX_VERSION_LEN) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| DEFAULT_VERSION.to_owned()),
        Err(StorageError::NotFound) => DEFAULT_VERSION.to_owned(),
        Err(e) => return Err(e.into()),
    };

    let kind = if stored == running {
        info!("Firmware: running v{running}");
        BootKind::Unchanged
    } else {
        info!("Firmware: updated v{stored} -> v{running}");
        storage.write(FIRMWARE_NAMESPACE, VERSION_KEY, running.as_bytes())?;
        BootKind::Upgraded { from: stored }
    };

    mark_valid();
    Ok(kind)
}

#[cfg(target_os = "espidf")]
fn mark_valid() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("Firmware: image marked valid"),
        Err(e) => warn!("Firmware: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
fn mark_valid() {
    log::debug!("Firmware(sim): image confirmation skipped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::nvs::NvsAdapter;

    #[test]
    fn first_boot_against_default_version() {
        let nvs = NvsAdapter::new().unwrap();
        assert_eq!(confirm_boot(&nvs, DEFAULT_VERSION), Ok(BootKind::Unchanged));
        assert!(!nvs.exists(FIRMWARE_NAMESPACE, VERSION_KEY));
    }

    #[test]
    fn upgrade_is_detected_once() {
        let nvs = NvsAdapter::new().unwrap();
        nvs.write(FIRMWARE_NAMESPACE, VERSION_KEY, b"0.2.0").unwrap();
        assert_eq!(
            confirm_boot(&nvs, "0.3.0"),
            Ok(BootKind::Upgraded { from: "0.2.0".into() })
        );
        assert_eq!(confirm_boot(&nvs, "0.3.0"), Ok(BootKind::Unchanged));
    }

    #[test]
    fn unreadable_version_is_a_storage_error() {
        struct Broken;
        impl StoragePort for Broken {
            fn read(&self, _: &str, _: &str, _: &mut [u8]) -> Result<usize, StorageError> {
                Err(StorageError::IoError)
            }
            fn write(&self, _: &str, _: &str, _: &[u8]) -> Result<(), StorageError> {
                Err(StorageError::IoError)
            }
            fn delete(&self, _: &str, _: &str) -> Result<(), StorageError> {
                Err(StorageError::IoError)
            }
            fn exists(&self, _: &str, _: &str) -> bool {
                false
            }
        }
        let err = confirm_boot(&Broken, "0.3.0").unwrap_err();
        assert_eq!(err, error::Error::Storage(StorageError::IoError));
        assert_eq!(err.to_string(), "storage: I/O error");
    }
}
