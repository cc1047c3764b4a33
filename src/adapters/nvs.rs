//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the aquarium
//! controller.
//!
//! - Config validation: every field is range-checked before persistence.
//! - Namespace isolation: each subsystem uses its own namespace
//!   (`device`, `aquarium_data`, `certs`, `wifi`, `firmware`).
//! - Atomic writes: ESP-IDF NVS commits are atomic per `nvs_commit()`.
//! - The ESP-IDF NVS API is thread-safe, so the adapter is shared between
//!   tasks through `Arc` with no extra locking on target.  The simulation
//!   backend is a mutex-guarded map keyed by `(namespace, key)` that
//!   enforces the same name limits as flash.

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::{CONFIG_KEY, CONFIG_NAMESPACE, DeviceConfig};
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;
#[cfg(not(target_os = "espidf"))]
use std::sync::{Mutex, PoisonError};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const MAX_BLOB_SIZE: usize = 4000;

/// NVS names (namespaces and keys) are limited to 15 characters.
const NVS_NAME_MAX: usize = 15;

#[cfg(not(target_os = "espidf"))]
type SimEntries = HashMap<(String, String), Vec<u8>>;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    entries: Mutex<SimEntries>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// Returns `Err(StorageError::IoError)` if flash initialisation fails
    /// unrecoverably. On first boot or after a version mismatch the NVS
    /// partition is erased and re-initialised automatically.
    pub fn new() -> Result<Self, StorageError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NvsAdapter: erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(StorageError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(StorageError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Validated `(namespace, key)` pair for the simulation map.
    #[cfg(not(target_os = "espidf"))]
    fn sim_slot(namespace: &str, key: &str) -> Result<(String, String), StorageError> {
        Self::c_name(namespace)?;
        Self::c_name(key)?;
        Ok((namespace.to_owned(), key.to_owned()))
    }

    #[cfg(not(target_os = "espidf"))]
    fn entries(&self) -> std::sync::MutexGuard<'_, SimEntries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// NUL-terminated copy of an NVS name.  Over-long names are rejected
    /// rather than truncated so two keys can never alias.
    fn c_name(name: &str) -> Result<[u8; NVS_NAME_MAX + 1], StorageError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > NVS_NAME_MAX || bytes.contains(&0) {
            warn!("NvsAdapter: invalid NVS name '{}'", name);
            return Err(StorageError::IoError);
        }
        let mut buf = [0u8; NVS_NAME_MAX + 1];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace).map_err(|_| ESP_ERR_NVS_INVALID_NAME)?;

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    #[cfg(target_os = "espidf")]
    fn read_blob(namespace: &str, key: &str) -> Result<Vec<u8>, i32> {
        let key = Self::c_name(key).map_err(|_| ESP_ERR_NVS_INVALID_NAME)?;
        Self::with_nvs_handle(namespace, false, |handle| {
            let mut size: usize = 0;
            // First call: get size
            let ret = unsafe {
                nvs_get_blob(handle, key.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            if size > MAX_BLOB_SIZE {
                return Err(ESP_ERR_NVS_INVALID_LENGTH);
            }
            let mut buf = vec![0u8; size];
            let ret = unsafe {
                nvs_get_blob(
                    handle,
                    key.as_ptr() as *const _,
                    buf.as_mut_ptr() as *mut _,
                    &mut size,
                )
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            buf.truncate(size);
            Ok(buf)
        })
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        let mut buf = [0u8; 512];
        match self.read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => {
                let cfg: DeviceConfig =
                    postcard::from_bytes(&buf[..len]).map_err(|_| ConfigError::Corrupted)?;
                cfg.validate()?;
                info!("NvsAdapter: loaded config ({} bytes)", len);
                Ok(cfg)
            }
            Err(StorageError::NotFound) => {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(DeviceConfig::default())
            }
            Err(e) => {
                warn!("NvsAdapter: config read error ({}), using defaults", e);
                Ok(DeviceConfig::default())
            }
        }
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        self.write(CONFIG_NAMESPACE, CONFIG_KEY, &bytes)?;
        info!("NvsAdapter: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let slot = Self::sim_slot(namespace, key)?;
            let entries = self.entries();
            let data = entries.get(&slot).ok_or(StorageError::NotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        #[cfg(target_os = "espidf")]
        {
            match Self::read_blob(namespace, key) {
                Ok(data) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(len)
                }
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(e) => {
                    warn!("NvsAdapter: read '{}/{}' failed ({})", namespace, key, e);
                    Err(StorageError::IoError)
                }
            }
        }
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(StorageError::Full);
        }

        #[cfg(not(target_os = "espidf"))]
        {
            let slot = Self::sim_slot(namespace, key)?;
            self.entries().insert(slot, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key_c = Self::c_name(key)?;
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key_c.as_ptr() as *const _,
                        data.as_ptr() as *const _,
                        data.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|e| {
                warn!("NvsAdapter: write '{}/{}' failed ({})", namespace, key, e);
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let slot = Self::sim_slot(namespace, key)?;
            self.entries().remove(&slot);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key_c = Self::c_name(key)?;
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                let ret = unsafe { nvs_erase_key(handle, key_c.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => Ok(()),
                // A namespace that was never written has nothing to delete.
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Ok(()),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            Self::sim_slot(namespace, key)
                .is_ok_and(|slot| self.entries().contains_key(&slot))
        }

        #[cfg(target_os = "espidf")]
        {
            let Ok(key_c) = Self::c_name(key) else {
                return false;
            };
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let ret = unsafe {
                    nvs_find_key(handle, key_c.as_ptr() as *const _, core::ptr::null_mut())
                };
                Ok(ret == ESP_OK)
            });
            result.unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    #[test]
    fn certificate_blob_survives_and_can_be_erased() {
        let nvs = NvsAdapter::new().unwrap();
        nvs.write("certs", "cert", PEM).unwrap();
        assert!(nvs.exists("certs", "cert"));
        assert_eq!(nvs.read_to_vec("certs", "cert", 2048).unwrap(), PEM);

        nvs.delete("certs", "cert").unwrap();
        assert!(!nvs.exists("certs", "cert"));
        // Deleting again is not an error.
        assert_eq!(nvs.delete("certs", "cert"), Ok(()));
    }

    #[test]
    fn missing_credential_reads_as_not_found() {
        let nvs = NvsAdapter::new().unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(nvs.read("wifi", "ssid", &mut buf), Err(StorageError::NotFound));
    }

    #[test]
    fn same_key_in_two_namespaces_does_not_collide() {
        let nvs = NvsAdapter::new().unwrap();
        nvs.write("wifi", "id", b"ReefNet").unwrap();
        nvs.write("certs", "id", b"tank").unwrap();

        let mut buf = [0u8; 16];
        let n = nvs.read("wifi", "id", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ReefNet");
        let n = nvs.read("certs", "id", &mut buf).unwrap();
        assert_eq!(&buf[..n], b"tank");
    }

    #[test]
    fn short_buffer_receives_a_prefix() {
        let nvs = NvsAdapter::new().unwrap();
        nvs.write("certs", "topic", b"aquarium-42").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(nvs.read("certs", "topic", &mut buf), Ok(8));
        assert_eq!(&buf, b"aquarium");
    }

    #[test]
    fn blob_over_flash_limit_is_full() {
        let nvs = NvsAdapter::new().unwrap();
        let chain = vec![b'A'; MAX_BLOB_SIZE + 1];
        assert_eq!(nvs.write("certs", "root_ca", &chain), Err(StorageError::Full));
        assert!(!nvs.exists("certs", "root_ca"));
    }

    #[test]
    fn names_follow_the_flash_limit() {
        assert!(NvsAdapter::c_name("aquarium_data").is_ok());
        assert!(NvsAdapter::c_name("").is_err());
        assert!(NvsAdapter::c_name("last_feed_time_utc").is_err());

        let nvs = NvsAdapter::new().unwrap();
        assert_eq!(
            nvs.write("aquarium_data", "last_feed_time_utc", b"1"),
            Err(StorageError::IoError)
        );
        assert!(!nvs.exists("aquarium_data", "last_feed_time_utc"));
    }

    #[test]
    fn config_falls_back_to_defaults_then_persists() {
        let nvs = NvsAdapter::new().unwrap();
        assert_eq!(nvs.load().unwrap(), DeviceConfig::default());

        let mut cfg = DeviceConfig::default();
        cfg.feed.max_attempts = 3;
        nvs.save(&cfg).unwrap();
        assert_eq!(nvs.load().unwrap().feed.max_attempts, 3);
    }

    #[test]
    fn rejected_config_is_never_written() {
        let nvs = NvsAdapter::new().unwrap();
        let mut cfg = DeviceConfig::default();
        cfg.feed.max_attempts = 0;
        assert!(matches!(nvs.save(&cfg), Err(ConfigError::ValidationFailed(_))));
        assert!(!nvs.exists(CONFIG_NAMESPACE, CONFIG_KEY));
    }

    #[test]
    fn garbage_config_blob_is_corrupted() {
        let nvs = NvsAdapter::new().unwrap();
        nvs.write(CONFIG_NAMESPACE, CONFIG_KEY, &[0xFF, 0xFF]).unwrap();
        assert_eq!(nvs.load(), Err(ConfigError::Corrupted));
    }
}
