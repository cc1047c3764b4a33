//! Credential store for provisioned broker and WiFi material in NVS.
//!
//! Everything written by the BLE provisioning service ends up here and is
//! read back by the WiFi and MQTT adapters when a publish cycle reloads
//! its configuration.
//!
//! ## Storage layout
//!
//! | Namespace | Key           | Content                              |
//! |-----------|---------------|--------------------------------------|
//! | `certs`   | `device_cert` | PEM device certificate               |
//! | `certs`   | `priv_key`    | PEM private key                      |
//! | `certs`   | `root_ca`     | PEM root CA (optional)               |
//! | `certs`   | `topic_id`    | UTF-8 topic prefix / client group    |
//! | `wifi`    | `ssid`        | UTF-8 SSID                           |
//! | `wifi`    | `pass`        | UTF-8 passphrase                     |

use std::sync::Arc;

use log::{info, warn};

use crate::app::ports::{StorageError, StoragePort};
use crate::cloud::BrokerCredentials;
use crate::error::CommsError;
use crate::provisioning::ProvisionChannel;

pub const CERT_NAMESPACE: &str = "certs";
pub const WIFI_NAMESPACE: &str = "wifi";

/// Maximum certificate / key size (PEM, includes headers).
const MAX_PEM_SIZE: usize = 2048;
const MAX_TOPIC_ID: usize = 64;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASS_LEN: usize = 64;

/// Station credentials as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: heapless::String<MAX_SSID_LEN>,
    pub password: heapless::String<MAX_PASS_LEN>,
}

/// Namespace and key a provisioning channel persists to.
pub fn storage_location(channel: ProvisionChannel) -> (&'static str, &'static str) {
    match channel {
        ProvisionChannel::Certificate => (CERT_NAMESPACE, "device_cert"),
        ProvisionChannel::PrivateKey => (CERT_NAMESPACE, "priv_key"),
        ProvisionChannel::RootCa => (CERT_NAMESPACE, "root_ca"),
        ProvisionChannel::TopicId => (CERT_NAMESPACE, "topic_id"),
        ProvisionChannel::WifiSsid => (WIFI_NAMESPACE, "ssid"),
        ProvisionChannel::WifiPassword => (WIFI_NAMESPACE, "pass"),
    }
}

/// Credential store adapter over any [`StoragePort`].
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn StoragePort>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn StoragePort>) -> Self {
        Self { storage }
    }

    /// Persist one provisioned payload.
    pub fn persist(&self, channel: ProvisionChannel, data: &[u8]) -> Result<(), StorageError> {
        let (ns, key) = storage_location(channel);
        self.storage.write(ns, key, data)?;
        info!("CredentialStore: stored '{}/{}' ({}B)", ns, key, data.len());
        Ok(())
    }

    pub fn has_broker_credentials(&self) -> bool {
        [
            ProvisionChannel::Certificate,
            ProvisionChannel::PrivateKey,
            ProvisionChannel::TopicId,
        ]
        .into_iter()
        .all(|c| {
            let (ns, key) = storage_location(c);
            self.storage.exists(ns, key)
        })
    }

    /// Load the material the broker client needs.  Certificate, key and
    /// topic id are required; the root CA is optional.
    pub fn load_broker_credentials(&self) -> Result<BrokerCredentials, CommsError> {
        let certificate = self.load_required(ProvisionChannel::Certificate, MAX_PEM_SIZE)?;
        let private_key = self.load_required(ProvisionChannel::PrivateKey, MAX_PEM_SIZE)?;
        let topic_raw = self.load_required(ProvisionChannel::TopicId, MAX_TOPIC_ID)?;

        let root_ca = match self.load(ProvisionChannel::RootCa, MAX_PEM_SIZE) {
            Ok(ca) if !ca.is_empty() => Some(ca),
            Ok(_) | Err(StorageError::NotFound) => None,
            Err(e) => {
                warn!("CredentialStore: root CA unreadable ({e}), continuing without");
                None
            }
        };

        let topic_id = String::from_utf8(topic_raw)
            .map_err(|_| CommsError::InvalidCredentials)?
            .trim()
            .to_owned();
        if topic_id.is_empty() || topic_id.contains(['#', '+', '\0']) {
            warn!("CredentialStore: topic id rejected");
            return Err(CommsError::InvalidCredentials);
        }
        if !looks_like_pem(&certificate) || !looks_like_pem(&private_key) {
            warn!("CredentialStore: certificate or key is not PEM");
            return Err(CommsError::InvalidCredentials);
        }

        Ok(BrokerCredentials {
            certificate,
            private_key,
            root_ca,
            topic_id,
        })
    }

    pub fn load_wifi(&self) -> Result<WifiCredentials, CommsError> {
        let ssid_raw = self.load_required(ProvisionChannel::WifiSsid, MAX_SSID_LEN)?;
        let pass_raw = match self.load(ProvisionChannel::WifiPassword, MAX_PASS_LEN) {
            Ok(p) => p,
            Err(StorageError::NotFound) => Vec::new(),
            Err(_) => return Err(CommsError::InvalidCredentials),
        };

        let ssid = core::str::from_utf8(&ssid_raw).map_err(|_| CommsError::InvalidCredentials)?;
        let pass = core::str::from_utf8(&pass_raw).map_err(|_| CommsError::InvalidCredentials)?;
        if ssid.is_empty() {
            return Err(CommsError::NoCredentials);
        }
        // WPA2 passphrases are 8–63 chars; empty means an open network.
        if !pass.is_empty() && !(8..=63).contains(&pass.len()) {
            warn!("CredentialStore: passphrase length {} invalid", pass.len());
            return Err(CommsError::InvalidCredentials);
        }

        let mut creds = WifiCredentials {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
        };
        creds
            .ssid
            .push_str(ssid)
            .map_err(|_| CommsError::InvalidCredentials)?;
        creds
            .password
            .push_str(pass)
            .map_err(|_| CommsError::InvalidCredentials)?;
        Ok(creds)
    }

    /// Forget the station credentials.
    pub fn clear_wifi(&self) -> Result<(), StorageError> {
        for channel in [ProvisionChannel::WifiSsid, ProvisionChannel::WifiPassword] {
            let (ns, key) = storage_location(channel);
            self.storage.delete(ns, key)?;
        }
        info!("CredentialStore: WiFi credentials cleared");
        Ok(())
    }

    fn load(&self, channel: ProvisionChannel, max: usize) -> Result<Vec<u8>, StorageError> {
        let (ns, key) = storage_location(channel);
        self.storage.read_to_vec(ns, key, max)
    }

    fn load_required(&self, channel: ProvisionChannel, max: usize) -> Result<Vec<u8>, CommsError> {
        match self.load(channel, max) {
            Ok(v) if !v.is_empty() => Ok(v),
            Ok(_) | Err(StorageError::NotFound) => Err(CommsError::NoCredentials),
            Err(e) => {
                warn!("CredentialStore: {:?} unreadable ({e})", channel);
                Err(CommsError::InvalidCredentials)
            }
        }
    }
}

fn looks_like_pem(data: &[u8]) -> bool {
    data.windows(11).any(|w| w == b"-----BEGIN ")
}

// ── Tests ────────────────────────────────────────────────────
