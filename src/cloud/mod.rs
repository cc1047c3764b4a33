//! Cloud link: broker session settings, topic layout, inbound reassembly
//! and shadow reconciliation.
//!
//! ```text
//!  broker events ──▶ CloudAssembler ──▶ INBOUND_DOCUMENTS ──▶ ShadowReconciler
//!                     (reassembly)        (channels)           (shadow)
//!                                                                 │
//!  PublishCoordinator ◀── TelemetryPayload / CloudLogBuffer       ▼
//!   (fsm::publish)                                     CommandExecutor + ack
//! ```

pub mod channels;
pub mod log_buffer;
pub mod reassembly;
pub mod shadow;
pub mod telemetry;
pub mod topics;

use core::fmt;

use crate::adapters::cert_store::CredentialStore;
use crate::config::CloudPolicy;
use crate::error::CommsError;

/// Provisioned TLS material and topic group.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    pub root_ca: Option<Vec<u8>>,
    pub topic_id: String,
}

// Never print key material.
impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("certificate", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .field("root_ca", &self.root_ca.as_ref().map(Vec::len))
            .field("topic_id", &self.topic_id)
            .finish()
    }
}

/// Everything the broker client needs for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub endpoint: String,
    /// MQTT client id and shadow thing name.
    pub client_id: String,
    pub credentials: BrokerCredentials,
}

impl BrokerSettings {
    /// Assemble settings from the cloud policy and the provisioned material.
    pub fn load(
        policy: &CloudPolicy,
        device_id: &str,
        store: &CredentialStore,
    ) -> Result<Self, CommsError> {
        let credentials = store.load_broker_credentials()?;
        Ok(Self {
            endpoint: policy.endpoint.as_str().to_owned(),
            client_id: device_id.to_owned(),
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_private_key() {
        let creds = BrokerCredentials {
            certificate: b"cert".to_vec(),
            private_key: b"super secret".to_vec(),
            root_ca: None,
            topic_id: "tank".into(),
        };
        let s = format!("{creds:?}");
        assert!(!s.contains("super secret"));
        assert!(s.contains("<redacted>"));
    }
}
