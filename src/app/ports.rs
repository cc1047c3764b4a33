//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ domain services (events, fsm, cloud, measurement)
//! ```
//!
//! Driven adapters (probes, feeder, beam sensor, radio, broker, storage)
//! implement these traits.  The domain services consume them via generics
//! or trait objects, so the core never touches hardware directly and every
//! service runs unchanged against the mocks in `tests/integration`.
//!
//! ## Threading notes
//!
//! - Ports shared between tasks (`StoragePort`, `BrokerPort`, `BeamPort`,
//!   `ClockPort`, `EventSink`) take `&self` and are `Send + Sync`; the
//!   adapter owns its interior locking.
//! - Ports owned by exactly one task (`FeederPort`, probes, `NetworkPort`,
//!   `DisplayPort`) take `&mut self`.

use std::time::Duration;

use crate::adapters::cert_store::CredentialStore;
use crate::cloud::BrokerSettings;
use crate::config::DeviceConfig;
use crate::display::ScreenView;
use crate::error::{ActuatorError, CommsError, SensorError};

// ───────────────────────────────────────────────────────────────
// Sensor ports (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Water temperature probe (DS18B20 on target).
pub trait TemperatureProbe {
    /// One conversion.  `NaN` is never returned; failures are errors.
    fn read_celsius(&mut self) -> Result<f32, SensorError>;
}

/// pH probe with a switched supply.
pub trait PhProbe {
    /// Switch the probe supply.  Readings are only valid while powered.
    fn power(&mut self, on: bool) -> Result<(), ActuatorError>;

    /// One reading.  May return `NaN` when the front-end is saturated.
    fn read_ph(&mut self) -> Result<f32, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Actuator ports (driven adapter: domain → hardware)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedDirection {
    Forward,
    Reverse,
}

/// Portion dispenser motor.
pub trait FeederPort {
    /// Move `steps` half-steps.  Blocks until the move completes; a move
    /// is never interrupted once started.
    fn dispense(&mut self, direction: FeedDirection, steps: u32) -> Result<(), ActuatorError>;

    /// De-energise all coils.
    fn release(&mut self);
}

/// Break-beam sensor below the dispenser chute.
///
/// Shared between the feeding task and its watcher thread, hence `&self`.
pub trait BeamPort: Send + Sync {
    /// Clear any stale break and start latching new ones.
    fn arm(&self);

    /// Block up to `timeout` for a latched break.  `true` once a break was
    /// observed since `arm`.
    fn wait_for_break(&self, timeout: Duration) -> bool;

    /// Stop latching.
    fn disarm(&self);
}

// ───────────────────────────────────────────────────────────────
// Connectivity ports
// ───────────────────────────────────────────────────────────────

/// Station-mode network link.
///
/// `connect` only starts the association; the adapter raises
/// `EventFlags::WIFI_UP` once an address is assigned.
pub trait NetworkPort {
    /// Re-read station credentials from the credential store.
    fn reload(&mut self, credentials: &CredentialStore) -> Result<(), CommsError>;

    fn is_configured(&self) -> bool;

    fn connect(&mut self) -> Result<(), CommsError>;

    /// Tear the link down and clear `WIFI_UP`.
    fn disconnect(&mut self);
}

/// Cloud message broker session.
///
/// Messages are either queued into an offline outbox (`enqueue`, drained by
/// `flush` once connected) or published live (`publish`, requires a
/// connected session).  The adapter raises `EventFlags::MQTT_UP` when the
/// session comes up.
pub trait BrokerPort: Send + Sync {
    /// Replace the client configuration.  Takes effect on the next `start`.
    fn configure(&self, settings: BrokerSettings) -> Result<(), CommsError>;

    fn is_configured(&self) -> bool;

    /// Begin connecting.  Returns once the attempt is underway.
    fn start(&self) -> Result<(), CommsError>;

    /// Close the session and clear `MQTT_UP`.  Idempotent.
    fn stop(&self);

    /// Queue a message for the next connected period.
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), CommsError>;

    fn subscribe(&self, topic: &str) -> Result<(), CommsError>;

    /// Hand every queued message to the live session.  Returns how many
    /// were handed over.
    fn flush(&self) -> Result<usize, CommsError>;

    /// Publish on the live session.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CommsError>;

    /// Messages queued or in flight without an acknowledgement.
    fn pending(&self) -> usize;
}

// ───────────────────────────────────────────────────────────────
// Display port
// ───────────────────────────────────────────────────────────────

pub trait DisplayPort {
    fn render(&mut self, view: &ScreenView);

    fn set_power(&mut self, on: bool);

    fn set_contrast(&mut self, contrast: u8);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

pub trait ClockPort: Send + Sync {
    /// Wall-clock seconds since the Unix epoch, or `None` while the clock
    /// has not been synchronised (below the plausibility floor).
    fn now_unix(&self) -> Option<u64>;

    /// Monotonic milliseconds since boot.
    fn uptime_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log, BLE
/// characteristic, cloud log topic).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists [`DeviceConfig`].
///
/// Implementations MUST validate before persisting.  Invalid ranges are
/// rejected with [`ConfigError::ValidationFailed`], not silently clamped.
pub trait ConfigPort {
    /// Returns [`DeviceConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<DeviceConfig, ConfigError>;

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for config, aquarium data and credentials.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic.  The ESP-IDF NVS API guarantees this
///   natively; the in-memory simulation achieves it trivially.
pub trait StoragePort: Send + Sync {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;

    /// Read a value of at most `max_len` bytes into a fresh buffer.
    fn read_to_vec(
        &self,
        namespace: &str,
        key: &str,
        max_len: usize,
    ) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0u8; max_len];
        let n = self.read(namespace, key, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

// ───────────────────────────────────────────────────────────────
// Scheduler delegate (decouples scheduler from the event flags)
// ───────────────────────────────────────────────────────────────

/// Callback trait that the scheduler invokes when a trigger fires.
///
/// The production delegate maps triggers to coordinator flags; tests
/// record them.  The scheduler itself knows nothing about flags or tasks.
pub trait SchedulerDelegate {
    fn on_schedule_fired(&mut self, trigger: Trigger);
}

/// Periodic work items driven by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Temperature,
    Ph,
    Feed,
    /// Periodic cloud synchronisation (`wake_frequency`).
    Sync,
}

impl Trigger {
    pub const ALL: [Trigger; 4] = [Trigger::Temperature, Trigger::Ph, Trigger::Feed, Trigger::Sync];

    pub fn label(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Ph => "ph",
            Self::Feed => "feed",
            Self::Sync => "sync",
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Encryption or decryption failed (wrong key, corrupted blob).
    EncryptionError,
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => Self::NotFound,
            StorageError::Full => Self::StorageFull,
            StorageError::IoError | StorageError::EncryptionError => Self::IoError,
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::EncryptionError => write!(f, "encryption error"),
        }
    }
}
