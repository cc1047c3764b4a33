//! Device configuration parameters
//!
//! Policy constants for feeding, measurement, publishing and the cloud
//! link.  Stored with postcard under `device/config`; defaults apply on
//! first boot or when the stored blob fails to decode.  Runtime-tunable
//! values (intervals, thresholds, display preferences) live in
//! [`AquariumState`](crate::app::state::AquariumState) instead.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

pub const CONFIG_NAMESPACE: &str = "device";
pub const CONFIG_KEY: &str = "config";

/// Default AWS IoT endpoint the broker client connects to.
pub const DEFAULT_ENDPOINT: &str = "mqtts://aqbxwrwwgdb49-ats.iot.eu-north-1.amazonaws.com:8883";

/// Upper bound accepted for `FeedPolicy::max_attempts`.
pub const MAX_FEED_ATTEMPTS_LIMIT: u8 = 8;

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub feed: FeedPolicy,
    pub measurement: MeasurementPolicy,
    pub publish: PublishPolicy,
    pub cloud: CloudPolicy,
}

/// Feeder actuation and confirmation policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedPolicy {
    /// Dispense attempts before a cycle is declared exhausted.
    pub max_attempts: u8,
    /// Pause after each attempt before checking the beam watcher (ms).
    pub settle_ms: u32,
    /// Poll period of the beam watcher (ms).
    pub watcher_poll_ms: u32,
    /// Half-steps that move one portion out of the hopper.
    pub steps_per_portion: u32,
    /// Delay between half-steps (µs).
    pub step_delay_us: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementPolicy {
    /// Readings averaged per measurement.
    pub samples: u8,
    /// Spacing between readings (ms).
    pub sample_spacing_ms: u32,
    /// Plausible water temperature window (°C); readings outside are dropped.
    pub temp_min_c: f32,
    pub temp_max_c: f32,
    /// How long a pH measurement waits for confirmation (s).
    pub ph_confirm_window_secs: u32,
    /// Probe power-up stabilisation before the first pH sample (ms).
    pub ph_warmup_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PublishPolicy {
    /// Timeout for each of the WiFi-up and broker-up waits (s).
    pub connect_timeout_secs: u32,
    /// How long a connected cycle waits for the outbox and shadow sync (s).
    pub drain_timeout_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudPolicy {
    pub endpoint: heapless::String<96>,
    /// Largest inbound document the reassembler will allocate for.
    pub max_document_len: u32,
}

impl Default for FeedPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            settle_ms: 1000,
            watcher_poll_ms: 20,
            steps_per_portion: 512,
            step_delay_us: 2000,
        }
    }
}

impl Default for MeasurementPolicy {
    fn default() -> Self {
        Self {
            samples: 5,
            sample_spacing_ms: 1000,
            temp_min_c: 10.0,
            temp_max_c: 40.0,
            ph_confirm_window_secs: 30,
            ph_warmup_ms: 2000,
        }
    }
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            drain_timeout_secs: 5,
        }
    }
}

impl Default for CloudPolicy {
    fn default() -> Self {
        let mut endpoint = heapless::String::new();
        // DEFAULT_ENDPOINT is shorter than the capacity.
        let _ = endpoint.push_str(DEFAULT_ENDPOINT);
        Self {
            endpoint,
            max_document_len: 8192,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            feed: FeedPolicy::default(),
            measurement: MeasurementPolicy::default(),
            publish: PublishPolicy::default(),
            cloud: CloudPolicy::default(),
        }
    }
}

impl DeviceConfig {
    /// Range-check every field.  Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.feed;
        if !(1..=MAX_FEED_ATTEMPTS_LIMIT).contains(&f.max_attempts) {
            return Err(ConfigError::ValidationFailed("feed.max_attempts must be 1–8"));
        }
        if f.settle_ms > 10_000 {
            return Err(ConfigError::ValidationFailed("feed.settle_ms must be ≤ 10000"));
        }
        if !(1..=1000).contains(&f.watcher_poll_ms) {
            return Err(ConfigError::ValidationFailed("feed.watcher_poll_ms must be 1–1000"));
        }
        if !(1..=8192).contains(&f.steps_per_portion) {
            return Err(ConfigError::ValidationFailed("feed.steps_per_portion must be 1–8192"));
        }
        if !(800..=20_000).contains(&f.step_delay_us) {
            return Err(ConfigError::ValidationFailed("feed.step_delay_us must be 800–20000"));
        }

        let m = &self.measurement;
        if !(1..=16).contains(&m.samples) {
            return Err(ConfigError::ValidationFailed("measurement.samples must be 1–16"));
        }
        if m.sample_spacing_ms > 10_000 {
            return Err(ConfigError::ValidationFailed(
                "measurement.sample_spacing_ms must be ≤ 10000",
            ));
        }
        if !(m.temp_min_c < m.temp_max_c) {
            return Err(ConfigError::ValidationFailed(
                "measurement.temp_min_c must be below temp_max_c",
            ));
        }
        if !(1..=600).contains(&m.ph_confirm_window_secs) {
            return Err(ConfigError::ValidationFailed(
                "measurement.ph_confirm_window_secs must be 1–600",
            ));
        }

        let p = &self.publish;
        if !(1..=300).contains(&p.connect_timeout_secs) {
            return Err(ConfigError::ValidationFailed(
                "publish.connect_timeout_secs must be 1–300",
            ));
        }
        if p.drain_timeout_secs > 120 {
            return Err(ConfigError::ValidationFailed("publish.drain_timeout_secs must be ≤ 120"));
        }

        let c = &self.cloud;
        if !(c.endpoint.starts_with("mqtts://") || c.endpoint.starts_with("mqtt://")) {
            return Err(ConfigError::ValidationFailed("cloud.endpoint must be an mqtt(s):// URL"));
        }
        if !(256..=65_536).contains(&c.max_document_len) {
            return Err(ConfigError::ValidationFailed(
                "cloud.max_document_len must be 256–65536",
            ));
        }
        Ok(())
    }
}
