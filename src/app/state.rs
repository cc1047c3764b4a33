//! Shared aquarium state.
//!
//! One [`AquariumState`] per device, guarded by a single mutex inside
//! [`AquariumStore`].  Measurement and feeding tasks mutate it; the display
//! task, BLE telemetry and the publish cycle read snapshots.
//!
//! Sensor values are transient.  Everything else (feed times, intervals,
//! thresholds, display preferences) is persisted with postcard under
//! `aquarium_data/data` whenever a mutation asks for it.

use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::ports::{StorageError, StoragePort};

pub const STATE_NAMESPACE: &str = "aquarium_data";
pub const STATE_KEY: &str = "data";

/// Upper bound on the persisted blob.
const MAX_STATE_BLOB: usize = 256;

fn nan() -> f32 {
    f32::NAN
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AquariumState {
    /// Last averaged water temperature (°C); `NaN` until measured.
    #[serde(skip, default = "nan")]
    pub temperature: f32,
    /// Last averaged pH; `NaN` until measured.
    #[serde(skip, default = "nan")]
    pub ph: f32,
    pub last_temp_time: u64,
    pub last_ph_time: u64,
    pub last_feed_time: u64,
    pub last_feed_success: bool,
    pub next_feed_time: u64,

    /// Seconds between automatic readings/feeds; 0 disables.
    pub temp_interval_secs: u32,
    pub ph_interval_secs: u32,
    pub feed_interval_secs: u32,
    /// Seconds between cloud syncs without new data; 0 disables.
    pub publish_interval_secs: u32,

    pub temp_lower: f32,
    pub temp_upper: f32,
    pub ph_lower: f32,
    pub ph_upper: f32,

    pub display: DisplayPrefs,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayPrefs {
    pub contrast: u8,
    pub font_size: u8,
    pub line_height: u8,
    pub show_temperature: bool,
    pub show_ph: bool,
    pub show_last_feed: bool,
    pub show_next_feed: bool,
    /// Minutes without input before the panel sleeps; 0 = never.
    pub sleep_after_min: u8,
}

impl Default for DisplayPrefs {
    fn default() -> Self {
        Self {
            contrast: 128,
            font_size: 1,
            line_height: 10,
            show_temperature: true,
            show_ph: true,
            show_last_feed: true,
            show_next_feed: true,
            sleep_after_min: 1,
        }
    }
}

impl Default for AquariumState {
    fn default() -> Self {
        Self {
            temperature: f32::NAN,
            ph: f32::NAN,
            last_temp_time: 0,
            last_ph_time: 0,
            last_feed_time: 0,
            last_feed_success: false,
            next_feed_time: 0,
            temp_interval_secs: 1800,
            ph_interval_secs: 0,
            feed_interval_secs: 43_200,
            publish_interval_secs: 0,
            temp_lower: 22.0,
            temp_upper: 28.0,
            ph_lower: 6.5,
            ph_upper: 8.0,
            display: DisplayPrefs::default(),
        }
    }
}

impl AquariumState {
    pub fn temperature_in_range(&self, celsius: f32) -> bool {
        (self.temp_lower..=self.temp_upper).contains(&celsius)
    }

    pub fn ph_in_range(&self, ph: f32) -> bool {
        (self.ph_lower..=self.ph_upper).contains(&ph)
    }

    /// Next feed time derived from `last_feed_time` and the interval;
    /// 0 when automatic feeding is off or no feed has been recorded.
    pub fn compute_next_feed(&self) -> u64 {
        if self.feed_interval_secs == 0 || self.last_feed_time == 0 {
            0
        } else {
            self.last_feed_time + u64::from(self.feed_interval_secs)
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Store
// ───────────────────────────────────────────────────────────────

/// Mutex-guarded [`AquariumState`] plus its persistence.
pub struct AquariumStore {
    state: Mutex<AquariumState>,
    storage: Arc<dyn StoragePort>,
}

impl AquariumStore {
    /// Load the persisted state, falling back to defaults when missing or
    /// undecodable.
    pub fn load(storage: Arc<dyn StoragePort>) -> Self {
        let state = match storage.read_to_vec(STATE_NAMESPACE, STATE_KEY, MAX_STATE_BLOB) {
            Ok(bytes) => match postcard::from_bytes::<AquariumState>(&bytes) {
                Ok(s) => {
                    info!(
                        "AquariumStore: loaded (feed every {}s, next feed at {})",
                        s.feed_interval_secs, s.next_feed_time
                    );
                    s
                }
                Err(e) => {
                    warn!("AquariumStore: stored state undecodable ({e}), using defaults");
                    AquariumState::default()
                }
            },
            Err(StorageError::NotFound) => {
                info!("AquariumStore: no stored state, using defaults");
                AquariumState::default()
            }
            Err(e) => {
                warn!("AquariumStore: load failed ({e}), using defaults");
                AquariumState::default()
            }
        };
        Self {
            state: Mutex::new(state),
            storage,
        }
    }

    pub fn snapshot(&self) -> AquariumState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` under the lock.  With `persist` the resulting state is
    /// written before the lock is released so concurrent updates reach
    /// storage in order.  A failed write leaves the in-memory change in
    /// place and reports the error.
    pub fn update<R>(
        &self,
        persist: bool,
        f: impl FnOnce(&mut AquariumState) -> R,
    ) -> Result<R, StorageError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut state);
        if persist {
            let bytes = postcard::to_allocvec(&*state).map_err(|_| StorageError::IoError)?;
            self.storage.write(STATE_NAMESPACE, STATE_KEY, &bytes)?;
        }
        Ok(out)
    }
}
