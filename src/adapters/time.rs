//! System clock adapter.
//!
//! - **`target_os = "espidf"`**: wall clock from `gettimeofday()` (set by
//!   SNTP once WiFi is up) and monotonic uptime from `esp_timer_get_time()`.
//! - **`not(target_os = "espidf")`**: `SystemTime` / `Instant` for host
//!   tests and simulation.
//!
//! Wall-clock values below 2020-01-01 mean the clock was never set and are
//! reported as `None`.

use crate::app::ports::ClockPort;

/// Plausibility floor for wall-clock time (2020-01-01T00:00:00Z).
pub const EPOCH_2020: u64 = 1_577_836_800;

pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

/// `Some(secs)` only when `secs` is plausibly synchronised.
pub fn plausible(secs: u64) -> Option<u64> {
    (secs >= EPOCH_2020).then_some(secs)
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.now_unix().is_some()
    }
}

impl ClockPort for SystemClock {
    #[cfg(target_os = "espidf")]
    fn now_unix(&self) -> Option<u64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: tv is a valid out-pointer; the timezone argument may be null.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        u64::try_from(tv.tv_sec).ok().and_then(plausible)
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_unix(&self) -> Option<u64> {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .and_then(|d| plausible(d.as_secs()))
    }

    #[cfg(target_os = "espidf")]
    fn uptime_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1000
    }

    #[cfg(not(target_os = "espidf"))]
    fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
