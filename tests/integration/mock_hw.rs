//! Mock adapters for integration tests.
//!
//! Every port the services depend on has a recording twin here, so tests
//! can assert on the full call history without GPIO, radios or flash.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aquatest::app::context::AppContext;
use aquatest::app::events::AppEvent;
use aquatest::app::ports::{
    BeamPort, ClockPort, EventSink, FeedDirection, FeederPort, PhProbe, StorageError, StoragePort,
    TemperatureProbe,
};
use aquatest::config::DeviceConfig;
use aquatest::error::{ActuatorError, SensorError};

/// Wall clock used by every test that needs a synced time.
pub const NOW: u64 = 1_700_000_000;

// ── Storage ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockStorage {
    entries: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub fail_writes: AtomicBool,
    pub writes: AtomicU32,
}

#[allow(dead_code)]
impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .get(&(namespace.to_owned(), key.to_owned()))
            .cloned()
    }
}

impl StoragePort for MockStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let entries = self.entries.lock().unwrap();
        let data = entries
            .get(&(namespace.to_owned(), key.to_owned()))
            .ok_or(StorageError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StorageError::IoError);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::IoError);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .unwrap()
            .insert((namespace.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap()
            .remove(&(namespace.to_owned(), key.to_owned()));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .contains_key(&(namespace.to_owned(), key.to_owned()))
    }
}

// ── Clock ─────────────────────────────────────────────────────

pub struct FixedClock {
    pub now: Option<u64>,
    pub uptime_ms: AtomicU64,
}

#[allow(dead_code)]
impl FixedClock {
    pub fn synced() -> Self {
        Self {
            now: Some(NOW),
            uptime_ms: AtomicU64::new(0),
        }
    }

    pub fn unsynced() -> Self {
        Self {
            now: None,
            uptime_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.uptime_ms.fetch_add(secs * 1000, Ordering::Relaxed);
    }
}

impl ClockPort for FixedClock {
    fn now_unix(&self) -> Option<u64> {
        self.now
    }

    fn uptime_ms(&self) -> u64 {
        self.uptime_ms.load(Ordering::Relaxed)
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<AppEvent>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AppEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ── Feeder and beam ───────────────────────────────────────────

/// Forward moves shared between the feeder and the beam, so the beam can
/// "see" food after the n-th portion.
#[derive(Default)]
pub struct Hopper {
    pub forward_moves: AtomicU32,
}

pub struct MockFeeder {
    pub hopper: Arc<Hopper>,
    pub calls: Vec<(FeedDirection, u32)>,
    pub releases: u32,
    pub jammed: bool,
}

#[allow(dead_code)]
impl MockFeeder {
    pub fn new(hopper: Arc<Hopper>) -> Self {
        Self {
            hopper,
            calls: Vec::new(),
            releases: 0,
            jammed: false,
        }
    }

    pub fn directions(&self) -> Vec<FeedDirection> {
        self.calls.iter().map(|(d, _)| *d).collect()
    }
}

impl FeederPort for MockFeeder {
    fn dispense(&mut self, direction: FeedDirection, steps: u32) -> Result<(), ActuatorError> {
        self.calls.push((direction, steps));
        if self.jammed {
            return Err(ActuatorError::GpioWriteFailed);
        }
        if direction == FeedDirection::Forward {
            self.hopper.forward_moves.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.releases += 1;
    }
}

/// Beam that breaks once `breaks_after` forward moves have happened.
pub struct MockBeam {
    hopper: Arc<Hopper>,
    breaks_after: Option<u32>,
    armed: AtomicBool,
    pub arms: AtomicU32,
    pub disarms: AtomicU32,
}

impl MockBeam {
    pub fn new(hopper: Arc<Hopper>, breaks_after: Option<u32>) -> Self {
        Self {
            hopper,
            breaks_after,
            armed: AtomicBool::new(false),
            arms: AtomicU32::new(0),
            disarms: AtomicU32::new(0),
        }
    }
}

impl BeamPort for MockBeam {
    fn arm(&self) {
        self.armed.store(true, Ordering::Release);
        self.arms.fetch_add(1, Ordering::Relaxed);
    }

    fn wait_for_break(&self, timeout: Duration) -> bool {
        let broken = self.armed.load(Ordering::Acquire)
            && self
                .breaks_after
                .is_some_and(|n| self.hopper.forward_moves.load(Ordering::Acquire) >= n);
        if !broken {
            std::thread::sleep(timeout);
        }
        broken
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
        self.disarms.fetch_add(1, Ordering::Relaxed);
    }
}

// ── Probes ────────────────────────────────────────────────────

pub struct ScriptedTemp(pub VecDeque<Result<f32, SensorError>>);

impl TemperatureProbe for ScriptedTemp {
    fn read_celsius(&mut self) -> Result<f32, SensorError> {
        self.0.pop_front().unwrap_or(Err(SensorError::NoPresence))
    }
}

pub struct ScriptedPh {
    pub readings: VecDeque<Result<f32, SensorError>>,
    pub power_log: Vec<bool>,
}

#[allow(dead_code)]
impl ScriptedPh {
    pub fn new(readings: impl IntoIterator<Item = f32>) -> Self {
        Self {
            readings: readings.into_iter().map(Ok).collect(),
            power_log: Vec::new(),
        }
    }
}

impl PhProbe for ScriptedPh {
    fn power(&mut self, on: bool) -> Result<(), ActuatorError> {
        self.power_log.push(on);
        Ok(())
    }

    fn read_ph(&mut self) -> Result<f32, SensorError> {
        self.readings.pop_front().unwrap_or(Err(SensorError::NoPresence))
    }
}

// ── Context ───────────────────────────────────────────────────

/// Configuration with every delay shortened for tests.
pub fn fast_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.feed.settle_ms = 5;
    config.feed.watcher_poll_ms = 1;
    config.measurement.sample_spacing_ms = 0;
    config.measurement.ph_warmup_ms = 0;
    config.measurement.ph_confirm_window_secs = 1;
    config.publish.connect_timeout_secs = 1;
    config.publish.drain_timeout_secs = 0;
    config
}

pub struct Harness {
    pub ctx: AppContext,
    pub storage: Arc<MockStorage>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<FixedClock>,
}

#[allow(dead_code)]
pub fn harness_with(clock: FixedClock, config: DeviceConfig) -> Harness {
    let storage = Arc::new(MockStorage::new());
    let sink = Arc::new(RecordingSink::new());
    let clock = Arc::new(clock);
    let ctx = AppContext::new(storage.clone(), clock.clone(), sink.clone(), config);
    Harness {
        ctx,
        storage,
        sink,
        clock,
    }
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(FixedClock::synced(), fast_config())
}
