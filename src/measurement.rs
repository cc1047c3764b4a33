//! Temperature and pH measurement service.
//!
//! A single task waits for `TEMP_SCHEDULED` or `PH_SCHEDULED`.
//!
//! ```text
//!  TEMP_SCHEDULED ─▶ N samples ─▶ drop NaN / implausible ─▶ average ─▶ store ─▶ TEMP_UPDATED
//!
//!  PH_SCHEDULED ─▶ wait PH_CONFIRMED ──timeout──▶ cancelled
//!                        │
//!                        ▼
//!                  power on ─▶ warm-up ─▶ N samples ─▶ power off ─▶ average ─▶ store ─▶ PH_UPDATED
//! ```
//!
//! Each path clears its own scheduling flag on every exit so a failing
//! probe cannot wedge the scheduler.  Averages outside the configured
//! alarm window raise `THRESHOLD_ALERT`.

use std::time::Duration;

use log::{info, warn};

use crate::app::context::AppContext;
use crate::app::events::{AppEvent, Quantity};
use crate::app::ports::{PhProbe, TemperatureProbe};
use crate::config::MeasurementPolicy;
use crate::events::EventFlags;

const SCHEDULED: EventFlags = EventFlags::TEMP_SCHEDULED.union(EventFlags::PH_SCHEDULED);

// ───────────────────────────────────────────────────────────────
// Averaging
// ───────────────────────────────────────────────────────────────

/// Mean of the plausible readings, `None` when none are left.
pub fn average_temperature(samples: &[f32], min_c: f32, max_c: f32) -> Option<f32> {
    mean(samples.iter().copied().filter(|c| (min_c..=max_c).contains(c)))
}

/// Mean of the non-NaN readings.  pH has no plausibility window.
pub fn average_ph(samples: &[f32]) -> Option<f32> {
    mean(samples.iter().copied().filter(|p| !p.is_nan()))
}

fn mean(values: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = values.fold((0.0f32, 0u32), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f32)
}

/// How a measurement pass ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeasurementOutcome {
    /// Averaged temperature, `None` when every sample was invalid.
    Temperature(Option<f32>),
    /// Averaged pH, `None` when every sample was invalid.
    Ph(Option<f32>),
    /// No confirmation arrived within the window.
    PhCancelled,
}

// ───────────────────────────────────────────────────────────────
// Service
// ───────────────────────────────────────────────────────────────

pub struct MeasurementService<T, P> {
    temp_probe: T,
    ph_probe: P,
    ctx: AppContext,
    policy: MeasurementPolicy,
}

impl<T: TemperatureProbe, P: PhProbe> MeasurementService<T, P> {
    pub fn new(temp_probe: T, ph_probe: P, ctx: AppContext) -> Self {
        let policy = ctx.config.measurement;
        Self {
            temp_probe,
            ph_probe,
            ctx,
            policy,
        }
    }

    pub fn ph_probe(&self) -> &P {
        &self.ph_probe
    }

    fn spacing(&self) -> Duration {
        Duration::from_millis(u64::from(self.policy.sample_spacing_ms))
    }

    /// Wait up to `timeout` (forever with `None`) for a scheduled
    /// measurement and run it.  A pending temperature reading goes first.
    pub fn step(&mut self, timeout: Option<Duration>) -> Option<MeasurementOutcome> {
        let observed = self.ctx.events.wait(SCHEDULED, false, false, timeout);
        if observed.contains(EventFlags::TEMP_SCHEDULED) {
            return Some(self.measure_temperature());
        }
        if observed.contains(EventFlags::PH_SCHEDULED) {
            return Some(self.measure_ph());
        }
        None
    }

    pub fn run(mut self) -> ! {
        info!(
            "Measurement: task started ({} samples, {} ms apart)",
            self.policy.samples, self.policy.sample_spacing_ms
        );
        loop {
            let _ = self.step(None);
        }
    }

    // ── Temperature ───────────────────────────────────────────

    pub fn measure_temperature(&mut self) -> MeasurementOutcome {
        let count = self.policy.samples;
        let mut samples = Vec::with_capacity(usize::from(count));
        for i in 0..count {
            match self.temp_probe.read_celsius() {
                Ok(c) if c.is_nan() => warn!("Measurement: temperature sample {} is NaN", i + 1),
                Ok(c) if !(self.policy.temp_min_c..=self.policy.temp_max_c).contains(&c) => {
                    warn!("Measurement: temperature sample {} implausible ({c:.2}C)", i + 1);
                }
                Ok(c) => samples.push(c),
                Err(e) => warn!("Measurement: temperature sample {} failed: {e}", i + 1),
            }
            if i + 1 < count {
                std::thread::sleep(self.spacing());
            }
        }

        let average =
            average_temperature(&samples, self.policy.temp_min_c, self.policy.temp_max_c);
        match average {
            Some(celsius) => {
                let now = self.ctx.clock.now_unix();
                let persisted = self.ctx.store.update(true, |s| {
                    s.temperature = celsius;
                    if let Some(ts) = now {
                        s.last_temp_time = ts;
                    }
                    (s.temperature_in_range(celsius), s.temp_lower, s.temp_upper)
                });
                let (in_range, lower, upper) = match persisted {
                    Ok(window) => window,
                    Err(e) => {
                        warn!("Measurement: temperature not persisted: {e}");
                        let s = self.ctx.store.snapshot();
                        (s.temperature_in_range(celsius), s.temp_lower, s.temp_upper)
                    }
                };
                info!(
                    "Measurement: temperature {celsius:.2}C ({} of {count} samples)",
                    samples.len()
                );
                self.ctx.sink.emit(&AppEvent::TemperatureMeasured {
                    celsius,
                    samples: samples.len() as u8,
                });
                if !in_range {
                    self.raise_alert(Quantity::Temperature, celsius, lower, upper);
                }
                self.ctx.events.set(EventFlags::TEMP_UPDATED);
            }
            None => {
                warn!("Measurement: no valid temperature sample");
                self.ctx.sink.emit(&AppEvent::TemperatureFailed);
            }
        }
        self.ctx.events.clear(EventFlags::TEMP_SCHEDULED);
        MeasurementOutcome::Temperature(average)
    }

    // ── pH ────────────────────────────────────────────────────

    pub fn measure_ph(&mut self) -> MeasurementOutcome {
        let window = Duration::from_secs(u64::from(self.policy.ph_confirm_window_secs));
        info!(
            "Measurement: pH requested, waiting {}s for confirmation",
            window.as_secs()
        );
        let confirmed = self
            .ctx
            .events
            .wait(EventFlags::PH_CONFIRMED, true, false, Some(window));
        if confirmed.is_empty() {
            info!("Measurement: pH not confirmed, cancelled");
            self.ctx.sink.emit(&AppEvent::PhCancelled);
            self.ctx
                .events
                .clear(EventFlags::PH_SCHEDULED | EventFlags::PH_CONFIRMED);
            return MeasurementOutcome::PhCancelled;
        }
        // Leave the confirmation screen while sampling.
        self.ctx.events.clear(EventFlags::PH_SCHEDULED);

        let samples = self.sample_ph();
        let average = average_ph(&samples);
        match average {
            Some(ph) => {
                let now = self.ctx.clock.now_unix();
                let persisted = self.ctx.store.update(true, |s| {
                    s.ph = ph;
                    if let Some(ts) = now {
                        s.last_ph_time = ts;
                    }
                    (s.ph_in_range(ph), s.ph_lower, s.ph_upper)
                });
                let (in_range, lower, upper) = match persisted {
                    Ok(window) => window,
                    Err(e) => {
                        warn!("Measurement: pH not persisted: {e}");
                        let s = self.ctx.store.snapshot();
                        (s.ph_in_range(ph), s.ph_lower, s.ph_upper)
                    }
                };
                info!("Measurement: pH {ph:.2} ({} samples)", samples.len());
                self.ctx.sink.emit(&AppEvent::PhMeasured {
                    ph,
                    samples: samples.iter().filter(|p| !p.is_nan()).count() as u8,
                });
                if !in_range {
                    self.raise_alert(Quantity::Ph, ph, lower, upper);
                }
                self.ctx.events.set(EventFlags::PH_UPDATED);
            }
            None => {
                warn!("Measurement: no valid pH sample");
                self.ctx.sink.emit(&AppEvent::PhFailed);
            }
        }
        self.ctx
            .events
            .clear(EventFlags::PH_SCHEDULED | EventFlags::PH_CONFIRMED);
        MeasurementOutcome::Ph(average)
    }

    /// Power the probe, let it settle, sample, and always power it down.
    fn sample_ph(&mut self) -> Vec<f32> {
        let count = self.policy.samples;
        let mut samples = Vec::with_capacity(usize::from(count));
        if let Err(e) = self.ph_probe.power(true) {
            warn!("Measurement: pH probe power-on failed: {e}");
            return samples;
        }
        std::thread::sleep(Duration::from_millis(u64::from(self.policy.ph_warmup_ms)));
        for i in 0..count {
            match self.ph_probe.read_ph() {
                Ok(ph) => samples.push(ph),
                Err(e) => warn!("Measurement: pH sample {} failed: {e}", i + 1),
            }
            if i + 1 < count {
                std::thread::sleep(self.spacing());
            }
        }
        if let Err(e) = self.ph_probe.power(false) {
            warn!("Measurement: pH probe power-off failed: {e}");
        }
        samples
    }

    fn raise_alert(&self, quantity: Quantity, value: f32, lower: f32, upper: f32) {
        warn!("Measurement: {quantity:?} {value:.2} outside {lower:.2}..{upper:.2}");
        self.ctx.events.set(EventFlags::THRESHOLD_ALERT);
        self.ctx.sink.emit(&AppEvent::ThresholdBreached {
            quantity,
            value,
            lower,
            upper,
        });
    }
}
