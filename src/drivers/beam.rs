//! IR break-beam sensor below the feeder chute.
//!
//! The receiver output is LOW while the beam is interrupted.  The GPIO ISR
//! (any edge) feeds the level into a [`BeamLatch`]; while armed, the first
//! LOW level latches a break.  [`BeamSensor`] exposes the latch as a
//! [`BeamPort`] for the feeding controller's watcher thread.

use core::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::debug;

use crate::app::ports::BeamPort;

/// Lock-free break latch shared between the ISR and the watcher.
pub struct BeamLatch {
    armed: AtomicBool,
    broken: AtomicBool,
}

impl BeamLatch {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    /// Feed one receiver level (`false` = LOW = beam broken).
    /// Safe to call from interrupt context.
    pub fn on_level(&self, level: bool) {
        if !level && self.armed.load(Ordering::Acquire) {
            self.broken.store(true, Ordering::Release);
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

impl Default for BeamLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Latch fed by the beam GPIO ISR.
pub static BEAM_LATCH: BeamLatch = BeamLatch::new();

/// ISR handler: register on the beam GPIO, any edge.
pub fn beam_isr_handler(level: bool) {
    BEAM_LATCH.on_level(level);
}

pub struct BeamSensor {
    latch: &'static BeamLatch,
    poll: Duration,
}

impl BeamSensor {
    /// Sensor over [`BEAM_LATCH`], re-checking the latch every `poll`.
    pub fn new(poll: Duration) -> Self {
        Self::with_latch(&BEAM_LATCH, poll)
    }

    pub fn with_latch(latch: &'static BeamLatch, poll: Duration) -> Self {
        Self { latch, poll }
    }
}

impl BeamPort for BeamSensor {
    fn arm(&self) {
        self.latch.broken.store(false, Ordering::Release);
        self.latch.armed.store(true, Ordering::Release);
        debug!("Beam: armed");
    }

    fn wait_for_break(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.latch.is_broken() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(self.poll.min(deadline - now));
        }
    }

    fn disarm(&self) {
        self.latch.armed.store(false, Ordering::Release);
        debug!("Beam: disarmed (broken={})", self.latch.is_broken());
    }
}
