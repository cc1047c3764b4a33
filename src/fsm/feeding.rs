//! Feeding cycle with break-beam confirmation.
//!
//! ```text
//!            Trigger
//!   Idle ───────────────▶ Dispensing(1)
//!                              │
//!              ┌── BeamBroken ─┴─ NoBreak ──┐
//!              ▼                            ▼
//!          Confirmed              attempt < max ? Retrying(n+1) : Exhausted
//!                                           │
//!                                  Trigger  ▼
//!                                     Dispensing(n+1)
//! ```
//!
//! The transition function is pure; [`FeedingController`] drives it with a
//! feeder and a beam watcher thread that runs for the whole cycle.  Every
//! attempt after the first pulses the dispenser backwards before the
//! forward portion to clear a jam.  A started pulse always runs to
//! completion.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{info, warn};

use crate::app::context::AppContext;
use crate::app::events::AppEvent;
use crate::app::ports::{BeamPort, FeedDirection, FeederPort};
use crate::config::FeedPolicy;
use crate::error::ActuatorError;
use crate::events::EventFlags;

// ───────────────────────────────────────────────────────────────
// State machine
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    /// Actuating attempt `attempt` (1-based).
    Dispensing { attempt: u8 },
    /// The previous attempt saw no break; `attempt` runs next.
    Retrying { attempt: u8 },
    Confirmed { attempts: u8 },
    Exhausted { attempts: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedInput {
    /// Start (or resume) actuation.
    Trigger,
    /// The watcher observed a break during the attempt.
    BeamBroken,
    /// The settle delay elapsed without a break.
    NoBreak,
}

impl FeedState {
    pub fn next(self, input: FeedInput, max_attempts: u8) -> Self {
        let max_attempts = max_attempts.max(1);
        match (self, input) {
            (Self::Idle, FeedInput::Trigger) => Self::Dispensing { attempt: 1 },
            (Self::Retrying { attempt }, FeedInput::Trigger) => Self::Dispensing { attempt },
            (Self::Dispensing { attempt }, FeedInput::BeamBroken) => {
                Self::Confirmed { attempts: attempt }
            }
            (Self::Dispensing { attempt }, FeedInput::NoBreak) if attempt >= max_attempts => {
                Self::Exhausted { attempts: attempt }
            }
            (Self::Dispensing { attempt }, FeedInput::NoBreak) => Self::Retrying {
                attempt: attempt + 1,
            },
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Exhausted { .. })
    }
}

/// One actuation attempt, kept for the cycle log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedAttemptRecord {
    pub attempt: u8,
    /// A reverse pulse preceded the portion.
    pub reversed: bool,
    pub beam_broken: bool,
    pub error: Option<ActuatorError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedCycleReport {
    /// `Confirmed` or `Exhausted`.
    pub outcome: FeedState,
    pub attempts: Vec<FeedAttemptRecord>,
    /// Wall-clock time recorded for the feed, `None` while unsynced.
    pub fed_at: Option<u64>,
}

impl FeedCycleReport {
    pub fn success(&self) -> bool {
        matches!(self.outcome, FeedState::Confirmed { .. })
    }
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

pub struct FeedingController<F> {
    feeder: F,
    beam: Arc<dyn BeamPort>,
    ctx: AppContext,
    policy: FeedPolicy,
}

impl<F: FeederPort> FeedingController<F> {
    pub fn new(feeder: F, beam: Arc<dyn BeamPort>, ctx: AppContext) -> Self {
        let policy = ctx.config.feed;
        Self {
            feeder,
            beam,
            ctx,
            policy,
        }
    }

    pub fn feeder(&self) -> &F {
        &self.feeder
    }

    /// Wait up to `timeout` for `FEED_SCHEDULED` (consumed on entry, so at
    /// most one cycle is in flight) and run a cycle.
    pub fn step(&mut self, timeout: Option<Duration>) -> Option<FeedCycleReport> {
        let observed = self
            .ctx
            .events
            .wait(EventFlags::FEED_SCHEDULED, true, false, timeout);
        if observed.is_empty() {
            return None;
        }
        Some(self.run_cycle())
    }

    pub fn run(mut self) -> ! {
        info!(
            "Feeding: task started (max {} attempts, {} steps/portion)",
            self.policy.max_attempts, self.policy.steps_per_portion
        );
        loop {
            let _ = self.step(None);
        }
    }

    pub fn run_cycle(&mut self) -> FeedCycleReport {
        let max = self.policy.max_attempts;
        let settle = Duration::from_millis(u64::from(self.policy.settle_ms));
        let poll = Duration::from_millis(u64::from(self.policy.watcher_poll_ms.max(1)));
        let steps = self.policy.steps_per_portion;
        info!("Feeding: cycle started");

        let beam = Arc::clone(&self.beam);
        beam.arm();
        let stop = AtomicBool::new(false);
        let mut attempts = Vec::with_capacity(usize::from(max));
        let feeder = &mut self.feeder;

        let outcome = std::thread::scope(|s| {
            let watcher = s.spawn(|| {
                while !stop.load(Ordering::Acquire) {
                    if beam.wait_for_break(poll) {
                        return;
                    }
                }
            });

            let mut state = FeedState::Idle.next(FeedInput::Trigger, max);
            while !state.is_terminal() {
                let FeedState::Dispensing { attempt } = state else {
                    state = state.next(FeedInput::Trigger, max);
                    continue;
                };
                info!("Feeding: attempt {attempt}/{max}");
                let reversed = attempt > 1;
                let error = actuate(feeder, reversed, steps).err();
                if let Some(e) = error {
                    warn!("Feeding: attempt {attempt} actuation failed: {e}");
                }
                std::thread::sleep(settle);

                let beam_broken = watcher.is_finished();
                attempts.push(FeedAttemptRecord {
                    attempt,
                    reversed,
                    beam_broken,
                    error,
                });
                let input = if beam_broken {
                    FeedInput::BeamBroken
                } else {
                    FeedInput::NoBreak
                };
                state = state.next(input, max);
            }
            // The watcher exits within one poll period.
            stop.store(true, Ordering::Release);
            state
        });

        beam.disarm();
        self.feeder.release();
        self.record(outcome, attempts)
    }

    fn record(&self, outcome: FeedState, attempts: Vec<FeedAttemptRecord>) -> FeedCycleReport {
        let success = matches!(outcome, FeedState::Confirmed { .. });
        let count = attempts.len() as u8;
        let fed_at = self.ctx.clock.now_unix();

        let result = self.ctx.store.update(true, |s| {
            s.last_feed_success = success;
            if let Some(ts) = fed_at {
                s.last_feed_time = ts;
                s.next_feed_time = s.compute_next_feed();
            }
        });
        if let Err(e) = result {
            warn!("Feeding: outcome not persisted: {e}");
        }
        if fed_at.is_none() {
            warn!("Feeding: clock not synchronised, feed time not recorded");
        }

        if success {
            info!("Feeding: confirmed after {count} attempt(s)");
        } else {
            warn!("Feeding: exhausted after {count} attempt(s), no beam break");
        }
        self.ctx.sink.emit(&AppEvent::FeedCompleted {
            success,
            attempts: count,
        });
        self.ctx.events.set(EventFlags::FEED_UPDATED);

        FeedCycleReport {
            outcome,
            attempts,
            fed_at,
        }
    }
}

fn actuate<F: FeederPort>(feeder: &mut F, reverse_first: bool, steps: u32) -> Result<(), ActuatorError> {
    if reverse_first {
        feeder.dispense(FeedDirection::Reverse, steps)?;
    }
    feeder.dispense(FeedDirection::Forward, steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_break_confirms() {
        let s = FeedState::Idle.next(FeedInput::Trigger, 5);
        assert_eq!(s, FeedState::Dispensing { attempt: 1 });
        assert_eq!(
            s.next(FeedInput::BeamBroken, 5),
            FeedState::Confirmed { attempts: 1 }
        );
    }

    #[test]
    fn retries_until_exhausted() {
        let mut s = FeedState::Idle;
        let mut dispensed = 0;
        while !s.is_terminal() {
            s = match s {
                FeedState::Dispensing { .. } => {
                    dispensed += 1;
                    s.next(FeedInput::NoBreak, 5)
                }
                _ => s.next(FeedInput::Trigger, 5),
            };
        }
        assert_eq!(s, FeedState::Exhausted { attempts: 5 });
        assert_eq!(dispensed, 5);
    }

    #[test]
    fn terminal_states_absorb_inputs() {
        let done = FeedState::Confirmed { attempts: 2 };
        assert_eq!(done.next(FeedInput::Trigger, 5), done);
        assert_eq!(FeedState::Idle.next(FeedInput::NoBreak, 5), FeedState::Idle);
    }

    #[test]
    fn zero_max_still_makes_one_attempt() {
        let s = FeedState::Dispensing { attempt: 1 }.next(FeedInput::NoBreak, 0);
        assert_eq!(s, FeedState::Exhausted { attempts: 1 });
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn attempts_never_exceed_max(
            max in 1u8..=8,
            breaks in proptest::collection::vec(any::<bool>(), 1..20),
        ) {
            let mut s = FeedState::Idle.next(FeedInput::Trigger, max);
            let mut dispensed = 0u8;
            for broken in breaks {
                if let FeedState::Dispensing { attempt } = s {
                    dispensed += 1;
                    prop_assert_eq!(attempt, dispensed);
                    s = s.next(if broken { FeedInput::BeamBroken } else { FeedInput::NoBreak }, max);
                } else if !s.is_terminal() {
                    s = s.next(FeedInput::Trigger, max);
                }
            }
            prop_assert!(dispensed <= max);
            if let FeedState::Exhausted { attempts } = s {
                prop_assert_eq!(attempts, max);
            }
        }
    }
}
