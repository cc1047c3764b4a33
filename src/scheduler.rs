//! Timer/scheduler engine.
//!
//! One slot per [`Trigger`] with a runtime-adjustable interval.  The
//! scheduler notifies a [`SchedulerDelegate`] when a slot fires; the
//! production delegate raises the matching `*_SCHEDULED` flag.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ScheduleTask                          │
//! │                                                              │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌──────────┐   │
//! │  │Temperature│  │    Ph     │  │   Feed    │  │   Sync   │   │
//! │  │ interval  │  │ interval  │  │ interval  │  │ interval │   │
//! │  └─────┬─────┘  └─────┬─────┘  └─────┬─────┘  └─────┬────┘   │
//! │        ▼              ▼              ▼              ▼        │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │              SchedulerDelegate (FlagDelegate)          │  │
//! │  └───────────────────────┬────────────────────────────────┘  │
//! │                          ▼                                   │
//! │   TEMP_SCHEDULED  PH_SCHEDULED  FEED_SCHEDULED  SYNC_SCHEDULED│
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! An interval of 0 disables a slot.  `defer` seeds the first fire of a
//! slot independently of its interval; the feed slot uses it to honour the
//! persisted `next_feed_time` across restarts.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::app::ports::{ClockPort, SchedulerDelegate, Trigger};
use crate::app::state::{AquariumState, AquariumStore};
use crate::events::{EventCoordinator, EventFlags};

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

/// Maximum number of schedules, one per trigger.
const MAX_SCHEDULES: usize = Trigger::ALL.len();

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    interval_secs: u32,
    elapsed_secs: u64,
    /// Elapsed time at which the next fire is due instead of the interval.
    first_due_secs: Option<u64>,
}

/// The scheduler engine.
///
/// Decoupled from the event system: when a slot fires it invokes the
/// [`SchedulerDelegate`] rather than touching flags, so it is testable
/// with a recording delegate.
pub struct Scheduler {
    slots: [Slot; MAX_SCHEDULES],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            slots: [Slot::default(); MAX_SCHEDULES],
        }
    }

    fn slot(&self, trigger: Trigger) -> &Slot {
        &self.slots[Self::index(trigger)]
    }

    fn slot_mut(&mut self, trigger: Trigger) -> &mut Slot {
        &mut self.slots[Self::index(trigger)]
    }

    fn index(trigger: Trigger) -> usize {
        match trigger {
            Trigger::Temperature => 0,
            Trigger::Ph => 1,
            Trigger::Feed => 2,
            Trigger::Sync => 3,
        }
    }

    /// Change the period of `trigger`.  A changed interval restarts the
    /// slot; 0 disables it.
    pub fn set_interval(&mut self, trigger: Trigger, secs: u32) {
        let slot = self.slot_mut(trigger);
        if slot.interval_secs == secs {
            return;
        }
        *slot = Slot {
            interval_secs: secs,
            ..Slot::default()
        };
        if secs == 0 {
            info!("Scheduler: '{}' disabled", trigger.label());
        } else {
            info!("Scheduler: '{}' every {}s", trigger.label(), secs);
        }
    }

    pub fn interval(&self, trigger: Trigger) -> u32 {
        self.slot(trigger).interval_secs
    }

    /// Make the next fire of `trigger` happen `secs` from now.  Later
    /// fires follow the interval again.
    pub fn defer(&mut self, trigger: Trigger, secs: u64) {
        let slot = self.slot_mut(trigger);
        slot.first_due_secs = Some(slot.elapsed_secs + secs);
        debug!("Scheduler: '{}' next fire in {}s", trigger.label(), secs);
    }

    /// Seconds until `trigger` fires, `None` when disabled.
    pub fn remaining(&self, trigger: Trigger) -> Option<u64> {
        let slot = self.slot(trigger);
        if slot.interval_secs == 0 {
            return None;
        }
        let due = slot
            .first_due_secs
            .unwrap_or(u64::from(slot.interval_secs));
        Some(due.saturating_sub(slot.elapsed_secs))
    }

    /// Advance every slot by `elapsed_secs` and fire the due ones.
    pub fn tick(&mut self, elapsed_secs: u32, delegate: &mut dyn SchedulerDelegate) {
        if elapsed_secs == 0 {
            return;
        }
        for trigger in Trigger::ALL {
            let slot = self.slot_mut(trigger);
            if slot.interval_secs == 0 {
                continue;
            }
            slot.elapsed_secs += u64::from(elapsed_secs);
            let due = slot
                .first_due_secs
                .unwrap_or(u64::from(slot.interval_secs));
            if slot.elapsed_secs >= due {
                slot.elapsed_secs = 0;
                slot.first_due_secs = None;
                info!("Scheduler: '{}' fired", trigger.label());
                delegate.on_schedule_fired(trigger);
            }
        }
    }

    /// Number of enabled slots.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.interval_secs > 0).count()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Delegate
// ═══════════════════════════════════════════════════════════════

/// Production delegate: each trigger raises its scheduling flag.
pub struct FlagDelegate {
    events: Arc<EventCoordinator>,
}

impl FlagDelegate {
    pub fn new(events: Arc<EventCoordinator>) -> Self {
        Self { events }
    }

    pub fn flag_for(trigger: Trigger) -> EventFlags {
        match trigger {
            Trigger::Temperature => EventFlags::TEMP_SCHEDULED,
            Trigger::Ph => EventFlags::PH_SCHEDULED,
            Trigger::Feed => EventFlags::FEED_SCHEDULED,
            Trigger::Sync => EventFlags::SYNC_SCHEDULED,
        }
    }
}

impl SchedulerDelegate for FlagDelegate {
    fn on_schedule_fired(&mut self, trigger: Trigger) {
        self.events.set(Self::flag_for(trigger));
    }
}

// ═══════════════════════════════════════════════════════════════
//  Task
// ═══════════════════════════════════════════════════════════════

const TICK: Duration = Duration::from_secs(1);

fn interval_of(state: &AquariumState, trigger: Trigger) -> u32 {
    match trigger {
        Trigger::Temperature => state.temp_interval_secs,
        Trigger::Ph => state.ph_interval_secs,
        Trigger::Feed => state.feed_interval_secs,
        Trigger::Sync => state.publish_interval_secs,
    }
}

fn changed_flag(trigger: Trigger) -> EventFlags {
    match trigger {
        Trigger::Temperature => EventFlags::TEMP_INTERVAL_CHANGED,
        Trigger::Ph => EventFlags::PH_INTERVAL_CHANGED,
        Trigger::Feed => EventFlags::FEED_INTERVAL_CHANGED,
        Trigger::Sync => EventFlags::PUBLISH_INTERVAL_CHANGED,
    }
}

/// Drives a [`Scheduler`] from the aquarium settings, once per second.
pub struct ScheduleTask<G: SchedulerDelegate> {
    scheduler: Scheduler,
    delegate: G,
    store: Arc<AquariumStore>,
    events: Arc<EventCoordinator>,
    clock: Arc<dyn ClockPort>,
    last_ms: u64,
    carry_ms: u64,
    /// The feed slot still waits for a synchronised clock to honour the
    /// persisted next feed time.
    feed_unseeded: bool,
}

impl<G: SchedulerDelegate> ScheduleTask<G> {
    pub fn new(
        delegate: G,
        store: Arc<AquariumStore>,
        events: Arc<EventCoordinator>,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let mut scheduler = Scheduler::new();
        let state = store.snapshot();
        for trigger in Trigger::ALL {
            scheduler.set_interval(trigger, interval_of(&state, trigger));
        }
        let last_ms = clock.uptime_ms();
        let mut task = Self {
            scheduler,
            delegate,
            store,
            events,
            clock,
            last_ms,
            carry_ms: 0,
            feed_unseeded: true,
        };
        task.seed_feed(&state);
        task
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Align the feed slot with `next_feed_time` once wall-clock time is
    /// known.  A feed missed while powered off fires on the next tick.
    fn seed_feed(&mut self, state: &AquariumState) {
        if state.feed_interval_secs == 0 || state.next_feed_time == 0 {
            self.feed_unseeded = false;
            return;
        }
        let Some(now) = self.clock.now_unix() else {
            return;
        };
        let remaining = state.next_feed_time.saturating_sub(now);
        self.scheduler.defer(Trigger::Feed, remaining);
        self.feed_unseeded = false;
        info!("Scheduler: next feed in {remaining}s");
    }

    fn reload(&mut self, changed: EventFlags) {
        let state = self.store.snapshot();
        for trigger in Trigger::ALL {
            if changed.contains(changed_flag(trigger)) {
                self.scheduler
                    .set_interval(trigger, interval_of(&state, trigger));
            }
        }
        if changed.contains(EventFlags::FEED_INTERVAL_CHANGED) {
            self.feed_unseeded = true;
            self.seed_feed(&state);
        }
    }

    /// One pass: pick up interval changes (waiting at most `wait`), then
    /// advance the scheduler by the whole seconds elapsed.
    pub fn step(&mut self, wait: Duration) {
        let changed = self
            .events
            .wait(EventFlags::INTERVALS_CHANGED, true, false, Some(wait));
        if !changed.is_empty() {
            self.reload(changed);
        }
        if self.feed_unseeded {
            let state = self.store.snapshot();
            self.seed_feed(&state);
        }

        let now = self.clock.uptime_ms();
        self.carry_ms += now.saturating_sub(self.last_ms);
        self.last_ms = now;
        let secs = self.carry_ms / 1000;
        self.carry_ms %= 1000;
        if secs > 0 {
            self.scheduler
                .tick(u32::try_from(secs).unwrap_or(u32::MAX), &mut self.delegate);
        }
    }

    /// Task body; never returns.
    pub fn run(mut self) -> ! {
        info!(
            "Scheduler: task started ({} active schedules)",
            self.scheduler.active_count()
        );
        loop {
            self.step(TICK);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
