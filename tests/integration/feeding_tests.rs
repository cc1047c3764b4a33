//! Feeding controller against a mock feeder and beam sensor.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aquatest::app::events::AppEvent;
use aquatest::app::ports::{BeamPort, FeedDirection};
use aquatest::events::EventFlags;
use aquatest::fsm::feeding::{FeedState, FeedingController};

use crate::mock_hw::{FixedClock, Harness, Hopper, MockBeam, MockFeeder, NOW, fast_config, harness_with};

struct Rig {
    h: Harness,
    beam: Arc<MockBeam>,
    controller: FeedingController<MockFeeder>,
}

fn rig(clock: FixedClock, breaks_after: Option<u32>, max_attempts: u8) -> Rig {
    let mut config = fast_config();
    config.feed.max_attempts = max_attempts;
    // Long enough for the watcher to observe a break before the check.
    config.feed.settle_ms = 30;
    let h = harness_with(clock, config);
    let hopper = Arc::new(Hopper::default());
    let beam = Arc::new(MockBeam::new(Arc::clone(&hopper), breaks_after));
    let controller = FeedingController::new(
        MockFeeder::new(hopper),
        Arc::clone(&beam) as Arc<dyn BeamPort>,
        h.ctx.clone(),
    );
    Rig {
        h,
        beam,
        controller,
    }
}

#[test]
fn silent_beam_exhausts_after_max_attempts() {
    let mut r = rig(FixedClock::synced(), None, 5);
    let report = r.controller.run_cycle();

    assert_eq!(report.outcome, FeedState::Exhausted { attempts: 5 });
    assert_eq!(report.attempts.len(), 5);
    assert!(!report.success());
    assert!(report.attempts.iter().all(|a| !a.beam_broken));

    let state = r.h.ctx.store.snapshot();
    assert!(!state.last_feed_success);
    assert!(r.h.ctx.events.get().contains(EventFlags::FEED_UPDATED));
    assert_eq!(
        r.h.sink
            .count(|e| matches!(e, AppEvent::FeedCompleted { .. })),
        1
    );
    assert_eq!(
        r.h.sink.recorded().last(),
        Some(&AppEvent::FeedCompleted {
            success: false,
            attempts: 5
        })
    );
}

#[test]
fn each_cycle_notifies_feed_watchers_once() {
    let mut r = rig(FixedClock::synced(), Some(1), 3);
    let watcher = r
        .h
        .ctx
        .events
        .subscribe("feed-watch", EventFlags::FEED_UPDATED)
        .unwrap();
    assert!(!watcher.wait(Duration::ZERO));

    for cycle in 1..=2 {
        r.h.ctx.events.clear(EventFlags::FEED_UPDATED);
        assert!(watcher.wait(Duration::ZERO), "clear wakes the watcher");

        r.controller.run_cycle();
        assert!(watcher.wait(Duration::ZERO), "cycle {cycle} raised FEED_UPDATED");
        assert!(!watcher.wait(Duration::ZERO), "cycle {cycle} raised it again");
        assert!(r.h.ctx.events.get().contains(EventFlags::FEED_UPDATED));
    }
    assert_eq!(
        r.h.sink
            .count(|e| matches!(e, AppEvent::FeedCompleted { .. })),
        2
    );
}

#[test]
fn retries_reverse_before_dispensing_again() {
    let mut r = rig(FixedClock::synced(), None, 3);
    r.controller.run_cycle();

    use FeedDirection::{Forward, Reverse};
    assert_eq!(
        r.controller.feeder().directions(),
        vec![Forward, Reverse, Forward, Reverse, Forward]
    );
    assert_eq!(r.controller.feeder().releases, 1);
    assert_eq!(r.beam.arms.load(Ordering::Relaxed), 1);
    assert_eq!(r.beam.disarms.load(Ordering::Relaxed), 1);
}

#[test]
fn break_on_second_portion_confirms_and_reschedules() {
    let mut r = rig(FixedClock::synced(), Some(2), 5);
    let report = r.controller.run_cycle();

    assert_eq!(report.outcome, FeedState::Confirmed { attempts: 2 });
    assert_eq!(report.fed_at, Some(NOW));
    assert!(report.attempts[1].reversed);
    assert!(report.attempts[1].beam_broken);

    let state = r.h.ctx.store.snapshot();
    assert!(state.last_feed_success);
    assert_eq!(state.last_feed_time, NOW);
    assert_eq!(
        state.next_feed_time,
        NOW + u64::from(state.feed_interval_secs)
    );
}

#[test]
fn unsynced_clock_records_outcome_but_not_time() {
    let mut r = rig(FixedClock::unsynced(), Some(1), 5);
    let report = r.controller.run_cycle();

    assert!(report.success());
    assert_eq!(report.fed_at, None);
    let state = r.h.ctx.store.snapshot();
    assert!(state.last_feed_success);
    assert_eq!(state.last_feed_time, 0);
}

#[test]
fn jammed_motor_still_runs_every_attempt() {
    let r = rig(FixedClock::synced(), Some(1), 2);
    let mut jammed = MockFeeder::new(Arc::new(Hopper::default()));
    jammed.jammed = true;
    let mut controller = FeedingController::new(
        jammed,
        Arc::clone(&r.beam) as Arc<dyn BeamPort>,
        r.h.ctx.clone(),
    );
    let report = controller.run_cycle();

    assert_eq!(report.outcome, FeedState::Exhausted { attempts: 2 });
    assert!(report.attempts.iter().all(|a| a.error.is_some()));
    assert_eq!(controller.feeder().releases, 1);
}

#[test]
fn step_consumes_the_schedule_flag() {
    let mut r = rig(FixedClock::synced(), Some(1), 5);
    assert!(r.controller.step(Some(Duration::ZERO)).is_none());

    r.h.ctx.events.set(EventFlags::FEED_SCHEDULED);
    let report = r.controller.step(Some(Duration::ZERO)).unwrap();
    assert!(report.success());
    assert!(!r.h.ctx.events.get().contains(EventFlags::FEED_SCHEDULED));
}

#[test]
fn failed_persistence_still_signals_completion() {
    let mut r = rig(FixedClock::synced(), Some(1), 5);
    r.h.storage.fail_writes.store(true, Ordering::Relaxed);
    let report = r.controller.run_cycle();

    assert!(report.success());
    assert!(r.h.ctx.events.get().contains(EventFlags::FEED_UPDATED));
}
