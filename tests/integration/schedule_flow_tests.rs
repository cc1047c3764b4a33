//! Scheduler → measurement → publish-trigger flow on a simulated clock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use aquatest::app::commands::AppCommand;
use aquatest::app::events::{AppEvent, Quantity};
use aquatest::app::ports::Trigger;
use aquatest::events::EventFlags;
use aquatest::measurement::{MeasurementOutcome, MeasurementService};
use aquatest::scheduler::{FlagDelegate, ScheduleTask};

use crate::mock_hw::{Harness, NOW, ScriptedPh, ScriptedTemp, harness};

fn schedule(h: &Harness) -> ScheduleTask<FlagDelegate> {
    ScheduleTask::new(
        FlagDelegate::new(Arc::clone(&h.ctx.events)),
        Arc::clone(&h.ctx.store),
        Arc::clone(&h.ctx.events),
        h.clock.clone(),
    )
}

fn measurement(h: &Harness, temps: &[f32]) -> MeasurementService<ScriptedTemp, ScriptedPh> {
    MeasurementService::new(
        ScriptedTemp(temps.iter().copied().map(Ok).collect::<VecDeque<_>>()),
        ScriptedPh::new([7.0; 5]),
        h.ctx.clone(),
    )
}

#[test]
fn temperature_interval_drives_a_reading() {
    let h = harness();
    let mut task = schedule(&h);
    let interval = u64::from(h.ctx.store.snapshot().temp_interval_secs);

    h.clock.advance(interval - 1);
    task.step(Duration::ZERO);
    assert!(!h.ctx.events.get().contains(EventFlags::TEMP_SCHEDULED));

    h.clock.advance(1);
    task.step(Duration::ZERO);
    assert!(h.ctx.events.get().contains(EventFlags::TEMP_SCHEDULED));

    let mut m = measurement(&h, &[25.0, 25.5, 24.5, 25.0, 25.0]);
    let outcome = m.step(Some(Duration::ZERO));
    assert_eq!(outcome, Some(MeasurementOutcome::Temperature(Some(25.0))));

    let flags = h.ctx.events.get();
    assert!(flags.contains(EventFlags::TEMP_UPDATED));
    assert!(!flags.contains(EventFlags::TEMP_SCHEDULED));
    let state = h.ctx.store.snapshot();
    assert_eq!(state.temperature, 25.0);
    assert_eq!(state.last_temp_time, NOW);
}

#[test]
fn changed_interval_restarts_the_slot() {
    let h = harness();
    let mut task = schedule(&h);
    h.clock.advance(1000);
    task.step(Duration::ZERO);

    h.ctx
        .executor()
        .execute(AppCommand::SetTempInterval(60), "test")
        .unwrap();
    task.step(Duration::ZERO);
    assert_eq!(task.scheduler().interval(Trigger::Temperature), 60);
    assert_eq!(task.scheduler().remaining(Trigger::Temperature), Some(60));
    assert!(!h.ctx.events.get().contains(EventFlags::TEMP_INTERVAL_CHANGED));

    h.clock.advance(60);
    task.step(Duration::ZERO);
    assert!(h.ctx.events.get().contains(EventFlags::TEMP_SCHEDULED));
}

#[test]
fn feed_missed_while_off_fires_on_the_next_tick() {
    let h = harness();
    h.ctx
        .store
        .update(false, |s| {
            s.last_feed_time = NOW - 50_000;
            s.next_feed_time = NOW - 100;
        })
        .unwrap();
    let mut task = schedule(&h);
    assert_eq!(task.scheduler().remaining(Trigger::Feed), Some(0));

    h.clock.advance(1);
    task.step(Duration::ZERO);
    assert!(h.ctx.events.get().contains(EventFlags::FEED_SCHEDULED));
}

#[test]
fn upcoming_feed_is_honoured_after_reboot() {
    let h = harness();
    h.ctx
        .store
        .update(false, |s| {
            s.last_feed_time = NOW - 100;
            s.next_feed_time = NOW + 600;
        })
        .unwrap();
    let task = schedule(&h);
    assert_eq!(task.scheduler().remaining(Trigger::Feed), Some(600));
}

#[test]
fn out_of_range_reading_raises_an_alert() {
    let h = harness();
    let mut m = measurement(&h, &[31.0; 5]);
    assert_eq!(
        m.measure_temperature(),
        MeasurementOutcome::Temperature(Some(31.0))
    );

    assert!(h.ctx.events.get().contains(EventFlags::THRESHOLD_ALERT));
    assert_eq!(
        h.sink.count(|e| matches!(
            e,
            AppEvent::ThresholdBreached {
                quantity: Quantity::Temperature,
                ..
            }
        )),
        1
    );
}

#[test]
fn invalid_samples_are_excluded_from_the_average() {
    let h = harness();
    let mut m = measurement(&h, &[f32::NAN, 24.0, 150.0, 26.0, -40.0]);
    assert_eq!(
        m.measure_temperature(),
        MeasurementOutcome::Temperature(Some(25.0))
    );
    assert_eq!(
        h.sink.recorded().first(),
        Some(&AppEvent::TemperatureMeasured {
            celsius: 25.0,
            samples: 2
        })
    );
}

#[test]
fn all_invalid_samples_publish_nothing() {
    let h = harness();
    let mut m = measurement(&h, &[f32::NAN; 5]);
    h.ctx.events.set(EventFlags::TEMP_SCHEDULED);

    assert_eq!(m.step(Some(Duration::ZERO)), Some(MeasurementOutcome::Temperature(None)));
    let flags = h.ctx.events.get();
    assert!(!flags.contains(EventFlags::TEMP_UPDATED));
    assert!(!flags.contains(EventFlags::TEMP_SCHEDULED));
    assert_eq!(h.sink.recorded(), vec![AppEvent::TemperatureFailed]);
}

#[test]
fn unconfirmed_ph_request_is_cancelled() {
    let h = harness();
    let mut m = measurement(&h, &[]);
    h.ctx.events.set(EventFlags::PH_SCHEDULED);

    assert_eq!(m.step(Some(Duration::ZERO)), Some(MeasurementOutcome::PhCancelled));
    assert!(m.ph_probe().power_log.is_empty());
    assert!(!h.ctx.events.get().contains(EventFlags::PH_SCHEDULED));
    assert_eq!(h.sink.recorded(), vec![AppEvent::PhCancelled]);
}

#[test]
fn confirmed_ph_request_powers_the_probe_around_sampling() {
    let h = harness();
    let mut m = measurement(&h, &[]);
    h.ctx
        .events
        .set(EventFlags::PH_SCHEDULED | EventFlags::PH_CONFIRMED);

    assert_eq!(m.step(Some(Duration::ZERO)), Some(MeasurementOutcome::Ph(Some(7.0))));
    assert_eq!(m.ph_probe().power_log, vec![true, false]);
    let flags = h.ctx.events.get();
    assert!(flags.contains(EventFlags::PH_UPDATED));
    assert!(!flags.intersects(EventFlags::PH_SCHEDULED | EventFlags::PH_CONFIRMED));
}
