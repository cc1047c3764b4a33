//! Cross-thread behaviour of the event coordinator.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aquatest::events::{EventCoordinator, EventFlags};

#[test]
fn wait_timeout_reports_empty_and_clears_nothing() {
    let events = EventCoordinator::new();
    let present = EventFlags::TEMP_UPDATED | EventFlags::FEED_SCHEDULED;
    events.set(present);

    let timeout = Duration::from_millis(50);
    let started = Instant::now();
    let observed = events.wait(EventFlags::WIFI_UP, true, false, Some(timeout));

    assert!(observed.is_empty());
    assert!(started.elapsed() >= timeout);
    assert_eq!(events.get(), present);
}

#[test]
fn require_all_waits_for_the_full_mask() {
    let events = Arc::new(EventCoordinator::new());
    let mask = EventFlags::WIFI_UP | EventFlags::MQTT_UP;
    events.set(EventFlags::WIFI_UP);

    let setter = {
        let events = Arc::clone(&events);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            events.set(EventFlags::MQTT_UP);
        })
    };
    let observed = events.wait(mask, false, true, Some(Duration::from_secs(5)));
    setter.join().unwrap();

    assert_eq!(observed, mask);
    assert!(events.get().contains(mask));
}

#[test]
fn clear_on_exit_hands_a_flag_to_exactly_one_waiter() {
    let events = Arc::new(EventCoordinator::new());
    let waiters: Vec<_> = (0..2)
        .map(|_| {
            let events = Arc::clone(&events);
            thread::spawn(move || {
                events.wait(
                    EventFlags::FEED_SCHEDULED,
                    true,
                    false,
                    Some(Duration::from_millis(300)),
                )
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    events.set(EventFlags::FEED_SCHEDULED);

    let winners = waiters
        .into_iter()
        .map(|w| w.join().unwrap())
        .filter(|observed| !observed.is_empty())
        .count();
    assert_eq!(winners, 1);
    assert!(!events.get().contains(EventFlags::FEED_SCHEDULED));
}

#[test]
fn subscribers_are_notified_only_for_their_mask() {
    let events = EventCoordinator::new();
    let display = events
        .subscribe("display", EventFlags::TEMP_UPDATED | EventFlags::PH_UPDATED)
        .unwrap();
    let publish = events.subscribe("publish", EventFlags::FEED_UPDATED).unwrap();

    events.set(EventFlags::PH_UPDATED);

    assert!(display.wait(Duration::ZERO));
    assert!(!publish.wait(Duration::ZERO));
    // Notifications collapse: one pending at most.
    events.set(EventFlags::TEMP_UPDATED);
    events.clear(EventFlags::TEMP_UPDATED);
    assert!(display.wait(Duration::ZERO));
    assert!(!display.wait(Duration::ZERO));
}
