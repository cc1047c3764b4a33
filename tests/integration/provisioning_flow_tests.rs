//! Integration tests for the BLE → storage → cloud provisioning flow.
//!
//! Verifies the end-to-end sequence: chunked GATT writes accumulate in the
//! local assembler, an apply persists them through the credential store,
//! and the publish coordinator picks them up on its next cycle.

use std::sync::Arc;
use std::time::Duration;

use aquatest::adapters::ble::{BleError, CommandChar, GattChannel, GattRouter, TelemetryChar};
use aquatest::adapters::cert_store::{self, CredentialStore};
use aquatest::adapters::mqtt::MqttAdapter;
use aquatest::adapters::wifi::WifiAdapter;
use aquatest::app::commands::CommandError;
use aquatest::app::events::AppEvent;
use aquatest::app::ports::BrokerPort;
use aquatest::cloud::log_buffer::CloudLogBuffer;
use aquatest::cloud::topics::TopicSet;
use aquatest::events::EventFlags;
use aquatest::fsm::publish::{CycleOutcome, PublishCoordinator};
use aquatest::provisioning::{ChunkError, PEM_CAPACITY, ProvisionChannel, ProvisioningService};

use crate::mock_hw::{Harness, harness};

const DEVICE: &str = "AA:BB:CC:DD:EE:FF";

fn pem(label: &str, len: usize) -> Vec<u8> {
    let mut v = format!("-----BEGIN {label}-----\n").into_bytes();
    v.resize(len, b'A');
    v
}

struct Rig {
    h: Harness,
    provisioning: Arc<ProvisioningService>,
    router: GattRouter,
}

fn rig() -> Rig {
    let h = harness();
    let provisioning = Arc::new(ProvisioningService::new(
        CredentialStore::new(h.storage.clone()),
        Arc::clone(&h.ctx.events),
        h.sink.clone(),
    ));
    let router = GattRouter::new(
        Arc::clone(&provisioning),
        h.ctx.executor(),
        Arc::clone(&h.ctx.store),
        "0.3.0",
    );
    Rig {
        h,
        provisioning,
        router,
    }
}

fn write_chunked(router: &GattRouter, channel: ProvisionChannel, data: &[u8], frag: usize) {
    for chunk in data.chunks(frag) {
        router
            .on_write(GattChannel::Provision(channel), chunk)
            .expect("fragment within capacity");
    }
}

// ── Chunk assembly ────────────────────────────────────────────

#[test]
fn certificate_over_capacity_is_truncated() {
    let r = rig();
    let cert = pem("CERTIFICATE", 2200);
    let mut results = cert
        .chunks(512)
        .map(|c| r.router.on_write(GattChannel::Provision(ProvisionChannel::Certificate), c))
        .collect::<Vec<_>>();

    let last = results.pop().unwrap();
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        last,
        Err(BleError::Provisioning(ChunkError::Overflow {
            accepted: 0,
            dropped: 2200 - PEM_CAPACITY,
        }))
    );
    assert_eq!(
        r.provisioning.buffered_len(ProvisionChannel::Certificate),
        PEM_CAPACITY
    );

    r.router.on_write(GattChannel::Apply, &[1]).unwrap();
    let (ns, key) = cert_store::storage_location(ProvisionChannel::Certificate);
    let stored = r.h.storage.get(ns, key).unwrap();
    assert_eq!(stored.len(), PEM_CAPACITY);
    assert_eq!(stored[..], cert[..PEM_CAPACITY]);
}

#[test]
fn resuming_a_channel_after_a_switch_starts_empty() {
    let r = rig();
    let topic = GattChannel::Provision(ProvisionChannel::TopicId);
    r.router.on_write(topic, b"stale-").unwrap();
    r.router
        .on_write(GattChannel::Provision(ProvisionChannel::RootCa), b"-----BEGIN ")
        .unwrap();
    r.router.on_write(topic, b"tank").unwrap();

    assert_eq!(r.provisioning.buffered_len(ProvisionChannel::TopicId), 4);
    r.router.on_write(GattChannel::Apply, &[1]).unwrap();

    let (ns, key) = cert_store::storage_location(ProvisionChannel::TopicId);
    assert_eq!(r.h.storage.get(ns, key).as_deref(), Some(&b"tank"[..]));
}

#[test]
fn apply_persists_and_raises_reload_flags() {
    let r = rig();
    write_chunked(&r.router, ProvisionChannel::WifiSsid, b"ReefNet", 4);
    write_chunked(&r.router, ProvisionChannel::WifiPassword, b"coral-spawn", 4);
    r.router.on_write(GattChannel::Apply, &[1]).unwrap();

    let flags = r.h.ctx.events.get();
    assert!(flags.contains(EventFlags::PROVISION_TRIGGER | EventFlags::WIFI_CONFIG_SAVED));
    assert_eq!(
        r.h.sink.count(|e| *e == AppEvent::ProvisioningApplied { channels: 2 }),
        1
    );

    let wifi = CredentialStore::new(r.h.storage.clone()).load_wifi().unwrap();
    assert_eq!(wifi.ssid.as_str(), "ReefNet");
    assert_eq!(wifi.password.as_str(), "coral-spawn");
    // Everything was consumed by the apply.
    assert_eq!(r.provisioning.buffered_len(ProvisionChannel::WifiSsid), 0);
}

#[test]
fn certificate_only_apply_does_not_touch_wifi() {
    let r = rig();
    write_chunked(&r.router, ProvisionChannel::Certificate, &pem("CERTIFICATE", 900), 256);
    r.router.on_write(GattChannel::Apply, &[1]).unwrap();

    let flags = r.h.ctx.events.get();
    assert!(flags.contains(EventFlags::PROVISION_TRIGGER));
    assert!(!flags.contains(EventFlags::WIFI_CONFIG_SAVED));
}

#[test]
fn empty_apply_signals_nothing() {
    let r = rig();
    r.router.on_write(GattChannel::Apply, &[1]).unwrap();
    assert!(r.h.ctx.events.get().is_empty());
    assert!(r.h.sink.recorded().is_empty());
}

#[test]
fn storage_failure_is_reported_without_signalling() {
    let r = rig();
    r.h.storage
        .fail_writes
        .store(true, std::sync::atomic::Ordering::Relaxed);
    write_chunked(&r.router, ProvisionChannel::TopicId, b"tank", 4);

    let report = r.provisioning.apply();
    assert!(report.persisted.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, ProvisionChannel::TopicId);
    assert!(!r.h.ctx.events.get().contains(EventFlags::PROVISION_TRIGGER));
}

// ── Command and telemetry characteristics ─────────────────────

#[test]
fn interval_characteristic_round_trips_through_state() {
    let r = rig();
    let feed = GattChannel::Command(CommandChar::FeedInterval);
    r.router.on_write(feed, &3600u32.to_le_bytes()).unwrap();

    assert_eq!(r.h.ctx.store.snapshot().feed_interval_secs, 3600);
    assert!(r.h.ctx.events.get().contains(EventFlags::FEED_INTERVAL_CHANGED));
    assert_eq!(r.router.on_read(feed).unwrap().as_slice(), &3600u32.to_le_bytes());
}

#[test]
fn short_interval_write_is_rejected() {
    let r = rig();
    let before = r.h.ctx.store.snapshot().temp_interval_secs;
    assert_eq!(
        r.router
            .on_write(GattChannel::Command(CommandChar::TempInterval), &[1, 2]),
        Err(BleError::Command(CommandError::TooShort { expected: 4, got: 2 }))
    );
    assert_eq!(r.h.ctx.store.snapshot().temp_interval_secs, before);
}

#[test]
fn force_characteristics_schedule_work() {
    let r = rig();
    r.router
        .on_write(GattChannel::Command(CommandChar::ForceFeed), &[1])
        .unwrap();
    r.router
        .on_write(GattChannel::Command(CommandChar::ForcePh), &[1])
        .unwrap();
    assert!(
        r.h.ctx
            .events
            .get()
            .contains(EventFlags::FEED_SCHEDULED | EventFlags::PH_SCHEDULED)
    );
}

#[test]
fn read_only_and_write_only_characteristics_are_enforced() {
    let r = rig();
    assert_eq!(
        r.router
            .on_write(GattChannel::Command(CommandChar::FirmwareVersion), b"9.9.9"),
        Err(BleError::NotWritable)
    );
    assert_eq!(
        r.router.on_write(GattChannel::Telemetry(TelemetryChar::Ph), &[0; 4]),
        Err(BleError::NotWritable)
    );
    assert_eq!(
        r.router.on_read(GattChannel::Command(CommandChar::ForceFeed)),
        Err(BleError::NotReadable)
    );
    assert_eq!(
        r.router
            .on_read(GattChannel::Command(CommandChar::FirmwareVersion))
            .unwrap()
            .as_slice(),
        b"0.3.0"
    );
}

// ── Provisioning → publish ────────────────────────────────────

#[test]
fn provisioned_material_reaches_the_publish_cycle() {
    let r = rig();
    let ctx = r.h.ctx.clone();
    let broker = Arc::new(MqttAdapter::new(
        Arc::clone(&ctx.events),
        ctx.sink.clone(),
        TopicSet::new(DEVICE, None),
        ctx.config.cloud.max_document_len as usize,
    ));
    let logs = Arc::new(CloudLogBuffer::new(Arc::clone(&ctx.clock)));
    let mut publish = PublishCoordinator::new(
        WifiAdapter::new(Arc::clone(&ctx.events)),
        Arc::clone(&broker),
        logs,
        DEVICE,
        ctx.clone(),
    );

    // Nothing provisioned yet: the reading is held back.
    ctx.events.set(EventFlags::TEMP_UPDATED);
    assert_eq!(
        publish.run_cycle(Some(Duration::ZERO)),
        CycleOutcome::Unconfigured
    );
    assert_eq!(broker.pending(), 1);

    write_chunked(&r.router, ProvisionChannel::WifiSsid, b"ReefNet", 8);
    write_chunked(&r.router, ProvisionChannel::WifiPassword, b"coral-spawn", 8);
    write_chunked(&r.router, ProvisionChannel::Certificate, &pem("CERTIFICATE", 1200), 512);
    write_chunked(&r.router, ProvisionChannel::PrivateKey, &pem("PRIVATE KEY", 1100), 512);
    write_chunked(&r.router, ProvisionChannel::TopicId, b"tank", 4);
    r.router.on_write(GattChannel::Apply, &[1]).unwrap();

    assert_eq!(
        publish.run_cycle(Some(Duration::ZERO)),
        CycleOutcome::Completed
    );
    assert_eq!(publish.topics().prefix(), "tank/AA:BB:CC:DD:EE:FF");
    assert!(
        broker
            .sim_subscriptions()
            .iter()
            .any(|t| t == "tank/AA:BB:CC:DD:EE:FF/cmd")
    );
    let published: Vec<String> = broker.sim_published().into_iter().map(|(t, _)| t).collect();
    assert_eq!(
        published,
        vec![
            "AA:BB:CC:DD:EE:FF/temp".to_owned(),
            "$aws/things/AA:BB:CC:DD:EE:FF/shadow/get".to_owned(),
        ]
    );
    assert!(!ctx.events.get().contains(EventFlags::PROVISION_TRIGGER));
}
