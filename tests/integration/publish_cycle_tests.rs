//! Publish coordinator cycles over the simulated WiFi and MQTT adapters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use aquatest::adapters::cert_store::CredentialStore;
use aquatest::adapters::mqtt::MqttAdapter;
use aquatest::adapters::wifi::WifiAdapter;
use aquatest::app::ports::{BrokerPort, NetworkPort};
use aquatest::cloud::BrokerSettings;
use aquatest::cloud::log_buffer::CloudLogBuffer;
use aquatest::cloud::topics::TopicSet;
use aquatest::error::CommsError;
use aquatest::events::{EventCoordinator, EventFlags};
use aquatest::fsm::publish::{AbortReason, CycleOutcome, PublishCoordinator, PublishPhase};
use aquatest::provisioning::ProvisionChannel;

use crate::mock_hw::{Harness, harness};

const DEVICE: &str = "AA:BB:CC:DD:EE:FF";

/// Sim broker that also counts `start` calls.
struct CountingBroker {
    inner: MqttAdapter,
    starts: AtomicU32,
}

impl BrokerPort for CountingBroker {
    fn configure(&self, settings: BrokerSettings) -> Result<(), CommsError> {
        self.inner.configure(settings)
    }
    fn is_configured(&self) -> bool {
        self.inner.is_configured()
    }
    fn start(&self) -> Result<(), CommsError> {
        self.starts.fetch_add(1, Ordering::Relaxed);
        self.inner.start()
    }
    fn stop(&self) {
        self.inner.stop();
    }
    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        self.inner.enqueue(topic, payload)
    }
    fn subscribe(&self, topic: &str) -> Result<(), CommsError> {
        self.inner.subscribe(topic)
    }
    fn flush(&self) -> Result<usize, CommsError> {
        self.inner.flush()
    }
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        self.inner.publish(topic, payload)
    }
    fn pending(&self) -> usize {
        self.inner.pending()
    }
}

/// Associates but never reports an address.
struct SilentNetwork {
    events: Arc<EventCoordinator>,
    disconnects: u32,
}

impl NetworkPort for SilentNetwork {
    fn reload(&mut self, _credentials: &CredentialStore) -> Result<(), CommsError> {
        Ok(())
    }
    fn is_configured(&self) -> bool {
        true
    }
    fn connect(&mut self) -> Result<(), CommsError> {
        Ok(())
    }
    fn disconnect(&mut self) {
        self.disconnects += 1;
        self.events.clear(EventFlags::WIFI_UP);
    }
}

fn provision(h: &Harness) {
    let creds = CredentialStore::new(h.storage.clone());
    let pem = |label: &str| format!("-----BEGIN {label}-----\nMIIB\n-----END {label}-----\n");
    creds.persist(ProvisionChannel::WifiSsid, b"ReefNet").unwrap();
    creds.persist(ProvisionChannel::WifiPassword, b"coral-spawn").unwrap();
    creds
        .persist(ProvisionChannel::Certificate, pem("CERTIFICATE").as_bytes())
        .unwrap();
    creds
        .persist(ProvisionChannel::PrivateKey, pem("PRIVATE KEY").as_bytes())
        .unwrap();
    creds.persist(ProvisionChannel::TopicId, b"tank").unwrap();
}

fn broker(h: &Harness) -> Arc<CountingBroker> {
    Arc::new(CountingBroker {
        inner: MqttAdapter::new(
            Arc::clone(&h.ctx.events),
            h.ctx.sink.clone(),
            TopicSet::new(DEVICE, None),
            h.ctx.config.cloud.max_document_len as usize,
        ),
        starts: AtomicU32::new(0),
    })
}

fn coordinator<N: NetworkPort>(
    h: &Harness,
    network: N,
    broker: &Arc<CountingBroker>,
    logs: Arc<CloudLogBuffer>,
) -> PublishCoordinator<N, CountingBroker> {
    PublishCoordinator::new(network, Arc::clone(broker), logs, DEVICE, h.ctx.clone())
}

fn logs(h: &Harness) -> Arc<CloudLogBuffer> {
    Arc::new(CloudLogBuffer::new(Arc::clone(&h.ctx.clock)))
}

#[test]
fn missing_wifi_up_aborts_without_starting_the_broker() {
    let h = harness();
    provision(&h);
    let broker = broker(&h);
    let net = SilentNetwork {
        events: Arc::clone(&h.ctx.events),
        disconnects: 0,
    };
    let mut p = coordinator(&h, net, &broker, logs(&h));
    h.ctx.events.set(EventFlags::TEMP_UPDATED);

    let started = Instant::now();
    let outcome = p.run_cycle(Some(Duration::ZERO));
    let timeout = Duration::from_secs(u64::from(h.ctx.config.publish.connect_timeout_secs));

    assert_eq!(outcome, CycleOutcome::Aborted(AbortReason::NetworkTimeout));
    assert!(started.elapsed() >= timeout);
    assert_eq!(broker.starts.load(Ordering::Relaxed), 0);
    assert_eq!(p.phase(), PublishPhase::Idle);
    assert_eq!(p.network().disconnects, 1);
    // The reading waits for the next cycle.
    assert_eq!(broker.pending(), 1);
}

#[test]
fn refused_association_aborts_with_the_network_error() {
    let h = harness();
    provision(&h);
    let broker = broker(&h);
    let mut wifi = WifiAdapter::new(Arc::clone(&h.ctx.events));
    wifi.set_sim_refuse(true);
    let mut p = coordinator(&h, wifi, &broker, logs(&h));
    h.ctx.events.set(EventFlags::SYNC_SCHEDULED);

    assert_eq!(
        p.run_cycle(Some(Duration::ZERO)),
        CycleOutcome::Aborted(AbortReason::NetworkError(CommsError::WifiConnectFailed))
    );
    assert_eq!(broker.starts.load(Ordering::Relaxed), 0);
}

#[test]
fn silent_broker_times_out_and_tears_down() {
    let h = harness();
    provision(&h);
    let broker = broker(&h);
    broker.inner.sim_refuse(true);
    let mut p = coordinator(&h, WifiAdapter::new(Arc::clone(&h.ctx.events)), &broker, logs(&h));
    h.ctx.events.set(EventFlags::FEED_UPDATED);

    assert_eq!(
        p.run_cycle(Some(Duration::ZERO)),
        CycleOutcome::Aborted(AbortReason::BrokerTimeout)
    );
    assert_eq!(broker.starts.load(Ordering::Relaxed), 1);
    let flags = h.ctx.events.get();
    assert!(!flags.intersects(EventFlags::WIFI_UP | EventFlags::MQTT_UP));
    assert!(broker.inner.sim_published().is_empty());
}

#[test]
fn completed_cycle_sends_telemetry_and_logs_under_the_topic_prefix() {
    let h = harness();
    provision(&h);
    let broker = broker(&h);
    let logs = logs(&h);
    logs.push("pH probe not confirmed".into());
    let mut p = coordinator(&h, WifiAdapter::new(Arc::clone(&h.ctx.events)), &broker, Arc::clone(&logs));
    h.ctx.events.set(EventFlags::PH_UPDATED);

    assert_eq!(p.run_cycle(Some(Duration::ZERO)), CycleOutcome::Completed);
    let topics: Vec<String> = broker
        .inner
        .sim_published()
        .into_iter()
        .map(|(t, _)| t)
        .collect();
    assert_eq!(
        topics,
        vec![
            "tank/AA:BB:CC:DD:EE:FF/ph".to_owned(),
            "tank/AA:BB:CC:DD:EE:FF/log".to_owned(),
            "$aws/things/AA:BB:CC:DD:EE:FF/shadow/get".to_owned(),
        ]
    );
    assert!(logs.is_empty());
    assert_eq!(broker.pending(), 0);
    assert_eq!(broker.inner.sim_subscriptions().len(), 4);
}

#[test]
fn unprovisioned_device_holds_messages() {
    let h = harness();
    let broker = broker(&h);
    let mut p = coordinator(&h, WifiAdapter::new(Arc::clone(&h.ctx.events)), &broker, logs(&h));
    h.ctx.events.set(EventFlags::TEMP_UPDATED | EventFlags::FEED_UPDATED);

    assert_eq!(p.run_cycle(Some(Duration::ZERO)), CycleOutcome::Unconfigured);
    assert_eq!(broker.pending(), 2);
    assert_eq!(broker.starts.load(Ordering::Relaxed), 0);
    // The trigger was consumed; the next cycle needs a new one.
    assert_eq!(p.run_cycle(Some(Duration::ZERO)), CycleOutcome::NoTrigger);
}
