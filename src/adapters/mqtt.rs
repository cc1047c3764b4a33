//! MQTT broker adapter (mutual-TLS session to the cloud endpoint).
//!
//! Implements [`BrokerPort`].  Outbound messages queue in an offline
//! outbox until a publish cycle brings the session up and flushes it.
//! Inbound deliveries are fed through a [`CloudAssembler`] on the client's
//! receive thread; completed documents are posted to
//! [`channels::INBOUND_DOCUMENTS`](crate::cloud::channels::INBOUND_DOCUMENTS)
//! for the cloud-inbound task.
//!
//! ```text
//!  enqueue ──▶ outbox ──flush──▶ EspMqttClient ──▶ broker
//!                                     │
//!  mqtt-rx thread ◀── Connected / Received / Published / Disconnected
//!     │  Connected    → MQTT_UP
//!     │  Received     → CloudAssembler → channels::offer
//!     │  Published    → in-flight count −1
//!     └  Disconnected → clear MQTT_UP, drop partial message
//! ```
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::mqtt::client::EspMqttClient`
//!   with X.509 client authentication at QoS 1.
//! - **all other targets**: simulated session.  Publishes are recorded and
//!   inbound fragments are injected with [`MqttAdapter::sim_deliver`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::{BrokerPort, EventSink};
use crate::cloud::channels;
use crate::cloud::reassembly::{Assembly, AssemblyError, CloudAssembler};
use crate::cloud::topics::TopicSet;
use crate::cloud::BrokerSettings;
use crate::error::CommsError;
use crate::events::{EventCoordinator, EventFlags};

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    mqtt::client::{Details, EspMqttClient, EventPayload, MqttClientConfiguration, QoS},
    tls::X509,
};

/// Offline outbox depth.  The oldest message is dropped when full.
pub const OUTBOX_CAPACITY: usize = 32;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn loss_reason(e: AssemblyError) -> &'static str {
    match e {
        AssemblyError::Alloc => "reassembly allocation failed",
        AssemblyError::TooLarge { .. } => "document too large",
        AssemblyError::Interleaved => "interleaved chunked message",
        AssemblyError::Orphan => "continuation without start",
        AssemblyError::UnknownTopic => "unknown topic",
    }
}

/// State shared with the receive thread.
struct Link {
    events: Arc<EventCoordinator>,
    sink: Arc<dyn EventSink>,
    assembler: Mutex<CloudAssembler>,
    in_flight: AtomicUsize,
}

impl Link {
    /// Route one inbound delivery.  `topic` is only present on the first
    /// fragment of a message.
    fn on_received(&self, topic: Option<&str>, declared: usize, data: &[u8]) {
        let outcome = lock(&self.assembler).on_fragment(topic, declared, data);
        match outcome {
            Ok(Assembly::Complete(doc)) => {
                debug!("Mqtt: document on '{}' ({}B)", doc.topic, doc.payload.len());
                if !channels::offer(doc) {
                    self.sink.emit(&AppEvent::MessageLost {
                        reason: "inbound queue full",
                    });
                }
            }
            Ok(Assembly::Pending | Assembly::Skipped) => {}
            Err(AssemblyError::Orphan) => {}
            Err(e) => self.sink.emit(&AppEvent::MessageLost {
                reason: loss_reason(e),
            }),
        }
    }

    fn on_connected(&self) {
        info!("Mqtt: session up");
        self.events.set(EventFlags::MQTT_UP);
    }

    fn on_disconnected(&self) {
        info!("Mqtt: session down");
        self.events.clear(EventFlags::MQTT_UP);
        lock(&self.assembler).reset();
        self.in_flight.store(0, Ordering::Release);
    }

    fn on_published(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn is_up(&self) -> bool {
        self.events.get().contains(EventFlags::MQTT_UP)
    }
}

/// NUL-terminated PEM material with `'static` lifetime, as the ESP-IDF TLS
/// layer requires.  Leaked once per `configure`, not per session.
#[cfg(target_os = "espidf")]
struct TlsMaterial {
    certificate: &'static [u8],
    private_key: &'static [u8],
    root_ca: Option<&'static [u8]>,
}

#[cfg(target_os = "espidf")]
fn leak_pem(pem: &[u8]) -> &'static [u8] {
    let mut v = Vec::with_capacity(pem.len() + 1);
    v.extend_from_slice(pem);
    v.push(0);
    Box::leak(v.into_boxed_slice())
}

#[derive(Default)]
struct Session {
    settings: Option<BrokerSettings>,
    outbox: VecDeque<(String, Vec<u8>)>,
    #[cfg(target_os = "espidf")]
    tls: Option<TlsMaterial>,
    #[cfg(target_os = "espidf")]
    client: Option<EspMqttClient<'static>>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimBroker,
}

/// Simulation: what the fake broker has seen.
#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct SimBroker {
    running: bool,
    refuse: bool,
    published: Vec<(String, Vec<u8>)>,
    subscriptions: Vec<String>,
}

pub struct MqttAdapter {
    link: Arc<Link>,
    session: Mutex<Session>,
}

impl MqttAdapter {
    /// `max_document_len` bounds inbound reassembly.
    pub fn new(
        events: Arc<EventCoordinator>,
        sink: Arc<dyn EventSink>,
        topics: TopicSet,
        max_document_len: usize,
    ) -> Self {
        Self {
            link: Arc::new(Link {
                events,
                sink,
                assembler: Mutex::new(CloudAssembler::new(topics, max_document_len)),
                in_flight: AtomicUsize::new(0),
            }),
            session: Mutex::new(Session::default()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&self, s: &mut Session) -> Result<(), CommsError> {
        let settings = s.settings.as_ref().ok_or(CommsError::BrokerNotConfigured)?;
        let tls = s.tls.as_ref().ok_or(CommsError::BrokerNotConfigured)?;
        let conf = MqttClientConfiguration {
            client_id: Some(settings.client_id.as_str()),
            client_certificate: Some(X509::pem_until_nul(tls.certificate)),
            private_key: Some(X509::pem_until_nul(tls.private_key)),
            server_certificate: tls.root_ca.map(X509::pem_until_nul),
            ..Default::default()
        };
        let (client, mut conn) =
            EspMqttClient::new(settings.endpoint.as_str(), &conf).map_err(|e| {
                warn!("Mqtt: client init failed ({e})");
                CommsError::BrokerStartFailed
            })?;

        let link = Arc::clone(&self.link);
        std::thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(6 * 1024)
            .spawn(move || {
                while let Ok(event) = conn.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => link.on_connected(),
                        EventPayload::Disconnected => link.on_disconnected(),
                        EventPayload::Published(_) => link.on_published(),
                        EventPayload::Received {
                            topic,
                            data,
                            details,
                            ..
                        } => match details {
                            Details::Complete => link.on_received(topic, data.len(), data),
                            Details::InitialChunk(c) => {
                                link.on_received(topic, c.total_data_size, data);
                            }
                            Details::SubsequentChunk(c) => {
                                link.on_received(None, c.total_data_size, data);
                            }
                        },
                        _ => {}
                    }
                }
                link.on_disconnected();
                debug!("Mqtt: receive thread exit");
            })
            .map_err(|_| CommsError::BrokerStartFailed)?;

        s.client = Some(client);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&self, s: &mut Session) -> Result<(), CommsError> {
        if s.settings.is_none() {
            return Err(CommsError::BrokerNotConfigured);
        }
        s.sim.running = true;
        if s.sim.refuse {
            warn!("Mqtt(sim): broker not answering");
            return Ok(());
        }
        self.link.on_connected();
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&self, s: &mut Session) {
        // Dropping the client closes the connection and ends mqtt-rx.
        s.client = None;
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&self, s: &mut Session) {
        s.sim.running = false;
    }

    #[cfg(target_os = "espidf")]
    fn platform_publish(&self, s: &mut Session, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        let client = s.client.as_mut().ok_or(CommsError::NotConnected)?;
        client
            .enqueue(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| {
                warn!("Mqtt: publish to '{topic}' failed ({e})");
                CommsError::PublishFailed
            })?;
        self.link.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_publish(&self, s: &mut Session, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        if !s.sim.running {
            return Err(CommsError::NotConnected);
        }
        s.sim.published.push((topic.to_owned(), payload.to_vec()));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_subscribe(&self, s: &mut Session, topic: &str) -> Result<(), CommsError> {
        let client = s.client.as_mut().ok_or(CommsError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .map(|_| ())
            .map_err(|e| {
                warn!("Mqtt: subscribe '{topic}' failed ({e})");
                CommsError::SubscribeFailed
            })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_subscribe(&self, s: &mut Session, topic: &str) -> Result<(), CommsError> {
        if !s.sim.running {
            return Err(CommsError::NotConnected);
        }
        s.sim.subscriptions.push(topic.to_owned());
        Ok(())
    }

    // ── Simulation hooks ──────────────────────────────────────

    /// Simulation: feed one inbound delivery as the receive thread would.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_deliver(&self, topic: Option<&str>, declared: usize, data: &[u8]) {
        self.link.on_received(topic, declared, data);
    }

    /// Simulation: drop the session as a network loss would.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_drop_link(&self) {
        self.link.on_disconnected();
    }

    /// Simulation: make `start` hang without ever reaching `MQTT_UP`.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_refuse(&self, refuse: bool) {
        self.session().sim.refuse = refuse;
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_published(&self) -> Vec<(String, Vec<u8>)> {
        self.session().sim.published.clone()
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_subscriptions(&self) -> Vec<String> {
        self.session().sim.subscriptions.clone()
    }
}

// ───────────────────────────────────────────────────────────────
// BrokerPort
// ───────────────────────────────────────────────────────────────

impl BrokerPort for MqttAdapter {
    fn configure(&self, settings: BrokerSettings) -> Result<(), CommsError> {
        let topics = TopicSet::new(
            &settings.client_id,
            Some(settings.credentials.topic_id.as_str()),
        );
        lock(&self.link.assembler).set_topics(topics);

        let mut s = self.session();
        #[cfg(target_os = "espidf")]
        {
            let creds = &settings.credentials;
            s.tls = Some(TlsMaterial {
                certificate: leak_pem(&creds.certificate),
                private_key: leak_pem(&creds.private_key),
                root_ca: creds.root_ca.as_deref().map(leak_pem),
            });
        }
        info!(
            "Mqtt: configured for '{}' as '{}'",
            settings.endpoint, settings.client_id
        );
        s.settings = Some(settings);
        Ok(())
    }

    fn is_configured(&self) -> bool {
        self.session().settings.is_some()
    }

    fn start(&self) -> Result<(), CommsError> {
        let mut s = self.session();
        if s.settings.is_none() {
            return Err(CommsError::BrokerNotConfigured);
        }
        self.platform_start(&mut s)
    }

    fn stop(&self) {
        let mut s = self.session();
        self.platform_stop(&mut s);
        drop(s);
        self.link.on_disconnected();
    }

    fn enqueue(&self, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        let mut s = self.session();
        if s.outbox.len() >= OUTBOX_CAPACITY {
            if let Some((dropped, _)) = s.outbox.pop_front() {
                warn!("Mqtt: outbox full, dropped oldest message for '{dropped}'");
            }
        }
        s.outbox.push_back((topic.to_owned(), payload.to_vec()));
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), CommsError> {
        let mut s = self.session();
        self.platform_subscribe(&mut s, topic)
    }

    fn flush(&self) -> Result<usize, CommsError> {
        if !self.link.is_up() {
            return Err(CommsError::NotConnected);
        }
        let mut s = self.session();
        let mut sent = 0;
        while let Some((topic, payload)) = s.outbox.pop_front() {
            if let Err(e) = self.platform_publish(&mut s, &topic, &payload) {
                s.outbox.push_front((topic, payload));
                return Err(e);
            }
            sent += 1;
        }
        if sent > 0 {
            info!("Mqtt: flushed {sent} queued message(s)");
        }
        Ok(sent)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        if !self.link.is_up() {
            return Err(CommsError::NotConnected);
        }
        let mut s = self.session();
        self.platform_publish(&mut s, topic, payload)
    }

    fn pending(&self) -> usize {
        self.session().outbox.len() + self.link.in_flight.load(Ordering::Acquire)
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
