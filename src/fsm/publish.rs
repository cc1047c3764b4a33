//! Cloud publish cycle.
//!
//! ```text
//!   Idle ──(TEMP/PH/FEED_UPDATED | PROVISION_TRIGGER | SYNC_SCHEDULED)──▶ Publishing
//!                                                                           │ enqueue telemetry + logs
//!                                                                           ▼
//!                                                             AwaitingNetwork(Wifi)
//!                                                                           │ WIFI_UP
//!                                                                           ▼
//!                                                                   ConnectingBroker
//!                                                                           │ start
//!                                                                           ▼
//!                                                            AwaitingNetwork(Broker)
//!                                                                           │ MQTT_UP
//!                                                                           ▼
//!                                                  flush outbox, shadow/get, drain ──▶ Idle
//! ```
//!
//! Every cycle that reaches the network ends with broker and network torn
//! down, whether it completed or aborted.  Messages are written through the
//! broker's offline outbox, so an aborted cycle leaves them queued for the
//! next one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::adapters::cert_store::CredentialStore;
use crate::app::context::AppContext;
use crate::app::ports::{BrokerPort, NetworkPort};
use crate::cloud::log_buffer::CloudLogBuffer;
use crate::cloud::telemetry;
use crate::cloud::topics::{Metric, TopicSet};
use crate::cloud::BrokerSettings;
use crate::config::{CloudPolicy, PublishPolicy};
use crate::error::CommsError;
use crate::events::EventFlags;

/// Flags that start a cycle.
pub const WAKE_MASK: EventFlags = EventFlags::TEMP_UPDATED
    .union(EventFlags::PH_UPDATED)
    .union(EventFlags::FEED_UPDATED)
    .union(EventFlags::PROVISION_TRIGGER)
    .union(EventFlags::SYNC_SCHEDULED);

const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Wifi,
    Broker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishPhase {
    Idle,
    Publishing,
    AwaitingNetwork(Link),
    ConnectingBroker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    NetworkTimeout,
    BrokerTimeout,
    NetworkError(CommsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to do within the wait.
    NoTrigger,
    /// Messages were queued but no network or broker is provisioned.
    Unconfigured,
    Completed,
    Aborted(AbortReason),
}

pub struct PublishCoordinator<N, B> {
    network: N,
    broker: Arc<B>,
    credentials: CredentialStore,
    device_id: String,
    topics: TopicSet,
    logs: Arc<CloudLogBuffer>,
    ctx: AppContext,
    policy: PublishPolicy,
    cloud: CloudPolicy,
    phase: PublishPhase,
}

impl<N: NetworkPort, B: BrokerPort> PublishCoordinator<N, B> {
    pub fn new(
        network: N,
        broker: Arc<B>,
        logs: Arc<CloudLogBuffer>,
        device_id: &str,
        ctx: AppContext,
    ) -> Self {
        let credentials = CredentialStore::new(Arc::clone(&ctx.storage));
        let mut coordinator = Self {
            network,
            broker,
            credentials,
            device_id: device_id.to_owned(),
            topics: TopicSet::new(device_id, None),
            logs,
            policy: ctx.config.publish,
            cloud: ctx.config.cloud.clone(),
            ctx,
            phase: PublishPhase::Idle,
        };
        coordinator.reload_configuration();
        coordinator
    }

    pub fn phase(&self) -> PublishPhase {
        self.phase
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Re-read network credentials and broker settings from storage.
    pub fn reload_configuration(&mut self) {
        if let Err(e) = self.network.reload(&self.credentials) {
            info!("Publish: network not configured ({e})");
        }
        match BrokerSettings::load(&self.cloud, &self.device_id, &self.credentials) {
            Ok(settings) => {
                self.topics = TopicSet::new(
                    &self.device_id,
                    Some(settings.credentials.topic_id.as_str()),
                );
                if let Err(e) = self.broker.configure(settings) {
                    warn!("Publish: broker configuration rejected ({e})");
                }
            }
            Err(e) => info!("Publish: broker not configured ({e})"),
        }
    }

    /// Wait up to `timeout` (forever with `None`) for a trigger and run one
    /// cycle.
    pub fn run_cycle(&mut self, timeout: Option<Duration>) -> CycleOutcome {
        let observed = self.ctx.events.wait(WAKE_MASK, true, false, timeout);
        if observed.is_empty() {
            return CycleOutcome::NoTrigger;
        }
        info!("Publish: cycle started ({observed:?})");

        if observed.contains(EventFlags::PROVISION_TRIGGER) {
            self.reload_configuration();
        }

        self.phase = PublishPhase::Publishing;
        self.enqueue(observed);

        if !self.network.is_configured() || !self.broker.is_configured() {
            info!(
                "Publish: {} message(s) held until provisioned",
                self.broker.pending()
            );
            self.phase = PublishPhase::Idle;
            return CycleOutcome::Unconfigured;
        }

        let outcome = match self.connect() {
            Ok(()) => {
                self.exchange();
                CycleOutcome::Completed
            }
            Err(reason) => {
                warn!("Publish: cycle aborted ({reason:?})");
                CycleOutcome::Aborted(reason)
            }
        };
        self.teardown();
        outcome
    }

    pub fn run(mut self) -> ! {
        info!("Publish: task started (prefix '{}')", self.topics.prefix());
        loop {
            let _ = self.run_cycle(None);
        }
    }

    // ── Phases ────────────────────────────────────────────────

    fn enqueue(&self, observed: EventFlags) {
        let state = self.ctx.store.snapshot();
        let metrics = [
            (EventFlags::TEMP_UPDATED, Metric::Temperature),
            (EventFlags::PH_UPDATED, Metric::Ph),
            (EventFlags::FEED_UPDATED, Metric::Feed),
        ];
        for (flag, metric) in metrics {
            if !observed.contains(flag) {
                continue;
            }
            match telemetry::state_payload(metric, &state) {
                Some(Ok(payload)) => self.queue(&self.topics.telemetry(metric), &payload),
                Some(Err(e)) => warn!("Publish: {metric:?} payload encode failed ({e})"),
                None => {}
            }
        }

        let log_topic = self.topics.telemetry(Metric::Log);
        for record in self.logs.drain() {
            match telemetry::log_payload(&record) {
                Ok(payload) => self.queue(&log_topic, &payload),
                Err(e) => warn!("Publish: log payload encode failed ({e})"),
            }
        }
    }

    fn queue(&self, topic: &str, payload: &[u8]) {
        if let Err(e) = self.broker.enqueue(topic, payload) {
            warn!("Publish: enqueue to '{topic}' failed ({e})");
        }
    }

    fn connect(&mut self) -> Result<(), AbortReason> {
        let timeout = Duration::from_secs(u64::from(self.policy.connect_timeout_secs));

        self.phase = PublishPhase::AwaitingNetwork(Link::Wifi);
        self.network.connect().map_err(AbortReason::NetworkError)?;
        let up = self
            .ctx
            .events
            .wait(EventFlags::WIFI_UP, false, false, Some(timeout));
        if up.is_empty() {
            return Err(AbortReason::NetworkTimeout);
        }

        self.phase = PublishPhase::ConnectingBroker;
        self.broker.start().map_err(AbortReason::NetworkError)?;

        self.phase = PublishPhase::AwaitingNetwork(Link::Broker);
        let up = self
            .ctx
            .events
            .wait(EventFlags::MQTT_UP, false, false, Some(timeout));
        if up.is_empty() {
            return Err(AbortReason::BrokerTimeout);
        }
        Ok(())
    }

    /// Connected: hand over the outbox, request the shadow document and
    /// give both time to complete.
    fn exchange(&mut self) {
        self.phase = PublishPhase::Publishing;
        for topic in self.topics.subscriptions() {
            if let Err(e) = self.broker.subscribe(topic) {
                warn!("Publish: subscribe '{topic}' failed ({e})");
            }
        }
        match self.broker.flush() {
            Ok(n) => info!("Publish: {n} message(s) sent"),
            Err(e) => warn!("Publish: flush failed ({e})"),
        }

        self.ctx.events.clear(EventFlags::SHADOW_SYNCED);
        if let Err(e) = self.broker.publish(self.topics.shadow_get(), b"{}") {
            warn!("Publish: shadow get failed ({e})");
        }

        let deadline =
            Instant::now() + Duration::from_secs(u64::from(self.policy.drain_timeout_secs));
        while self.broker.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(DRAIN_POLL);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let synced = self
            .ctx
            .events
            .wait(EventFlags::SHADOW_SYNCED, true, false, Some(remaining));
        if synced.is_empty() {
            info!("Publish: shadow document not received this cycle");
        }
        if self.broker.pending() > 0 {
            warn!(
                "Publish: {} message(s) still pending at teardown",
                self.broker.pending()
            );
        }
    }

    fn teardown(&mut self) {
        self.broker.stop();
        self.network.disconnect();
        self.phase = PublishPhase::Idle;
        info!("Publish: link torn down");
    }
}
