//! WiFi station-mode adapter.
//!
//! Implements [`NetworkPort`], the hexagonal boundary for the station link
//! used by the publish cycle.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver via `esp_idf_svc::wifi`.
//!   The system event loop raises `WIFI_UP` on `DhcpIpAssigned` and clears it
//!   on `StaDisconnected`.
//! - **all other targets**: simulation.  The link comes up immediately on
//!   `connect` unless the simulated AP refuses the association.
//!
//! ## Lifecycle
//!
//! ```text
//!  reload ──▶ Idle ──connect──▶ Associating ──(DHCP)──▶ WIFI_UP set
//!               ▲                                          │
//!               └──────────────── disconnect ◀─────────────┘
//! ```
//!
//! The link is only held for the duration of one publish cycle; there is
//! no background reconnect.

use std::sync::Arc;

use log::{info, warn};

use super::cert_store::{CredentialStore, WifiCredentials};
use crate::app::ports::NetworkPort;
use crate::error::CommsError;
use crate::events::{EventCoordinator, EventFlags};

#[cfg(target_os = "espidf")]
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    hal::modem::Modem,
    netif::IpEvent,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Idle,
    Associating,
}

/// The station driver only takes printable ASCII SSIDs.
fn validate(creds: &WifiCredentials) -> Result<(), CommsError> {
    if creds.ssid.is_empty() {
        return Err(CommsError::NoCredentials);
    }
    if !creds.ssid.bytes().all(|b| (b' '..=b'~').contains(&b)) {
        warn!("WiFi: SSID contains non-printable bytes");
        return Err(CommsError::InvalidCredentials);
    }
    Ok(())
}

pub struct WifiAdapter {
    state: WifiState,
    credentials: Option<WifiCredentials>,
    events: Arc<EventCoordinator>,
    #[cfg(target_os = "espidf")]
    wifi: Box<EspWifi<'static>>,
    #[cfg(target_os = "espidf")]
    _subscriptions: [EspSubscription<'static, System>; 2],
    /// Simulation: when set, associations are refused.
    #[cfg(not(target_os = "espidf"))]
    sim_refuse: bool,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        events: Arc<EventCoordinator>,
    ) -> Result<Self, CommsError> {
        let wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs)).map_err(|e| {
            warn!("WiFi: driver init failed ({e})");
            CommsError::WifiConnectFailed
        })?;

        let up = Arc::clone(&events);
        let ip_sub = sysloop
            .subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(assignment) = event {
                    info!("WiFi: address {} assigned", assignment.ip());
                    up.set(EventFlags::WIFI_UP);
                }
            })
            .map_err(|_| CommsError::WifiConnectFailed)?;

        let down = Arc::clone(&events);
        let wifi_sub = sysloop
            .subscribe::<WifiEvent, _>(move |event| {
                if let WifiEvent::StaDisconnected(_) = event {
                    down.clear(EventFlags::WIFI_UP);
                }
            })
            .map_err(|_| CommsError::WifiConnectFailed)?;

        Ok(Self {
            state: WifiState::Idle,
            credentials: None,
            events,
            wifi: Box::new(wifi),
            _subscriptions: [ip_sub, wifi_sub],
        })
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new(events: Arc<EventCoordinator>) -> Self {
        Self {
            state: WifiState::Idle,
            credentials: None,
            events,
            sim_refuse: false,
        }
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    /// Simulation: make the next associations fail.
    #[cfg(not(target_os = "espidf"))]
    pub fn set_sim_refuse(&mut self, refuse: bool) {
        self.sim_refuse = refuse;
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_connect(&mut self, creds: &WifiCredentials) -> Result<(), CommsError> {
        let auth_method = if creds.password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid: creds
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| CommsError::InvalidCredentials)?,
            password: creds
                .password
                .as_str()
                .try_into()
                .map_err(|_| CommsError::InvalidCredentials)?,
            auth_method,
            ..Default::default()
        });
        self.wifi
            .set_configuration(&config)
            .and_then(|()| self.wifi.start())
            .and_then(|()| self.wifi.connect())
            .map_err(|e| {
                warn!("WiFi: association with '{}' failed ({e})", creds.ssid);
                CommsError::WifiConnectFailed
            })
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_connect(&mut self, creds: &WifiCredentials) -> Result<(), CommsError> {
        if self.sim_refuse {
            warn!("WiFi(sim): '{}' refused association", creds.ssid);
            return Err(CommsError::WifiConnectFailed);
        }
        info!("WiFi(sim): associated with '{}'", creds.ssid);
        self.events.set(EventFlags::WIFI_UP);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi: disconnect failed ({e})");
        }
        if let Err(e) = self.wifi.stop() {
            warn!("WiFi: stop failed ({e})");
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self) {
        info!("WiFi(sim): disconnected");
    }
}

// ───────────────────────────────────────────────────────────────
// NetworkPort
// ───────────────────────────────────────────────────────────────

impl NetworkPort for WifiAdapter {
    fn reload(&mut self, credentials: &CredentialStore) -> Result<(), CommsError> {
        match credentials.load_wifi().and_then(|c| validate(&c).map(|()| c)) {
            Ok(c) => {
                info!("WiFi: credentials loaded (SSID='{}')", c.ssid);
                self.credentials = Some(c);
                Ok(())
            }
            Err(e) => {
                self.credentials = None;
                Err(e)
            }
        }
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn connect(&mut self) -> Result<(), CommsError> {
        let creds = self.credentials.clone().ok_or(CommsError::NoCredentials)?;
        info!("WiFi: connecting to '{}'", creds.ssid);
        self.state = WifiState::Associating;
        let result = self.platform_connect(&creds);
        if result.is_err() {
            self.state = WifiState::Idle;
        }
        result
    }

    fn disconnect(&mut self) {
        if self.state == WifiState::Associating {
            self.platform_disconnect();
        }
        self.state = WifiState::Idle;
        self.events.clear(EventFlags::WIFI_UP);
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
