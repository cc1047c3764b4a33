//! BLE GATT adapter: provisioning, command and telemetry services.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via raw `esp_idf_svc::sys`
//!   calls.  Bluedroid callbacks are C function pointers, so the router and
//!   the attribute-handle table are reached through statics.
//! - **all other targets**: simulation.  Writes and reads are driven through
//!   [`GattRouter`] directly; notifications are recorded.
//!
//! ## GATT layout
//!
//! Every UUID is `12345678-1234-5678-1234-56789abcdeXX`; `XX` below.
//!
//! | Service      | Char | Content                        | Perms         |
//! |--------------|------|--------------------------------|---------------|
//! | provisioning | `e1` | WiFi SSID (chunked)            | Write         |
//! | `e0`         | `e2` | WiFi password (chunked)        | Write         |
//! |              | `e3` | device certificate (chunked)   | Write         |
//! |              | `e4` | private key (chunked)          | Write         |
//! |              | `e5` | apply                          | Write         |
//! |              | `e6` | root CA (chunked)              | Write         |
//! |              | `e7` | topic id (chunked)             | Write         |
//! | command      | `c1` | force feed                     | Write         |
//! | `c0`         | `c2` | force temperature reading      | Write         |
//! |              | `c3` | force pH reading               | Write         |
//! |              | `c4` | temperature interval, u32 LE   | Read+Write    |
//! |              | `c5` | feed interval, u32 LE          | Read+Write    |
//! |              | `c6` | publish interval, u32 LE       | Read+Write    |
//! |              | `c7` | firmware version, UTF-8        | Read          |
//! |              | `c8` | confirm pH measurement         | Write         |
//! | telemetry    | `d1` | temperature, f32 LE            | Read+Notify   |
//! | `d0`         | `d2` | pH, f32 LE                     | Read+Notify   |
//! |              | `d3` | last feed success, u8          | Read+Notify   |
//!
//! The table is resolved to attribute handles once, as Bluedroid reports
//! each characteristic; writes are then dispatched by handle lookup.

use core::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use crate::app::commands::{AppCommand, CommandError, CommandExecutor, parse_le_u32};
use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::app::state::AquariumStore;
use crate::events::{EventCoordinator, EventFlags};
use crate::provisioning::{
    APPLY_CHANNEL_ID, ChunkError, ProvisionChannel, ProvisioningService, WriteOutcome,
};

// ───────────────────────────────────────────────────────────────
// Table
// ───────────────────────────────────────────────────────────────

pub const UUID_BASE: u128 = 0x12345678_1234_5678_1234_56789abcde00;

pub const fn uuid(suffix: u8) -> u128 {
    UUID_BASE | suffix as u128
}

pub const SERVICE_PROVISIONING: u8 = 0xE0;
pub const SERVICE_COMMAND: u8 = 0xC0;
pub const SERVICE_TELEMETRY: u8 = 0xD0;
pub const SERVICES: [u8; 3] = [SERVICE_PROVISIONING, SERVICE_COMMAND, SERVICE_TELEMETRY];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandChar {
    ForceFeed,
    ForceTemp,
    ForcePh,
    TempInterval,
    FeedInterval,
    PublishInterval,
    FirmwareVersion,
    ConfirmPh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryChar {
    Temperature,
    Ph,
    FeedSuccess,
}

/// What a characteristic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattChannel {
    Provision(ProvisionChannel),
    Apply,
    Command(CommandChar),
    Telemetry(TelemetryChar),
}

pub const PERM_READ: u8 = 1 << 0;
pub const PERM_WRITE: u8 = 1 << 1;
pub const PERM_NOTIFY: u8 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattEntry {
    pub service: u8,
    pub suffix: u8,
    pub channel: GattChannel,
    pub perms: u8,
}

const fn entry(service: u8, suffix: u8, channel: GattChannel, perms: u8) -> GattEntry {
    GattEntry {
        service,
        suffix,
        channel,
        perms,
    }
}

use CommandChar as C;
use GattChannel as G;
use ProvisionChannel as P;
use TelemetryChar as T;

pub static GATT_TABLE: [GattEntry; 18] = [
    entry(SERVICE_PROVISIONING, 0xE1, G::Provision(P::WifiSsid), PERM_WRITE),
    entry(SERVICE_PROVISIONING, 0xE2, G::Provision(P::WifiPassword), PERM_WRITE),
    entry(SERVICE_PROVISIONING, 0xE3, G::Provision(P::Certificate), PERM_WRITE),
    entry(SERVICE_PROVISIONING, 0xE4, G::Provision(P::PrivateKey), PERM_WRITE),
    entry(SERVICE_PROVISIONING, APPLY_CHANNEL_ID, G::Apply, PERM_WRITE),
    entry(SERVICE_PROVISIONING, 0xE6, G::Provision(P::RootCa), PERM_WRITE),
    entry(SERVICE_PROVISIONING, 0xE7, G::Provision(P::TopicId), PERM_WRITE),
    entry(SERVICE_COMMAND, 0xC1, G::Command(C::ForceFeed), PERM_WRITE),
    entry(SERVICE_COMMAND, 0xC2, G::Command(C::ForceTemp), PERM_WRITE),
    entry(SERVICE_COMMAND, 0xC3, G::Command(C::ForcePh), PERM_WRITE),
    entry(SERVICE_COMMAND, 0xC4, G::Command(C::TempInterval), PERM_READ | PERM_WRITE),
    entry(SERVICE_COMMAND, 0xC5, G::Command(C::FeedInterval), PERM_READ | PERM_WRITE),
    entry(SERVICE_COMMAND, 0xC6, G::Command(C::PublishInterval), PERM_READ | PERM_WRITE),
    entry(SERVICE_COMMAND, 0xC7, G::Command(C::FirmwareVersion), PERM_READ),
    entry(SERVICE_COMMAND, 0xC8, G::Command(C::ConfirmPh), PERM_WRITE),
    entry(SERVICE_TELEMETRY, 0xD1, G::Telemetry(T::Temperature), PERM_READ | PERM_NOTIFY),
    entry(SERVICE_TELEMETRY, 0xD2, G::Telemetry(T::Ph), PERM_READ | PERM_NOTIFY),
    entry(SERVICE_TELEMETRY, 0xD3, G::Telemetry(T::FeedSuccess), PERM_READ | PERM_NOTIFY),
];

pub fn lookup_uuid(uuid: u128) -> Option<&'static GattEntry> {
    GATT_TABLE.iter().find(|e| self::uuid(e.suffix) == uuid)
}

pub fn entry_for(channel: GattChannel) -> Option<&'static GattEntry> {
    GATT_TABLE.iter().find(|e| e.channel == channel)
}

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    Provisioning(ChunkError),
    Command(CommandError),
    NotWritable,
    NotReadable,
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning(e) => write!(f, "provisioning: {e}"),
            Self::Command(e) => write!(f, "command: {e}"),
            Self::NotWritable => write!(f, "characteristic is not writable"),
            Self::NotReadable => write!(f, "characteristic is not readable"),
        }
    }
}

impl From<ChunkError> for BleError {
    fn from(e: ChunkError) -> Self {
        Self::Provisioning(e)
    }
}

impl From<CommandError> for BleError {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ───────────────────────────────────────────────────────────────
// Router
// ───────────────────────────────────────────────────────────────

/// Characteristic value, at most 16 bytes (firmware version string).
pub type GattValue = heapless::Vec<u8, 16>;

fn value(bytes: &[u8]) -> GattValue {
    let mut v = GattValue::new();
    let n = bytes.len().min(v.capacity());
    // Cannot fail: n is within capacity.
    let _ = v.extend_from_slice(&bytes[..n]);
    v
}

/// Routes characteristic reads and writes into the domain services.
pub struct GattRouter {
    provisioning: Arc<ProvisioningService>,
    executor: CommandExecutor,
    store: Arc<AquariumStore>,
    firmware_version: &'static str,
}

impl GattRouter {
    pub fn new(
        provisioning: Arc<ProvisioningService>,
        executor: CommandExecutor,
        store: Arc<AquariumStore>,
        firmware_version: &'static str,
    ) -> Self {
        Self {
            provisioning,
            executor,
            store,
            firmware_version,
        }
    }

    pub fn on_write(&self, channel: GattChannel, bytes: &[u8]) -> Result<(), BleError> {
        match channel {
            GattChannel::Provision(c) => {
                self.provisioning.on_write(c.id(), bytes)?;
            }
            GattChannel::Apply => {
                if let WriteOutcome::Applied(report) =
                    self.provisioning.on_write(APPLY_CHANNEL_ID, bytes)?
                {
                    if !report.failed.is_empty() {
                        warn!("BLE: apply left {} channel(s) unsaved", report.failed.len());
                    }
                }
            }
            GattChannel::Command(c) => {
                let cmd = match c {
                    CommandChar::ForceFeed => AppCommand::ForceFeed,
                    CommandChar::ForceTemp => AppCommand::ForceTemp,
                    CommandChar::ForcePh => AppCommand::ForcePh,
                    CommandChar::ConfirmPh => AppCommand::ConfirmPh,
                    CommandChar::TempInterval => AppCommand::SetTempInterval(parse_le_u32(bytes)?),
                    CommandChar::FeedInterval => AppCommand::SetFeedInterval(parse_le_u32(bytes)?),
                    CommandChar::PublishInterval => {
                        AppCommand::SetPublishInterval(parse_le_u32(bytes)?)
                    }
                    CommandChar::FirmwareVersion => return Err(BleError::NotWritable),
                };
                self.executor.execute(cmd, "ble")?;
            }
            GattChannel::Telemetry(_) => return Err(BleError::NotWritable),
        }
        Ok(())
    }

    pub fn on_read(&self, channel: GattChannel) -> Result<GattValue, BleError> {
        let state = self.store.snapshot();
        let v = match channel {
            GattChannel::Telemetry(t) => telemetry_value(t, state.temperature, state.ph, state.last_feed_success),
            GattChannel::Command(CommandChar::TempInterval) => {
                value(&state.temp_interval_secs.to_le_bytes())
            }
            GattChannel::Command(CommandChar::FeedInterval) => {
                value(&state.feed_interval_secs.to_le_bytes())
            }
            GattChannel::Command(CommandChar::PublishInterval) => {
                value(&state.publish_interval_secs.to_le_bytes())
            }
            GattChannel::Command(CommandChar::FirmwareVersion) => {
                value(self.firmware_version.as_bytes())
            }
            _ => return Err(BleError::NotReadable),
        };
        Ok(v)
    }
}

fn telemetry_value(t: TelemetryChar, temperature: f32, ph: f32, feed_ok: bool) -> GattValue {
    match t {
        TelemetryChar::Temperature => value(&temperature.to_le_bytes()),
        TelemetryChar::Ph => value(&ph.to_le_bytes()),
        TelemetryChar::FeedSuccess => value(&[u8::from(feed_ok)]),
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF bridge statics
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod bluedroid {
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex, OnceLock, PoisonError};

    use esp_idf_svc::sys::*;
    use log::{info, warn};

    use super::{GATT_TABLE, GattChannel, GattRouter, PERM_NOTIFY, PERM_READ, PERM_WRITE, SERVICES};
    use crate::events::{EventCoordinator, EventFlags};

    pub(super) struct Bridge {
        pub router: Arc<GattRouter>,
        pub events: Arc<EventCoordinator>,
    }

    pub(super) static BRIDGE: OnceLock<Bridge> = OnceLock::new();
    pub(super) static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    /// `u32::MAX` while no central is connected.
    pub(super) static CONN_ID: AtomicU32 = AtomicU32::new(u32::MAX);
    pub static PASSKEY: AtomicU32 = AtomicU32::new(0);

    /// Attribute handle → channel, filled as characteristics register.
    pub(super) static HANDLES: Mutex<heapless::Vec<(u16, GattChannel), 24>> =
        Mutex::new(heapless::Vec::new());

    pub(super) fn handle_of(channel: GattChannel) -> Option<u16> {
        HANDLES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, c)| *c == channel)
            .map(|(h, _)| *h)
    }

    fn channel_of(handle: u16) -> Option<GattChannel> {
        HANDLES
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, c)| *c)
    }

    fn to_esp_uuid(uuid: u128) -> esp_bt_uuid_t {
        // SAFETY: esp_bt_uuid_t is a plain C struct; zero is a valid value.
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    fn from_esp_uuid(t: &esp_bt_uuid_t) -> Option<u128> {
        // SAFETY: the union is read as uuid128 only when len says so.
        (t.len == 16).then(|| u128::from_le_bytes(unsafe { t.uuid.uuid128 }))
    }

    pub(super) fn adv_params() -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            // SAFETY: remaining fields are plain integers / addresses.
            ..unsafe { core::mem::zeroed() }
        }
    }

    pub(super) unsafe extern "C" fn gap_handler(
        event: esp_gap_ble_cb_event_t,
        param: *mut esp_ble_gap_cb_param_t,
    ) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_SEC_REQ_EVT => unsafe {
                esp_ble_gap_security_rsp((*param).ble_security.ble_req.bd_addr.as_mut_ptr(), true);
            },
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_PASSKEY_NOTIF_EVT => {
                let key = unsafe { (*param).ble_security.key_notif.passkey };
                PASSKEY.store(key, Ordering::Relaxed);
                info!("BLE GAP: passkey {:06}", key);
                if let Some(b) = BRIDGE.get() {
                    b.events.set(EventFlags::PASSKEY_DISPLAY);
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_AUTH_CMPL_EVT => {
                let p = unsafe { &(*param).ble_security.auth_cmpl };
                if p.success {
                    info!("BLE GAP: paired");
                } else {
                    warn!("BLE GAP: pairing failed (reason={})", p.fail_reason);
                }
                if let Some(b) = BRIDGE.get() {
                    b.events.clear(EventFlags::PASSKEY_DISPLAY);
                }
            }
            _ => {}
        }
    }

    unsafe fn add_char(service_handle: u16, uuid: u128, perms: u8) {
        let mut perm: u32 = 0;
        let mut prop: u32 = 0;
        if perms & PERM_READ != 0 {
            perm |= ESP_GATT_PERM_READ_ENCRYPTED;
            prop |= ESP_GATT_CHAR_PROP_BIT_READ;
        }
        if perms & PERM_WRITE != 0 {
            perm |= ESP_GATT_PERM_WRITE_ENCRYPTED;
            prop |= ESP_GATT_CHAR_PROP_BIT_WRITE;
        }
        if perms & PERM_NOTIFY != 0 {
            prop |= ESP_GATT_CHAR_PROP_BIT_NOTIFY;
        }
        let mut char_uuid = to_esp_uuid(uuid);
        unsafe {
            esp_ble_gatts_add_char(
                service_handle,
                &mut char_uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    unsafe fn respond(
        gatts_if: esp_gatt_if_t,
        conn_id: u16,
        trans_id: u32,
        handle: u16,
        status: esp_gatt_status_t,
        data: &[u8],
    ) {
        // SAFETY: esp_gatt_rsp_t is a plain C union; zero is valid.
        let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
        unsafe {
            rsp.attr_value.handle = handle;
            rsp.attr_value.len = data.len() as u16;
            rsp.attr_value.value[..data.len()].copy_from_slice(data);
            esp_ble_gatts_send_response(gatts_if, conn_id, trans_id, status, &mut rsp);
        }
    }

    pub(super) unsafe extern "C" fn gatts_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                GATTS_IF.store(u32::from(gatts_if), Ordering::Relaxed);
                for (inst, svc) in SERVICES.iter().enumerate() {
                    let mut id = esp_gatt_srvc_id_t {
                        id: esp_gatt_id_t {
                            uuid: to_esp_uuid(super::uuid(*svc)),
                            inst_id: inst as u8,
                        },
                        is_primary: true,
                    };
                    let chars = GATT_TABLE.iter().filter(|e| e.service == *svc).count();
                    // Service declaration plus two attributes per characteristic and a CCCD.
                    unsafe {
                        esp_ble_gatts_create_service(gatts_if, &mut id, (1 + chars * 3) as u16);
                    }
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let p = unsafe { &(*param).create };
                let Some(svc_uuid) = from_esp_uuid(&p.service_id.id.uuid) else {
                    return;
                };
                unsafe { esp_ble_gatts_start_service(p.service_handle) };
                for e in GATT_TABLE.iter().filter(|e| super::uuid(e.service) == svc_uuid) {
                    unsafe { add_char(p.service_handle, super::uuid(e.suffix), e.perms) };
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let p = unsafe { &(*param).add_char };
                let Some(entry) = from_esp_uuid(&p.char_uuid).and_then(super::lookup_uuid) else {
                    return;
                };
                let mut table = HANDLES.lock().unwrap_or_else(PoisonError::into_inner);
                if table.push((p.attr_handle, entry.channel)).is_err() {
                    warn!("BLE GATTS: handle table full");
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let p = unsafe { &(*param).connect };
                CONN_ID.store(u32::from(p.conn_id), Ordering::Relaxed);
                info!("BLE GATTS: central connected (conn_id={})", p.conn_id);
                unsafe {
                    esp_ble_set_encryption(
                        p.remote_bda.as_ptr().cast_mut(),
                        esp_ble_sec_act_t_ESP_BLE_SEC_ENCRYPT_MITM,
                    );
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                CONN_ID.store(u32::MAX, Ordering::Relaxed);
                info!("BLE GATTS: central disconnected");
                let mut adv = adv_params();
                unsafe { esp_ble_gap_start_advertising(&mut adv) };
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let p = unsafe { &(*param).write };
                let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
                let status = match (channel_of(p.handle), BRIDGE.get()) {
                    (Some(channel), Some(b)) => match b.router.on_write(channel, data) {
                        Ok(()) => esp_gatt_status_t_ESP_GATT_OK,
                        Err(e) => {
                            warn!("BLE: write to {:?} rejected ({})", channel, e);
                            esp_gatt_status_t_ESP_GATT_ERROR
                        }
                    },
                    _ => esp_gatt_status_t_ESP_GATT_INVALID_HANDLE,
                };
                if p.need_rsp {
                    unsafe { respond(gatts_if, p.conn_id, p.trans_id, p.handle, status, &[]) };
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
                let p = unsafe { &(*param).read };
                let read = channel_of(p.handle)
                    .zip(BRIDGE.get())
                    .map(|(channel, b)| b.router.on_read(channel));
                match read {
                    Some(Ok(v)) => unsafe {
                        respond(gatts_if, p.conn_id, p.trans_id, p.handle, esp_gatt_status_t_ESP_GATT_OK, &v);
                    },
                    _ => unsafe {
                        respond(
                            gatts_if,
                            p.conn_id,
                            p.trans_id,
                            p.handle,
                            esp_gatt_status_t_ESP_GATT_READ_NOT_PERMIT,
                            &[],
                        );
                    },
                }
            }
            _ => {}
        }
    }
}

#[cfg(target_os = "espidf")]
pub use bluedroid::PASSKEY;

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Failed,
}

pub struct BleAdapter {
    router: Arc<GattRouter>,
    events: Arc<EventCoordinator>,
    device_name: heapless::String<24>,
    state: Mutex<BleState>,
    #[cfg(target_os = "espidf")]
    stack_up: core::sync::atomic::AtomicBool,
    /// Simulation: notifications sent while advertising.
    #[cfg(not(target_os = "espidf"))]
    sim_notified: Mutex<Vec<(TelemetryChar, GattValue)>>,
}

impl BleAdapter {
    pub fn new(
        router: Arc<GattRouter>,
        events: Arc<EventCoordinator>,
        device_name: heapless::String<24>,
    ) -> Self {
        Self {
            router,
            events,
            device_name,
            state: Mutex::new(BleState::Idle),
            #[cfg(target_os = "espidf")]
            stack_up: core::sync::atomic::AtomicBool::new(false),
            #[cfg(not(target_os = "espidf"))]
            sim_notified: Mutex::new(Vec::new()),
        }
    }

    pub fn router(&self) -> &GattRouter {
        &self.router
    }

    pub fn state(&self) -> BleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.state() == BleState::Advertising
    }

    /// Start advertising and enter configuration mode.
    pub fn start(&self) {
        info!("BLE: advertising as '{}'", self.device_name);
        let next = if self.platform_start() {
            self.events.set(EventFlags::CONFIG_MODE);
            BleState::Advertising
        } else {
            BleState::Failed
        };
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn stop(&self) {
        self.platform_stop();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = BleState::Idle;
        self.events
            .clear(EventFlags::CONFIG_MODE | EventFlags::PASSKEY_DISPLAY);
        info!("BLE: stopped");
    }

    /// Toggle on the configuration button.
    pub fn toggle(&self) {
        if self.is_active() {
            self.stop();
        } else {
            self.start();
        }
    }

    fn notify(&self, t: TelemetryChar, v: GattValue) {
        if self.is_active() {
            self.platform_notify(t, &v);
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&self) -> bool {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;

        if self.stack_up.load(Ordering::Acquire) {
            let mut adv = bluedroid::adv_params();
            // SAFETY: stack is initialised; adv outlives the call.
            unsafe { esp_ble_gap_start_advertising(&mut adv) };
            return true;
        }

        let _ = bluedroid::BRIDGE.set(bluedroid::Bridge {
            router: Arc::clone(&self.router),
            events: Arc::clone(&self.events),
        });

        // SAFETY: single caller (main task); Bluedroid APIs are called in
        // the documented init order.
        unsafe {
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);
            let mut bt_cfg = esp_bt_controller_config_t::default();
            for (step, ret) in [
                ("controller_init", esp_bt_controller_init(&mut bt_cfg)),
                ("controller_enable", esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE)),
                ("bluedroid_init", esp_bluedroid_init()),
                ("bluedroid_enable", esp_bluedroid_enable()),
            ] {
                if ret != ESP_OK {
                    log::error!("BLE: {} failed ({})", step, ret);
                    return false;
                }
            }

            esp_ble_gap_register_callback(Some(bluedroid::gap_handler));
            esp_ble_gatts_register_callback(Some(bluedroid::gatts_handler));
            esp_ble_gatts_app_register(0);

            // Passkey entry: the device displays, the phone types.
            let auth_req = esp_ble_auth_req_t_ESP_LE_AUTH_REQ_SC_MITM_BOND;
            let iocap = esp_ble_io_cap_t_ESP_IO_CAP_OUT;
            let key_size: u8 = 16;
            let keys: u8 = (ESP_BLE_ENC_KEY_MASK | ESP_BLE_ID_KEY_MASK) as u8;
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_AUTHEN_REQ_MODE,
                &auth_req as *const _ as *mut _,
                core::mem::size_of_val(&auth_req) as u8,
            );
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_IOCAP_MODE,
                &iocap as *const _ as *mut _,
                core::mem::size_of_val(&iocap) as u8,
            );
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_MAX_KEY_SIZE,
                &key_size as *const _ as *mut _,
                1,
            );
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_SET_INIT_KEY,
                &keys as *const _ as *mut _,
                1,
            );
            esp_ble_gap_set_security_param(
                esp_ble_sm_param_t_ESP_BLE_SM_SET_RSP_KEY,
                &keys as *const _ as *mut _,
                1,
            );

            let mut name = [0u8; 25];
            name[..self.device_name.len()].copy_from_slice(self.device_name.as_bytes());
            esp_ble_gap_set_device_name(name.as_ptr().cast());

            let mut adv = bluedroid::adv_params();
            esp_ble_gap_start_advertising(&mut adv);
        }
        self.stack_up.store(true, Ordering::Release);
        true
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&self) -> bool {
        info!("BLE(sim): advertising '{}'", self.device_name);
        true
    }

    #[cfg(target_os = "espidf")]
    fn platform_stop(&self) {
        // The stack stays initialised; only advertising and the link stop.
        // SAFETY: plain Bluedroid calls, valid in any stack state.
        unsafe {
            esp_idf_svc::sys::esp_ble_gap_stop_advertising();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_stop(&self) {
        info!("BLE(sim): stopped advertising");
    }

    #[cfg(target_os = "espidf")]
    fn platform_notify(&self, t: TelemetryChar, v: &[u8]) {
        use core::sync::atomic::Ordering;
        let conn = bluedroid::CONN_ID.load(Ordering::Relaxed);
        let Some(handle) = bluedroid::handle_of(GattChannel::Telemetry(t)) else {
            return;
        };
        if conn == u32::MAX {
            return;
        }
        // SAFETY: v outlives the call; Bluedroid copies the value.
        unsafe {
            esp_idf_svc::sys::esp_ble_gatts_send_indicate(
                bluedroid::GATTS_IF.load(Ordering::Relaxed) as u8,
                conn as u16,
                handle,
                v.len() as u16,
                v.as_ptr().cast_mut(),
                false,
            );
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_notify(&self, t: TelemetryChar, v: &[u8]) {
        self.sim_notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((t, value(v)));
    }

    /// Simulation: notifications sent so far.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_notifications(&self) -> Vec<(TelemetryChar, GattValue)> {
        self.sim_notified
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ───────────────────────────────────────────────────────────────
// EventSink: mirror readings into the telemetry characteristics
// ───────────────────────────────────────────────────────────────

impl EventSink for BleAdapter {
    fn emit(&self, event: &AppEvent) {
        match event {
            AppEvent::TemperatureMeasured { celsius, .. } => {
                self.notify(TelemetryChar::Temperature, value(&celsius.to_le_bytes()));
            }
            AppEvent::PhMeasured { ph, .. } => {
                self.notify(TelemetryChar::Ph, value(&ph.to_le_bytes()));
            }
            AppEvent::FeedCompleted { success, .. } => {
                self.notify(TelemetryChar::FeedSuccess, value(&[u8::from(*success)]));
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
