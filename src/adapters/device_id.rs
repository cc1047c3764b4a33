//! Device identity derived from the ESP32 factory MAC address.
//!
//! - Device id `AA:BB:CC:DD:EE:FF` (full MAC, uppercase hex).  Used as the
//!   MQTT client id, the shadow thing name and the telemetry topic prefix.
//! - BLE local name `aquatest-ddeeff` (last 3 bytes, lowercase).
//!
//! Both are deterministic across reboots (factory-burned eFuse MAC).

use core::fmt::Write;

/// "AA:BB:CC:DD:EE:FF" is 17 chars.
pub type DeviceIdString = heapless::String<17>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the 6 bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

pub fn device_id(mac: &MacAddress) -> DeviceIdString {
    let mut id = DeviceIdString::new();
    let _ = write!(
        id,
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    id
}

/// BLE advertising name: `aquatest-xxyyzz`.
pub fn ble_name(mac: &MacAddress) -> heapless::String<24> {
    let mut name = heapless::String::<24>::new();
    let _ = write!(name, "aquatest-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    name
}
