//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements        | Connects to                         |
//! |--------------|-------------------|-------------------------------------|
//! | `ble`        | (GATT router)     | Bluedroid GATT server               |
//! | `cert_store` | (credential I/O)  | StoragePort namespaces              |
//! | `device_id`  | (MAC lookup)      | eFuse base MAC                      |
//! | `display`    | DisplayPort       | Serial log                          |
//! | `log_sink`   | EventSink         | Serial log output, fan-out          |
//! | `mqtt`       | BrokerPort        | ESP-IDF MQTT client / sim outbox    |
//! | `nvs`        | StoragePort       | NVS / in-memory store               |
//! | `time`       | ClockPort         | SNTP wall clock, esp_timer          |
//! | `wifi`       | NetworkPort       | ESP-IDF WiFi STA                    |

pub mod ble;
pub mod cert_store;
pub mod device_id;
pub mod display;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod time;
pub mod wifi;
