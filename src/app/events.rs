//! Outbound application events.
//!
//! Domain services emit these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, mirror into a BLE
//! characteristic, queue for the cloud log topic.

use core::fmt;

/// Which measured quantity an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Temperature,
    Ph,
}

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Firmware finished booting.
    Started { version: &'static str },

    /// A temperature measurement produced a value.
    TemperatureMeasured { celsius: f32, samples: u8 },
    /// Every temperature sample was invalid.
    TemperatureFailed,

    PhMeasured { ph: f32, samples: u8 },
    PhFailed,
    /// No confirmation arrived within the window.
    PhCancelled,

    /// A measured value fell outside its configured window.
    ThresholdBreached {
        quantity: Quantity,
        value: f32,
        lower: f32,
        upper: f32,
    },

    /// A feeding cycle resolved.
    FeedCompleted { success: bool, attempts: u8 },

    /// Provisioned material was persisted (channel count).
    ProvisioningApplied { channels: u8 },

    /// An inbound cloud message could not be delivered.
    MessageLost { reason: &'static str },

    /// A remote or local command changed device settings.
    SettingsChanged { source: &'static str },
}

impl AppEvent {
    /// Warning-class events are kept for the cloud log topic.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::TemperatureFailed
                | Self::PhFailed
                | Self::ThresholdBreached { .. }
                | Self::FeedCompleted { success: false, .. }
                | Self::MessageLost { .. }
        )
    }
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { version } => write!(f, "started v{version}"),
            Self::TemperatureMeasured { celsius, samples } => {
                write!(f, "temperature {celsius:.2}C ({samples} samples)")
            }
            Self::TemperatureFailed => write!(f, "temperature read failed"),
            Self::PhMeasured { ph, samples } => write!(f, "pH {ph:.2} ({samples} samples)"),
            Self::PhFailed => write!(f, "pH read failed"),
            Self::PhCancelled => write!(f, "pH measurement cancelled"),
            Self::ThresholdBreached {
                quantity,
                value,
                lower,
                upper,
            } => {
                let name = match quantity {
                    Quantity::Temperature => "temperature",
                    Quantity::Ph => "pH",
                };
                write!(f, "{name} {value:.2} outside {lower:.2}..{upper:.2}")
            }
            Self::FeedCompleted { success: true, attempts } => {
                write!(f, "feed confirmed after {attempts} attempt(s)")
            }
            Self::FeedCompleted { success: false, attempts } => {
                write!(f, "feed failed after {attempts} attempt(s)")
            }
            Self::ProvisioningApplied { channels } => {
                write!(f, "provisioning applied ({channels} channel(s))")
            }
            Self::MessageLost { reason } => write!(f, "cloud message lost: {reason}"),
            Self::SettingsChanged { source } => write!(f, "settings changed via {source}"),
        }
    }
}
