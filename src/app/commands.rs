//! Inbound commands to the application core.
//!
//! These represent actions requested by the outside world (BLE command
//! service, cloud shadow delta, plain-text command topic) that the
//! [`CommandExecutor`] applies to the shared state and the event flags.
//! All three sources produce the same [`AppCommand`]s.

use std::sync::Arc;

use log::{info, warn};

use super::ports::StorageError;
use super::state::AquariumStore;
use crate::events::{EventCoordinator, EventFlags};

/// Alarm window bound addressed by a threshold command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    TempLower,
    TempUpper,
    PhLower,
    PhUpper,
}

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppCommand {
    SetTempInterval(u32),
    SetPhInterval(u32),
    SetFeedInterval(u32),
    SetPublishInterval(u32),
    /// Take a temperature reading now.
    ForceTemp,
    /// Feed now.
    ForceFeed,
    /// Start a pH measurement (still needs confirmation).
    ForcePh,
    /// Confirm a pending pH measurement.
    ConfirmPh,
    SetThreshold(Threshold, f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// A binary write was shorter than its encoding.
    TooShort { expected: usize, got: usize },
    /// Text command not recognised.
    Unknown,
    /// Value present but unusable (negative, non-numeric, non-finite).
    InvalidValue,
    /// The state change could not be persisted.
    Storage(StorageError),
}

impl core::fmt::Display for CommandError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooShort { expected, got } => {
                write!(f, "write too short ({got} of {expected} bytes)")
            }
            Self::Unknown => write!(f, "unknown command"),
            Self::InvalidValue => write!(f, "invalid value"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl From<StorageError> for CommandError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// Decode a little-endian `u32` from the first four bytes of a write.
pub fn parse_le_u32(bytes: &[u8]) -> Result<u32, CommandError> {
    let raw: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(CommandError::TooShort {
            expected: 4,
            got: bytes.len(),
        })?;
    Ok(u32::from_le_bytes(raw))
}

impl AppCommand {
    /// Parse a plain-text command (`set temp 600`, `force feed`, ...).
    pub fn parse_text(text: &str) -> Result<Self, CommandError> {
        let mut words = text.split_whitespace();
        let verb = words.next().ok_or(CommandError::Unknown)?;
        let target = words.next().ok_or(CommandError::Unknown)?;
        let value = words.next();
        if words.next().is_some() {
            return Err(CommandError::Unknown);
        }

        let is = |w: &str, s: &str| w.eq_ignore_ascii_case(s);

        if is(verb, "set") {
            let secs: u32 = value
                .ok_or(CommandError::InvalidValue)?
                .parse()
                .map_err(|_| CommandError::InvalidValue)?;
            return match target {
                t if is(t, "temp") => Ok(Self::SetTempInterval(secs)),
                t if is(t, "ph") => Ok(Self::SetPhInterval(secs)),
                t if is(t, "feed") => Ok(Self::SetFeedInterval(secs)),
                t if is(t, "publish") => Ok(Self::SetPublishInterval(secs)),
                _ => Err(CommandError::Unknown),
            };
        }
        if value.is_some() {
            return Err(CommandError::Unknown);
        }
        match (verb, target) {
            (v, t) if is(v, "force") && is(t, "temp") => Ok(Self::ForceTemp),
            (v, t) if is(v, "force") && is(t, "feed") => Ok(Self::ForceFeed),
            (v, t) if is(v, "force") && is(t, "ph") => Ok(Self::ForcePh),
            (v, t) if is(v, "confirm") && is(t, "ph") => Ok(Self::ConfirmPh),
            _ => Err(CommandError::Unknown),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Executor
// ───────────────────────────────────────────────────────────────

/// Applies [`AppCommand`]s to the aquarium store and raises the flags the
/// worker tasks wait on.
#[derive(Clone)]
pub struct CommandExecutor {
    store: Arc<AquariumStore>,
    events: Arc<EventCoordinator>,
}

impl CommandExecutor {
    pub fn new(store: Arc<AquariumStore>, events: Arc<EventCoordinator>) -> Self {
        Self { store, events }
    }

    pub fn execute(&self, cmd: AppCommand, source: &'static str) -> Result<(), CommandError> {
        info!("Command({source}): {cmd:?}");
        match cmd {
            AppCommand::SetTempInterval(secs) => {
                self.store.update(true, |s| s.temp_interval_secs = secs)?;
                self.events.set(EventFlags::TEMP_INTERVAL_CHANGED);
            }
            AppCommand::SetPhInterval(secs) => {
                self.store.update(true, |s| s.ph_interval_secs = secs)?;
                self.events.set(EventFlags::PH_INTERVAL_CHANGED);
            }
            AppCommand::SetFeedInterval(secs) => {
                self.store.update(true, |s| {
                    s.feed_interval_secs = secs;
                    s.next_feed_time = s.compute_next_feed();
                })?;
                self.events.set(EventFlags::FEED_INTERVAL_CHANGED);
            }
            AppCommand::SetPublishInterval(secs) => {
                self.store.update(true, |s| s.publish_interval_secs = secs)?;
                self.events.set(EventFlags::PUBLISH_INTERVAL_CHANGED);
            }
            AppCommand::ForceTemp => {
                self.events.set(EventFlags::TEMP_SCHEDULED);
            }
            AppCommand::ForceFeed => {
                self.events.set(EventFlags::FEED_SCHEDULED);
            }
            AppCommand::ForcePh => {
                self.events.set(EventFlags::PH_SCHEDULED);
            }
            AppCommand::ConfirmPh => {
                self.events.set(EventFlags::PH_CONFIRMED);
            }
            AppCommand::SetThreshold(which, value) => {
                if !value.is_finite() {
                    warn!("Command({source}): non-finite threshold rejected");
                    return Err(CommandError::InvalidValue);
                }
                self.store.update(true, |s| match which {
                    Threshold::TempLower => s.temp_lower = value,
                    Threshold::TempUpper => s.temp_upper = value,
                    Threshold::PhLower => s.ph_lower = value,
                    Threshold::PhUpper => s.ph_upper = value,
                })?;
            }
        }
        Ok(())
    }
}
