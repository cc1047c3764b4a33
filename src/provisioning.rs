//! Local-link provisioning: chunked credential writes over BLE.
//!
//! A phone writes certificates, keys and identifiers piecewise into one
//! characteristic per [`ProvisionChannel`]; each write lands here as a
//! fragment.  A write on the distinguished apply characteristic flushes
//! every non-empty channel to NVS and tells the rest of the firmware to
//! reload its configuration.
//!
//! ```text
//!  GATT write (id, bytes)
//!        │
//!        ▼
//!  ┌──────────────┐  fragment   ┌────────────────────────────────┐
//!  │ classify(id) │────────────▶│ LocalAssembler                 │
//!  └──────┬───────┘             │  topic_id   [ 64]              │
//!         │ apply (0xE5)        │  cert/key/ca[2048] x3          │
//!         ▼                     │  ssid [32]  pass [64]          │
//!  ┌──────────────┐  take_all   └────────────────────────────────┘
//!  │ Provisioning │◀──────────────────────┘
//!  │ Service      │──▶ CredentialStore ──▶ PROVISION_TRIGGER
//!  └──────────────┘
//! ```
//!
//! Channel switching: a fragment for a channel other than the one in
//! progress restarts the arriving channel's buffer from empty.  Buffers
//! are `heapless::Vec`s, so the capacity bound is enforced by the type;
//! bytes past capacity are dropped and reported as an overflow.

use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use crate::adapters::cert_store::CredentialStore;
use crate::app::events::AppEvent;
use crate::app::ports::{EventSink, StorageError};
use crate::events::{EventCoordinator, EventFlags};

/// Characteristic id of the apply trigger.
pub const APPLY_CHANNEL_ID: u8 = 0xE5;

pub const TOPIC_ID_CAPACITY: usize = 64;
pub const PEM_CAPACITY: usize = 2048;
pub const SSID_CAPACITY: usize = 32;
pub const PASSWORD_CAPACITY: usize = 64;

// ═══════════════════════════════════════════════════════════════
//  Channels
// ═══════════════════════════════════════════════════════════════

/// Logical provisioning channels, one per writable characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionChannel {
    WifiSsid,
    WifiPassword,
    Certificate,
    PrivateKey,
    RootCa,
    TopicId,
}

impl ProvisionChannel {
    pub const ALL: [Self; 6] = [
        Self::WifiSsid,
        Self::WifiPassword,
        Self::Certificate,
        Self::PrivateKey,
        Self::RootCa,
        Self::TopicId,
    ];

    /// Last byte of the characteristic UUID.
    pub const fn id(self) -> u8 {
        match self {
            Self::WifiSsid => 0xE1,
            Self::WifiPassword => 0xE2,
            Self::Certificate => 0xE3,
            Self::PrivateKey => 0xE4,
            Self::RootCa => 0xE6,
            Self::TopicId => 0xE7,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.id() == id)
    }

    pub const fn capacity(self) -> usize {
        match self {
            Self::WifiSsid => SSID_CAPACITY,
            Self::WifiPassword => PASSWORD_CAPACITY,
            Self::Certificate | Self::PrivateKey | Self::RootCa => PEM_CAPACITY,
            Self::TopicId => TOPIC_ID_CAPACITY,
        }
    }

    pub const fn is_wifi(self) -> bool {
        matches!(self, Self::WifiSsid | Self::WifiPassword)
    }
}

/// What a write on a provisioning characteristic addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionTarget {
    Channel(ProvisionChannel),
    Apply,
}

pub fn classify(id: u8) -> Result<ProvisionTarget, ChunkError> {
    if id == APPLY_CHANNEL_ID {
        return Ok(ProvisionTarget::Apply);
    }
    ProvisionChannel::from_id(id)
        .map(ProvisionTarget::Channel)
        .ok_or(ChunkError::UnknownChannel(id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// The fragment did not fit; `accepted` bytes were kept.
    Overflow { accepted: usize, dropped: usize },
    UnknownChannel(u8),
}

impl core::fmt::Display for ChunkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Overflow { accepted, dropped } => {
                write!(f, "buffer full ({accepted}B kept, {dropped}B dropped)")
            }
            Self::UnknownChannel(id) => write!(f, "unknown channel 0x{id:02X}"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Bounded buffers
// ═══════════════════════════════════════════════════════════════

/// Capacity-capped byte buffer.
trait ChunkBuffer {
    /// Append as much of `bytes` as fits; returns the number accepted.
    fn append(&mut self, bytes: &[u8]) -> usize;
    fn reset(&mut self);
    fn bytes(&self) -> &[u8];
}

impl<const N: usize> ChunkBuffer for heapless::Vec<u8, N> {
    fn append(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(N - self.len());
        match self.extend_from_slice(&bytes[..take]) {
            Ok(()) => take,
            Err(()) => 0,
        }
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Assembler
// ═══════════════════════════════════════════════════════════════

/// One bounded buffer per channel plus the channel currently being written.
pub struct LocalAssembler {
    wifi_ssid: heapless::Vec<u8, SSID_CAPACITY>,
    wifi_password: heapless::Vec<u8, PASSWORD_CAPACITY>,
    certificate: heapless::Vec<u8, PEM_CAPACITY>,
    private_key: heapless::Vec<u8, PEM_CAPACITY>,
    root_ca: heapless::Vec<u8, PEM_CAPACITY>,
    topic_id: heapless::Vec<u8, TOPIC_ID_CAPACITY>,
    in_progress: Option<ProvisionChannel>,
}

impl Default for LocalAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAssembler {
    pub fn new() -> Self {
        Self {
            wifi_ssid: heapless::Vec::new(),
            wifi_password: heapless::Vec::new(),
            certificate: heapless::Vec::new(),
            private_key: heapless::Vec::new(),
            root_ca: heapless::Vec::new(),
            topic_id: heapless::Vec::new(),
            in_progress: None,
        }
    }

    fn buffer(&self, channel: ProvisionChannel) -> &dyn ChunkBuffer {
        match channel {
            ProvisionChannel::WifiSsid => &self.wifi_ssid,
            ProvisionChannel::WifiPassword => &self.wifi_password,
            ProvisionChannel::Certificate => &self.certificate,
            ProvisionChannel::PrivateKey => &self.private_key,
            ProvisionChannel::RootCa => &self.root_ca,
            ProvisionChannel::TopicId => &self.topic_id,
        }
    }

    fn buffer_mut(&mut self, channel: ProvisionChannel) -> &mut dyn ChunkBuffer {
        match channel {
            ProvisionChannel::WifiSsid => &mut self.wifi_ssid,
            ProvisionChannel::WifiPassword => &mut self.wifi_password,
            ProvisionChannel::Certificate => &mut self.certificate,
            ProvisionChannel::PrivateKey => &mut self.private_key,
            ProvisionChannel::RootCa => &mut self.root_ca,
            ProvisionChannel::TopicId => &mut self.topic_id,
        }
    }

    /// Accumulate one fragment.
    ///
    /// Switching to a channel other than the one in progress restarts that
    /// channel from empty.  On overflow the bytes that fit are kept.
    pub fn on_fragment(
        &mut self,
        channel: ProvisionChannel,
        bytes: &[u8],
    ) -> Result<usize, ChunkError> {
        if self.in_progress != Some(channel) {
            self.buffer_mut(channel).reset();
            self.in_progress = Some(channel);
        }
        let accepted = self.buffer_mut(channel).append(bytes);
        let dropped = bytes.len() - accepted;
        if dropped > 0 {
            warn!(
                "Provisioning: {:?} truncated at {}B ({}B dropped)",
                channel,
                channel.capacity(),
                dropped
            );
            return Err(ChunkError::Overflow { accepted, dropped });
        }
        Ok(accepted)
    }

    pub fn len(&self, channel: ProvisionChannel) -> usize {
        self.buffer(channel).bytes().len()
    }

    pub fn contents(&self, channel: ProvisionChannel) -> &[u8] {
        self.buffer(channel).bytes()
    }

    pub fn in_progress(&self) -> Option<ProvisionChannel> {
        self.in_progress
    }

    /// Move one channel's payload out, leaving it empty.
    pub fn take(&mut self, channel: ProvisionChannel) -> Vec<u8> {
        let buf = self.buffer_mut(channel);
        let out = buf.bytes().to_vec();
        buf.reset();
        if self.in_progress == Some(channel) {
            self.in_progress = None;
        }
        out
    }

    /// Move every non-empty payload out and clear all channels.
    pub fn take_all(&mut self) -> heapless::Vec<(ProvisionChannel, Vec<u8>), 6> {
        let mut out = heapless::Vec::new();
        for channel in ProvisionChannel::ALL {
            if self.len(channel) > 0 {
                // At most one entry per channel.
                let _ = out.push((channel, self.take(channel)));
            }
        }
        self.in_progress = None;
        out
    }
}

// ═══════════════════════════════════════════════════════════════
//  Service
// ═══════════════════════════════════════════════════════════════

/// Result of a characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Fragment buffered (bytes accepted).
    Buffered(usize),
    Applied(ApplyReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub persisted: heapless::Vec<ProvisionChannel, 6>,
    pub failed: heapless::Vec<(ProvisionChannel, StorageError), 6>,
}

/// Assembler shared between BLE callbacks, plus the persistence path.
pub struct ProvisioningService {
    assembler: Mutex<LocalAssembler>,
    credentials: CredentialStore,
    events: Arc<EventCoordinator>,
    sink: Arc<dyn EventSink>,
}

impl ProvisioningService {
    pub fn new(
        credentials: CredentialStore,
        events: Arc<EventCoordinator>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            assembler: Mutex::new(LocalAssembler::new()),
            credentials,
            events,
            sink,
        }
    }

    fn assembler(&self) -> std::sync::MutexGuard<'_, LocalAssembler> {
        self.assembler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a write on characteristic `id`.
    pub fn on_write(&self, id: u8, bytes: &[u8]) -> Result<WriteOutcome, ChunkError> {
        match classify(id)? {
            ProvisionTarget::Channel(channel) => {
                let n = self.assembler().on_fragment(channel, bytes)?;
                Ok(WriteOutcome::Buffered(n))
            }
            ProvisionTarget::Apply => Ok(WriteOutcome::Applied(self.apply())),
        }
    }

    /// Persist every buffered channel and raise the reload flags.
    ///
    /// The assembler lock is released before any storage I/O.  Nothing is
    /// signalled when no channel held data.
    pub fn apply(&self) -> ApplyReport {
        let payloads = self.assembler().take_all();
        let mut report = ApplyReport::default();

        for (channel, data) in &payloads {
            match self.credentials.persist(*channel, data) {
                Ok(()) => {
                    let _ = report.persisted.push(*channel);
                }
                Err(e) => {
                    warn!("Provisioning: persisting {:?} failed ({})", channel, e);
                    let _ = report.failed.push((*channel, e));
                }
            }
        }

        if report.persisted.is_empty() {
            info!("Provisioning: apply with nothing to persist");
            return report;
        }

        let mut flags = EventFlags::PROVISION_TRIGGER;
        if report.persisted.iter().any(|c| c.is_wifi()) {
            flags |= EventFlags::WIFI_CONFIG_SAVED;
        }
        self.events.set(flags);
        info!("Provisioning: applied {:?}", report.persisted);
        self.sink.emit(&AppEvent::ProvisioningApplied {
            channels: report.persisted.len() as u8,
        });
        report
    }

    pub fn buffered_len(&self, channel: ProvisionChannel) -> usize {
        self.assembler().len(channel)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_roundtrip() {
        for c in ProvisionChannel::ALL {
            assert_eq!(ProvisionChannel::from_id(c.id()), Some(c));
        }
        assert_eq!(classify(APPLY_CHANNEL_ID), Ok(ProvisionTarget::Apply));
        assert_eq!(classify(0x42), Err(ChunkError::UnknownChannel(0x42)));
    }

    #[test]
    fn fragments_on_same_channel_append() {
        let mut a = LocalAssembler::new();
        a.on_fragment(ProvisionChannel::TopicId, b"tank-").unwrap();
        a.on_fragment(ProvisionChannel::TopicId, b"7").unwrap();
        assert_eq!(a.contents(ProvisionChannel::TopicId), b"tank-7");
    }

    #[test]
    fn truncates_at_capacity() {
        let mut a = LocalAssembler::new();
        let chunk = [b'x'; 512];
        let mut total = 0;
        for _ in 0..4 {
            total += a.on_fragment(ProvisionChannel::Certificate, &chunk).unwrap();
        }
        assert_eq!(total, 2048);
        let err = a
            .on_fragment(ProvisionChannel::Certificate, &chunk[..152])
            .unwrap_err();
        assert_eq!(err, ChunkError::Overflow { accepted: 0, dropped: 152 });
        assert_eq!(a.len(ProvisionChannel::Certificate), 2048);
    }

    #[test]
    fn partial_fit_keeps_the_head() {
        let mut a = LocalAssembler::new();
        a.on_fragment(ProvisionChannel::WifiSsid, &[b'a'; 30]).unwrap();
        let err = a.on_fragment(ProvisionChannel::WifiSsid, b"bcde").unwrap_err();
        assert_eq!(err, ChunkError::Overflow { accepted: 2, dropped: 2 });
        assert_eq!(&a.contents(ProvisionChannel::WifiSsid)[28..], b"aabc");
    }

    #[test]
    fn switching_back_restarts_channel() {
        let mut a = LocalAssembler::new();
        a.on_fragment(ProvisionChannel::Certificate, b"AAAA").unwrap();
        a.on_fragment(ProvisionChannel::PrivateKey, b"KKKK").unwrap();
        a.on_fragment(ProvisionChannel::Certificate, b"BB").unwrap();
        assert_eq!(a.contents(ProvisionChannel::Certificate), b"BB");
        assert_eq!(a.contents(ProvisionChannel::PrivateKey), b"KKKK");
    }

    #[test]
    fn take_all_skips_empty_and_clears() {
        let mut a = LocalAssembler::new();
        a.on_fragment(ProvisionChannel::WifiSsid, b"reef").unwrap();
        a.on_fragment(ProvisionChannel::TopicId, b"t").unwrap();
        let all = a.take_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], (ProvisionChannel::WifiSsid, b"reef".to_vec()));
        for c in ProvisionChannel::ALL {
            assert_eq!(a.len(c), 0);
        }
        assert_eq!(a.in_progress(), None);
    }

    #[test]
    fn take_returns_owned_payload() {
        let mut a = LocalAssembler::new();
        a.on_fragment(ProvisionChannel::RootCa, b"ca").unwrap();
        assert_eq!(a.take(ProvisionChannel::RootCa), b"ca".to_vec());
        assert_eq!(a.len(ProvisionChannel::RootCa), 0);
    }
}
