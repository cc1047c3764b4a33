//! Inbound message reassembly for the broker link.
//!
//! The MQTT client splits a large publish into several deliveries: the
//! first carries the topic and the declared total length, the rest carry
//! only bytes.  [`CloudAssembler`] turns that stream back into whole
//! [`InboundDocument`]s.
//!
//! ```text
//!  (topic, 300, 100B) ──▶ Pending      buffer reserved for exactly 300B
//!  (None,  300, 100B) ──▶ Pending
//!  (None,  300, 100B) ──▶ Complete(doc)  buffer handed over, slot empty
//! ```
//!
//! Rules:
//! - An unchunked message completes immediately and never touches the
//!   pending slot.
//! - Only one chunked message is assembled at a time.  A second chunked
//!   message starting while one is pending is rejected and its
//!   continuations are skipped; the pending message is kept.
//! - Bytes beyond the declared length are logged and discarded.
//! - The client delivers one message's fragments back to back, so a new
//!   first fragment ends whatever skip was in progress.  Continuations
//!   carry no topic; alternating continuations of two messages cannot be
//!   told apart and are not supported.
//! - Allocation failure drops the message; the shadow service republishes
//!   state on the next get/delta, so nothing retries locally.

use log::{debug, warn};

use super::topics::{DocumentKind, TopicSet};

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundDocument {
    pub kind: DocumentKind,
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Outcome of one delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembly {
    /// More fragments expected.
    Pending,
    /// Fragment belonged to a rejected message and was discarded.
    Skipped,
    Complete(InboundDocument),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyError {
    /// The reassembly buffer could not be allocated.
    Alloc,
    /// Declared length above the configured limit.
    TooLarge { declared: usize, limit: usize },
    /// A chunked message started while another was pending.
    Interleaved,
    /// A continuation arrived with no message pending.
    Orphan,
    /// Topic is not one this device subscribes to.
    UnknownTopic,
}

impl core::fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Alloc => write!(f, "buffer allocation failed"),
            Self::TooLarge { declared, limit } => {
                write!(f, "declared {declared}B exceeds limit {limit}B")
            }
            Self::Interleaved => write!(f, "second chunked message while one pending"),
            Self::Orphan => write!(f, "continuation without a pending message"),
            Self::UnknownTopic => write!(f, "unknown topic"),
        }
    }
}

struct PendingMessage {
    kind: DocumentKind,
    topic: String,
    declared: usize,
    buf: Vec<u8>,
}

pub struct CloudAssembler {
    topics: TopicSet,
    max_len: usize,
    pending: Option<PendingMessage>,
    /// Continuation bytes still to discard for a rejected message.
    skip_remaining: usize,
}

impl CloudAssembler {
    pub fn new(topics: TopicSet, max_len: usize) -> Self {
        Self {
            topics,
            max_len,
            pending: None,
            skip_remaining: 0,
        }
    }

    /// Replace the topic table (after re-provisioning).  Drops any
    /// partially assembled message.
    pub fn set_topics(&mut self, topics: TopicSet) {
        self.topics = topics;
        self.reset();
    }

    /// Forget any partial message (on disconnect).
    pub fn reset(&mut self) {
        if let Some(p) = self.pending.take() {
            debug!(
                "CloudAssembler: dropped partial '{}' ({}/{}B)",
                p.topic,
                p.buf.len(),
                p.declared
            );
        }
        self.skip_remaining = 0;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one delivery.  `topic` is present only on the first fragment
    /// of a message.
    pub fn on_fragment(
        &mut self,
        topic: Option<&str>,
        declared: usize,
        bytes: &[u8],
    ) -> Result<Assembly, AssemblyError> {
        match topic {
            Some(topic) => self.on_first(topic, declared, bytes),
            None => self.on_continuation(bytes),
        }
    }

    fn on_first(
        &mut self,
        topic: &str,
        declared: usize,
        bytes: &[u8],
    ) -> Result<Assembly, AssemblyError> {
        if self.skip_remaining > 0 {
            debug!(
                "CloudAssembler: '{}' started with {}B of a rejected message unseen",
                topic, self.skip_remaining
            );
            self.skip_remaining = 0;
        }
        let chunked = declared > bytes.len();
        let rest = declared.saturating_sub(bytes.len());

        let Some(kind) = self.topics.classify(topic) else {
            warn!("CloudAssembler: message on unknown topic '{}'", topic);
            self.skip(chunked, rest);
            return Err(AssemblyError::UnknownTopic);
        };

        if declared > self.max_len {
            warn!(
                "CloudAssembler: '{}' declares {}B (limit {}B), dropped",
                topic, declared, self.max_len
            );
            self.skip(chunked, rest);
            return Err(AssemblyError::TooLarge {
                declared,
                limit: self.max_len,
            });
        }

        if !chunked {
            if bytes.len() > declared {
                warn!(
                    "CloudAssembler: '{}' carried {}B past its declared {}B, discarded",
                    topic,
                    bytes.len() - declared,
                    declared
                );
            }
            return Ok(Assembly::Complete(InboundDocument {
                kind,
                topic: topic.to_owned(),
                payload: bytes[..declared].to_vec(),
            }));
        }

        if let Some(p) = &self.pending {
            warn!(
                "CloudAssembler: '{}' started while '{}' pending ({}/{}B), rejected",
                topic,
                p.topic,
                p.buf.len(),
                p.declared
            );
            self.skip(true, rest);
            return Err(AssemblyError::Interleaved);
        }

        let mut buf = Vec::new();
        if buf.try_reserve_exact(declared).is_err() {
            warn!("CloudAssembler: cannot allocate {}B for '{}', message lost", declared, topic);
            self.skip(true, rest);
            return Err(AssemblyError::Alloc);
        }
        buf.extend_from_slice(bytes);
        debug!("CloudAssembler: '{}' {}/{}B", topic, buf.len(), declared);
        self.pending = Some(PendingMessage {
            kind,
            topic: topic.to_owned(),
            declared,
            buf,
        });
        Ok(Assembly::Pending)
    }

    fn on_continuation(&mut self, bytes: &[u8]) -> Result<Assembly, AssemblyError> {
        if self.skip_remaining > 0 {
            self.skip_remaining = self.skip_remaining.saturating_sub(bytes.len());
            return Ok(Assembly::Skipped);
        }

        let Some(p) = self.pending.as_mut() else {
            warn!("CloudAssembler: {}B continuation with nothing pending", bytes.len());
            return Err(AssemblyError::Orphan);
        };

        let room = p.declared - p.buf.len();
        let take = bytes.len().min(room);
        if take < bytes.len() {
            warn!(
                "CloudAssembler: '{}' overran its declared {}B by {}B, discarded",
                p.topic,
                p.declared,
                bytes.len() - take
            );
        }
        p.buf.extend_from_slice(&bytes[..take]);

        if p.buf.len() < p.declared {
            return Ok(Assembly::Pending);
        }
        match self.pending.take() {
            Some(done) => Ok(Assembly::Complete(InboundDocument {
                kind: done.kind,
                topic: done.topic,
                payload: done.buf,
            })),
            None => Err(AssemblyError::Orphan),
        }
    }

    fn skip(&mut self, chunked: bool, rest: usize) {
        if chunked {
            self.skip_remaining = rest;
        }
    }
}
