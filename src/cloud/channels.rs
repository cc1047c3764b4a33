//! Broker → reconciler hand-off.
//!
//! The MQTT event callback runs on the client's own task and must not
//! block on JSON parsing or NVS writes, so completed documents are posted
//! to a bounded `embassy-sync` channel and consumed by the cloud-inbound
//! task.
//!
//! ```text
//! ┌──────────────┐ InboundDocument ┌─────────────────┐
//! │ MQTT events  │────────────────▶│ cloud-inbound   │
//! │ (assembler)  │                 │ (reconciler)    │
//! └──────────────┘                 └─────────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;

use super::reassembly::InboundDocument;

/// Channel depth for inbound documents.
const INBOUND_DEPTH: usize = 4;

/// Completed inbound documents: broker callback → cloud-inbound task.
pub static INBOUND_DOCUMENTS: Channel<CriticalSectionRawMutex, InboundDocument, INBOUND_DEPTH> =
    Channel::new();

/// Post a document without blocking.  Returns `false` (and drops the
/// document) when the consumer has fallen behind.
pub fn offer(doc: InboundDocument) -> bool {
    match INBOUND_DOCUMENTS.try_send(doc) {
        Ok(()) => true,
        Err(embassy_sync::channel::TrySendError::Full(doc)) => {
            warn!("Cloud: inbound queue full, dropped '{}'", doc.topic);
            false
        }
    }
}

/// Block the calling thread until a document arrives.
pub fn next_document() -> InboundDocument {
    futures_lite::future::block_on(INBOUND_DOCUMENTS.receive())
}

pub fn try_next_document() -> Option<InboundDocument> {
    INBOUND_DOCUMENTS.try_receive().ok()
}
