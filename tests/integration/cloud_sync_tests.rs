//! Inbound cloud path: broker deliveries → reassembly → shadow reconciler.

use std::sync::Arc;

use serde_json::{Value, json};

use aquatest::adapters::mqtt::MqttAdapter;
use aquatest::app::events::AppEvent;
use aquatest::app::ports::BrokerPort;
use aquatest::cloud::channels;
use aquatest::cloud::reassembly::InboundDocument;
use aquatest::cloud::shadow::{ShadowError, ShadowReconciler};
use aquatest::cloud::topics::{DocumentKind, TopicSet};
use aquatest::events::EventFlags;

use crate::mock_hw::{Harness, harness};

const DEVICE: &str = "AA:BB:CC:DD:EE:FF";
const DELTA: &str = "$aws/things/AA:BB:CC:DD:EE:FF/shadow/update/delta";

struct Rig {
    h: Harness,
    broker: Arc<MqttAdapter>,
    reconciler: ShadowReconciler<MqttAdapter>,
}

fn rig() -> Rig {
    let h = harness();
    let broker = Arc::new(MqttAdapter::new(
        Arc::clone(&h.ctx.events),
        h.ctx.sink.clone(),
        TopicSet::new(DEVICE, None),
        h.ctx.config.cloud.max_document_len as usize,
    ));
    let reconciler = ShadowReconciler::new(
        h.ctx.executor(),
        Arc::clone(&broker),
        TopicSet::new(DEVICE, None),
        Arc::clone(&h.ctx.events),
    );
    Rig {
        h,
        broker,
        reconciler,
    }
}

fn delta(commands: Value) -> Vec<u8> {
    json!({ "state": { "commands": commands } }).to_string().into_bytes()
}

#[test]
fn chunked_delta_is_reassembled_and_applied_once() {
    let r = rig();
    // Pad the document to exactly 300 bytes.
    let mut body = delta(json!({ "settings": { "feed_frequency": 7200 } }));
    body.pop();
    let pad = 300 - body.len() - ",\"pad\":\"\"}".len();
    let tail = format!(",\"pad\":\"{}\"}}", "x".repeat(pad));
    body.extend_from_slice(tail.as_bytes());
    assert_eq!(body.len(), 300);

    r.broker.sim_deliver(Some(DELTA), 300, &body[..100]);
    r.broker.sim_deliver(None, 300, &body[100..200]);
    assert!(channels::try_next_document().is_none());
    r.broker.sim_deliver(None, 300, &body[200..]);

    let doc = channels::try_next_document().expect("one complete document");
    assert!(channels::try_next_document().is_none());
    assert_eq!(doc.kind, DocumentKind::Delta);
    assert_eq!(doc.payload, body);

    assert_eq!(r.reconciler.handle(&doc), Ok(true));
    assert_eq!(r.h.ctx.store.snapshot().feed_interval_secs, 7200);
}

#[test]
fn oversized_declaration_is_reported_as_lost() {
    let r = rig();
    let limit = r.h.ctx.config.cloud.max_document_len as usize;
    r.broker.sim_deliver(Some(DELTA), limit + 1, &[b'{'; 64]);
    r.broker.sim_deliver(None, limit + 1, &[b' '; 64]);

    assert_eq!(
        r.h.sink.count(|e| *e
            == AppEvent::MessageLost {
                reason: "document too large"
            }),
        1
    );
}

#[test]
fn invalid_sibling_does_not_block_valid_field() {
    let r = rig();
    let before = r.h.ctx.store.snapshot();
    let changed = r
        .reconciler
        .apply_delta(&delta(json!({
            "settings": { "temp_frequency": -5, "feed_frequency": 60 }
        })))
        .unwrap();

    assert!(changed);
    let after = r.h.ctx.store.snapshot();
    assert_eq!(after.temp_interval_secs, before.temp_interval_secs);
    assert_eq!(after.feed_interval_secs, 60);
    let flags = r.h.ctx.events.get();
    assert!(flags.contains(EventFlags::FEED_INTERVAL_CHANGED | EventFlags::SHADOW_SYNCED));
    assert!(!flags.contains(EventFlags::TEMP_INTERVAL_CHANGED));
}

#[test]
fn acknowledgement_is_queued_while_offline() {
    let r = rig();
    r.reconciler
        .apply_delta(&delta(json!({ "settings": { "temp_frequency": -5, "feed_frequency": 60 } })))
        .unwrap();

    // The broker is not connected, so the ack waits in the outbox.
    assert_eq!(r.broker.pending(), 1);
}

#[test]
fn force_flags_schedule_work_and_false_is_consumed() {
    let r = rig();
    let changed = r
        .reconciler
        .apply_delta(&delta(json!({
            "force": { "feed_force": true, "temp_force": false }
        })))
        .unwrap();

    assert!(changed);
    let flags = r.h.ctx.events.get();
    assert!(flags.contains(EventFlags::FEED_SCHEDULED));
    assert!(!flags.contains(EventFlags::TEMP_SCHEDULED));
}

#[test]
fn get_accepted_applies_desired_commands() {
    let r = rig();
    let doc = json!({
        "state": {
            "desired": { "commands": { "alarm": { "ph_lower": 6.8, "ph_upper": 7.6 } } },
            "reported": { "commands": { "alarm": { "ph_lower": 1.0 } } }
        }
    });
    assert_eq!(
        r.reconciler.apply_get_accepted(doc.to_string().as_bytes()),
        Ok(true)
    );
    let state = r.h.ctx.store.snapshot();
    assert!((state.ph_lower - 6.8).abs() < 1e-6);
    assert!((state.ph_upper - 7.6).abs() < 1e-6);
    assert!(r.h.ctx.events.get().contains(EventFlags::SHADOW_SYNCED));
}

#[test]
fn malformed_documents_change_nothing() {
    let r = rig();
    let before = r.h.ctx.store.snapshot();

    assert_eq!(
        r.reconciler.apply_delta(b"{\"state\": {\"commands\""),
        Err(ShadowError::Malformed)
    );
    assert_eq!(
        r.reconciler.apply_delta(br#"{"version": 3}"#),
        Err(ShadowError::Malformed)
    );
    assert_eq!(r.h.ctx.store.snapshot(), before);
    assert!(!r.h.ctx.events.get().contains(EventFlags::SHADOW_SYNCED));
}

#[test]
fn document_without_commands_still_counts_as_synced() {
    let r = rig();
    assert_eq!(r.reconciler.apply_delta(br#"{"state": {}}"#), Ok(false));
    assert!(r.h.ctx.events.get().contains(EventFlags::SHADOW_SYNCED));
}

#[test]
fn text_command_topic_runs_commands() {
    let r = rig();
    let doc = InboundDocument {
        kind: DocumentKind::Command,
        topic: format!("{DEVICE}/cmd"),
        payload: b"set temp 600".to_vec(),
    };
    assert_eq!(r.reconciler.handle(&doc), Ok(true));
    assert_eq!(r.h.ctx.store.snapshot().temp_interval_secs, 600);

    let junk = InboundDocument {
        payload: b"launch rockets".to_vec(),
        ..doc
    };
    assert_eq!(r.reconciler.handle(&junk), Ok(false));
}
