//! Outbound telemetry payloads.
//!
//! Small JSON documents, one per metric topic:
//!
//! ```text
//! <prefix>/temp   {"value":24.5,"ts":1700000000}
//! <prefix>/ph     {"value":7.1,"ts":1700000000}
//! <prefix>/feed   {"ts":1700000000,"success":true,"next":1700043200}
//! <prefix>/log    {"ts":1700000000,"msg":"feed failed after 5 attempt(s)"}
//! ```

use serde::Serialize;

use super::log_buffer::LogRecord;
use super::topics::Metric;
use crate::app::state::AquariumState;

#[derive(Debug, Serialize)]
struct Reading {
    value: f32,
    ts: u64,
}

#[derive(Debug, Serialize)]
struct Feed {
    ts: u64,
    success: bool,
    next: u64,
}

#[derive(Debug, Serialize)]
struct Log<'a> {
    ts: u64,
    msg: &'a str,
}

/// Payload for a measured metric from the current state snapshot.
/// `None` for [`Metric::Log`], which is built from log records instead.
pub fn state_payload(metric: Metric, state: &AquariumState) -> Option<serde_json::Result<Vec<u8>>> {
    match metric {
        Metric::Temperature => Some(serde_json::to_vec(&Reading {
            value: state.temperature,
            ts: state.last_temp_time,
        })),
        Metric::Ph => Some(serde_json::to_vec(&Reading {
            value: state.ph,
            ts: state.last_ph_time,
        })),
        Metric::Feed => Some(serde_json::to_vec(&Feed {
            ts: state.last_feed_time,
            success: state.last_feed_success,
            next: state.next_feed_time,
        })),
        Metric::Log => None,
    }
}

pub fn log_payload(record: &LogRecord) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&Log {
        ts: record.ts,
        msg: &record.msg,
    })
}
