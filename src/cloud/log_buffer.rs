//! Bounded buffer of warning-class events for the `<prefix>/log` topic.
//!
//! Filled from the event sink fan-out at any time, drained by the publish
//! cycle.  When full the oldest record is dropped.

use std::sync::{Arc, Mutex, PoisonError};

use crate::app::events::AppEvent;
use crate::app::ports::{ClockPort, EventSink};

pub const LOG_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Unix seconds, or 0 when the clock was not yet synchronised.
    pub ts: u64,
    pub msg: String,
}

pub struct CloudLogBuffer {
    records: Mutex<heapless::Deque<LogRecord, LOG_CAPACITY>>,
    clock: Arc<dyn ClockPort>,
}

impl CloudLogBuffer {
    pub fn new(clock: Arc<dyn ClockPort>) -> Self {
        Self {
            records: Mutex::new(heapless::Deque::new()),
            clock,
        }
    }

    pub fn push(&self, msg: String) {
        let record = LogRecord {
            ts: self.clock.now_unix().unwrap_or(0),
            msg,
        };
        let mut q = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if q.is_full() {
            q.pop_front();
        }
        // Room was made above.
        let _ = q.push_back(record);
    }

    pub fn drain(&self) -> Vec<LogRecord> {
        let mut q = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::with_capacity(q.len());
        while let Some(r) = q.pop_front() {
            out.push(r);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for CloudLogBuffer {
    fn emit(&self, event: &AppEvent) {
        if event.is_warning() {
            self.push(event.to_string());
        }
    }
}
