//! Log-based event sink adapter, plus the fan-out that feeds every sink.
//!
//! [`LogEventSink`] writes structured application events to the ESP-IDF
//! logger (UART / USB-CDC in production).  [`FanoutSink`] forwards each
//! event to every registered sink (serial log, BLE telemetry mirror, cloud
//! log buffer).

use std::sync::Arc;

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&self, event: &AppEvent) {
        match event {
            AppEvent::TemperatureMeasured { celsius, samples } => {
                info!("TELEM | temp={:.2}\u{00b0}C | samples={}", celsius, samples);
            }
            AppEvent::PhMeasured { ph, samples } => {
                info!("TELEM | pH={:.2} | samples={}", ph, samples);
            }
            AppEvent::FeedCompleted { success, attempts } => {
                info!(
                    "FEED  | {} | attempts={}",
                    if *success { "OK" } else { "FAILED" },
                    attempts
                );
            }
            e if e.is_warning() => warn!("EVENT | {}", e),
            e => info!("EVENT | {}", e),
        }
    }
}

/// Forwards every event to each registered sink, in registration order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &AppEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
