//! Device shadow reconciliation.
//!
//! Remote configuration arrives as shadow documents.  Commands sit under
//! `state.commands.<group>.<field>`; each field is matched against
//! [`COMMAND_TABLE`], turned into an [`AppCommand`] and executed.  When at
//! least one field was consumed an acknowledgement is published that
//! echoes the consumed fields into `reported` and nulls the touched groups
//! under `desired.commands`, so the cloud stops re-sending them:
//!
//! ```text
//! delta  {"state":{"commands":{"sched":{"feed_frequency":60,"temp_frequency":-5}}}}
//!   ack  {"state":{"reported":{"feed_frequency":60},
//!                  "desired":{"commands":{"sched":null}}}}
//! ```
//!
//! A get-accepted document goes through the same path after its `desired`
//! object is wrapped as `{"state": desired}`.  Update-accepted documents
//! are our own acknowledgements echoed back and are only logged.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::{Map, Value, json};

use super::reassembly::InboundDocument;
use super::topics::{DocumentKind, TopicSet};
use crate::app::commands::{AppCommand, CommandExecutor, Threshold};
use crate::app::ports::BrokerPort;
use crate::events::{EventCoordinator, EventFlags};

/// Result of parsing one command field.
#[derive(Debug, Clone, Copy, PartialEq)]
enum FieldAction {
    Run(AppCommand),
    /// Well-typed but nothing to do (`*_force: false`).
    Consume,
}

type FieldParser = fn(&Value) -> Option<FieldAction>;

fn interval(v: &Value) -> Option<u32> {
    v.as_u64().and_then(|n| u32::try_from(n).ok())
}

fn threshold(v: &Value) -> Option<f32> {
    v.as_f64().filter(|f| f.is_finite()).map(|f| f as f32)
}

fn force(v: &Value, cmd: AppCommand) -> Option<FieldAction> {
    v.as_bool()
        .map(|on| if on { FieldAction::Run(cmd) } else { FieldAction::Consume })
}

fn temp_frequency(v: &Value) -> Option<FieldAction> {
    interval(v).map(|s| FieldAction::Run(AppCommand::SetTempInterval(s)))
}
fn feed_frequency(v: &Value) -> Option<FieldAction> {
    interval(v).map(|s| FieldAction::Run(AppCommand::SetFeedInterval(s)))
}
fn wake_frequency(v: &Value) -> Option<FieldAction> {
    interval(v).map(|s| FieldAction::Run(AppCommand::SetPublishInterval(s)))
}
fn temp_force(v: &Value) -> Option<FieldAction> {
    force(v, AppCommand::ForceTemp)
}
fn feed_force(v: &Value) -> Option<FieldAction> {
    force(v, AppCommand::ForceFeed)
}
fn ph_force(v: &Value) -> Option<FieldAction> {
    force(v, AppCommand::ForcePh)
}
fn temp_lower(v: &Value) -> Option<FieldAction> {
    threshold(v).map(|t| FieldAction::Run(AppCommand::SetThreshold(Threshold::TempLower, t)))
}
fn temp_upper(v: &Value) -> Option<FieldAction> {
    threshold(v).map(|t| FieldAction::Run(AppCommand::SetThreshold(Threshold::TempUpper, t)))
}
fn ph_lower(v: &Value) -> Option<FieldAction> {
    threshold(v).map(|t| FieldAction::Run(AppCommand::SetThreshold(Threshold::PhLower, t)))
}
fn ph_upper(v: &Value) -> Option<FieldAction> {
    threshold(v).map(|t| FieldAction::Run(AppCommand::SetThreshold(Threshold::PhUpper, t)))
}

/// Recognised command fields.
pub static COMMAND_TABLE: &[(&str, FieldParser)] = &[
    ("temp_frequency", temp_frequency),
    ("feed_frequency", feed_frequency),
    ("wake_frequency", wake_frequency),
    ("temp_force", temp_force),
    ("feed_force", feed_force),
    ("ph_force", ph_force),
    ("temp_lower", temp_lower),
    ("temp_upper", temp_upper),
    ("ph_lower", ph_lower),
    ("ph_upper", ph_upper),
];

/// Acknowledgement for consumed commands: the values as `reported`, and
/// each consumed group nulled under `desired.commands`.
fn ack_document(reported: Map<String, Value>, cleared: Map<String, Value>) -> Value {
    json!({
        "state": {
            "reported": reported,
            "desired": { "commands": cleared },
        }
    })
}

fn lookup(field: &str) -> Option<FieldParser> {
    COMMAND_TABLE
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, parser)| *parser)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowError {
    /// Payload is not a JSON object of the expected shape.
    Malformed,
}

impl core::fmt::Display for ShadowError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed shadow document"),
        }
    }
}

/// Applies shadow documents and publishes acknowledgements.
pub struct ShadowReconciler<B: BrokerPort> {
    executor: CommandExecutor,
    broker: Arc<B>,
    topics: TopicSet,
    events: Arc<EventCoordinator>,
}

impl<B: BrokerPort> ShadowReconciler<B> {
    pub fn new(
        executor: CommandExecutor,
        broker: Arc<B>,
        topics: TopicSet,
        events: Arc<EventCoordinator>,
    ) -> Self {
        Self {
            executor,
            broker,
            topics,
            events,
        }
    }

    pub fn set_topics(&mut self, topics: TopicSet) {
        self.topics = topics;
    }

    /// Dispatch one inbound document by kind.  Returns whether any local
    /// state changed.
    pub fn handle(&self, doc: &InboundDocument) -> Result<bool, ShadowError> {
        match doc.kind {
            DocumentKind::Delta => self.apply_delta(&doc.payload),
            DocumentKind::GetAccepted => self.apply_get_accepted(&doc.payload),
            DocumentKind::UpdateAccepted => {
                debug!("Shadow: update accepted ({}B)", doc.payload.len());
                Ok(false)
            }
            DocumentKind::Command => Ok(self.apply_text_command(&doc.payload)),
        }
    }

    /// Apply a delta document.
    pub fn apply_delta(&self, document: &[u8]) -> Result<bool, ShadowError> {
        let root: Value = serde_json::from_slice(document).map_err(|e| {
            warn!("Shadow: delta is not JSON ({e}), ignored");
            ShadowError::Malformed
        })?;
        let changed = self.reconcile(&root)?;
        self.events.set(EventFlags::SHADOW_SYNCED);
        Ok(changed)
    }

    /// Apply the `desired` side of a full shadow document.
    pub fn apply_get_accepted(&self, document: &[u8]) -> Result<bool, ShadowError> {
        let root: Value = serde_json::from_slice(document).map_err(|e| {
            warn!("Shadow: get-accepted is not JSON ({e}), ignored");
            ShadowError::Malformed
        })?;
        let desired = root
            .get("state")
            .and_then(|s| s.get("desired"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let changed = self.reconcile(&json!({ "state": desired }))?;
        self.events.set(EventFlags::SHADOW_SYNCED);
        Ok(changed)
    }

    fn apply_text_command(&self, payload: &[u8]) -> bool {
        let Ok(text) = core::str::from_utf8(payload) else {
            warn!("Shadow: command payload not UTF-8, ignored");
            return false;
        };
        match AppCommand::parse_text(text) {
            Ok(cmd) => match self.executor.execute(cmd, "cloud-cmd") {
                Ok(()) => true,
                Err(e) => {
                    warn!("Shadow: command '{}' failed ({})", text.trim(), e);
                    false
                }
            },
            Err(e) => {
                warn!("Shadow: command '{}' rejected ({})", text.trim(), e);
                false
            }
        }
    }

    fn reconcile(&self, root: &Value) -> Result<bool, ShadowError> {
        let state = root.get("state").ok_or_else(|| {
            warn!("Shadow: document has no state, ignored");
            ShadowError::Malformed
        })?;
        if !state.is_object() {
            warn!("Shadow: state is not an object, ignored");
            return Err(ShadowError::Malformed);
        }
        let Some(commands) = state.get("commands").and_then(Value::as_object) else {
            debug!("Shadow: no commands in document");
            return Ok(false);
        };

        let mut reported = Map::new();
        let mut cleared = Map::new();
        let mut changed = false;

        for (group, fields) in commands {
            let Some(fields) = fields.as_object() else {
                debug!("Shadow: command group '{group}' is not an object");
                continue;
            };
            for (field, value) in fields {
                let Some(parser) = lookup(field) else {
                    debug!("Shadow: unknown command '{group}.{field}'");
                    continue;
                };
                let consumed = match parser(value) {
                    Some(FieldAction::Run(cmd)) => match self.executor.execute(cmd, "shadow") {
                        Ok(()) => {
                            changed = true;
                            true
                        }
                        Err(e) => {
                            warn!("Shadow: '{group}.{field}' failed ({e})");
                            false
                        }
                    },
                    Some(FieldAction::Consume) => true,
                    None => {
                        warn!("Shadow: '{group}.{field}' rejected value {value}");
                        false
                    }
                };
                if consumed {
                    reported.insert(field.clone(), value.clone());
                    cleared.insert(group.clone(), Value::Null);
                }
            }
        }

        if !reported.is_empty() {
            self.acknowledge(reported, cleared);
        }
        Ok(changed)
    }

    fn acknowledge(&self, reported: Map<String, Value>, cleared: Map<String, Value>) {
        let payload = ack_document(reported, cleared).to_string();
        let topic = self.topics.shadow_update();
        match self.broker.publish(topic, payload.as_bytes()) {
            Ok(()) => info!("Shadow: acknowledged {}B", payload.len()),
            Err(e) => {
                warn!("Shadow: live ack failed ({e}), queued");
                if let Err(e) = self.broker.enqueue(topic, payload.as_bytes()) {
                    warn!("Shadow: ack dropped ({e})");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parser_rejects_negative_and_fractional() {
        assert_eq!(
            temp_frequency(&json!(60)),
            Some(FieldAction::Run(AppCommand::SetTempInterval(60)))
        );
        assert_eq!(temp_frequency(&json!(-5)), None);
        assert_eq!(temp_frequency(&json!(1.5)), None);
        assert_eq!(temp_frequency(&json!("60")), None);
        assert_eq!(temp_frequency(&json!(u64::from(u32::MAX) + 1)), None);
    }

    #[test]
    fn force_false_is_consumed_without_command() {
        assert_eq!(feed_force(&json!(false)), Some(FieldAction::Consume));
        assert_eq!(
            feed_force(&json!(true)),
            Some(FieldAction::Run(AppCommand::ForceFeed))
        );
        assert_eq!(feed_force(&json!(1)), None);
    }

    #[test]
    fn thresholds_accept_integers_and_floats() {
        assert_eq!(
            ph_upper(&json!(8)),
            Some(FieldAction::Run(AppCommand::SetThreshold(Threshold::PhUpper, 8.0)))
        );
        assert_eq!(
            temp_lower(&json!(21.5)),
            Some(FieldAction::Run(AppCommand::SetThreshold(Threshold::TempLower, 21.5)))
        );
        assert_eq!(temp_lower(&json!(null)), None);
    }

    #[test]
    fn ack_reports_values_and_nulls_consumed_groups() {
        let mut reported = Map::new();
        reported.insert("feed_frequency".into(), json!(43200));
        reported.insert("ph_upper".into(), json!(8.2));
        let mut cleared = Map::new();
        cleared.insert("feed".into(), Value::Null);
        cleared.insert("ph".into(), Value::Null);

        let ack = ack_document(reported, cleared);
        assert_eq!(
            ack,
            json!({
                "state": {
                    "reported": { "feed_frequency": 43200, "ph_upper": 8.2 },
                    "desired": { "commands": { "feed": null, "ph": null } },
                }
            })
        );
        let state = ack["state"].as_object().unwrap();
        assert_eq!(state.len(), 2);
        assert!(state["desired"]["commands"]["feed"].is_null());
    }

    #[test]
    fn table_covers_every_field_once() {
        for (i, (name, _)) in COMMAND_TABLE.iter().enumerate() {
            assert!(COMMAND_TABLE[i + 1..].iter().all(|(n, _)| n != name));
            assert!(lookup(name).is_some());
        }
        assert_eq!(COMMAND_TABLE.len(), 10);
    }
}
