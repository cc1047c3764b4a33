//! Per-device topic layout.
//!
//! | Topic                                   | Direction | Use                     |
//! |-----------------------------------------|-----------|-------------------------|
//! | `<prefix>/temp`, `/ph`, `/feed`, `/log` | out       | telemetry               |
//! | `<prefix>/cmd`                          | in        | plain-text commands     |
//! | `$aws/things/<id>/shadow/get`           | out       | request full document   |
//! | `$aws/things/<id>/shadow/update`        | out       | acknowledgements        |
//! | `.../shadow/update/delta`               | in        | desired ≠ reported      |
//! | `.../shadow/update/accepted`            | in        | echo of our update      |
//! | `.../shadow/get/accepted`               | in        | full document           |
//!
//! `<prefix>` is `<topic_id>/<id>` once a topic id is provisioned, `<id>`
//! otherwise.  Topic strings are built once; classification of inbound
//! topics is an exact comparison against that table.

/// Outbound telemetry streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Temperature,
    Ph,
    Feed,
    Log,
}

impl Metric {
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Temperature => "temp",
            Self::Ph => "ph",
            Self::Feed => "feed",
            Self::Log => "log",
        }
    }
}

/// Kind of inbound document, derived from its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Delta,
    UpdateAccepted,
    GetAccepted,
    Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    prefix: String,
    shadow_get: String,
    shadow_update: String,
    inbound: [(String, DocumentKind); 4],
}

impl TopicSet {
    pub fn new(device_id: &str, topic_id: Option<&str>) -> Self {
        let prefix = match topic_id.map(str::trim) {
            Some(t) if !t.is_empty() => format!("{t}/{device_id}"),
            _ => device_id.to_owned(),
        };
        let shadow = format!("$aws/things/{device_id}/shadow");
        Self {
            inbound: [
                (format!("{shadow}/update/delta"), DocumentKind::Delta),
                (format!("{shadow}/update/accepted"), DocumentKind::UpdateAccepted),
                (format!("{shadow}/get/accepted"), DocumentKind::GetAccepted),
                (format!("{prefix}/cmd"), DocumentKind::Command),
            ],
            shadow_get: format!("{shadow}/get"),
            shadow_update: format!("{shadow}/update"),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn telemetry(&self, metric: Metric) -> String {
        format!("{}/{}", self.prefix, metric.suffix())
    }

    pub fn shadow_get(&self) -> &str {
        &self.shadow_get
    }

    pub fn shadow_update(&self) -> &str {
        &self.shadow_update
    }

    /// Topics to subscribe to after every connect.
    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.inbound.iter().map(|(t, _)| t.as_str())
    }

    pub fn classify(&self, topic: &str) -> Option<DocumentKind> {
        self.inbound
            .iter()
            .find(|(t, _)| t == topic)
            .map(|(_, kind)| *kind)
    }
}
