//! Message definitions for the broker
//!
//! `ProcessingEvent` is what producers hand to [`Broker::publish`]; the broker
//! wraps it into a `Message` carrying the delivery metadata.
//!
//! Notes on `Message` fields:
//! - `id`: unique id generated by the broker on publish
//! - `data`: the published event, untouched
//! - `attributes`: flat string view of the routing-relevant event fields
//! - `publish_time`: set by the broker, non-decreasing within a topic
//! - `ack_id`: token passed back to `acknowledge`; unique within a subscription
//!
//! [`Broker::publish`]: crate::broker::Broker::publish

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event priority, `1` is the most urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    #[default]
    High = 1,
    Medium = 2,
    Low = 3,
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(format!("priority must be 1, 2 or 3, got {other}")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A document-processing event as produced by the upstream flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingEvent {
    pub event_type: String,
    pub document_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub priority: Priority,
}

impl ProcessingEvent {
    /// New event stamped with the current time and default priority.
    pub fn new(
        event_type: impl Into<String>,
        document_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            document_id: document_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            data: Map::new(),
            priority: Priority::default(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Insert a single data entry.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// String attributes attached to every message carrying this event.
    pub fn attributes(&self) -> HashMap<String, String> {
        HashMap::from([
            ("event_type".to_string(), self.event_type.clone()),
            ("document_id".to_string(), self.document_id.clone()),
            ("user_id".to_string(), self.user_id.clone()),
            ("priority".to_string(), self.priority.to_string()),
        ])
    }
}

/// A delivered unit: one event plus its delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub data: ProcessingEvent,
    pub attributes: HashMap<String, String>,
    pub publish_time: DateTime<Utc>,
    pub ack_id: String,
}

impl Message {
    pub(crate) fn new(id: String, event: ProcessingEvent, publish_time: DateTime<Utc>) -> Self {
        let ack_id = ack_id_for(&id);
        Self {
            attributes: event.attributes(),
            id,
            data: event,
            publish_time,
            ack_id,
        }
    }
}

pub(crate) fn ack_id_for(message_id: &str) -> String {
    format!("ack-{message_id}")
}
