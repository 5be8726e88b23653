//! Message types carried by the transport.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A message decoded from an inbound connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub queue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_queue: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub data: Vec<u8>,
    /// Milliseconds since the unix epoch, stamped by the sender.
    pub sent_at: u64,
}

/// A message queued for delivery to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub id: MessageId,
    pub queue: String,
    pub sub_queue: Option<String>,
    pub headers: HashMap<String, String>,
    pub data: Vec<u8>,
    /// Delivery attempts allowed by the layer above; not enforced here.
    pub max_attempts: Option<u32>,
    /// Milliseconds since the unix epoch after which delivery is pointless.
    pub deliver_by: Option<u64>,
}

impl OutgoingMessage {
    pub fn new(queue: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id: MessageId::new(),
            queue: queue.into(),
            sub_queue: None,
            headers: HashMap::new(),
            data: data.into(),
            max_attempts: None,
            deliver_by: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_sub_queue(mut self, sub_queue: impl Into<String>) -> Self {
        self.sub_queue = Some(sub_queue.into());
        self
    }

    /// The wire form of this message, stamped with the current time.
    pub fn to_message(&self) -> Message {
        Message {
            id: self.id,
            queue: self.queue.clone(),
            sub_queue: self.sub_queue.clone(),
            headers: self.headers.clone(),
            data: self.data.clone(),
            sent_at: now_millis(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
