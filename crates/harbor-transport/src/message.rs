//! Message envelope carried by every transport

use chrono::{DateTime, Utc};
use harbor_types::Endpoint;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purpose of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Expects a response
    Request,
    /// Answer to a request
    Response,
    /// Fire and forget
    Notification,
    /// Control-plane signal to an instance (drain, stop)
    Control,
}

/// Outgoing message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message id
    pub id: Uuid,
    /// Purpose of the message
    pub kind: MessageKind,
    /// Operation name, e.g. `drain`
    pub method: String,
    /// Specific endpoint to reach; `None` lets the backend use its own address
    pub target: Option<Endpoint>,
    /// Message body
    pub payload: serde_json::Value,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create an untargeted message
    pub fn new(kind: MessageKind, method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            method: method.into(),
            target: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a request
    pub fn request(method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(MessageKind::Request, method, payload)
    }

    /// Create a notification
    pub fn notification(method: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(MessageKind::Notification, method, payload)
    }

    /// Control signal addressed to one instance endpoint
    pub fn control(target: Endpoint, method: impl Into<String>) -> Self {
        Self::new(MessageKind::Control, method, serde_json::Value::Null).with_target(target)
    }

    /// Address the message to one endpoint
    pub fn with_target(mut self, target: Endpoint) -> Self {
        self.target = Some(target);
        self
    }

    /// Encoded size, used for byte counters
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map_or(0, |bytes| bytes.len())
    }
}
