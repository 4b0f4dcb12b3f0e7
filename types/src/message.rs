//! Protocol message domain model.
//!
//! A [`ProtocolMessage`] is an opaque JSON-RPC payload. The bridge forwards
//! it byte-for-byte equivalent in both directions; the only thing it ever
//! inspects is the message *shape*, and only for logging.

use serde::{Deserialize, Serialize};

/// Shape of a JSON-RPC message, derived from the presence of `id` and `method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageShape {
    /// Has both `id` and `method`.
    Request,
    /// Has `id`, lacks `method`.
    Response,
    /// Lacks `id`.
    Notification,
}

impl MessageShape {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Notification => "notification",
        }
    }
}

/// An opaque request/response/notification payload.
///
/// Equality is structural equality of the underlying JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolMessage(serde_json::Value);

impl ProtocolMessage {
    #[must_use]
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// The `id` member, if present and not `null`.
    #[must_use]
    pub fn id(&self) -> Option<&serde_json::Value> {
        self.0.get("id").filter(|id| !id.is_null())
    }

    /// The `method` member, if present and a string.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn shape(&self) -> MessageShape {
        match (self.id().is_some(), self.method().is_some()) {
            (true, true) => MessageShape::Request,
            (true, false) => MessageShape::Response,
            (false, _) => MessageShape::Notification,
        }
    }

    #[must_use]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for ProtocolMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

impl From<ProtocolMessage> for serde_json::Value {
    fn from(message: ProtocolMessage) -> Self {
        message.0
    }
}
