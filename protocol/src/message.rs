//! Wire message envelope for the Origin control channel.
//!
//! Every frame on the control WebSocket is a flat JSON object. A fixed set
//! of envelope fields carries routing metadata; everything else is a
//! verb-specific parameter and is preserved untyped in [`WireMessage::fields`].
//!
//! Decoding is lenient: the telescope firmware adds fields freely between
//! releases, so unknown keys are kept rather than rejected, and a missing
//! envelope field is simply absent. The only hard failure is a frame that is
//! not a JSON object at all.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Error raised when a frame cannot be decoded or a message cannot be encoded.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame is not a structured JSON object.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Logical message type carried in the `Type` envelope field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A request directed at a subsystem.
    Command,
    /// An unsolicited message not tied to any outbound command.
    Notification,
    /// An incremental state report.
    Status,
    /// Anything this crate does not recognize.
    Unknown,
}

impl MessageKind {
    /// Wire spelling of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Command => "Command",
            MessageKind::Notification => "Notification",
            MessageKind::Status => "Status",
            MessageKind::Unknown => "Unknown",
        }
    }
}

/// One decoded (or to-be-encoded) control channel frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    /// Logical origin of the message (e.g. `"Mount"`, `"ImageServer"`).
    #[serde(rename = "Source", default)]
    pub source: String,

    /// Target subsystem; only meaningful on outbound commands.
    #[serde(rename = "Destination", default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Verb identifier (e.g. `"GotoRaDec"`, `"NewImageReady"`).
    #[serde(rename = "Command", default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Raw `Type` tag; see [`WireMessage::kind`] for the typed view.
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,

    /// Correlation id, stamped on outbound commands.
    #[serde(rename = "SequenceID", default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u32>,

    /// Verb-specific parameters, preserved as-is.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl WireMessage {
    /// Decode a text frame.
    ///
    /// Fails only when the frame is not a JSON object; unknown envelope
    /// values and extra fields are preserved.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Encode to a compact JSON frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Typed view of the `Type` envelope field.
    pub fn kind(&self) -> MessageKind {
        match self.message_type.as_deref() {
            Some("Command") => MessageKind::Command,
            Some("Notification") => MessageKind::Notification,
            Some("Status") => MessageKind::Status,
            _ => MessageKind::Unknown,
        }
    }

    /// Look up a numeric parameter.
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Look up a boolean parameter.
    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    /// Look up a string parameter.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}
