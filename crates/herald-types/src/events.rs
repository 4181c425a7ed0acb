use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle and message events surfaced by the messaging client.
/// The wire form is the JSON frame the bridge pushes over its event socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A fresh scannable login code was issued
    #[serde(rename = "qr")]
    CodeIssued { code: String },

    Authenticated,

    Ready,

    AuthFailure {
        #[serde(default)]
        reason: String,
    },

    Disconnected {
        #[serde(default)]
        reason: String,
    },

    #[serde(rename = "message")]
    IncomingMessage(IncomingMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub from: String,
    pub body: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}
