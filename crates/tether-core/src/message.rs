use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names on the realtime channel.
pub mod events {
    pub const CONNECT_REQUEST: &str = "whatsapp_connect_request";
    pub const DISCONNECT_REQUEST: &str = "whatsapp_disconnect_request";
    pub const STATUS_REQUEST: &str = "get_whatsapp_status";
    pub const STATUS: &str = "whatsapp_status";
    pub const QR: &str = "whatsapp_qr";
    pub const ERROR_MESSAGE: &str = "error_message";
}

/// A message the client sends over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Ask the server to start a pairing for `user_id`.
    ConnectRequest { user_id: String },
    /// Ask the server to drop the current link.
    DisconnectRequest,
    /// Ask the server to re-send its current status.
    StatusRequest,
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ConnectRequest { .. } => events::CONNECT_REQUEST,
            Self::DisconnectRequest => events::DISCONNECT_REQUEST,
            Self::StatusRequest => events::STATUS_REQUEST,
        }
    }

    /// Event arguments, in wire order.
    pub fn args(&self) -> Vec<Value> {
        match self {
            Self::ConnectRequest { user_id } => vec![Value::String(user_id.clone())],
            Self::DisconnectRequest | Self::StatusRequest => Vec::new(),
        }
    }
}

/// Link status as pushed by the server in `whatsapp_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Connected,
    Disconnected,
    WaitingQr,
    Connecting,
    /// Anything else, kept verbatim.
    Unknown(String),
}

impl ServerStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "waiting_qr" => Self::WaitingQr,
            "Connecting..." => Self::Connecting,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A message received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Status(ServerStatus),
    /// Pairing code payload, opaque.
    Qr(String),
    /// Human-readable error text, shown verbatim.
    Error(String),
}

impl ServerMessage {
    /// Map a Socket.IO event to a server message. Unrecognized events yield `None`.
    pub fn from_event(name: &str, args: &[Value]) -> Option<Self> {
        let first = args.first().map(value_text).unwrap_or_default();
        match name {
            events::STATUS => Some(Self::Status(ServerStatus::parse(&first))),
            events::QR => Some(Self::Qr(first)),
            events::ERROR_MESSAGE => Some(Self::Error(first)),
            _ => None,
        }
    }
}

/// Strings stay as-is; null is empty; anything else is its JSON text.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// What the realtime channel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake acknowledged; the channel is open.
    Opened,
    Message(ServerMessage),
    /// Transport or handshake failure. Always followed by `Closed`.
    Error(String),
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(level: NoticeLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Error, text)
    }
}
