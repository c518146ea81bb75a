//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Engine.IO wraps everything: `0` open, `1` close, `2` ping, `3` pong,
//! `4` message, `5` upgrade, `6` noop. A Socket.IO packet rides inside a `4`
//! message: `0` connect, `1` disconnect, `2` event, `3` ack, `4` connect
//! error, `5`/`6` binary variants (not used by this backend).
//!
//! Layout of a Socket.IO packet after its type digit:
//! `[/namespace,][ack id][json payload]`.

use serde::Deserialize;
use serde_json::Value;
use tether_core::error::TetherError;

/// Socket.IO connect request on the default namespace.
pub const CONNECT: &str = "40";
/// Socket.IO disconnect on the default namespace.
pub const DISCONNECT: &str = "41";
/// Engine.IO pong, answers a server ping.
pub const PONG: &str = "3";

/// Engine.IO handshake sent by the server in the open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(String),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect { sid: Option<String> },
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack_id: Option<u64>,
    },
    Ack { ack_id: u64 },
    ConnectError { message: String },
}

fn protocol(msg: impl Into<String>) -> TetherError {
    TetherError::Protocol(msg.into())
}

/// Decode one Engine.IO text frame.
pub fn decode_engine(frame: &str) -> Result<EnginePacket, TetherError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or_else(|| protocol("empty engine.io frame"))?;
    let rest = chars.as_str();
    match kind {
        '0' => {
            let handshake = serde_json::from_str(rest)
                .map_err(|e| protocol(format!("bad open handshake: {e}")))?;
            Ok(EnginePacket::Open(handshake))
        }
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => Ok(EnginePacket::Message(rest.to_string())),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        other => Err(protocol(format!("unknown engine.io packet type '{other}'"))),
    }
}

/// Decode the Socket.IO packet carried by an Engine.IO message.
pub fn decode_socket(payload: &str) -> Result<SocketPacket, TetherError> {
    let mut chars = payload.chars();
    let kind = chars.next().ok_or_else(|| protocol("empty socket.io packet"))?;
    let mut rest = chars.as_str();

    // Namespace prefix, e.g. "/admin,". Only the default namespace is used.
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let ack_id = if digits > 0 {
        Some(
            rest[..digits]
                .parse::<u64>()
                .map_err(|e| protocol(format!("bad ack id: {e}")))?,
        )
    } else {
        None
    };
    let body = &rest[digits..];

    match kind {
        '0' => {
            let sid = if body.is_empty() {
                None
            } else {
                let value: Value = serde_json::from_str(body)
                    .map_err(|e| protocol(format!("bad connect payload: {e}")))?;
                value.get("sid").and_then(Value::as_str).map(str::to_string)
            };
            Ok(SocketPacket::Connect { sid })
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let value: Value = serde_json::from_str(body)
                .map_err(|e| protocol(format!("bad event payload: {e}")))?;
            let Value::Array(mut items) = value else {
                return Err(protocol("event payload is not an array"));
            };
            if items.is_empty() {
                return Err(protocol("event payload has no name"));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => return Err(protocol(format!("event name is not a string: {other}"))),
            };
            Ok(SocketPacket::Event {
                name,
                args: items,
                ack_id,
            })
        }
        '3' => Ok(SocketPacket::Ack {
            ack_id: ack_id.ok_or_else(|| protocol("ack without id"))?,
        }),
        '4' => {
            let message = match serde_json::from_str::<Value>(body) {
                Ok(Value::String(s)) => s,
                Ok(value) => value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string()),
                Err(_) => body.to_string(),
            };
            Ok(SocketPacket::ConnectError { message })
        }
        '5' | '6' => Err(protocol("binary socket.io packets are not supported")),
        other => Err(protocol(format!("unknown socket.io packet type '{other}'"))),
    }
}

/// Encode an event on the default namespace as an Engine.IO message frame.
pub fn encode_event(name: &str, args: &[Value]) -> String {
    let mut items = Vec::with_capacity(args.len() + 1);
    items.push(Value::String(name.to_string()));
    items.extend(args.iter().cloned());
    format!("42{}", Value::Array(items))
}
