//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Every websocket text frame carries exactly one Engine.IO packet. Socket.IO
//! packets travel inside Engine.IO `message` packets:
//!
//! ```text
//! 42/api/v1/chat,["send_message",{"text":"Hola"}]
//! ^^ ^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^
//! |`-- socket.io event, namespace, JSON arguments
//! `--- engine.io message
//! ```
//!
//! Binary attachments are not supported.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default namespace; omitted from the encoded form.
pub const ROOT_NAMESPACE: &str = "/";

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown engine.io packet type {0:?}")]
    UnknownEngineType(char),

    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketType(char),

    #[error("binary socket.io packets are not supported")]
    BinaryUnsupported,

    #[error("malformed {kind} packet: {detail}")]
    Malformed { kind: &'static str, detail: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Clone, Debug, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let body = chars.as_str();

        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(body.to_string())),
            '3' => Ok(Self::Pong(body.to_string())),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(PacketError::UnknownEngineType(other)),
        }
    }

    pub fn encode(&self) -> Result<String, PacketError> {
        Ok(match self {
            Self::Open(info) => format!("0{}", serde_json::to_string(info)?),
            Self::Close => "1".to_string(),
            Self::Ping(body) => format!("2{body}"),
            Self::Pong(body) => format!("3{body}"),
            Self::Message(body) => format!("4{body}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Builds an event packet with a single JSON argument.
    pub fn event(namespace: &str, name: &str, payload: Value) -> Self {
        Self::Event {
            namespace: namespace.to_string(),
            id: None,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Connect { namespace, .. }
            | Self::Disconnect { namespace }
            | Self::Event { namespace, .. }
            | Self::Ack { namespace, .. }
            | Self::ConnectError { namespace, .. } => namespace,
        }
    }

    /// Decodes the body of an Engine.IO message packet.
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(PacketError::BinaryUnsupported);
        }
        if !matches!(kind, '0'..='4') {
            return Err(PacketError::UnknownSocketType(kind));
        }

        let (namespace, rest) = split_namespace(rest);
        let (id, rest) = split_ack_id(rest);
        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let (name, args) = split_event_args(data)?;
                Ok(Self::Event {
                    namespace,
                    id,
                    name,
                    args,
                })
            }
            '3' => {
                let id = id.ok_or_else(|| PacketError::Malformed {
                    kind: "ack",
                    detail: "missing ack id".to_string(),
                })?;
                let args = match data {
                    Some(Value::Array(args)) => args,
                    None => Vec::new(),
                    Some(other) => vec![other],
                };
                Ok(Self::Ack {
                    namespace,
                    id,
                    args,
                })
            }
            _ => Ok(Self::ConnectError { namespace, data }),
        }
    }

    /// Encodes the packet as the body of an Engine.IO message packet.
    pub fn encode(&self) -> Result<String, PacketError> {
        let mut out = String::new();
        match self {
            Self::Connect { namespace, data } => {
                out.push('0');
                push_namespace(&mut out, namespace);
                if let Some(data) = data {
                    out.push_str(&serde_json::to_string(data)?);
                }
            }
            Self::Disconnect { namespace } => {
                out.push('1');
                push_namespace(&mut out, namespace);
            }
            Self::Event {
                namespace,
                id,
                name,
                args,
            } => {
                out.push('2');
                push_namespace(&mut out, namespace);
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                out.push_str(&serde_json::to_string(&array)?);
            }
            Self::Ack {
                namespace,
                id,
                args,
            } => {
                out.push('3');
                push_namespace(&mut out, namespace);
                out.push_str(&id.to_string());
                out.push_str(&serde_json::to_string(args)?);
            }
            Self::ConnectError { namespace, data } => {
                out.push('4');
                push_namespace(&mut out, namespace);
                if let Some(data) = data {
                    out.push_str(&serde_json::to_string(data)?);
                }
            }
        }
        Ok(out)
    }

    /// Encodes the packet as a complete websocket text frame.
    pub fn to_frame(&self) -> Result<String, PacketError> {
        EnginePacket::Message(self.encode()?).encode()
    }
}

fn push_namespace(out: &mut String, namespace: &str) {
    if namespace != ROOT_NAMESPACE && !namespace.is_empty() {
        out.push_str(namespace);
        out.push(',');
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (ROOT_NAMESPACE.to_string(), rest);
    }
    match rest.find(',') {
        Some(comma) => (rest[..comma].to_string(), &rest[comma + 1..]),
        None => (rest.to_string(), ""),
    }
}

fn split_ack_id(rest: &str) -> (Option<u64>, &str) {
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (None, rest);
    }
    match rest[..digits].parse() {
        Ok(id) => (Some(id), &rest[digits..]),
        Err(_) => (None, rest),
    }
}

fn split_event_args(data: Option<Value>) -> Result<(String, Vec<Value>), PacketError> {
    let Some(Value::Array(mut items)) = data else {
        return Err(PacketError::Malformed {
            kind: "event",
            detail: "payload must be a JSON array".to_string(),
        });
    };
    if items.is_empty() {
        return Err(PacketError::Malformed {
            kind: "event",
            detail: "missing event name".to_string(),
        });
    }
    match items.remove(0) {
        Value::String(name) => Ok((name, items)),
        other => Err(PacketError::Malformed {
            kind: "event",
            detail: format!("event name must be a string, got {other}"),
        }),
    }
}
