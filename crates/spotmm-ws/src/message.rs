//! JSON control frames.
//!
//! The exchange speaks two dialects on the same socket: binary
//! protobuf envelopes for market data and small JSON frames for
//! subscriptions, acks and heartbeats.

use serde::{Deserialize, Serialize};

/// Outbound request frame.
#[derive(Debug, Clone, Serialize)]
pub struct WsRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    pub id: u64,
}

impl WsRequest {
    pub fn subscribe(topics: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIPTION".to_string(),
            params: topics,
            id,
        }
    }

    pub fn unsubscribe(topics: Vec<String>, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIPTION".to_string(),
            params: topics,
            id,
        }
    }

    pub fn ping(id: u64) -> Self {
        Self {
            method: "PING".to_string(),
            params: Vec::new(),
            id,
        }
    }
}

/// Raw inbound JSON shape; only the fields we route on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawControl {
    pub code: Option<i64>,
    pub msg: Option<String>,
    pub ping: Option<serde_json::Value>,
    pub pong: Option<serde_json::Value>,
}

/// Classified inbound control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Subscription ack for the named topic.
    SubscribedOk { topic: String },
    /// The exchange refused a topic shape ("... Blocked!").
    Blocked { msg: String },
    /// Ack with a non-zero error code.
    AckError { code: i64, msg: String },
    /// Ack carrying no topic (PING ack and similar).
    AckOther { msg: String },
    /// Heartbeat in either direction.
    Heartbeat,
    /// Anything else.
    Other,
}

/// Classify an inbound text frame.
///
/// The exchange reuses `code=0` for both success and the `Blocked!`
/// notice, so the message text decides.
pub fn classify(text: &str) -> ControlMessage {
    let Ok(raw) = serde_json::from_str::<RawControl>(text) else {
        return ControlMessage::Other;
    };

    if raw.ping.is_some() || raw.pong.is_some() {
        return ControlMessage::Heartbeat;
    }

    match (raw.code, raw.msg) {
        (Some(0), Some(msg)) => {
            if msg.contains("Not Subscribed successfully") && msg.contains("Blocked") {
                ControlMessage::Blocked { msg }
            } else if msg.starts_with("spot@") {
                ControlMessage::SubscribedOk { topic: msg }
            } else {
                ControlMessage::AckOther { msg }
            }
        }
        (Some(code), msg) => ControlMessage::AckError {
            code,
            msg: msg.unwrap_or_default(),
        },
        _ => ControlMessage::Other,
    }
}
