//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Too many topics ({count}) for a single connection, max {max}. Shard needed.")]
    ShardNeeded { count: usize, max: usize },

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Connection lifetime exceeded")]
    LifetimeExceeded,

    #[error("Stopped")]
    Stopped,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;
