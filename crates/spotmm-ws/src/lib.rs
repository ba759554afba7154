//! WebSocket market-data client.
//!
//! Connection lifecycle, paced subscriptions, `Blocked!` downgrade,
//! application-level heartbeat, periodic connection cycling, and
//! reconnect with jittered exponential backoff. Decoded market
//! messages are forwarded over a bounded channel; the client never
//! blocks on slow consumers.

pub mod client;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod rate_limiter;
pub mod topics;

pub use client::{WsClient, WsClientConfig, WsState};
pub use error::{WsError, WsResult};
pub use topics::{Channel, TopicPolicy, MAX_TOPICS_PER_CONN};

/// Install the process-wide TLS crypto provider.
///
/// Must run before the first connection attempt; safe to call twice.
pub fn init_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}
