//! Binary envelope decoding for exchange push data.
//!
//! The exchange wraps every market-data payload in a protobuf envelope
//! whose exact shape drifts across deployments. Decoding is therefore
//! two-layered: a declared envelope message is tried first, and when it
//! does not yield a usable frame the raw wire format is walked
//! heuristically to locate the channel string, symbol, send timestamp
//! and inner payload bytes.
//!
//! The decoder never raises into callers; malformed input increments a
//! counter and the frame is dropped.

pub mod envelope;
pub mod error;
pub mod messages;
pub mod resolve;
pub mod wire;

pub use envelope::{DecodeStats, EnvelopeDecoder, Frame, MarketMessage};
pub use error::{ProtoError, ProtoResult};
