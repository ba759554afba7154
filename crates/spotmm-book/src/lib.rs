//! Book state for the spotmm engine.
//!
//! Three trackers share this crate: the book tracker (top-of-book and
//! L2 snapshots with subscriber fan-out), the tape tracker (rolling
//! 60-second trade window), and the enhanced tracker (order-lifetime
//! and spoofing analytics feeding MM confidence).

pub mod enhanced;
pub mod error;
pub mod rest;
pub mod tape;
pub mod tracker;

pub use enhanced::{BookMetrics, EnhancedBookTracker};
pub use error::{BookError, BookResult};
pub use rest::RestClient;
pub use tape::{TapeMetrics, TapeTracker, LARGE_TRADE_USD};
pub use tracker::{BookEvent, BookTracker};
