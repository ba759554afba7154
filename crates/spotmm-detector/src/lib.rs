//! Market-maker pattern detection.
//!
//! Infers MM boundaries, typical order size, refresh rate and a
//! composite confidence score from a sliding window of top-of-book
//! snapshots, with an optional boost from tape pressure.

pub mod config;
pub mod detector;
pub mod pattern;

pub use config::DetectorConfig;
pub use detector::MmDetector;
pub use pattern::MmPattern;
