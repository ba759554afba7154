//! Detector configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Analysis window in seconds.
    #[serde(default = "default_window_sec")]
    pub window_sec: i64,
    /// Minimum snapshots before a pattern is considered.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Minimum confidence for a pattern to be returned.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Pattern cache TTL in seconds.
    #[serde(default = "default_cache_ttl_sec")]
    pub cache_ttl_sec: i64,
}

fn default_window_sec() -> i64 {
    300
}

fn default_min_samples() -> usize {
    20
}

fn default_min_confidence() -> f64 {
    0.7
}

fn default_cache_ttl_sec() -> i64 {
    60
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_sec: default_window_sec(),
            min_samples: default_min_samples(),
            min_confidence: default_min_confidence(),
            cache_ttl_sec: default_cache_ttl_sec(),
        }
    }
}
