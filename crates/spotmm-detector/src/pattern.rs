//! Detected market-maker pattern.

use serde::{Deserialize, Serialize};
use spotmm_core::Price;

/// A detected MM pattern for one symbol.
///
/// Recomputed on demand, cached for the detector's TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmPattern {
    /// Where the MM buys (support), if a dominant level exists.
    pub lower_bound: Option<Price>,
    /// Where the MM sells (resistance).
    pub upper_bound: Option<Price>,
    /// Typical MM order size in USD.
    pub avg_order_size_usd: f64,
    /// How often the MM refreshes quotes.
    pub refresh_rate_hz: f64,
    /// Typical spread the MM maintains.
    pub avg_spread_bps: f64,
    /// Composite detection confidence in [0, 1].
    pub confidence: f64,
    pub samples_count: usize,
    /// Recommended BUY price (lower bound, else current best bid).
    pub best_entry: Option<Price>,
    /// Recommended SELL price (upper bound, else current best ask).
    pub best_exit: Option<Price>,
    /// Size that will not scare the MM away: 0.8x its capacity.
    pub safe_order_size_usd: f64,
    pub last_updated_ms: i64,
}

impl MmPattern {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.last_updated_ms
    }
}
