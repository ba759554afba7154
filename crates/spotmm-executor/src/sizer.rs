//! MM-capacity-aware position sizing.
//!
//! Maps a target size (MM safe size or the configured default) and a
//! sizing mode to a final size, split count and inter-split delay.
//! Conservative trims the target and never splits; the bolder modes
//! take the full target but split larger orders to reduce market
//! impact.

use serde::{Deserialize, Serialize};
use spotmm_core::Symbol;
use tracing::debug;

/// How bold the sizing should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    Conservative,
    Balanced,
    Aggressive,
}

/// A sizing decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSize {
    pub safe_size_usd: f64,
    pub split_count: u32,
    pub split_delay_sec: f64,
    pub risk_level: &'static str,
}

/// Position sizer.
#[derive(Debug, Clone, Default)]
pub struct PositionSizer;

/// Order notional above which bolder modes start splitting.
const SPLIT_THRESHOLD_USD: f64 = 100.0;
/// Second split threshold for aggressive mode.
const SPLIT_THRESHOLD_2_USD: f64 = 250.0;

impl PositionSizer {
    pub fn new() -> Self {
        Self
    }

    pub fn calculate(&self, symbol: &Symbol, target_size_usd: f64, mode: SizingMode) -> PositionSize {
        let target = target_size_usd.max(0.0);

        let size = match mode {
            SizingMode::Conservative => PositionSize {
                safe_size_usd: target * 0.8,
                split_count: 1,
                split_delay_sec: 0.5,
                risk_level: "low",
            },
            SizingMode::Balanced => PositionSize {
                safe_size_usd: target * 0.9,
                split_count: if target > SPLIT_THRESHOLD_USD { 2 } else { 1 },
                split_delay_sec: 0.3,
                risk_level: "medium",
            },
            SizingMode::Aggressive => PositionSize {
                safe_size_usd: target,
                split_count: if target > SPLIT_THRESHOLD_2_USD {
                    3
                } else if target > SPLIT_THRESHOLD_USD {
                    2
                } else {
                    1
                },
                split_delay_sec: 0.15,
                risk_level: "high",
            },
        };

        debug!(
            %symbol,
            target,
            final_usd = size.safe_size_usd,
            splits = size.split_count,
            ?mode,
            "position sized"
        );
        size
    }
}
