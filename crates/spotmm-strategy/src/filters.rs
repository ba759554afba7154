//! Entry filter chain.
//!
//! All filters must pass for an entry. The hard spread cap sits on
//! top of the minimum: a spread can be wide enough to clear the edge
//! floor yet too toxic to profit from with small TP targets.

use crate::scanner::MarketView;
use spotmm_core::StrategyParams;

/// First failing entry filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryReject {
    SpreadBelowMin,
    SpreadAboveHardCap,
    ImbalanceOutOfBand,
    EdgeBelowFloor,
    InsufficientDepth,
}

impl EntryReject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpreadBelowMin => "spread_below_min",
            Self::SpreadAboveHardCap => "spread_above_hard_cap",
            Self::ImbalanceOutOfBand => "imbalance_out_of_band",
            Self::EdgeBelowFloor => "edge_below_floor",
            Self::InsufficientDepth => "insufficient_depth",
        }
    }
}

/// Evaluate the entry filters against a market view.
pub fn check_entry_filters(params: &StrategyParams, view: &MarketView) -> Result<(), EntryReject> {
    if view.spread_bps < params.min_spread_bps {
        return Err(EntryReject::SpreadBelowMin);
    }
    if view.spread_bps > params.max_spread_bps_hard {
        return Err(EntryReject::SpreadAboveHardCap);
    }
    if view.imbalance < params.imbalance_min || view.imbalance > params.imbalance_max {
        return Err(EntryReject::ImbalanceOutOfBand);
    }
    if view.spread_bps < params.edge_floor_bps {
        return Err(EntryReject::EdgeBelowFloor);
    }
    if params.enable_depth_check && view.ask_depth_usd < params.order_size_usd {
        // A long entry later exits into resting liquidity; require the
        // far side can absorb the order size.
        return Err(EntryReject::InsufficientDepth);
    }
    Ok(())
}
