//! Execution-side contracts: order sides, exit reasons, fills, and
//! the ports the strategy core talks through.

use crate::decimal::{Price, Size};
use crate::error::CoreResult;
use crate::symbol::Symbol;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side. Spot long-only: entries are always `Buy`, exits `Sell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Why a position was closed. Recorded verbatim on every trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    HardSl,
    MmGone,
    WindowClose,
    Trail,
    TrailMarket,
    TrailExpired,
    Tp,
    TpMarket,
    TpExpired,
    TpSlippage,
    Sl,
    Timeout,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HardSl => "HARD_SL",
            Self::MmGone => "MM_GONE",
            Self::WindowClose => "WINDOW_CLOSE",
            Self::Trail => "TRAIL",
            Self::TrailMarket => "TRAIL_MARKET",
            Self::TrailExpired => "TRAIL_EXPIRED",
            Self::Tp => "TP",
            Self::TpMarket => "TP_MARKET",
            Self::TpExpired => "TP_EXPIRED",
            Self::TpSlippage => "TP_SLIPPAGE",
            Self::Sl => "SL",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Reasons that demand an immediate market order with no maker
    /// attempt.
    pub fn is_emergency(&self) -> bool {
        matches!(self, Self::HardSl | Self::MmGone | Self::WindowClose)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single execution fill applied to the position book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub qty: Size,
    pub price: Price,
    pub fee: Size,
    pub ts_ms: i64,
    /// Exchange order id, half of the idempotency key.
    pub exchange_order_id: Option<String>,
    /// Exchange trade id, the other half.
    pub trade_id: Option<String>,
}

/// Result of a market order: id plus the realized fill price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketFill {
    pub order_id: String,
    pub fill_price: Price,
}

/// Position snapshot returned by the execution port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub qty: Size,
    pub avg_price: Price,
    pub realized_pnl: rust_decimal::Decimal,
    pub ts_ms: i64,
}

impl PositionSnapshot {
    pub fn flat() -> Self {
        Self {
            qty: Size::ZERO,
            avg_price: Price::ZERO,
            realized_pnl: rust_decimal::Decimal::ZERO,
            ts_ms: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.qty.is_positive()
    }
}

/// Execution port implemented by the paper executor and, elsewhere,
/// by live adapters.
///
/// Failures surface as `None`; the port never raises into the
/// strategy loop.
#[async_trait]
pub trait ExecutionPort: Send + Sync {
    /// Warm any per-symbol state before the loop starts.
    async fn start_symbol(&self, symbol: &Symbol);

    /// Release per-symbol state after the loop stops.
    async fn stop_symbol(&self, symbol: &Symbol);

    /// Rest a maker-style limit order. Returns the order id on fill.
    async fn place_maker(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        price: Price,
        qty: Size,
        tag: &str,
    ) -> Option<String>;

    /// Cross the spread with a market order.
    async fn place_market(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        qty: Size,
        tag: &str,
    ) -> Option<MarketFill>;

    /// Cancel all resting orders for a symbol.
    async fn cancel_orders(&self, symbol: &Symbol);

    /// Market-close any remaining quantity.
    async fn flatten_symbol(&self, symbol: &Symbol);

    /// Current position for a symbol.
    async fn get_position(&self, symbol: &Symbol) -> PositionSnapshot;
}

/// A closed trade as reported to the outcome sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trade_id: String,
    pub symbol: Symbol,
    pub entry_price: Price,
    pub exit_price: Price,
    pub qty: Size,
    pub pnl_usd: f64,
    pub pnl_bps: f64,
    pub exit_reason: ExitReason,
    pub entry_ts_ms: i64,
    pub exit_ts_ms: i64,
    pub held_ms: i64,
    pub spread_bps_entry: f64,
    pub imbalance_entry: f64,
}

/// Narrow write-only port to the surrounding persistence layer.
///
/// Writes are best-effort: errors are logged by implementations and
/// never block trading decisions.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn record_outcome(&self, outcome: &TradeOutcome);
}

/// Features handed to the pluggable entry predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryFeatures {
    pub symbol: Symbol,
    pub spread_bps: f64,
    pub imbalance: f64,
}

/// Pluggable ML entry filter. Scoring failures fail open.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn score(&self, features: &EntryFeatures) -> CoreResult<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_strings() {
        assert_eq!(ExitReason::HardSl.as_str(), "HARD_SL");
        assert_eq!(ExitReason::TpSlippage.as_str(), "TP_SLIPPAGE");
        assert_eq!(ExitReason::TrailExpired.to_string(), "TRAIL_EXPIRED");
    }

    #[test]
    fn test_emergency_reasons() {
        assert!(ExitReason::HardSl.is_emergency());
        assert!(ExitReason::MmGone.is_emergency());
        assert!(ExitReason::WindowClose.is_emergency());
        assert!(!ExitReason::Tp.is_emergency());
        assert!(!ExitReason::Timeout.is_emergency());
    }

    #[test]
    fn test_flat_snapshot() {
        let snap = PositionSnapshot::flat();
        assert!(!snap.is_open());
        assert!(snap.qty.is_zero());
    }
}
