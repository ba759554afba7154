//! Per-symbol strategy state.

use crate::exit::TrailingState;
use rust_decimal::Decimal;
use spotmm_core::{Price, Size, TradeExitParams};

/// One accumulated long lot (pyramid element).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lot {
    pub qty: Size,
    pub entry_price: Price,
    pub entry_ts_ms: i64,
}

/// The open trade a symbol loop is managing.
#[derive(Debug, Clone)]
pub struct OpenTrade {
    pub trade_id: String,
    pub lots: Vec<Lot>,
    /// Exit parameters frozen at entry; later param patches never
    /// touch an open trade.
    pub frozen: TradeExitParams,
    pub trailing: TrailingState,
    pub spread_bps_entry: f64,
    pub imbalance_entry: f64,
    /// Whether an MM pattern backed this entry. The MM-gone emergency
    /// exit only applies to trades that had an MM to lose.
    pub mm_at_entry: bool,
}

impl OpenTrade {
    pub fn total_qty(&self) -> Size {
        Size::new(self.lots.iter().map(|l| l.qty.inner()).sum())
    }

    /// Quantity-weighted average entry across lots.
    pub fn avg_entry(&self) -> Price {
        let qty: Decimal = self.lots.iter().map(|l| l.qty.inner()).sum();
        if qty.is_zero() {
            return Price::ZERO;
        }
        let cost: Decimal = self
            .lots
            .iter()
            .map(|l| l.qty.inner() * l.entry_price.inner())
            .sum();
        Price::new(cost / qty)
    }

    /// Entry time of the oldest lot; drives hold and timeout clocks.
    pub fn oldest_entry_ts_ms(&self) -> i64 {
        self.lots.iter().map(|l| l.entry_ts_ms).min().unwrap_or(0)
    }

    /// PnL in bps against the current bid (exits sell at bid).
    pub fn pnl_bps(&self, bid: Price) -> f64 {
        bid.bps_from(self.avg_entry()).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spotmm_core::StrategyParams;

    fn trade(lots: Vec<Lot>) -> OpenTrade {
        OpenTrade {
            trade_id: "t-1".to_string(),
            lots,
            frozen: TradeExitParams::freeze(&StrategyParams::default(), -3.0),
            trailing: TrailingState::default(),
            spread_bps_entry: 2.0,
            imbalance_entry: 0.5,
            mm_at_entry: false,
        }
    }

    fn lot(qty: Decimal, price: Decimal, ts: i64) -> Lot {
        Lot {
            qty: Size::new(qty),
            entry_price: Price::new(price),
            entry_ts_ms: ts,
        }
    }

    #[test]
    fn test_weighted_average_entry() {
        let t = trade(vec![lot(dec!(1), dec!(100), 0), lot(dec!(3), dec!(104), 10)]);
        // (1*100 + 3*104) / 4 = 103
        assert_eq!(t.avg_entry().inner(), dec!(103));
        assert_eq!(t.total_qty().inner(), dec!(4));
        assert_eq!(t.oldest_entry_ts_ms(), 0);
    }

    #[test]
    fn test_pnl_uses_bid() {
        let t = trade(vec![lot(dec!(1), dec!(100), 0)]);
        let pnl = t.pnl_bps(Price::new(dec!(100.05)));
        assert!((pnl - 5.0).abs() < 1e-9);
        let pnl = t.pnl_bps(Price::new(dec!(99.9)));
        assert!((pnl + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_trade_is_flat() {
        let t = trade(vec![]);
        assert_eq!(t.avg_entry(), Price::ZERO);
        assert_eq!(t.pnl_bps(Price::new(dec!(100))), 0.0);
    }
}
