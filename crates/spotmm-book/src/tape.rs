//! Rolling trade tape.
//!
//! Per-symbol bounded deque of recent trades, retained for the window
//! and capped in count. Metrics are computed over the live window on
//! every read.

use dashmap::DashMap;
use parking_lot::RwLock;
use spotmm_core::{TapeTrade, TradeSide, Symbol};
use std::collections::VecDeque;
use std::sync::Arc;

/// Venue-wide threshold above which a trade counts as large.
pub const LARGE_TRADE_USD: f64 = 1_000.0;

const WINDOW_MS: i64 = 60_000;
const MAX_TRADES_KEPT: usize = 100;

/// Metrics over the rolling window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TapeMetrics {
    /// Sum of price*qty over the window.
    pub usd_per_min: f64,
    /// Trade count over the window.
    pub trades_per_min: usize,
    pub median_trade_usd: f64,
    /// Aggressive-buy fraction of total trades.
    pub buy_pressure: f64,
    /// Trades at or above [`LARGE_TRADE_USD`].
    pub large_trades: usize,
    pub total_trades: usize,
}

type Tape = Arc<RwLock<VecDeque<TapeTrade>>>;

/// Process-wide tape tracker.
pub struct TapeTracker {
    tapes: DashMap<Symbol, Tape>,
}

impl TapeTracker {
    pub fn new() -> Self {
        Self {
            tapes: DashMap::new(),
        }
    }

    fn tape(&self, symbol: &Symbol) -> Tape {
        self.tapes
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(RwLock::new(VecDeque::with_capacity(MAX_TRADES_KEPT))))
            .clone()
    }

    /// Append trades, dropping anything already outside the window.
    pub fn on_trades(&self, symbol: &Symbol, trades: &[TapeTrade], now_ms: i64) {
        if trades.is_empty() {
            return;
        }
        let cutoff = now_ms - WINDOW_MS;
        let tape = self.tape(symbol);
        let mut guard = tape.write();
        for trade in trades {
            if trade.ts_ms < cutoff {
                continue;
            }
            if guard.len() == MAX_TRADES_KEPT {
                guard.pop_front();
            }
            guard.push_back(*trade);
        }
        while guard.front().is_some_and(|t| t.ts_ms < cutoff) {
            guard.pop_front();
        }
    }

    /// Metrics over the live window; the zero shape for unknown
    /// symbols.
    pub fn metrics(&self, symbol: &Symbol, now_ms: i64) -> TapeMetrics {
        let Some(tape) = self.tapes.get(symbol) else {
            return TapeMetrics::default();
        };
        let cutoff = now_ms - WINDOW_MS;
        let guard = tape.read();

        let mut usd_values: Vec<f64> = Vec::with_capacity(guard.len());
        let mut buy_count = 0usize;
        let mut large = 0usize;
        for trade in guard.iter().filter(|t| t.ts_ms >= cutoff) {
            let usd = trade.usd();
            usd_values.push(usd);
            if trade.side == TradeSide::Buy {
                buy_count += 1;
            }
            if usd >= LARGE_TRADE_USD {
                large += 1;
            }
        }

        let total = usd_values.len();
        if total == 0 {
            return TapeMetrics::default();
        }

        let usd_per_min: f64 = usd_values.iter().sum();
        let median = {
            let mut sorted = usd_values.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            if total % 2 == 1 {
                sorted[total / 2]
            } else {
                (sorted[total / 2 - 1] + sorted[total / 2]) / 2.0
            }
        };

        TapeMetrics {
            usd_per_min,
            trades_per_min: total,
            median_trade_usd: median,
            buy_pressure: buy_count as f64 / total as f64,
            large_trades: large,
            total_trades: total,
        }
    }
}

impl Default for TapeTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spotmm_core::{Price, Size};

    fn trade(price: rust_decimal::Decimal, qty: rust_decimal::Decimal, side: TradeSide, ts_ms: i64) -> TapeTrade {
        TapeTrade {
            price: Price::new(price),
            qty: Size::new(qty),
            side,
            ts_ms,
        }
    }

    #[test]
    fn test_empty_metrics() {
        let tracker = TapeTracker::new();
        let m = tracker.metrics(&Symbol::new("ETHUSDT"), 1_000_000);
        assert_eq!(m, TapeMetrics::default());
    }

    #[test]
    fn test_window_metrics() {
        let tracker = TapeTracker::new();
        let sym = Symbol::new("ETHUSDT");
        let now = 1_000_000i64;
        tracker.on_trades(
            &sym,
            &[
                trade(dec!(10), dec!(50), TradeSide::Buy, now - 1_000),   // $500
                trade(dec!(10), dec!(150), TradeSide::Buy, now - 2_000),  // $1500 (large)
                trade(dec!(10), dec!(20), TradeSide::Sell, now - 3_000),  // $200
                trade(dec!(10), dec!(10), TradeSide::Sell, now - 90_000), // outside window
            ],
            now,
        );

        let m = tracker.metrics(&sym, now);
        assert_eq!(m.total_trades, 3);
        assert_eq!(m.trades_per_min, 3);
        assert!((m.usd_per_min - 2_200.0).abs() < 1e-9);
        assert!((m.median_trade_usd - 500.0).abs() < 1e-9);
        assert!((m.buy_pressure - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.large_trades, 1);
    }

    #[test]
    fn test_count_cap() {
        let tracker = TapeTracker::new();
        let sym = Symbol::new("ETHUSDT");
        let now = 1_000_000i64;
        let trades: Vec<TapeTrade> = (0..150)
            .map(|i| trade(dec!(1), dec!(1), TradeSide::Buy, now - i))
            .collect();
        tracker.on_trades(&sym, &trades, now);

        let m = tracker.metrics(&sym, now);
        assert_eq!(m.total_trades, 100);
    }

    #[test]
    fn test_old_trades_expire() {
        let tracker = TapeTracker::new();
        let sym = Symbol::new("ETHUSDT");
        tracker.on_trades(&sym, &[trade(dec!(1), dec!(1), TradeSide::Buy, 1_000)], 10_000);
        // Advance past the window; the old trade falls out on read.
        let m = tracker.metrics(&sym, 200_000);
        assert_eq!(m.total_trades, 0);
    }
}
