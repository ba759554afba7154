//! Long-only position accounting.
//!
//! Inventory math with the spot invariant baked in: quantity never
//! goes negative, oversells are clamped to the held amount, and a
//! legacy negative quantity (imported from elsewhere) is repaired by
//! the next BUY. Fills are deduplicated by their
//! `(exchange_order_id, trade_id)` key.

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use spotmm_core::{now_ms, Fill, OrderSide, PositionSnapshot, Price, Size, Symbol};
use std::collections::HashSet;
use tracing::debug;

/// Bound on the idempotency set; cleared wholesale when exceeded.
const IDEM_CACHE_LIMIT: usize = 10_000;

#[derive(Debug, Clone)]
struct Position {
    qty: Decimal,
    avg_price: Decimal,
    realized_pnl: Decimal,
    ts_ms: i64,
}

impl Position {
    fn flat() -> Self {
        Self {
            qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            ts_ms: 0,
        }
    }
}

/// Result of applying one fill.
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    pub qty_after: Size,
    pub avg_after: Price,
    pub realized_delta: Decimal,
    pub realized_cum: Decimal,
}

/// Process-wide position book.
pub struct PositionBook {
    positions: DashMap<Symbol, Position>,
    idem_seen: Mutex<HashSet<(String, String)>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            positions: DashMap::new(),
            idem_seen: Mutex::new(HashSet::new()),
        }
    }

    /// Apply a fill. Re-delivered fills (same order and trade id)
    /// leave the book untouched and return the current state.
    pub fn apply_fill(&self, fill: &Fill) -> FillOutcome {
        if let (Some(order_id), Some(trade_id)) = (&fill.exchange_order_id, &fill.trade_id) {
            let key = (order_id.clone(), trade_id.clone());
            let mut seen = self.idem_seen.lock();
            if seen.contains(&key) {
                debug!(symbol = %fill.symbol, %order_id, %trade_id, "duplicate fill ignored");
                drop(seen);
                return self.outcome_snapshot(&fill.symbol);
            }
            if seen.len() >= IDEM_CACHE_LIMIT {
                seen.clear();
            }
            seen.insert(key);
        }

        let qty = fill.qty.inner().max(Decimal::ZERO);
        let price = fill.price.inner().max(Decimal::ZERO);
        let fee = fill.fee.inner().max(Decimal::ZERO);

        let mut entry = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(Position::flat);
        let pos = entry.value_mut();

        let mut realized_delta = Decimal::ZERO;

        match fill.side {
            OrderSide::Buy => {
                if pos.qty < Decimal::ZERO {
                    // Legacy short repair: close it first, open long
                    // with whatever remains.
                    let close = qty.min(-pos.qty);
                    realized_delta += (pos.avg_price - price) * close;
                    pos.qty += close;
                    if pos.qty.is_zero() {
                        pos.avg_price = Decimal::ZERO;
                    }
                    let remainder = qty - close;
                    if remainder > Decimal::ZERO {
                        pos.avg_price = price;
                        pos.qty = remainder;
                    }
                } else {
                    let new_qty = pos.qty + qty;
                    if new_qty > Decimal::ZERO {
                        pos.avg_price = (pos.qty * pos.avg_price + qty * price) / new_qty;
                    }
                    pos.qty = new_qty;
                }
                realized_delta -= fee;
            }
            OrderSide::Sell => {
                // Spot long-only: the sell is capped to held quantity,
                // any excess is silently dropped.
                let qty_sold = if pos.qty > Decimal::ZERO {
                    qty.min(pos.qty)
                } else {
                    Decimal::ZERO
                };
                if qty_sold > Decimal::ZERO {
                    realized_delta += (price - pos.avg_price) * qty_sold;
                    pos.qty -= qty_sold;
                    if pos.qty.is_zero() {
                        pos.avg_price = Decimal::ZERO;
                    }
                }
                realized_delta -= fee;
            }
        }

        pos.realized_pnl += realized_delta;
        pos.ts_ms = if fill.ts_ms > 0 { fill.ts_ms } else { now_ms() };

        FillOutcome {
            qty_after: Size::new(pos.qty),
            avg_after: Price::new(pos.avg_price),
            realized_delta,
            realized_cum: pos.realized_pnl,
        }
    }

    fn outcome_snapshot(&self, symbol: &Symbol) -> FillOutcome {
        let snap = self.snapshot(symbol);
        FillOutcome {
            qty_after: snap.qty,
            avg_after: snap.avg_price,
            realized_delta: Decimal::ZERO,
            realized_cum: snap.realized_pnl,
        }
    }

    pub fn snapshot(&self, symbol: &Symbol) -> PositionSnapshot {
        self.positions
            .get(symbol)
            .map(|pos| PositionSnapshot {
                qty: Size::new(pos.qty),
                avg_price: Price::new(pos.avg_price),
                realized_pnl: pos.realized_pnl,
                ts_ms: pos.ts_ms,
            })
            .unwrap_or_else(PositionSnapshot::flat)
    }

    /// Symbols currently holding a long.
    pub fn open_symbols(&self) -> Vec<Symbol> {
        self.positions
            .iter()
            .filter(|e| e.value().qty > Decimal::ZERO)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Total notional across open positions at their entry prices.
    pub fn total_exposure_usd(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.positions
            .iter()
            .filter(|e| e.value().qty > Decimal::ZERO)
            .map(|e| (e.value().qty * e.value().avg_price).to_f64().unwrap_or(0.0))
            .sum()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
        ids: Option<(&str, &str)>,
    ) -> Fill {
        Fill {
            symbol: Symbol::new("ETHUSDT"),
            side,
            qty: Size::new(qty),
            price: Price::new(price),
            fee: Size::ZERO,
            ts_ms: 1_000,
            exchange_order_id: ids.map(|(o, _)| o.to_string()),
            trade_id: ids.map(|(_, t)| t.to_string()),
        }
    }

    #[test]
    fn test_buy_weighted_average() {
        let book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, dec!(1), dec!(100), None));
        let out = book.apply_fill(&fill(OrderSide::Buy, dec!(1), dec!(110), None));

        assert_eq!(out.qty_after.inner(), dec!(2));
        assert_eq!(out.avg_after.inner(), dec!(105));
    }

    #[test]
    fn test_sell_realizes_pnl() {
        let book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, dec!(2), dec!(100), None));
        let out = book.apply_fill(&fill(OrderSide::Sell, dec!(1), dec!(110), None));

        assert_eq!(out.realized_delta, dec!(10));
        assert_eq!(out.qty_after.inner(), dec!(1));
        assert_eq!(out.avg_after.inner(), dec!(100));
    }

    #[test]
    fn test_full_close_zeroes_average() {
        let book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, dec!(1), dec!(100), None));
        let out = book.apply_fill(&fill(OrderSide::Sell, dec!(1), dec!(90), None));

        assert_eq!(out.qty_after, Size::ZERO);
        assert_eq!(out.avg_after, Price::ZERO);
        assert_eq!(out.realized_delta, dec!(-10));
    }

    #[test]
    fn test_oversell_clamped_never_negative() {
        let book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, dec!(1), dec!(100), None));
        let out = book.apply_fill(&fill(OrderSide::Sell, dec!(5), dec!(110), None));

        // Only the held quantity sells; no short is created.
        assert_eq!(out.qty_after, Size::ZERO);
        assert_eq!(out.realized_delta, dec!(10));

        // Selling flat is a no-op.
        let out = book.apply_fill(&fill(OrderSide::Sell, dec!(3), dec!(120), None));
        assert_eq!(out.qty_after, Size::ZERO);
        assert_eq!(out.realized_delta, Decimal::ZERO);
    }

    #[test]
    fn test_qty_never_negative_over_random_walk() {
        let book = PositionBook::new();
        let sym = Symbol::new("ETHUSDT");
        // Deterministic pseudo-random fill sequence.
        let mut seed = 0x2545_F491u64;
        for i in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let side = if seed & 1 == 0 { OrderSide::Buy } else { OrderSide::Sell };
            let qty = Decimal::from((seed >> 17) % 7 + 1);
            let price = Decimal::from(100 + (i % 13));
            book.apply_fill(&fill(side, qty, price, None));
            assert!(book.snapshot(&sym).qty.inner() >= Decimal::ZERO);
        }
    }

    #[test]
    fn test_duplicate_fill_idempotent() {
        let book = PositionBook::new();
        let f = fill(OrderSide::Buy, dec!(1), dec!(100), Some(("oid-1", "tid-1")));
        book.apply_fill(&f);
        let after_dup = book.apply_fill(&f);

        assert_eq!(after_dup.qty_after.inner(), dec!(1));
        assert_eq!(after_dup.realized_delta, Decimal::ZERO);

        // A different trade id under the same order id applies.
        let f2 = fill(OrderSide::Buy, dec!(1), dec!(100), Some(("oid-1", "tid-2")));
        assert_eq!(book.apply_fill(&f2).qty_after.inner(), dec!(2));
    }

    #[test]
    fn test_untagged_fills_not_deduped() {
        let book = PositionBook::new();
        let f = fill(OrderSide::Buy, dec!(1), dec!(100), None);
        book.apply_fill(&f);
        book.apply_fill(&f);
        assert_eq!(book.snapshot(&Symbol::new("ETHUSDT")).qty.inner(), dec!(2));
    }

    #[test]
    fn test_fee_reduces_realized() {
        let book = PositionBook::new();
        let mut f = fill(OrderSide::Buy, dec!(1), dec!(100), None);
        f.fee = Size::new(dec!(0.05));
        let out = book.apply_fill(&f);
        assert_eq!(out.realized_delta, dec!(-0.05));
    }

    #[test]
    fn test_exposure_and_open_symbols() {
        let book = PositionBook::new();
        book.apply_fill(&fill(OrderSide::Buy, dec!(2), dec!(100), None));
        assert_eq!(book.open_symbols().len(), 1);
        assert!((book.total_exposure_usd() - 200.0).abs() < 1e-9);
    }
}
