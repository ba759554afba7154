//! MM-aware split entry execution.
//!
//! Slices an entry into maker orders with a delay between slices, and
//! watches the MM between slices: if it departs mid-execution the
//! remainder is abandoned rather than fed into a vanishing book.

use rust_decimal::Decimal;
use spotmm_core::{now_ms, ExecutionPort, OrderSide, Price, Size, Symbol};
use spotmm_detector::MmDetector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a split execution stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    MmDeparted,
    OrderRejected,
}

/// Result of a (possibly split) entry.
#[derive(Debug, Clone)]
pub struct EntryExecution {
    /// Order id of the first slice.
    pub order_id: Option<String>,
    pub filled_qty: Size,
    pub avg_fill_price: Price,
    /// Fill price drift versus the first slice, in bps.
    pub slippage_bps: f64,
    /// Filled fraction of the requested quantity.
    pub quality: f64,
    pub splits_done: u32,
    pub aborted: Option<AbortReason>,
}

impl EntryExecution {
    pub fn is_filled(&self) -> bool {
        self.filled_qty.is_positive()
    }
}

/// Split-entry executor.
pub struct SmartExecutor {
    detector: Arc<MmDetector>,
}

impl SmartExecutor {
    pub fn new(detector: Arc<MmDetector>) -> Self {
        Self { detector }
    }

    /// Execute an entry of `total_qty` at `price`, split into
    /// `split_count` maker slices `split_delay` apart.
    pub async fn execute_entry(
        &self,
        port: &dyn ExecutionPort,
        symbol: &Symbol,
        side: OrderSide,
        price: Price,
        total_qty: Size,
        split_count: u32,
        split_delay: Duration,
        current_spread_bps: f64,
    ) -> EntryExecution {
        let split_count = split_count.max(1);
        let slice_qty = Size::new(total_qty.inner() / Decimal::from(split_count));

        let mut first_order_id = None;
        let mut filled = Decimal::ZERO;
        let mut cost = Decimal::ZERO;
        let mut splits_done = 0u32;
        let mut aborted = None;

        for i in 0..split_count {
            if i > 0 {
                tokio::time::sleep(split_delay).await;

                // Re-check the MM before committing the next slice.
                if let Some(reason) = self.detector.is_mm_gone(symbol, current_spread_bps, now_ms())
                {
                    warn!(%symbol, reason, slice = i, "MM departed mid-entry, aborting remainder");
                    aborted = Some(AbortReason::MmDeparted);
                    break;
                }
            }

            match port.place_maker(symbol, side, price, slice_qty, "mm_entry").await {
                Some(order_id) => {
                    if first_order_id.is_none() {
                        first_order_id = Some(order_id);
                    }
                    filled += slice_qty.inner();
                    cost += slice_qty.inner() * price.inner();
                    splits_done += 1;
                }
                None => {
                    warn!(%symbol, slice = i, "entry slice rejected, aborting remainder");
                    aborted = Some(AbortReason::OrderRejected);
                    break;
                }
            }
        }

        let avg_fill = if filled > Decimal::ZERO {
            Price::new(cost / filled)
        } else {
            Price::ZERO
        };
        let slippage_bps = avg_fill.bps_from(price).unwrap_or(0.0).abs();
        let quality = if total_qty.is_positive() {
            use rust_decimal::prelude::ToPrimitive;
            (filled / total_qty.inner()).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        debug!(
            %symbol,
            filled = %filled,
            splits_done,
            quality,
            ?aborted,
            "entry execution complete"
        );

        EntryExecution {
            order_id: first_order_id,
            filled_qty: Size::new(filled),
            avg_fill_price: avg_fill,
            slippage_bps,
            quality,
            splits_done,
            aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperExecutor;
    use crate::position::PositionBook;
    use rust_decimal_macros::dec;
    use spotmm_book::BookTracker;
    use spotmm_detector::DetectorConfig;

    fn setup() -> (PaperExecutor, SmartExecutor) {
        let books = Arc::new(BookTracker::new());
        let paper = PaperExecutor::new(books, Arc::new(PositionBook::new()));
        let smart = SmartExecutor::new(Arc::new(MmDetector::new(DetectorConfig::default())));
        (paper, smart)
    }

    #[tokio::test]
    async fn test_single_slice_entry() {
        let (paper, smart) = setup();
        let sym = Symbol::new("ETHUSDT");

        let result = smart
            .execute_entry(
                &paper,
                &sym,
                OrderSide::Buy,
                Price::new(dec!(2000)),
                Size::new(dec!(0.01)),
                1,
                Duration::from_millis(1),
                2.0,
            )
            .await;

        assert!(result.is_filled());
        assert_eq!(result.filled_qty.inner(), dec!(0.01));
        assert_eq!(result.splits_done, 1);
        assert!((result.quality - 1.0).abs() < 1e-9);
        assert!(result.aborted.is_none());
        assert_eq!(result.slippage_bps, 0.0);
    }

    #[tokio::test]
    async fn test_split_entry_aborts_when_mm_gone() {
        let (paper, smart) = setup();
        let sym = Symbol::new("ETHUSDT");

        // The detector has no pattern for this symbol, so the
        // between-slice check reports the MM gone and only the first
        // slice fills.
        let result = smart
            .execute_entry(
                &paper,
                &sym,
                OrderSide::Buy,
                Price::new(dec!(2000)),
                Size::new(dec!(0.03)),
                3,
                Duration::from_millis(1),
                2.0,
            )
            .await;

        assert_eq!(result.splits_done, 1);
        assert_eq!(result.aborted, Some(AbortReason::MmDeparted));
        assert_eq!(result.filled_qty.inner(), dec!(0.01));
        assert!((result.quality - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rejected_slice_aborts() {
        let (paper, smart) = setup();
        let sym = Symbol::new("ETHUSDT");

        // Zero price is rejected by the paper port on the first slice.
        let result = smart
            .execute_entry(
                &paper,
                &sym,
                OrderSide::Buy,
                Price::ZERO,
                Size::new(dec!(0.01)),
                1,
                Duration::from_millis(1),
                2.0,
            )
            .await;

        assert!(!result.is_filled());
        assert_eq!(result.aborted, Some(AbortReason::OrderRejected));
        assert_eq!(result.quality, 0.0);
    }
}
