//! In-memory paper execution port.
//!
//! Models the happy path: maker orders fill at their limit price,
//! market orders fill at the current opposite touch. Every fill flows
//! through the long-only position book and is echoed to any
//! subscribed logger. Failures surface as `None`, matching the port
//! contract.

use crate::position::PositionBook;
use async_trait::async_trait;
use rust_decimal::Decimal;
use spotmm_book::BookTracker;
use spotmm_core::{
    now_ms, ExecutionPort, Fill, MarketFill, OrderSide, PositionSnapshot, Price, Size, Symbol,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Paper executor.
pub struct PaperExecutor {
    books: Arc<BookTracker>,
    positions: Arc<PositionBook>,
    /// Taker fee in bps applied to market fills; maker fills are free.
    taker_fee_bps: f64,
    fills: broadcast::Sender<Fill>,
}

impl PaperExecutor {
    pub fn new(books: Arc<BookTracker>, positions: Arc<PositionBook>) -> Self {
        let (fills, _) = broadcast::channel(256);
        Self {
            books,
            positions,
            taker_fee_bps: 0.0,
            fills,
        }
    }

    pub fn with_taker_fee_bps(mut self, bps: f64) -> Self {
        self.taker_fee_bps = bps;
        self
    }

    /// Synthetic fill stream for loggers.
    pub fn subscribe_fills(&self) -> broadcast::Receiver<Fill> {
        self.fills.subscribe()
    }

    pub fn positions(&self) -> &Arc<PositionBook> {
        &self.positions
    }

    fn fee_for(&self, price: Price, qty: Size, taker: bool) -> Size {
        if !taker || self.taker_fee_bps <= 0.0 {
            return Size::ZERO;
        }
        let notional = qty.notional(price);
        let bps = Decimal::from_f64_retain(self.taker_fee_bps).unwrap_or(Decimal::ZERO);
        Size::new(notional * bps / Decimal::from(10_000))
    }

    fn apply(&self, symbol: &Symbol, side: OrderSide, price: Price, qty: Size, taker: bool) -> Fill {
        let order_id = Uuid::new_v4().to_string();
        let fill = Fill {
            symbol: symbol.clone(),
            side,
            qty,
            price,
            fee: self.fee_for(price, qty, taker),
            ts_ms: now_ms(),
            exchange_order_id: Some(order_id),
            trade_id: Some(Uuid::new_v4().to_string()),
        };
        self.positions.apply_fill(&fill);
        let _ = self.fills.send(fill.clone());
        fill
    }

    /// Price a market order off the current book: sells hit the bid,
    /// buys lift the ask.
    fn market_price(&self, symbol: &Symbol, side: OrderSide) -> Option<Price> {
        let quote = self.books.get_quote(symbol);
        let price = match side {
            OrderSide::Sell => quote.bid,
            OrderSide::Buy => quote.ask,
        };
        price.is_positive().then_some(price)
    }
}

#[async_trait]
impl ExecutionPort for PaperExecutor {
    async fn start_symbol(&self, symbol: &Symbol) {
        debug!(%symbol, "paper executor: symbol started");
    }

    async fn stop_symbol(&self, symbol: &Symbol) {
        debug!(%symbol, "paper executor: symbol stopped");
    }

    async fn place_maker(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        price: Price,
        qty: Size,
        tag: &str,
    ) -> Option<String> {
        if !price.is_positive() || !qty.is_positive() {
            return None;
        }
        // Long-only guard: a sell with no inventory has nothing to
        // fill and would otherwise fake a profitable exit.
        if side == OrderSide::Sell && !self.positions.snapshot(symbol).is_open() {
            warn!(%symbol, tag, "maker sell with no inventory dropped");
            return None;
        }
        let fill = self.apply(symbol, side, price, qty, false);
        debug!(%symbol, %side, %price, %qty, tag, "maker filled");
        fill.exchange_order_id
    }

    async fn place_market(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        qty: Size,
        tag: &str,
    ) -> Option<MarketFill> {
        if !qty.is_positive() {
            return None;
        }
        let price = self.market_price(symbol, side)?;
        if side == OrderSide::Sell && !self.positions.snapshot(symbol).is_open() {
            warn!(%symbol, tag, "market sell with no inventory dropped");
            return None;
        }
        let fill = self.apply(symbol, side, price, qty, true);
        debug!(%symbol, %side, %price, %qty, tag, "market filled");
        Some(MarketFill {
            order_id: fill.exchange_order_id.unwrap_or_default(),
            fill_price: price,
        })
    }

    async fn cancel_orders(&self, symbol: &Symbol) {
        // Maker orders fill synchronously in the paper model; there is
        // never a resting order to cancel.
        debug!(%symbol, "paper executor: cancel orders (no-op)");
    }

    async fn flatten_symbol(&self, symbol: &Symbol) {
        let snap = self.positions.snapshot(symbol);
        if !snap.is_open() {
            return;
        }
        if self
            .place_market(symbol, OrderSide::Sell, snap.qty, "flatten")
            .await
            .is_none()
        {
            // No live quote: close the inventory at its entry price so
            // shutdown always leaves the book flat.
            warn!(%symbol, "flatten without quote, closing at entry price");
            self.apply(symbol, OrderSide::Sell, snap.avg_price, snap.qty, true);
        }
    }

    async fn get_position(&self, symbol: &Symbol) -> PositionSnapshot {
        self.positions.snapshot(symbol)
    }
}
