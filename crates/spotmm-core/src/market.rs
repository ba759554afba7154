//! Market data records: top-of-book, L2 depth, tape trades.

use crate::decimal::{Price, Size};
use serde::{Deserialize, Serialize};

/// Validity of a top-of-book update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// Both sides present, bid <= ask.
    Valid,
    /// No bid side (price zero or missing).
    NoBid,
    /// No ask side.
    NoAsk,
    /// Both sides missing.
    Empty,
    /// Crossed book (bid > ask).
    Crossed,
}

impl BookState {
    pub fn is_tradeable(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

impl std::fmt::Display for BookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::NoBid => write!(f, "NO_BID"),
            Self::NoAsk => write!(f, "NO_ASK"),
            Self::Empty => write!(f, "EMPTY"),
            Self::Crossed => write!(f, "CROSSED"),
        }
    }
}

/// Best bid/offer for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopOfBook {
    pub bid: Price,
    pub bid_qty: Size,
    pub ask: Price,
    pub ask_qty: Size,
    /// Exchange send time, Unix ms.
    pub ts_ms: i64,
}

impl TopOfBook {
    pub fn new(bid: Price, bid_qty: Size, ask: Price, ask_qty: Size, ts_ms: i64) -> Self {
        Self {
            bid,
            bid_qty,
            ask,
            ask_qty,
            ts_ms,
        }
    }

    /// Mid price, `None` unless both sides are populated.
    pub fn mid(&self) -> Option<Price> {
        if self.state() != BookState::Valid {
            return None;
        }
        Some(Price::mid(self.bid, self.ask))
    }

    /// Spread in basis points relative to mid.
    pub fn spread_bps(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        let mid = self.mid()?;
        if mid.is_zero() {
            return None;
        }
        let spread = self.ask.inner() - self.bid.inner();
        (spread / mid.inner() * rust_decimal::Decimal::from(10_000)).to_f64()
    }

    pub fn state(&self) -> BookState {
        let has_bid = self.bid.is_positive();
        let has_ask = self.ask.is_positive();
        match (has_bid, has_ask) {
            (false, false) => BookState::Empty,
            (true, false) => BookState::NoAsk,
            (false, true) => BookState::NoBid,
            (true, true) => {
                if self.bid <= self.ask {
                    BookState::Valid
                } else {
                    BookState::Crossed
                }
            }
        }
    }

    /// At least one populated side; the tracker only publishes symbols
    /// once this holds.
    pub fn has_any_side(&self) -> bool {
        self.bid.is_positive() || self.ask.is_positive()
    }
}

/// One L2 price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub qty: Size,
}

impl DepthLevel {
    pub fn new(price: Price, qty: Size) -> Self {
        Self { price, qty }
    }

    pub fn notional(&self) -> rust_decimal::Decimal {
        self.qty.notional(self.price)
    }
}

/// Full L2 snapshot, replaced atomically (no incremental deltas).
///
/// Bids descend by price, asks ascend; both truncated to the keep
/// depth and filtered to positive prices/quantities by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Book {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
    pub ts_ms: i64,
}

impl L2Book {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Total bid-side notional across the snapshot.
    pub fn bid_notional(&self) -> rust_decimal::Decimal {
        self.bids.iter().map(DepthLevel::notional).sum()
    }

    /// Total ask-side notional across the snapshot.
    pub fn ask_notional(&self) -> rust_decimal::Decimal {
        self.asks.iter().map(DepthLevel::notional).sum()
    }

    /// Bid share of total visible notional, in [0, 1]. 0.5 when flat.
    pub fn imbalance(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let b = self.bid_notional().to_f64().unwrap_or(0.0);
        let a = self.ask_notional().to_f64().unwrap_or(0.0);
        if b + a <= 0.0 {
            return 0.5;
        }
        b / (b + a)
    }
}

/// Aggressor side of a tape trade, derived from the buyer-maker flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One trade in the rolling tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeTrade {
    pub price: Price,
    pub qty: Size,
    pub side: TradeSide,
    pub ts_ms: i64,
}

impl TapeTrade {
    pub fn usd(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.qty.notional(self.price).to_f64().unwrap_or(0.0)
    }
}

/// Derived per-symbol snapshot handed to consumers.
///
/// `mid` and `spread_bps` are recomputed on every read, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Price,
    pub ask: Price,
    pub bid_qty: Size,
    pub ask_qty: Size,
    pub mid: Price,
    pub spread_bps: f64,
    pub ts_ms: i64,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl Quote {
    /// The empty shape returned for unknown or zeroed symbols.
    pub fn empty() -> Self {
        Self {
            bid: Price::ZERO,
            ask: Price::ZERO,
            bid_qty: Size::ZERO,
            ask_qty: Size::ZERO,
            mid: Price::ZERO,
            spread_bps: 0.0,
            ts_ms: 0,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    /// Usable for a trading decision: both sides and mid positive.
    pub fn is_live(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive() && self.mid.is_positive()
    }

    pub fn has_depth(&self) -> bool {
        !self.bids.is_empty() || !self.asks.is_empty()
    }

    /// Bid share of visible L2 notional; 0.5 without depth.
    pub fn imbalance(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let b: rust_decimal::Decimal = self.bids.iter().map(DepthLevel::notional).sum();
        let a: rust_decimal::Decimal = self.asks.iter().map(DepthLevel::notional).sum();
        let b = b.to_f64().unwrap_or(0.0);
        let a = a.to_f64().unwrap_or(0.0);
        if b + a <= 0.0 {
            return 0.5;
        }
        b / (b + a)
    }

    /// Bid-side visible notional in USD.
    pub fn bid_depth_usd(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let b: rust_decimal::Decimal = self.bids.iter().map(DepthLevel::notional).sum();
        b.to_f64().unwrap_or(0.0)
    }

    /// Ask-side visible notional in USD.
    pub fn ask_depth_usd(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        let a: rust_decimal::Decimal = self.asks.iter().map(DepthLevel::notional).sum();
        a.to_f64().unwrap_or(0.0)
    }
}
