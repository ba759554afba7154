//! Heuristic payload field resolution.
//!
//! Each payload decoder tries its declared message first, then falls
//! back to walking the wire format directly. The fallbacks accept
//! anything that validates as the right shape (positive prices, bid on
//! the cheaper side), which is what keeps decoding alive across
//! exchange schema drift.

use crate::messages::{BookTickerPayload, DealsPayload, DepthPayload};
use crate::wire::{self, WireField, WireValue};
use bytes::Bytes;
use prost::Message;
use rust_decimal::Decimal;
use spotmm_core::{DepthLevel, Price, Size, TapeTrade, TradeSide};
use std::str::FromStr;

/// Decoded top-of-book values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookTickerFields {
    pub bid: Price,
    pub bid_qty: Size,
    pub ask: Price,
    pub ask_qty: Size,
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s).ok()
}

/// Numeric view of one wire field: decimal strings, doubles and
/// varints all count.
fn numeric_value(field: &WireField) -> Option<Decimal> {
    match &field.value {
        WireValue::Bytes(b) => std::str::from_utf8(b).ok().and_then(parse_decimal),
        WireValue::Varint(v) => Some(Decimal::from(*v)),
        WireValue::Fixed64(raw) => {
            let f = f64::from_bits(*raw);
            if f.is_finite() {
                Decimal::from_f64_retain(f)
            } else {
                None
            }
        }
        WireValue::Fixed32(raw) => {
            let f = f32::from_bits(*raw) as f64;
            if f.is_finite() {
                Decimal::from_f64_retain(f)
            } else {
                None
            }
        }
    }
}

/// A `(price, quantity)` pair from a `{1: price, 2: quantity}` item.
fn level_from_item(item: &Bytes) -> Option<(Decimal, Decimal)> {
    let fields = wire::read_fields(item).ok()?;
    let mut price = None;
    let mut qty = None;
    for f in &fields {
        match f.tag {
            1 => price = numeric_value(f),
            2 => qty = numeric_value(f),
            _ => {}
        }
    }
    Some((price?, qty?))
}

/// Collect repeated `{price, quantity}` sub-message groups, keyed by
/// field tag, preserving wire order within a group.
fn level_groups(fields: &[WireField]) -> Vec<(u32, Vec<(Decimal, Decimal)>)> {
    let mut groups: Vec<(u32, Vec<(Decimal, Decimal)>)> = Vec::new();
    for f in fields {
        let Some(bytes) = f.as_bytes() else { continue };
        let Some(level) = level_from_item(bytes) else { continue };
        match groups.iter_mut().find(|(tag, _)| *tag == f.tag) {
            Some((_, levels)) => levels.push(level),
            None => groups.push((f.tag, vec![level])),
        }
    }
    groups
}

fn validate_book(bid: Decimal, ask: Decimal) -> bool {
    bid > Decimal::ZERO && ask > Decimal::ZERO && bid <= ask
}

/// Decode a book-ticker payload.
///
/// Declared scalar message first; then positional numeric fields with
/// both plausible layouts; then the first level of repeated
/// `{price, quantity}` groups.
pub fn decode_book_ticker(payload: &Bytes) -> Option<BookTickerFields> {
    // 1. Declared message.
    if let Ok(msg) = BookTickerPayload::decode(payload.as_ref()) {
        if let (Some(bid), Some(ask)) = (parse_decimal(&msg.bid_price), parse_decimal(&msg.ask_price)) {
            if validate_book(bid, ask) {
                return Some(BookTickerFields {
                    bid: Price::new(bid),
                    bid_qty: Size::new(parse_decimal(&msg.bid_quantity).unwrap_or_default()),
                    ask: Price::new(ask),
                    ask_qty: Size::new(parse_decimal(&msg.ask_quantity).unwrap_or_default()),
                });
            }
        }
    }

    let fields = wire::read_fields(payload).ok()?;

    // 2. Positional scalars. The published layout is
    // (bid, bidQty, ask, askQty); some feeds interleave as
    // (bid, ask, bidQty, askQty). Accept whichever validates.
    let scalars: Vec<Decimal> = fields
        .iter()
        .filter(|f| f.tag <= 8)
        .filter_map(numeric_value)
        .collect();
    if scalars.len() >= 4 {
        let (b, bq, a, aq) = (scalars[0], scalars[1], scalars[2], scalars[3]);
        if validate_book(b, a) {
            return Some(BookTickerFields {
                bid: Price::new(b),
                bid_qty: Size::new(bq),
                ask: Price::new(a),
                ask_qty: Size::new(aq),
            });
        }
        let (b, a, bq, aq) = (scalars[0], scalars[1], scalars[2], scalars[3]);
        if validate_book(b, a) {
            return Some(BookTickerFields {
                bid: Price::new(b),
                bid_qty: Size::new(bq),
                ask: Price::new(a),
                ask_qty: Size::new(aq),
            });
        }
    } else if scalars.len() == 2 && validate_book(scalars[0], scalars[1]) {
        return Some(BookTickerFields {
            bid: Price::new(scalars[0]),
            bid_qty: Size::ZERO,
            ask: Price::new(scalars[1]),
            ask_qty: Size::ZERO,
        });
    }

    // 3. First level of two repeated {price, quantity} groups; the
    // cheaper side is the bid.
    let groups = level_groups(&fields);
    if groups.len() >= 2 {
        let (p0, q0) = *groups[0].1.first()?;
        let (p1, q1) = *groups[1].1.first()?;
        let ((bid, bid_qty), (ask, ask_qty)) = if p0 <= p1 {
            ((p0, q0), (p1, q1))
        } else {
            ((p1, q1), (p0, q0))
        };
        if validate_book(bid, ask) {
            return Some(BookTickerFields {
                bid: Price::new(bid),
                bid_qty: Size::new(bid_qty),
                ask: Price::new(ask),
                ask_qty: Size::new(ask_qty),
            });
        }
    }

    None
}

fn deal_from_item(item: &Bytes) -> Option<TapeTrade> {
    let fields = wire::read_fields(item).ok()?;
    let mut price = None;
    let mut qty = None;
    let mut trade_type = 0u64;
    let mut ts_ms = 0i64;
    for f in &fields {
        match f.tag {
            1 => price = numeric_value(f),
            2 => qty = numeric_value(f),
            3 => trade_type = f.as_varint().unwrap_or(0),
            4 => ts_ms = f.as_varint().unwrap_or(0) as i64,
            _ => {}
        }
    }
    let price = price?;
    let qty = qty?;
    if price <= Decimal::ZERO || qty <= Decimal::ZERO {
        return None;
    }
    Some(TapeTrade {
        price: Price::new(price),
        qty: Size::new(qty),
        // trade_type 1 = aggressive buy (buyer-maker false).
        side: if trade_type == 1 {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        },
        ts_ms,
    })
}

/// Decode a deals payload into tape trades, newest last.
pub fn decode_deals(payload: &Bytes) -> Vec<TapeTrade> {
    // 1. Declared message.
    if let Ok(msg) = DealsPayload::decode(payload.as_ref()) {
        let trades: Vec<TapeTrade> = msg
            .deals
            .iter()
            .filter_map(|d| {
                let price = parse_decimal(&d.price)?;
                let qty = parse_decimal(&d.quantity)?;
                if price <= Decimal::ZERO || qty <= Decimal::ZERO {
                    return None;
                }
                Some(TapeTrade {
                    price: Price::new(price),
                    qty: Size::new(qty),
                    side: if d.trade_type == 1 {
                        TradeSide::Buy
                    } else {
                        TradeSide::Sell
                    },
                    ts_ms: d.time,
                })
            })
            .collect();
        if !trades.is_empty() {
            return trades;
        }
    }

    // 2. Any repeated sub-message whose items carry the deal shape.
    let Ok(fields) = wire::read_fields(payload) else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|f| f.as_bytes())
        .filter_map(deal_from_item)
        .collect()
}

/// Decoded depth sides; unsorted, exactly as the wire carried them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthFields {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

fn to_levels(levels: &[(Decimal, Decimal)]) -> Vec<DepthLevel> {
    levels
        .iter()
        .filter(|(p, q)| *p > Decimal::ZERO && *q > Decimal::ZERO)
        .map(|(p, q)| DepthLevel::new(Price::new(*p), Size::new(*q)))
        .collect()
}

/// Decode a partial-depth payload.
pub fn decode_depth(payload: &Bytes) -> Option<DepthFields> {
    // 1. Declared message (asks tag 1, bids tag 2).
    if let Ok(msg) = DepthPayload::decode(payload.as_ref()) {
        let asks: Vec<DepthLevel> = msg
            .asks
            .iter()
            .filter_map(|l| {
                let p = parse_decimal(&l.price)?;
                let q = parse_decimal(&l.quantity)?;
                (p > Decimal::ZERO && q > Decimal::ZERO)
                    .then(|| DepthLevel::new(Price::new(p), Size::new(q)))
            })
            .collect();
        let bids: Vec<DepthLevel> = msg
            .bids
            .iter()
            .filter_map(|l| {
                let p = parse_decimal(&l.price)?;
                let q = parse_decimal(&l.quantity)?;
                (p > Decimal::ZERO && q > Decimal::ZERO)
                    .then(|| DepthLevel::new(Price::new(p), Size::new(q)))
            })
            .collect();
        if !asks.is_empty() || !bids.is_empty() {
            return Some(DepthFields { bids, asks });
        }
    }

    // 2. Two repeated {price, quantity} groups; the side with the
    // higher best price is the asks.
    let fields = wire::read_fields(payload).ok()?;
    let groups = level_groups(&fields);
    if groups.len() < 2 {
        return None;
    }
    let a = to_levels(&groups[0].1);
    let b = to_levels(&groups[1].1);
    if a.is_empty() && b.is_empty() {
        return None;
    }
    let a_best = a.first().map(|l| l.price).unwrap_or(Price::ZERO);
    let b_best = b.first().map(|l| l.price).unwrap_or(Price::ZERO);
    let (asks, bids) = if a_best >= b_best { (a, b) } else { (b, a) };
    Some(DepthFields { bids, asks })
}

/// Payload specificity probe, used when a frame arrives without a
/// routable channel: messages with both bid/ask scalars first, then
/// two repeated level groups, then deal batches.
pub fn classify(payload: &Bytes) -> PayloadKind {
    if let Some(fields) = decode_book_ticker(payload) {
        // A depth snapshot also satisfies the repeated-group branch of
        // the book-ticker decoder; prefer depth when several levels
        // per side are present.
        if let Some(depth) = decode_depth(payload) {
            if depth.bids.len() + depth.asks.len() > 2 {
                return PayloadKind::Depth(depth);
            }
        }
        return PayloadKind::BookTicker(fields);
    }
    if let Some(depth) = decode_depth(payload) {
        return PayloadKind::Depth(depth);
    }
    let deals = decode_deals(payload);
    if !deals.is_empty() {
        return PayloadKind::Deals(deals);
    }
    PayloadKind::Unknown
}

/// Classified payload for untagged frames.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadKind {
    BookTicker(BookTickerFields),
    Depth(DepthFields),
    Deals(Vec<TapeTrade>),
    Unknown,
}
