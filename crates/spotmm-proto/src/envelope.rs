//! Envelope decoding and frame extraction.
//!
//! A raw WS binary message becomes zero or more `(channel, symbol,
//! send_ts, payload)` frames, which are then routed to typed market
//! messages by channel substring. Failures are counted, never raised.

use crate::messages::PushEnvelope;
use crate::resolve::{self, PayloadKind};
use crate::wire::{self, WireField};
use bytes::Bytes;
use flate2::read::GzDecoder;
use prost::Message;
use spotmm_core::{DepthLevel, Price, Size, Symbol, TapeTrade};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// One extracted frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: String,
    pub symbol: Symbol,
    pub send_ts_ms: i64,
    pub payload: Bytes,
}

/// Typed market message after routing.
#[derive(Debug, Clone)]
pub enum MarketMessage {
    BookTicker {
        symbol: Symbol,
        bid: Price,
        bid_qty: Size,
        ask: Price,
        ask_qty: Size,
        ts_ms: i64,
    },
    Deals {
        symbol: Symbol,
        trades: Vec<TapeTrade>,
    },
    Depth {
        symbol: Symbol,
        bids: Vec<DepthLevel>,
        asks: Vec<DepthLevel>,
        ts_ms: i64,
    },
}

impl MarketMessage {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::BookTicker { symbol, .. } => symbol,
            Self::Deals { symbol, .. } => symbol,
            Self::Depth { symbol, .. } => symbol,
        }
    }
}

/// Decode counters, shared with telemetry.
#[derive(Debug, Default)]
pub struct DecodeStats {
    pub decode_errors: AtomicU64,
    pub frames_total: AtomicU64,
    pub book_tickers: AtomicU64,
    pub deals: AtomicU64,
    pub depths: AtomicU64,
    pub unknown_channels: AtomicU64,
}

impl DecodeStats {
    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }
}

/// Gunzip a buffer when it carries the gzip magic, otherwise pass it
/// through unchanged.
pub fn maybe_gunzip(raw: &[u8]) -> Bytes {
    if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        let mut out = Vec::with_capacity(raw.len() * 4);
        let mut decoder = GzDecoder::new(raw);
        if decoder.read_to_end(&mut out).is_ok() {
            return Bytes::from(out);
        }
        // Corrupt gzip header: fall through with the original bytes.
    }
    Bytes::copy_from_slice(raw)
}

fn looks_like_symbol(s: &str) -> bool {
    (5..=20).contains(&s.len())
        && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && s.chars().any(|c| c.is_ascii_uppercase())
}

fn looks_like_channel(s: &str) -> bool {
    s.contains('@') || s.contains("Ticker") || s.contains("deals") || s.contains("depth")
}

/// Plausible epoch-milliseconds range for a send timestamp.
fn looks_like_ts_ms(v: u64) -> bool {
    (1_000_000_000_000..10_000_000_000_000).contains(&v)
}

/// The symbol rides in the topic as an `@`-segment, usually last —
/// except for depth topics, which append the level count.
fn symbol_from_channel(channel: &str) -> Option<Symbol> {
    channel
        .rsplit('@')
        .find(|seg| looks_like_symbol(seg))
        .map(Symbol::new)
}

/// Envelope decoder.
pub struct EnvelopeDecoder {
    stats: DecodeStats,
    /// Classify untagged payloads by wire shape when the channel is
    /// not routable.
    bruteforce: bool,
}

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self {
            stats: DecodeStats::default(),
            bruteforce: true,
        }
    }

    pub fn with_bruteforce(mut self, enabled: bool) -> Self {
        self.bruteforce = enabled;
        self
    }

    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Decode one raw WS binary message into typed market messages.
    ///
    /// Contract: never panics, never errors. Anything unrecognizable
    /// bumps `decode_errors` and yields nothing.
    pub fn decode(&self, raw: &[u8]) -> Vec<MarketMessage> {
        let buf = maybe_gunzip(raw);
        let frames = self.extract_frames(buf);
        if frames.is_empty() {
            self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }

        let mut out = Vec::with_capacity(frames.len());
        for frame in frames {
            self.stats.frames_total.fetch_add(1, Ordering::Relaxed);
            match self.route(frame) {
                Some(msg) => out.push(msg),
                None => {
                    self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        out
    }

    /// Extract frames: declared envelope first, then the wire walker.
    fn extract_frames(&self, buf: Bytes) -> Vec<Frame> {
        // 1. Declared envelope shape.
        if let Ok(env) = PushEnvelope::decode(buf.as_ref()) {
            let mut frames = Vec::new();
            let symbol = if env.symbol.is_empty() {
                symbol_from_channel(&env.channel).unwrap_or_else(|| Symbol::new(""))
            } else {
                Symbol::new(&env.symbol)
            };
            let ts = if env.send_time > 0 {
                env.send_time
            } else {
                env.create_time
            };
            // Slot name stands in for the channel when the wrapper
            // carries none at the top level.
            let slots: [(&str, &Option<Bytes>); 3] = [
                ("publicDeals.deals", &env.public_deals),
                ("publicLimitDepths.depth", &env.public_limit_depths),
                ("publicBookTicker.bookTicker", &env.public_book_ticker),
            ];
            for (name, slot) in slots {
                if let Some(payload) = slot {
                    if !payload.is_empty() {
                        frames.push(Frame {
                            channel: if env.channel.is_empty() {
                                name.to_string()
                            } else {
                                env.channel.clone()
                            },
                            symbol: symbol.clone(),
                            send_ts_ms: ts,
                            payload: payload.clone(),
                        });
                    }
                }
            }
            if !frames.is_empty() {
                return frames;
            }
        }

        // 2. Heuristic wire walk.
        self.walk(buf, 0)
    }

    /// Walk a buffer's wire fields looking for a frame.
    fn walk(&self, buf: Bytes, depth: usize) -> Vec<Frame> {
        if depth > 3 {
            return Vec::new();
        }
        let Ok(fields) = wire::read_fields(&buf) else {
            return Vec::new();
        };

        let mut channel = String::new();
        let mut symbol = Symbol::new("");
        let mut ts_ms = 0i64;
        let mut submessages: Vec<&WireField> = Vec::new();
        let mut raw_bytes: Vec<&WireField> = Vec::new();

        for f in &fields {
            if let Some(s) = f.as_str() {
                if channel.is_empty() && looks_like_channel(s) {
                    channel = s.to_string();
                    continue;
                }
                if symbol.is_empty() && looks_like_symbol(s) {
                    symbol = Symbol::new(s);
                    continue;
                }
            }
            if let Some(v) = f.as_varint() {
                if ts_ms == 0 && looks_like_ts_ms(v) {
                    ts_ms = v as i64;
                }
                continue;
            }
            if let Some(b) = f.as_bytes() {
                if wire::is_probable_message(b) {
                    submessages.push(f);
                } else if f.as_str().is_none() {
                    raw_bytes.push(f);
                }
            }
        }

        if symbol.is_empty() {
            if let Some(s) = symbol_from_channel(&channel) {
                symbol = s;
            }
        }

        // 2a. Populated sub-messages are the payloads.
        if !submessages.is_empty() {
            trace!(count = submessages.len(), depth, "frames from sub-messages");
            return submessages
                .iter()
                .filter_map(|f| f.as_bytes())
                .map(|b| Frame {
                    channel: channel.clone(),
                    symbol: symbol.clone(),
                    send_ts_ms: ts_ms,
                    payload: b.clone(),
                })
                .collect();
        }

        // 2b. Largest raw bytes field.
        if let Some(best) = raw_bytes
            .iter()
            .filter_map(|f| f.as_bytes())
            .max_by_key(|b| b.len())
        {
            debug!(len = best.len(), depth, "frame from raw bytes field");
            return vec![Frame {
                channel,
                symbol,
                send_ts_ms: ts_ms,
                payload: best.clone(),
            }];
        }

        // 2c. Recursive descent through string-looking fields that are
        // secretly nested messages.
        for f in &fields {
            if let Some(b) = f.as_bytes() {
                let nested = self.walk(b.clone(), depth + 1);
                if !nested.is_empty() {
                    return nested;
                }
            }
        }

        Vec::new()
    }

    /// Route a frame to a typed message by channel substring; untagged
    /// frames go through the specificity classifier.
    fn route(&self, frame: Frame) -> Option<MarketMessage> {
        let ch = frame.channel.as_str();

        if ch.contains("bookTicker") {
            let fields = resolve::decode_book_ticker(&frame.payload)?;
            self.stats.book_tickers.fetch_add(1, Ordering::Relaxed);
            return Some(MarketMessage::BookTicker {
                symbol: frame.symbol,
                bid: fields.bid,
                bid_qty: fields.bid_qty,
                ask: fields.ask,
                ask_qty: fields.ask_qty,
                ts_ms: frame.send_ts_ms,
            });
        }
        if ch.contains(".deals.") {
            let trades = resolve::decode_deals(&frame.payload);
            if trades.is_empty() {
                return None;
            }
            self.stats.deals.fetch_add(1, Ordering::Relaxed);
            return Some(MarketMessage::Deals {
                symbol: frame.symbol,
                trades,
            });
        }
        if ch.contains(".depth") || ch.contains("Depth") {
            let depth = resolve::decode_depth(&frame.payload)?;
            self.stats.depths.fetch_add(1, Ordering::Relaxed);
            return Some(MarketMessage::Depth {
                symbol: frame.symbol,
                bids: depth.bids,
                asks: depth.asks,
                ts_ms: frame.send_ts_ms,
            });
        }

        // No routable channel: classify by payload shape, most
        // specific first.
        self.stats.unknown_channels.fetch_add(1, Ordering::Relaxed);
        if !self.bruteforce {
            return None;
        }
        match resolve::classify(&frame.payload) {
            PayloadKind::BookTicker(fields) => {
                self.stats.book_tickers.fetch_add(1, Ordering::Relaxed);
                Some(MarketMessage::BookTicker {
                    symbol: frame.symbol,
                    bid: fields.bid,
                    bid_qty: fields.bid_qty,
                    ask: fields.ask,
                    ask_qty: fields.ask_qty,
                    ts_ms: frame.send_ts_ms,
                })
            }
            PayloadKind::Depth(depth) => {
                self.stats.depths.fetch_add(1, Ordering::Relaxed);
                Some(MarketMessage::Depth {
                    symbol: frame.symbol,
                    bids: depth.bids,
                    asks: depth.asks,
                    ts_ms: frame.send_ts_ms,
                })
            }
            PayloadKind::Deals(trades) => {
                self.stats.deals.fetch_add(1, Ordering::Relaxed);
                Some(MarketMessage::Deals {
                    symbol: frame.symbol,
                    trades,
                })
            }
            PayloadKind::Unknown => None,
        }
    }
}

impl Default for EnvelopeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{BookTickerPayload, DealItem, DealsPayload};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use prost::Message;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn book_ticker_payload() -> Vec<u8> {
        BookTickerPayload {
            bid_price: "2000.00".into(),
            bid_quantity: "1.5".into(),
            ask_price: "2000.02".into(),
            ask_quantity: "0.7".into(),
        }
        .encode_to_vec()
    }

    fn declared_envelope() -> Vec<u8> {
        PushEnvelope {
            channel: "spot@public.aggre.bookTicker.v3.api.pb@100ms@ETHUSDT".into(),
            symbol: "ETHUSDT".into(),
            create_time: 0,
            send_time: 1_700_000_000_123,
            public_deals: None,
            public_limit_depths: None,
            public_book_ticker: Some(Bytes::from(book_ticker_payload())),
        }
        .encode_to_vec()
    }

    #[test]
    fn test_declared_envelope_roundtrip() {
        let decoder = EnvelopeDecoder::new();
        let msgs = decoder.decode(&declared_envelope());
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            MarketMessage::BookTicker {
                symbol,
                bid,
                ask,
                ts_ms,
                ..
            } => {
                assert_eq!(symbol.as_str(), "ETHUSDT");
                assert_eq!(bid.inner(), dec!(2000.00));
                assert_eq!(ask.inner(), dec!(2000.02));
                assert_eq!(*ts_ms, 1_700_000_000_123);
            }
            other => panic!("expected book ticker, got {other:?}"),
        }
    }

    #[test]
    fn test_gzipped_envelope() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&declared_envelope()).unwrap();
        let gz = encoder.finish().unwrap();

        let decoder = EnvelopeDecoder::new();
        let msgs = decoder.decode(&gz);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_unknown_wrapper_walked_heuristically() {
        // Hand-build a wrapper shape we have no declaration for:
        // channel at tag 7, symbol at tag 9, ts at tag 11, payload
        // sub-message at tag 42.
        let mut raw = Vec::new();
        wire::encode_bytes_field(7, b"spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT", &mut raw);
        wire::encode_bytes_field(9, b"BTCUSDT", &mut raw);
        wire::encode_varint_field(11, 1_700_000_000_456, &mut raw);
        let deals = DealsPayload {
            deals: vec![DealItem {
                price: "64000.5".into(),
                quantity: "0.01".into(),
                trade_type: 1,
                time: 1_700_000_000_000,
            }],
            event_type: String::new(),
        }
        .encode_to_vec();
        wire::encode_bytes_field(42, &deals, &mut raw);

        let decoder = EnvelopeDecoder::new();
        let msgs = decoder.decode(&raw);
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            MarketMessage::Deals { symbol, trades } => {
                assert_eq!(symbol.as_str(), "BTCUSDT");
                assert_eq!(trades.len(), 1);
            }
            other => panic!("expected deals, got {other:?}"),
        }
    }

    #[test]
    fn test_symbol_recovered_from_topic_suffix() {
        let mut raw = Vec::new();
        wire::encode_bytes_field(7, b"spot@public.aggre.bookTicker.v3.api.pb@100ms@SOLUSDT", &mut raw);
        wire::encode_bytes_field(42, &book_ticker_payload(), &mut raw);

        let decoder = EnvelopeDecoder::new();
        let msgs = decoder.decode(&raw);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].symbol().as_str(), "SOLUSDT");
    }

    #[test]
    fn test_symbol_from_depth_topic_skips_level_suffix() {
        let sym = symbol_from_channel("spot@public.limit.depth.v3.api.pb@100ms@ETHUSDT@10");
        assert_eq!(sym.unwrap().as_str(), "ETHUSDT");
        assert!(symbol_from_channel("spot@public.limit.depth.v3.api.pb").is_none());
    }

    #[test]
    fn test_garbage_counts_error_and_yields_nothing() {
        let decoder = EnvelopeDecoder::new();
        let msgs = decoder.decode(b"\xff\xfe\xfd\xfc");
        assert!(msgs.is_empty());
        assert!(decoder.stats().decode_errors() >= 1);
    }
}
