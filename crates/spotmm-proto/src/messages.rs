//! Declared protobuf messages.
//!
//! These mirror the exchange's published market-data payloads. The
//! wrapper shape drifts, so the envelope keeps its payload slots as
//! raw bytes and the resolver tries these declarations first before
//! falling back to wire-level heuristics.

use prost::Message;

/// Known envelope shape: channel + symbol + timestamps with payload
/// sub-messages kept opaque. Unknown fields are skipped by prost, and
/// anything this declaration misses is recovered by the wire walker.
#[derive(Clone, PartialEq, Message)]
pub struct PushEnvelope {
    #[prost(string, tag = "1")]
    pub channel: String,
    #[prost(string, tag = "3")]
    pub symbol: String,
    #[prost(int64, tag = "5")]
    pub create_time: i64,
    #[prost(int64, tag = "6")]
    pub send_time: i64,
    /// Deals payload slot.
    #[prost(bytes = "bytes", optional, tag = "301")]
    pub public_deals: Option<bytes::Bytes>,
    /// Limit-depth payload slot.
    #[prost(bytes = "bytes", optional, tag = "303")]
    pub public_limit_depths: Option<bytes::Bytes>,
    /// Book-ticker payload slot.
    #[prost(bytes = "bytes", optional, tag = "313")]
    pub public_book_ticker: Option<bytes::Bytes>,
}

/// Scalar book-ticker payload (`bidPrice`/`bidQuantity`/`askPrice`/
/// `askQuantity`, all decimal strings).
#[derive(Clone, PartialEq, Message)]
pub struct BookTickerPayload {
    #[prost(string, tag = "1")]
    pub bid_price: String,
    #[prost(string, tag = "2")]
    pub bid_quantity: String,
    #[prost(string, tag = "3")]
    pub ask_price: String,
    #[prost(string, tag = "4")]
    pub ask_quantity: String,
}

/// One public trade.
#[derive(Clone, PartialEq, Message)]
pub struct DealItem {
    #[prost(string, tag = "1")]
    pub price: String,
    #[prost(string, tag = "2")]
    pub quantity: String,
    /// 1 = aggressive buy, 2 = aggressive sell.
    #[prost(int32, tag = "3")]
    pub trade_type: i32,
    #[prost(int64, tag = "4")]
    pub time: i64,
}

/// Deals payload: a batch of recent trades.
#[derive(Clone, PartialEq, Message)]
pub struct DealsPayload {
    #[prost(message, repeated, tag = "1")]
    pub deals: Vec<DealItem>,
    #[prost(string, tag = "2")]
    pub event_type: String,
}

/// One depth level as a decimal-string pair.
#[derive(Clone, PartialEq, Message)]
pub struct DepthItem {
    #[prost(string, tag = "1")]
    pub price: String,
    #[prost(string, tag = "2")]
    pub quantity: String,
}

/// Partial-depth payload. Asks come first on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct DepthPayload {
    #[prost(message, repeated, tag = "1")]
    pub asks: Vec<DepthItem>,
    #[prost(message, repeated, tag = "2")]
    pub bids: Vec<DepthItem>,
    #[prost(string, tag = "3")]
    pub event_type: String,
    #[prost(string, tag = "4")]
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_book_ticker_roundtrip() {
        let payload = BookTickerPayload {
            bid_price: "2000.00".into(),
            bid_quantity: "1.5".into(),
            ask_price: "2000.02".into(),
            ask_quantity: "0.7".into(),
        };
        let raw = payload.encode_to_vec();
        let back = BookTickerPayload::decode(raw.as_slice()).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_envelope_skips_unknown_fields() {
        // Encode an envelope, append an unknown field, decode again.
        let env = PushEnvelope {
            channel: "spot@public.aggre.deals.v3.api.pb@100ms@ETHUSDT".into(),
            symbol: "ETHUSDT".into(),
            create_time: 0,
            send_time: 1_700_000_000_000,
            public_deals: Some(bytes::Bytes::from_static(b"\x0a\x02hi")),
            public_limit_depths: None,
            public_book_ticker: None,
        };
        let mut raw = env.encode_to_vec();
        crate::wire::encode_varint_field(999, 42, &mut raw);

        let back = PushEnvelope::decode(raw.as_slice()).unwrap();
        assert_eq!(back.symbol, "ETHUSDT");
        assert_eq!(back.send_time, 1_700_000_000_000);
    }
}
