//! Per-tick market view.
//!
//! The loop prefers the scanner HTTP row (freshest consolidated
//! bid/ask/spread/imbalance/depth) and falls back to the book tracker
//! cache when the scanner is unreachable or stale.

use serde::Deserialize;
use spotmm_core::{Price, Quote, Symbol};
use std::time::Duration;
use tracing::trace;

/// Default ATR assumed when no candle statistics are available.
const DEFAULT_ATR_PCT: f64 = 0.10;

/// One scanner row, as served by the surrounding scanner service.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRow {
    pub bid: f64,
    pub ask: f64,
    pub spread_bps: f64,
    pub imbalance: f64,
    #[serde(default)]
    pub depth5_bid_usd: f64,
    #[serde(default)]
    pub depth5_ask_usd: f64,
    #[serde(default)]
    pub atr1m_pct: Option<f64>,
}

/// Consolidated view the loop decides on each tick.
#[derive(Debug, Clone)]
pub struct MarketView {
    pub bid: Price,
    pub ask: Price,
    pub mid: Price,
    pub spread_bps: f64,
    pub imbalance: f64,
    pub bid_depth_usd: f64,
    pub ask_depth_usd: f64,
    pub atr_pct: f64,
    /// Raw bid/ask top quantities when known (detector input).
    pub bid_qty: f64,
    pub ask_qty: f64,
}

impl MarketView {
    pub fn is_live(&self) -> bool {
        self.bid.is_positive() && self.ask.is_positive() && self.mid.is_positive()
    }

    pub fn from_scan_row(row: &ScanRow) -> Option<Self> {
        if row.bid <= 0.0 || row.ask <= 0.0 {
            return None;
        }
        let bid = Price::from_f64(row.bid);
        let ask = Price::from_f64(row.ask);
        let mid = Price::mid(bid, ask);
        Some(Self {
            bid,
            ask,
            mid,
            spread_bps: row.spread_bps,
            imbalance: row.imbalance,
            bid_depth_usd: row.depth5_bid_usd,
            ask_depth_usd: row.depth5_ask_usd,
            atr_pct: row.atr1m_pct.unwrap_or(DEFAULT_ATR_PCT),
            bid_qty: if row.bid > 0.0 { row.depth5_bid_usd / row.bid } else { 0.0 },
            ask_qty: if row.ask > 0.0 { row.depth5_ask_usd / row.ask } else { 0.0 },
        })
    }

    pub fn from_quote(quote: &Quote) -> Option<Self> {
        if !quote.is_live() {
            return None;
        }
        Some(Self {
            bid: quote.bid,
            ask: quote.ask,
            mid: quote.mid,
            spread_bps: quote.spread_bps,
            imbalance: quote.imbalance(),
            bid_depth_usd: quote.bid_depth_usd(),
            ask_depth_usd: quote.ask_depth_usd(),
            atr_pct: DEFAULT_ATR_PCT,
            bid_qty: quote.bid_qty.to_f64(),
            ask_qty: quote.ask_qty.to_f64(),
        })
    }
}

/// Client for the internal scanner endpoint.
#[derive(Debug, Clone)]
pub struct ScannerClient {
    base_url: String,
    http: reqwest::Client,
}

impl ScannerClient {
    pub fn new(base_url: impl Into<String>) -> Option<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .ok()?;
        Some(Self {
            base_url: base_url.into(),
            http,
        })
    }

    /// `GET {base}/api/scanner/mexc/top?symbols=<SYM>&limit=1`.
    /// Any failure is a silent `None`; the caller falls back to the
    /// book cache.
    pub async fn top(&self, symbol: &Symbol) -> Option<ScanRow> {
        let url = format!("{}/api/scanner/mexc/top", self.base_url);
        let rows: Vec<ScanRow> = self
            .http
            .get(url)
            .query(&[("symbols", symbol.as_str()), ("limit", "1")])
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?
            .json()
            .await
            .ok()?;

        let row = rows.into_iter().next()?;
        if row.bid <= 0.0 {
            trace!(%symbol, "scanner row without bid");
            return None;
        }
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use spotmm_core::{DepthLevel, Size};

    #[test]
    fn test_scan_row_parses() {
        let row: ScanRow = serde_json::from_str(
            r#"{"symbol":"ETHUSDT","bid":2000.0,"ask":2000.02,"spread_bps":1.0,"imbalance":0.55,"depth5_bid_usd":1500.0,"depth5_ask_usd":1200.0,"trades_per_min":12.0}"#,
        )
        .unwrap();
        assert_eq!(row.bid, 2000.0);
        assert!(row.atr1m_pct.is_none());

        let view = MarketView::from_scan_row(&row).unwrap();
        assert!(view.is_live());
        assert!((view.atr_pct - 0.10).abs() < 1e-12);
        assert!((view.imbalance - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_zero_bid_row_rejected() {
        let row = ScanRow {
            bid: 0.0,
            ask: 10.0,
            spread_bps: 0.0,
            imbalance: 0.5,
            depth5_bid_usd: 0.0,
            depth5_ask_usd: 0.0,
            atr1m_pct: None,
        };
        assert!(MarketView::from_scan_row(&row).is_none());
    }

    #[test]
    fn test_view_from_quote() {
        let quote = Quote {
            bid: Price::new(dec!(100)),
            ask: Price::new(dec!(100.02)),
            bid_qty: Size::new(dec!(5)),
            ask_qty: Size::new(dec!(4)),
            mid: Price::new(dec!(100.01)),
            spread_bps: 2.0,
            ts_ms: 1,
            bids: vec![DepthLevel::new(Price::new(dec!(100)), Size::new(dec!(5)))],
            asks: vec![DepthLevel::new(Price::new(dec!(100.02)), Size::new(dec!(4)))],
        };
        let view = MarketView::from_quote(&quote).unwrap();
        assert!(view.is_live());
        assert!((view.bid_depth_usd - 500.0).abs() < 1e-9);
        assert!(view.imbalance > 0.5);
    }

    #[test]
    fn test_dead_quote_rejected() {
        assert!(MarketView::from_quote(&Quote::empty()).is_none());
    }
}
