//! REST fallback for seeding and refreshing book state.
//!
//! Used to warm L1/L2 before the stream settles and to keep depth
//! fresh when the WS feed only carries book tickers. Every call has an
//! explicit deadline.

use crate::error::{BookError, BookResult};
use serde::Deserialize;
use spotmm_core::{DepthLevel, Price, Size, Symbol};
use std::str::FromStr;
use std::time::Duration;

/// Thin typed client over the public market-data REST endpoints.
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestBookTicker {
    bid_price: String,
    bid_qty: String,
    ask_price: String,
    ask_qty: String,
}

#[derive(Debug, Deserialize)]
struct RestDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

fn parse_price(s: &str) -> BookResult<Price> {
    Price::from_str(s).map_err(|e| BookError::MalformedPayload(format!("price {s:?}: {e}")))
}

fn parse_size(s: &str) -> BookResult<Size> {
    Size::from_str(s).map_err(|e| BookError::MalformedPayload(format!("qty {s:?}: {e}")))
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> BookResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    /// `GET /api/v3/ticker/bookTicker?symbol=…`
    pub async fn fetch_book_ticker(&self, symbol: &Symbol) -> BookResult<(Price, Size, Price, Size)> {
        let url = format!("{}/api/v3/ticker/bookTicker", self.base_url);
        let raw: RestBookTicker = self
            .http
            .get(url)
            .query(&[("symbol", symbol.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok((
            parse_price(&raw.bid_price)?,
            parse_size(&raw.bid_qty)?,
            parse_price(&raw.ask_price)?,
            parse_size(&raw.ask_qty)?,
        ))
    }

    /// `GET /api/v3/depth?symbol=…&limit=…`
    pub async fn fetch_depth(
        &self,
        symbol: &Symbol,
        limit: u32,
    ) -> BookResult<(Vec<DepthLevel>, Vec<DepthLevel>)> {
        let url = format!("{}/api/v3/depth", self.base_url);
        let raw: RestDepth = self
            .http
            .get(url)
            .query(&[("symbol", symbol.as_str()), ("limit", &limit.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let parse_side = |side: &[[String; 2]]| -> BookResult<Vec<DepthLevel>> {
            side.iter()
                .map(|[p, q]| Ok(DepthLevel::new(parse_price(p)?, parse_size(q)?)))
                .collect()
        };

        Ok((parse_side(&raw.bids)?, parse_side(&raw.asks)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_ticker_shape_parses() {
        let raw: RestBookTicker = serde_json::from_str(
            r#"{"symbol":"ETHUSDT","bidPrice":"2000.00","bidQty":"1.5","askPrice":"2000.02","askQty":"0.7"}"#,
        )
        .unwrap();
        assert_eq!(raw.bid_price, "2000.00");
        assert_eq!(raw.ask_qty, "0.7");
    }

    #[test]
    fn test_depth_shape_parses() {
        let raw: RestDepth = serde_json::from_str(
            r#"{"lastUpdateId":1,"bids":[["2000.00","1.5"]],"asks":[["2000.02","0.7"]]}"#,
        )
        .unwrap();
        assert_eq!(raw.bids.len(), 1);
        assert_eq!(raw.asks[0][0], "2000.02");
    }

    #[test]
    fn test_malformed_price_rejected() {
        assert!(parse_price("not-a-number").is_err());
    }
}
