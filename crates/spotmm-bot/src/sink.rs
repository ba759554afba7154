//! JSONL trade-outcome sink.
//!
//! Narrow write-only port to the surrounding persistence layer: one
//! JSON object per closed trade, appended to a file. Write failures
//! are logged and swallowed; persistence never blocks trading.

use async_trait::async_trait;
use spotmm_core::{OutcomeSink, TradeOutcome};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct JsonlOutcomeSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonlOutcomeSink {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "outcome sink open");
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Flush and drop the handle. Used at shutdown.
    pub async fn close(&self) {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take() {
            let _ = file.flush().await;
        }
        info!(path = %self.path.display(), "outcome sink closed");
    }
}

#[async_trait]
impl OutcomeSink for JsonlOutcomeSink {
    async fn record_outcome(&self, outcome: &TradeOutcome) {
        let line = match serde_json::to_string(outcome) {
            Ok(json) => json,
            Err(e) => {
                warn!(?e, "outcome serialization failed");
                return;
            }
        };

        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            warn!("outcome sink already closed, dropping record");
            return;
        };
        if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
            warn!(?e, "outcome write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotmm_core::{ExitReason, Price, Size, Symbol};

    fn outcome() -> TradeOutcome {
        TradeOutcome {
            trade_id: "ETHUSDT_abcd1234".to_string(),
            symbol: Symbol::new("ETHUSDT"),
            entry_price: Price::from_f64(2000.0),
            exit_price: Price::from_f64(2000.62),
            qty: Size::from_f64(0.01),
            pnl_usd: 0.0062,
            pnl_bps: 3.1,
            exit_reason: ExitReason::Tp,
            entry_ts_ms: 1,
            exit_ts_ms: 700,
            held_ms: 699,
            spread_bps_entry: 0.1,
            imbalance_entry: 0.5,
        }
    }

    #[tokio::test]
    async fn test_appends_jsonl() {
        let dir = std::env::temp_dir().join(format!("spotmm-sink-{}", std::process::id()));
        let path = dir.join("outcomes.jsonl");
        let sink = JsonlOutcomeSink::open(&path).await.unwrap();

        sink.record_outcome(&outcome()).await;
        sink.record_outcome(&outcome()).await;
        sink.close().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["exit_reason"], "TP");
        assert_eq!(parsed["symbol"], "ETHUSDT");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_write_after_close_is_swallowed() {
        let dir = std::env::temp_dir().join(format!("spotmm-sink2-{}", std::process::id()));
        let sink = JsonlOutcomeSink::open(dir.join("o.jsonl")).await.unwrap();
        sink.close().await;
        // Must not panic or error.
        sink.record_outcome(&outcome()).await;
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
