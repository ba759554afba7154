//! Application configuration.
//!
//! Layered: `config/default.toml` first, then `SPOTMM_*` environment
//! overrides (double underscore as the section separator, e.g.
//! `SPOTMM_RISK__MAX_POSITIONS=5`).

use crate::error::{AppError, AppResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use spotmm_core::StrategyParams;
use spotmm_detector::DetectorConfig;
use spotmm_risk::RiskSettings;

/// Exchange the engine trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Mexc,
    Gate,
    Binance,
}

/// Execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    /// In-memory fills, no exchange orders.
    #[default]
    Paper,
    /// Paper fills against live market data.
    Demo,
    /// Real orders through a live adapter (supplied by deployment).
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsSection {
    pub url: String,
    pub depth_levels: u32,
    pub rate_suffix: String,
    pub subscribe_rate_limit_per_sec: u32,
    pub ping_interval_sec: u64,
    pub max_lifetime_sec: u64,
    pub open_timeout_sec: u64,
    pub close_timeout_sec: u64,
    pub verbose_frames: bool,
    pub enable_bruteforce: bool,
}

impl Default for WsSection {
    fn default() -> Self {
        Self {
            url: "wss://wbs-api.mexc.com/ws".to_string(),
            depth_levels: 10,
            rate_suffix: "@100ms".to_string(),
            subscribe_rate_limit_per_sec: 8,
            ping_interval_sec: 20,
            max_lifetime_sec: 23 * 3600,
            open_timeout_sec: 10,
            close_timeout_sec: 2,
            verbose_frames: false,
            enable_bruteforce: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestSection {
    pub base_url: String,
    pub timeout_sec: u64,
}

impl Default for RestSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.mexc.com".to_string(),
            timeout_sec: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSection {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub active_provider: Provider,
    #[serde(default)]
    pub active_mode: TradeMode,
    /// Symbols to trade; normalized uppercase at ingress.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// Symbols never traded even if listed.
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub ws: WsSection,
    #[serde(default)]
    pub rest: RestSection,
    #[serde(default)]
    pub scanner: Option<ScannerSection>,
    #[serde(default)]
    pub strategy: StrategyParams,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub risk: RiskSettings,
    /// JSONL trade-outcome sink path.
    #[serde(default = "default_outcomes_path")]
    pub outcomes_path: String,
}

fn default_outcomes_path() -> String {
    "data/outcomes.jsonl".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_provider: Provider::default(),
            active_mode: TradeMode::default(),
            symbols: Vec::new(),
            blacklist: Vec::new(),
            ws: WsSection::default(),
            rest: RestSection::default(),
            scanner: None,
            strategy: StrategyParams::default(),
            detector: DetectorConfig::default(),
            risk: RiskSettings::default(),
            outcomes_path: default_outcomes_path(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file plus `SPOTMM_*` environment overrides.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SPOTMM").separator("__"))
            .build()?;
        let parsed: AppConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.symbols.is_empty() {
            return Err(AppError::InvalidConfig("no symbols configured".into()));
        }
        if self.active_mode == TradeMode::Live {
            // The live adapter lives outside this build; refuse to
            // start rather than silently paper-trade.
            return Err(AppError::InvalidConfig(
                "live mode requires the live execution adapter".into(),
            ));
        }
        if self.strategy.hard_stop_loss_bps >= 0.0 || self.strategy.stop_loss_bps >= 0.0 {
            return Err(AppError::InvalidConfig(
                "stop-loss levels must be negative bps".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.active_provider, Provider::Mexc);
        assert_eq!(config.active_mode, TradeMode::Paper);
        assert_eq!(config.ws.subscribe_rate_limit_per_sec, 8);
        assert_eq!(config.ws.max_lifetime_sec, 23 * 3600);
    }

    #[test]
    fn test_validate_requires_symbols() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_live_mode() {
        let config = AppConfig {
            symbols: vec!["ETHUSDT".to_string()],
            active_mode: TradeMode::Live,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_positive_stop_loss() {
        let mut config = AppConfig {
            symbols: vec!["ETHUSDT".to_string()],
            ..Default::default()
        };
        config.strategy.stop_loss_bps = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let raw = r#"
            active_provider = "mexc"
            active_mode = "paper"
            symbols = ["ethusdt", "BTCUSDT"]

            [ws]
            url = "wss://example.test/ws"

            [strategy]
            take_profit_bps = 3.0
        "#;
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.ws.url, "wss://example.test/ws");
        // Partial sections merge over the defaults.
        assert_eq!(config.strategy.take_profit_bps, 3.0);
        assert_eq!(config.ws.subscribe_rate_limit_per_sec, 8);
        assert!(config.validate().is_ok());
    }
}
