//! Risk limits configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub account_balance_usd: f64,
    /// Daily loss limit as a percent of the balance.
    pub daily_loss_limit_pct: f64,
    /// Per-position exposure cap as a percent of the balance.
    pub max_exposure_per_position_pct: f64,
    pub max_positions: usize,
    /// Consecutive losses on one symbol before it cools down.
    pub symbol_max_losses: u32,
    pub symbol_cooldown_minutes: i64,
    pub max_trades_per_hour: usize,
    pub max_trades_per_minute: usize,
    /// Errors inside the window before trading halts.
    pub max_consecutive_errors: usize,
    pub error_window_minutes: i64,
    pub trading_hours_enabled: bool,
    /// UTC wall-clock window, `HH:MM`.
    pub trading_hours_start: String,
    pub trading_hours_end: String,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            account_balance_usd: 1_000.0,
            daily_loss_limit_pct: 2.0,
            max_exposure_per_position_pct: 5.0,
            max_positions: 3,
            symbol_max_losses: 3,
            symbol_cooldown_minutes: 30,
            max_trades_per_hour: 60,
            max_trades_per_minute: 5,
            max_consecutive_errors: 10,
            error_window_minutes: 5,
            trading_hours_enabled: false,
            trading_hours_start: "00:00".to_string(),
            trading_hours_end: "23:59".to_string(),
        }
    }
}

impl RiskSettings {
    pub fn daily_loss_limit_usd(&self) -> f64 {
        self.account_balance_usd * self.daily_loss_limit_pct / 100.0
    }

    pub fn max_position_size_usd(&self) -> f64 {
        self.account_balance_usd * self.max_exposure_per_position_pct / 100.0
    }
}
