//! Process-wide strategy parameters.
//!
//! One hot-updatable bundle shared by every symbol loop. Exit
//! parameters are frozen per trade at entry; patching the bundle never
//! retroactively changes an open trade.

use serde::{Deserialize, Serialize};

/// Strategy parameter bundle.
///
/// Basis-point fields are plain `f64`: they are thresholds compared
/// against derived measures, not money.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    // Entry filters
    pub min_spread_bps: f64,
    pub edge_floor_bps: f64,
    /// Hard spread cap; spreads wider than this are toxic for small TP
    /// targets and reject entry outright.
    pub max_spread_bps_hard: f64,
    pub imbalance_min: f64,
    pub imbalance_max: f64,
    pub enable_depth_check: bool,

    // Sizing & timing
    pub order_size_usd: f64,
    pub min_hold_ms: u64,
    pub timeout_exit_sec: u64,
    pub reenter_cooldown_ms: u64,
    pub min_seconds_between_trades: u64,
    pub max_concurrent_symbols: usize,

    // Exits
    pub take_profit_bps: f64,
    /// Soft stop-loss, negative bps. The effective value is widened
    /// dynamically at entry from ATR/spread/imbalance.
    pub stop_loss_bps: f64,
    /// Absolute worst-case loss per trade, negative bps. Checked
    /// before anything else, ignores min-hold.
    pub hard_stop_loss_bps: f64,

    // Trailing stop
    pub enable_trailing_stop: bool,
    pub trailing_activation_bps: f64,
    pub trailing_stop_bps: f64,
    pub trailing_step_bps: f64,

    // Trading schedule
    pub trading_schedule_enabled: bool,
    pub trading_start_time: String,
    pub trading_end_time: String,
    /// IANA timezone name.
    pub trading_timezone: String,
    pub trade_on_weekends: bool,
    pub close_before_end_minutes: i64,

    // ML filter
    pub ml_enabled: bool,
    pub ml_min_confidence: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            min_spread_bps: 1.0,
            edge_floor_bps: 1.0,
            max_spread_bps_hard: 20.0,
            imbalance_min: 0.25,
            imbalance_max: 0.75,
            enable_depth_check: false,

            order_size_usd: 20.0,
            min_hold_ms: 500,
            timeout_exit_sec: 40,
            reenter_cooldown_ms: 1_000,
            min_seconds_between_trades: 30,
            max_concurrent_symbols: 5,

            take_profit_bps: 2.0,
            stop_loss_bps: -3.0,
            hard_stop_loss_bps: -10.0,

            enable_trailing_stop: false,
            trailing_activation_bps: 1.5,
            trailing_stop_bps: 0.5,
            trailing_step_bps: 0.3,

            trading_schedule_enabled: false,
            trading_start_time: "10:00".to_string(),
            trading_end_time: "20:00".to_string(),
            trading_timezone: "UTC".to_string(),
            trade_on_weekends: true,
            close_before_end_minutes: 10,

            ml_enabled: false,
            ml_min_confidence: 0.55,
        }
    }
}

/// Exit parameters frozen for one trade at entry time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeExitParams {
    pub take_profit_bps: f64,
    pub stop_loss_bps: f64,
    pub hard_stop_loss_bps: f64,
    pub trailing_enabled: bool,
    pub trailing_activation_bps: f64,
    pub trailing_stop_bps: f64,
    pub trailing_step_bps: f64,
    pub timeout_exit_sec: u64,
    pub min_hold_ms: u64,
}

impl TradeExitParams {
    /// Snapshot the bundle for a new trade, substituting the
    /// dynamically widened stop-loss.
    pub fn freeze(params: &StrategyParams, dynamic_sl_bps: f64) -> Self {
        Self {
            take_profit_bps: params.take_profit_bps,
            stop_loss_bps: dynamic_sl_bps,
            hard_stop_loss_bps: params.hard_stop_loss_bps,
            trailing_enabled: params.enable_trailing_stop,
            trailing_activation_bps: params.trailing_activation_bps,
            trailing_stop_bps: params.trailing_stop_bps,
            trailing_step_bps: params.trailing_step_bps,
            timeout_exit_sec: params.timeout_exit_sec,
            min_hold_ms: params.min_hold_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_sane() {
        let p = StrategyParams::default();
        assert!(p.hard_stop_loss_bps < p.stop_loss_bps);
        assert!(p.imbalance_min < p.imbalance_max);
        assert!(p.min_spread_bps <= p.max_spread_bps_hard);
    }

    #[test]
    fn test_freeze_uses_dynamic_sl() {
        let p = StrategyParams::default();
        let frozen = TradeExitParams::freeze(&p, -7.5);
        assert_eq!(frozen.stop_loss_bps, -7.5);
        assert_eq!(frozen.take_profit_bps, p.take_profit_bps);
    }
}
