//! The risk manager facade.
//!
//! Every entry decision in the process funnels through one instance.
//! State is guarded by a single mutex; all checks acquire it briefly
//! and never across an await point.

use crate::settings::RiskSettings;
use crate::state::RiskState;
use chrono::{Local, NaiveTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use spotmm_core::{now_ms, ExecutionPort, Symbol};
use tracing::{info, warn};

/// Outcome of a pre-entry check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Allow,
    /// First failing reason, reported to the caller and never raised.
    Deny(String),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny(reason) => Some(reason),
        }
    }
}

/// Serializable status snapshot for the surrounding API layer.
#[derive(Debug, Clone, Serialize)]
pub struct RiskStatus {
    pub trading_allowed: bool,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub daily_pnl_usd: f64,
    pub daily_loss_limit_usd: f64,
    pub daily_trades: u64,
    pub win_rate_pct: f64,
    pub max_positions: usize,
    pub current_positions: usize,
    pub total_exposure_usd: f64,
    pub active_cooldowns: Vec<(Symbol, i64)>,
    pub trades_last_hour: usize,
    pub trades_last_minute: usize,
    pub errors_in_window: usize,
    pub is_trading_hours: bool,
}

/// Serializable limits snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RiskLimits {
    pub account_balance_usd: f64,
    pub daily_loss_limit_pct: f64,
    pub daily_loss_limit_usd: f64,
    pub max_exposure_per_position_pct: f64,
    pub max_position_size_usd: f64,
    pub max_positions: usize,
    pub symbol_max_losses: u32,
    pub symbol_cooldown_minutes: i64,
    pub max_trades_per_hour: usize,
    pub max_trades_per_minute: usize,
    pub max_consecutive_errors: usize,
    pub error_window_minutes: i64,
    pub trading_hours_enabled: bool,
}

/// Process-wide risk manager.
pub struct RiskManager {
    settings: Mutex<RiskSettings>,
    state: Mutex<RiskState>,
}

impl RiskManager {
    pub fn new(settings: RiskSettings) -> Self {
        info!(
            balance = settings.account_balance_usd,
            daily_loss_limit_usd = settings.daily_loss_limit_usd(),
            max_positions = settings.max_positions,
            "RiskManager initialized"
        );
        Self {
            settings: Mutex::new(settings),
            state: Mutex::new(RiskState::new()),
        }
    }

    // ── trade results ──

    /// Record a closed trade and apply post-trade limit checks.
    pub fn track_trade_result(&self, symbol: &Symbol, pnl_usd: f64) {
        self.track_trade_result_at(symbol, pnl_usd, now_ms());
    }

    /// Clock-explicit variant for tests.
    pub fn track_trade_result_at(&self, symbol: &Symbol, pnl_usd: f64, now_ms: i64) {
        let settings = self.settings.lock().clone();
        let mut state = self.state.lock();
        let today = Local::now().date_naive();

        if state.should_reset_daily(today) {
            info!("daily risk counters reset");
            state.reset_daily(today, now_ms);
        }

        state.add_trade_result(symbol, pnl_usd, today);
        state.track_trade_time(now_ms);

        info!(
            %symbol,
            pnl_usd,
            daily_pnl = state.daily_pnl_usd,
            loss_streak = state.loss_streak(symbol),
            "trade result tracked"
        );

        // Daily loss halt.
        let limit = settings.daily_loss_limit_usd();
        if state.daily_pnl_usd <= -limit && !state.halted {
            state.halt("daily_loss_limit", now_ms);
            warn!(
                daily_pnl = state.daily_pnl_usd,
                limit, "DAILY LOSS LIMIT REACHED, trading halted"
            );
            return;
        }

        // Per-symbol loss streak cooldown.
        if pnl_usd < 0.0 {
            let streak = state.loss_streak(symbol);
            if streak >= settings.symbol_max_losses {
                state.add_cooldown(symbol, settings.symbol_cooldown_minutes, now_ms);
                warn!(
                    %symbol,
                    streak,
                    cooldown_minutes = settings.symbol_cooldown_minutes,
                    "symbol cooldown after consecutive losses"
                );
            }
        }
    }

    // ── pre-entry checks ──

    pub fn can_trade(&self) -> bool {
        !self.state.lock().halted && self.is_trading_hours(Utc::now().time())
    }

    pub fn is_symbol_on_cooldown(&self, symbol: &Symbol) -> bool {
        self.state.lock().is_on_cooldown(symbol, now_ms())
    }

    /// Full pre-entry check; returns the first failing reason.
    pub fn can_open_position(&self, symbol: &Symbol, size_usd: f64) -> RiskDecision {
        self.can_open_position_at(symbol, size_usd, now_ms(), Utc::now().time())
    }

    /// Clock-explicit variant for tests.
    pub fn can_open_position_at(
        &self,
        symbol: &Symbol,
        size_usd: f64,
        now_ms: i64,
        utc_time: NaiveTime,
    ) -> RiskDecision {
        let settings = self.settings.lock().clone();
        let state = self.state.lock();

        if state.halted {
            return RiskDecision::Deny(format!(
                "Trading halted: {}",
                state.halt_reason.as_deref().unwrap_or("unknown")
            ));
        }

        if state.is_on_cooldown(symbol, now_ms) {
            let remaining = state.cooldown_remaining_sec(symbol, now_ms);
            return RiskDecision::Deny(format!("Symbol on cooldown ({remaining}s remaining)"));
        }

        if !self.is_trading_hours(utc_time) {
            return RiskDecision::Deny("Outside trading hours".to_string());
        }

        if state.current_position_count >= settings.max_positions {
            return RiskDecision::Deny(format!(
                "Max positions reached ({})",
                settings.max_positions
            ));
        }

        let max_size = settings.max_position_size_usd();
        if size_usd > max_size {
            return RiskDecision::Deny(format!(
                "Position too large (${size_usd:.2} > ${max_size:.2})"
            ));
        }

        let hour = state.trades_last_hour(now_ms);
        let minute = state.trades_last_minute(now_ms);
        if hour >= settings.max_trades_per_hour || minute >= settings.max_trades_per_minute {
            return RiskDecision::Deny(format!("Velocity limit (hour:{hour}, min:{minute})"));
        }

        RiskDecision::Allow
    }

    fn is_trading_hours(&self, now: NaiveTime) -> bool {
        let settings = self.settings.lock();
        if !settings.trading_hours_enabled {
            return true;
        }

        let parse = |s: &str| -> Option<NaiveTime> {
            let (h, m) = s.split_once(':')?;
            NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)
        };
        let (Some(start), Some(end)) = (
            parse(&settings.trading_hours_start),
            parse(&settings.trading_hours_end),
        ) else {
            // Unparseable window: fail open, matching the rest of the
            // advisory layer.
            return true;
        };

        let now = now.with_second(0).unwrap_or(now).with_nanosecond(0).unwrap_or(now);
        if start <= end {
            start <= now && now <= end
        } else {
            // Overnight window such as 22:00-08:00.
            now >= start || now <= end
        }
    }

    // ── errors ──

    pub fn track_error(&self) {
        self.track_error_at(now_ms());
    }

    pub fn track_error_at(&self, now_ms: i64) {
        let settings = self.settings.lock().clone();
        let mut state = self.state.lock();
        state.track_error(now_ms, settings.error_window_minutes);

        let in_window = state.errors_in_window(now_ms, settings.error_window_minutes);
        if in_window >= settings.max_consecutive_errors && !state.halted {
            state.halt("excessive_errors", now_ms);
            warn!(
                errors = in_window,
                window_minutes = settings.error_window_minutes,
                "EXCESSIVE ERRORS, trading halted"
            );
        }
    }

    // ── halt / resume ──

    pub fn halt_trading(&self, reason: &str) {
        self.state.lock().halt(reason, now_ms());
        warn!(reason, "trading halted");
    }

    pub fn resume_trading(&self) {
        self.state.lock().resume();
        info!("trading resumed");
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    pub fn halt_reason(&self) -> Option<String> {
        self.state.lock().halt_reason.clone()
    }

    /// Halt and market-flatten every open symbol through the
    /// execution port. Returns the number of symbols flattened.
    pub async fn emergency_stop(&self, executor: &dyn ExecutionPort, symbols: &[Symbol]) -> usize {
        self.halt_trading("emergency_stop");

        let mut closed = 0usize;
        for symbol in symbols {
            let pos = executor.get_position(symbol).await;
            if pos.is_open() {
                executor.flatten_symbol(symbol).await;
                closed += 1;
            }
        }
        warn!(closed, "EMERGENCY STOP completed");
        closed
    }

    // ── position bookkeeping ──

    pub fn update_position_count(&self, count: usize) {
        self.state.lock().current_position_count = count;
    }

    pub fn update_total_exposure(&self, exposure_usd: f64) {
        self.state.lock().total_exposure_usd = exposure_usd;
    }

    /// Rebalance against a new account balance; all derived limits
    /// follow.
    pub fn update_balance(&self, new_balance_usd: f64) {
        let mut settings = self.settings.lock();
        settings.account_balance_usd = new_balance_usd;
        info!(
            balance = new_balance_usd,
            daily_loss_limit = settings.daily_loss_limit_usd(),
            "balance updated"
        );
    }

    pub fn clear_cooldown(&self, symbol: &Symbol) {
        self.state.lock().clear_cooldown(symbol);
    }

    // ── reporting ──

    pub fn get_status(&self) -> RiskStatus {
        let settings = self.settings.lock().clone();
        let state = self.state.lock();
        let now = now_ms();
        let in_hours = self.is_trading_hours_now();
        RiskStatus {
            trading_allowed: !state.halted && in_hours,
            halted: state.halted,
            halt_reason: state.halt_reason.clone(),
            daily_pnl_usd: state.daily_pnl_usd,
            daily_loss_limit_usd: settings.daily_loss_limit_usd(),
            daily_trades: state.daily_trades_count,
            win_rate_pct: state.win_rate_pct(),
            max_positions: settings.max_positions,
            current_positions: state.current_position_count,
            total_exposure_usd: state.total_exposure_usd,
            active_cooldowns: state.active_cooldowns(now),
            trades_last_hour: state.trades_last_hour(now),
            trades_last_minute: state.trades_last_minute(now),
            errors_in_window: state.errors_in_window(now, settings.error_window_minutes),
            is_trading_hours: in_hours,
        }
    }

    fn is_trading_hours_now(&self) -> bool {
        self.is_trading_hours(Utc::now().time())
    }

    pub fn get_limits(&self) -> RiskLimits {
        let settings = self.settings.lock().clone();
        RiskLimits {
            account_balance_usd: settings.account_balance_usd,
            daily_loss_limit_pct: settings.daily_loss_limit_pct,
            daily_loss_limit_usd: settings.daily_loss_limit_usd(),
            max_exposure_per_position_pct: settings.max_exposure_per_position_pct,
            max_position_size_usd: settings.max_position_size_usd(),
            max_positions: settings.max_positions,
            symbol_max_losses: settings.symbol_max_losses,
            symbol_cooldown_minutes: settings.symbol_cooldown_minutes,
            max_trades_per_hour: settings.max_trades_per_hour,
            max_trades_per_minute: settings.max_trades_per_minute,
            max_consecutive_errors: settings.max_consecutive_errors,
            error_window_minutes: settings.error_window_minutes,
            trading_hours_enabled: settings.trading_hours_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        RiskManager::new(RiskSettings {
            account_balance_usd: 1_000.0,
            daily_loss_limit_pct: 2.0,
            max_exposure_per_position_pct: 5.0,
            max_positions: 2,
            symbol_max_losses: 3,
            symbol_cooldown_minutes: 30,
            max_trades_per_hour: 10,
            max_trades_per_minute: 2,
            max_consecutive_errors: 3,
            error_window_minutes: 5,
            trading_hours_enabled: false,
            ..Default::default()
        })
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_loss_halt() {
        let m = manager();
        let sym = Symbol::new("ETHUSDT");

        // Limit is 2% of 1000 = $20. Lose $21 across trades.
        m.track_trade_result_at(&sym, -10.0, 1_000);
        assert!(!m.is_halted());
        m.track_trade_result_at(&sym, -11.0, 2_000);
        assert!(m.is_halted());
        assert_eq!(m.halt_reason().as_deref(), Some("daily_loss_limit"));

        let decision = m.can_open_position_at(&sym, 10.0, 3_000, noon());
        assert!(decision.reason().unwrap().contains("halted"));
    }

    #[test]
    fn test_loss_streak_cooldown() {
        let m = manager();
        let sym = Symbol::new("SOLUSDT");

        m.track_trade_result_at(&sym, -1.0, 1_000);
        m.track_trade_result_at(&sym, -1.0, 2_000);
        assert!(m
            .can_open_position_at(&sym, 10.0, 3_000, noon())
            .is_allowed());
        m.track_trade_result_at(&sym, -1.0, 3_000);

        let decision = m.can_open_position_at(&sym, 10.0, 4_000, noon());
        assert!(decision.reason().unwrap().contains("cooldown"));

        // Other symbols are unaffected.
        assert!(m
            .can_open_position_at(&Symbol::new("BTCUSDT"), 10.0, 4_000, noon())
            .is_allowed());
    }

    #[test]
    fn test_position_and_size_caps() {
        let m = manager();
        let sym = Symbol::new("ETHUSDT");

        m.update_position_count(2);
        let decision = m.can_open_position_at(&sym, 10.0, 1_000, noon());
        assert!(decision.reason().unwrap().contains("Max positions"));

        m.update_position_count(0);
        // Cap is 5% of 1000 = $50.
        let decision = m.can_open_position_at(&sym, 51.0, 1_000, noon());
        assert!(decision.reason().unwrap().contains("too large"));
    }

    #[test]
    fn test_velocity_limit() {
        let m = manager();
        let sym = Symbol::new("ETHUSDT");
        let now = 10_000_000i64;

        m.track_trade_result_at(&sym, 1.0, now - 5_000);
        m.track_trade_result_at(&sym, 1.0, now - 2_000);
        let decision = m.can_open_position_at(&sym, 10.0, now, noon());
        assert!(decision.reason().unwrap().contains("Velocity"));
    }

    #[test]
    fn test_error_halt() {
        let m = manager();
        m.track_error_at(1_000);
        m.track_error_at(2_000);
        assert!(!m.is_halted());
        m.track_error_at(3_000);
        assert!(m.is_halted());
        assert_eq!(m.halt_reason().as_deref(), Some("excessive_errors"));
    }

    #[test]
    fn test_resume() {
        let m = manager();
        m.halt_trading("manual");
        assert!(m.is_halted());
        m.resume_trading();
        assert!(m.is_halted() == false);
        assert!(m.can_trade());
    }

    #[test]
    fn test_trading_hours_overnight_window() {
        let m = RiskManager::new(RiskSettings {
            trading_hours_enabled: true,
            trading_hours_start: "22:00".to_string(),
            trading_hours_end: "08:00".to_string(),
            ..Default::default()
        });
        let sym = Symbol::new("ETHUSDT");

        let at = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        assert!(m.can_open_position_at(&sym, 1.0, 0, at(23)).is_allowed());
        assert!(m.can_open_position_at(&sym, 1.0, 0, at(7)).is_allowed());
        let midday = m.can_open_position_at(&sym, 1.0, 0, at(12));
        assert!(midday.reason().unwrap().contains("trading hours"));
    }

    struct StubPort {
        open: parking_lot::Mutex<std::collections::HashSet<Symbol>>,
    }

    #[async_trait::async_trait]
    impl ExecutionPort for StubPort {
        async fn start_symbol(&self, _symbol: &Symbol) {}
        async fn stop_symbol(&self, _symbol: &Symbol) {}
        async fn place_maker(
            &self,
            _symbol: &Symbol,
            _side: spotmm_core::OrderSide,
            _price: spotmm_core::Price,
            _qty: spotmm_core::Size,
            _tag: &str,
        ) -> Option<String> {
            None
        }
        async fn place_market(
            &self,
            _symbol: &Symbol,
            _side: spotmm_core::OrderSide,
            _qty: spotmm_core::Size,
            _tag: &str,
        ) -> Option<spotmm_core::MarketFill> {
            None
        }
        async fn cancel_orders(&self, _symbol: &Symbol) {}
        async fn flatten_symbol(&self, symbol: &Symbol) {
            self.open.lock().remove(symbol);
        }
        async fn get_position(&self, symbol: &Symbol) -> spotmm_core::PositionSnapshot {
            if self.open.lock().contains(symbol) {
                spotmm_core::PositionSnapshot {
                    qty: spotmm_core::Size::new(rust_decimal::Decimal::ONE),
                    avg_price: spotmm_core::Price::new(rust_decimal::Decimal::from(100)),
                    realized_pnl: rust_decimal::Decimal::ZERO,
                    ts_ms: 1,
                }
            } else {
                spotmm_core::PositionSnapshot::flat()
            }
        }
    }

    #[tokio::test]
    async fn test_emergency_stop_halts_and_flattens() {
        let m = manager();
        let a = Symbol::new("ETHUSDT");
        let b = Symbol::new("BTCUSDT");
        let c = Symbol::new("FLATUSDT");
        let port = StubPort {
            open: parking_lot::Mutex::new([a.clone(), b.clone()].into_iter().collect()),
        };

        let closed = m.emergency_stop(&port, &[a.clone(), b.clone(), c]).await;
        assert_eq!(closed, 2);
        assert!(m.is_halted());
        assert_eq!(m.halt_reason().as_deref(), Some("emergency_stop"));
        assert!(port.open.lock().is_empty());
    }

    #[test]
    fn test_status_snapshot() {
        let m = manager();
        m.track_trade_result_at(&Symbol::new("ETHUSDT"), 5.0, 1_000);
        let status = m.get_status();
        assert_eq!(status.daily_trades, 1);
        assert!((status.daily_pnl_usd - 5.0).abs() < 1e-9);
        assert!((status.win_rate_pct - 100.0).abs() < 1e-9);
        assert!(!status.halted);

        let limits = m.get_limits();
        assert!((limits.daily_loss_limit_usd - 20.0).abs() < 1e-9);
        assert_eq!(limits.max_positions, 2);
    }
}
