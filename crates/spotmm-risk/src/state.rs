//! Mutable risk state.
//!
//! Pure data plus transition methods, all taking explicit clocks so
//! the manager and the tests drive them the same way. Reset happens
//! at local midnight.

use chrono::NaiveDate;
use spotmm_core::Symbol;
use std::collections::{HashMap, VecDeque};

const HOUR_MS: i64 = 3_600_000;
const MINUTE_MS: i64 = 60_000;

#[derive(Debug)]
pub struct RiskState {
    pub daily_pnl_usd: f64,
    pub daily_trades_count: u64,
    pub daily_wins: u64,
    pub consecutive_losses: HashMap<Symbol, u32>,
    pub cooldown_until: HashMap<Symbol, i64>,
    pub current_position_count: usize,
    pub total_exposure_usd: f64,
    /// Trade timestamps kept for the last hour.
    trade_times: VecDeque<i64>,
    /// Error timestamps, pruned against the configured window.
    errors: VecDeque<i64>,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub halted_at_ms: Option<i64>,
    /// Local day the counters belong to.
    pub current_day: Option<NaiveDate>,
}

impl RiskState {
    pub fn new() -> Self {
        Self {
            daily_pnl_usd: 0.0,
            daily_trades_count: 0,
            daily_wins: 0,
            consecutive_losses: HashMap::new(),
            cooldown_until: HashMap::new(),
            current_position_count: 0,
            total_exposure_usd: 0.0,
            trade_times: VecDeque::new(),
            errors: VecDeque::new(),
            halted: false,
            halt_reason: None,
            halted_at_ms: None,
            current_day: None,
        }
    }

    /// Crossing local midnight means a fresh day of counters.
    pub fn should_reset_daily(&self, today: NaiveDate) -> bool {
        self.current_day.is_some_and(|day| day != today)
    }

    /// Zero the daily counters, clear streaks and expired cooldowns.
    /// A daily-loss halt does not survive into the new day.
    pub fn reset_daily(&mut self, today: NaiveDate, now_ms: i64) {
        self.daily_pnl_usd = 0.0;
        self.daily_trades_count = 0;
        self.daily_wins = 0;
        self.consecutive_losses.clear();
        self.cooldown_until.retain(|_, until| *until > now_ms);
        self.current_day = Some(today);
        if self.halt_reason.as_deref() == Some("daily_loss_limit") {
            self.halted = false;
            self.halt_reason = None;
            self.halted_at_ms = None;
        }
    }

    pub fn add_trade_result(&mut self, symbol: &Symbol, pnl_usd: f64, today: NaiveDate) {
        if self.current_day.is_none() {
            self.current_day = Some(today);
        }
        self.daily_pnl_usd += pnl_usd;
        self.daily_trades_count += 1;
        if pnl_usd > 0.0 {
            self.daily_wins += 1;
            self.consecutive_losses.remove(symbol);
        } else if pnl_usd < 0.0 {
            *self.consecutive_losses.entry(symbol.clone()).or_insert(0) += 1;
        }
    }

    pub fn loss_streak(&self, symbol: &Symbol) -> u32 {
        self.consecutive_losses.get(symbol).copied().unwrap_or(0)
    }

    pub fn win_rate_pct(&self) -> f64 {
        if self.daily_trades_count == 0 {
            return 0.0;
        }
        self.daily_wins as f64 / self.daily_trades_count as f64 * 100.0
    }

    // ── cooldowns ──

    pub fn add_cooldown(&mut self, symbol: &Symbol, minutes: i64, now_ms: i64) {
        self.cooldown_until
            .insert(symbol.clone(), now_ms + minutes * MINUTE_MS);
    }

    pub fn is_on_cooldown(&self, symbol: &Symbol, now_ms: i64) -> bool {
        self.cooldown_until
            .get(symbol)
            .is_some_and(|&until| until > now_ms)
    }

    pub fn cooldown_remaining_sec(&self, symbol: &Symbol, now_ms: i64) -> i64 {
        self.cooldown_until
            .get(symbol)
            .map(|&until| ((until - now_ms) / 1_000).max(0))
            .unwrap_or(0)
    }

    pub fn clear_cooldown(&mut self, symbol: &Symbol) {
        self.cooldown_until.remove(symbol);
    }

    pub fn active_cooldowns(&self, now_ms: i64) -> Vec<(Symbol, i64)> {
        self.cooldown_until
            .iter()
            .filter(|(_, &until)| until > now_ms)
            .map(|(sym, &until)| (sym.clone(), until))
            .collect()
    }

    // ── velocity ──

    pub fn track_trade_time(&mut self, now_ms: i64) {
        self.trade_times.push_back(now_ms);
        while self
            .trade_times
            .front()
            .is_some_and(|&t| t < now_ms - HOUR_MS)
        {
            self.trade_times.pop_front();
        }
    }

    pub fn trades_last_hour(&self, now_ms: i64) -> usize {
        self.trade_times
            .iter()
            .filter(|&&t| t >= now_ms - HOUR_MS)
            .count()
    }

    pub fn trades_last_minute(&self, now_ms: i64) -> usize {
        self.trade_times
            .iter()
            .filter(|&&t| t >= now_ms - MINUTE_MS)
            .count()
    }

    // ── errors ──

    pub fn track_error(&mut self, now_ms: i64, window_minutes: i64) {
        self.errors.push_back(now_ms);
        let cutoff = now_ms - window_minutes * MINUTE_MS;
        while self.errors.front().is_some_and(|&t| t < cutoff) {
            self.errors.pop_front();
        }
    }

    pub fn errors_in_window(&self, now_ms: i64, window_minutes: i64) -> usize {
        let cutoff = now_ms - window_minutes * MINUTE_MS;
        self.errors.iter().filter(|&&t| t >= cutoff).count()
    }

    // ── halt ──

    pub fn halt(&mut self, reason: &str, now_ms: i64) {
        self.halted = true;
        self.halt_reason = Some(reason.to_string());
        self.halted_at_ms = Some(now_ms);
    }

    pub fn resume(&mut self) {
        self.halted = false;
        self.halt_reason = None;
        self.halted_at_ms = None;
    }
}

impl Default for RiskState {
    fn default() -> Self {
        Self::new()
    }
}
