//! The strategy engine: one cooperative task per symbol.
//!
//! Each loop polls every 50 ms: pre-flight gates (blacklist,
//! cooldowns, schedule, quote freshness), the entry filter chain with
//! MM-aware sizing, and the exit priority chain while in position.
//! Outcome reporting runs in detached tasks bounded by a small
//! semaphore so the store never back-pressures trading decisions.

use crate::exit::{evaluate_exit, ExitInputs, TrailingState};
use crate::filters::check_entry_filters;
use crate::scanner::{MarketView, ScannerClient};
use crate::schedule::TradingSchedule;
use crate::state::{Lot, OpenTrade};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use spotmm_book::{BookTracker, EnhancedBookTracker};
use spotmm_core::{
    now_ms, EntryFeatures, ExecutionPort, ExitReason, OrderSide, OutcomeSink, Predictor, Price,
    Size, StrategyParams, Symbol, TradeExitParams, TradeOutcome,
};
use spotmm_detector::MmDetector;
use spotmm_executor::{PositionSizer, SizingMode, SmartExecutor};
use spotmm_risk::{calculate_dynamic_sl, RiskManager};
use spotmm_telemetry::metrics;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Bounded wait when joining a cancelled symbol loop.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(1_500);
/// Consecutive live quotes required before the first decision.
const WARMUP_QUOTES: u32 = 3;
const WARMUP_POLL: Duration = Duration::from_millis(80);
/// Concurrent outcome-reporting tasks across all symbols.
const OUTCOME_TASK_PERMITS: usize = 5;
/// Remaining profit that still justifies crossing the spread after an
/// unfilled maker exit.
const MIN_PROFIT_FOR_MARKET_BPS: f64 = 1.0;
/// A TP that actually filled below this is reclassified as slippage.
const TP_SLIPPAGE_BPS: f64 = -3.0;

/// Everything a strategy engine talks to.
pub struct EngineDeps {
    pub exec: Arc<dyn ExecutionPort>,
    pub books: Arc<BookTracker>,
    pub detector: Arc<MmDetector>,
    pub enhanced: Arc<EnhancedBookTracker>,
    pub risk: Arc<RiskManager>,
    pub sizer: PositionSizer,
    pub smart: Arc<SmartExecutor>,
    pub scanner: Option<Arc<ScannerClient>>,
    pub outcome_sink: Option<Arc<dyn OutcomeSink>>,
    pub predictor: Option<Arc<dyn Predictor>>,
}

struct SymbolHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Per-symbol strategy engine.
pub struct StrategyEngine {
    deps: EngineDeps,
    params: RwLock<StrategyParams>,
    blacklist: RwLock<HashSet<Symbol>>,
    symbols: tokio::sync::Mutex<HashMap<Symbol, SymbolHandle>>,
    /// Last accepted entry per symbol (min-seconds-between-trades).
    last_trade_time: DashMap<Symbol, i64>,
    /// Last exit per symbol (re-enter cooldown).
    last_exit_time: DashMap<Symbol, i64>,
    last_error: DashMap<Symbol, String>,
    open_count: AtomicUsize,
    outcome_permits: Arc<Semaphore>,
    /// Back-reference for spawning symbol loops from `&self`.
    weak_self: std::sync::Weak<StrategyEngine>,
}

impl StrategyEngine {
    pub fn new(deps: EngineDeps, params: StrategyParams) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            deps,
            params: RwLock::new(params),
            blacklist: RwLock::new(HashSet::new()),
            symbols: tokio::sync::Mutex::new(HashMap::new()),
            last_trade_time: DashMap::new(),
            last_exit_time: DashMap::new(),
            last_error: DashMap::new(),
            open_count: AtomicUsize::new(0),
            outcome_permits: Arc::new(Semaphore::new(OUTCOME_TASK_PERMITS)),
            weak_self: weak_self.clone(),
        })
    }

    // ── parameters ──

    pub fn params(&self) -> StrategyParams {
        self.params.read().clone()
    }

    /// Hot-apply a JSON patch onto the parameter bundle. Unknown keys
    /// and nulls are ignored. Open trades keep their frozen exits.
    pub fn update_params(&self, patch: &serde_json::Value) -> StrategyParams {
        let mut current = match serde_json::to_value(self.params()) {
            Ok(v) => v,
            Err(_) => return self.params(),
        };
        if let (Some(obj), Some(patch_obj)) = (current.as_object_mut(), patch.as_object()) {
            for (key, value) in patch_obj {
                if obj.contains_key(key) && !value.is_null() {
                    obj.insert(key.clone(), value.clone());
                }
            }
        }
        match serde_json::from_value::<StrategyParams>(current) {
            Ok(new_params) => {
                *self.params.write() = new_params.clone();
                info!("strategy params updated");
                new_params
            }
            Err(e) => {
                warn!(?e, "rejecting malformed params patch");
                self.params()
            }
        }
    }

    /// Replace the process-wide blacklist.
    pub fn set_blacklist(&self, symbols: impl IntoIterator<Item = Symbol>) {
        *self.blacklist.write() = symbols.into_iter().collect();
    }

    pub fn is_blacklisted(&self, symbol: &Symbol) -> bool {
        self.blacklist.read().contains(symbol)
    }

    pub fn last_error(&self, symbol: &Symbol) -> Option<String> {
        self.last_error.get(symbol).map(|e| e.clone())
    }

    /// Number of symbols currently holding a position.
    pub fn open_positions(&self) -> usize {
        self.open_count.load(Ordering::Relaxed)
    }

    // ── lifecycle ──

    /// Start (or restart) loops for the given symbols, respecting
    /// `max_concurrent_symbols` and the blacklist.
    pub async fn start_symbols(&self, symbols: &[Symbol]) {
        let wanted: Vec<Symbol> = symbols
            .iter()
            .filter(|s| !s.is_empty() && !self.is_blacklisted(s))
            .cloned()
            .collect();
        if wanted.is_empty() {
            warn!("no startable symbols (empty or blacklisted)");
            return;
        }

        let max_concurrent = self.params.read().max_concurrent_symbols;
        let mut handles = self.symbols.lock().await;

        let active = handles.len();
        let can_start = max_concurrent.saturating_sub(active);
        let (to_start, skipped) = wanted.split_at(can_start.min(wanted.len()));
        if !skipped.is_empty() {
            warn!(
                max_concurrent,
                skipped = ?skipped.iter().map(Symbol::as_str).collect::<Vec<_>>(),
                "symbol cap reached, skipping"
            );
        }

        for symbol in to_start {
            // A start on a running symbol is a restart.
            if let Some(existing) = handles.remove(symbol) {
                existing.token.cancel();
                let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, existing.handle).await;
            }

            let token = CancellationToken::new();
            let Some(engine) = self.weak_self.upgrade() else {
                return;
            };
            let sym = symbol.clone();
            let loop_token = token.clone();
            let handle = tokio::spawn(async move { engine.symbol_loop(sym, loop_token).await });

            handles.insert(symbol.clone(), SymbolHandle { token, handle });
            self.last_error.remove(symbol);
            self.deps.exec.start_symbol(symbol).await;
            info!(%symbol, "symbol loop started");
        }
    }

    /// Stop the given symbols: cancel the loop, cancel orders,
    /// optionally flatten, and await the task briefly.
    pub async fn stop_symbols(&self, symbols: &[Symbol], flatten: bool) {
        let mut handles = self.symbols.lock().await;
        for symbol in symbols {
            let Some(entry) = handles.remove(symbol) else {
                continue;
            };
            entry.token.cancel();

            self.deps.exec.cancel_orders(symbol).await;
            if flatten {
                self.deps.exec.flatten_symbol(symbol).await;
            }
            self.deps.exec.stop_symbol(symbol).await;

            if tokio::time::timeout(STOP_JOIN_TIMEOUT, entry.handle)
                .await
                .is_err()
            {
                warn!(%symbol, "symbol loop did not stop in time");
            }
            info!(%symbol, "symbol loop stopped");
        }
    }

    pub async fn stop_all(&self, flatten: bool) {
        let symbols: Vec<Symbol> = self.symbols.lock().await.keys().cloned().collect();
        self.stop_symbols(&symbols, flatten).await;
    }

    // ── per-symbol loop ──

    async fn symbol_loop(self: Arc<Self>, symbol: Symbol, token: CancellationToken) {
        debug!(%symbol, "loop starting");
        metrics::SYMBOLS_RUNNING.inc();

        if !self.warm_up(&symbol, &token).await {
            metrics::SYMBOLS_RUNNING.dec();
            return;
        }

        // Survive restarts: adopt any position the executor already
        // holds, frozen under the current parameter bundle.
        let mut open_trade = self.adopt_existing_position(&symbol).await;
        if open_trade.is_some() {
            self.bump_open_count(1);
        }

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.is_blacklisted(&symbol) {
                warn!(%symbol, "blacklisted, stopping loop");
                break;
            }

            let params = self.params();
            let Some(view) = self.market_view(&symbol).await else {
                continue;
            };
            let now = now_ms();

            match open_trade.take() {
                None => {
                    open_trade = self.try_enter(&symbol, &params, &view, now).await;
                    if open_trade.is_some() {
                        self.bump_open_count(1);
                    }
                }
                Some(mut trade) => {
                    if self.manage_exit(&symbol, &mut trade, &params, &view, now).await {
                        self.bump_open_count(-1);
                        // Trade closed; nothing to carry forward.
                    } else {
                        open_trade = Some(trade);
                    }
                }
            }
        }

        metrics::SYMBOLS_RUNNING.dec();
        metrics::OPEN_POSITIONS
            .with_label_values(&[symbol.as_str()])
            .set(0.0);
        debug!(%symbol, "loop stopped");
    }

    /// Require several consecutive live quotes before the first
    /// decision. Returns false when cancelled while waiting.
    async fn warm_up(&self, symbol: &Symbol, token: &CancellationToken) -> bool {
        let mut consecutive = 0u32;
        loop {
            if token.is_cancelled() {
                return false;
            }
            if self.deps.books.get_quote(symbol).is_live() {
                consecutive += 1;
                if consecutive >= WARMUP_QUOTES {
                    return true;
                }
            } else {
                consecutive = 0;
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(WARMUP_POLL) => {}
            }
        }
    }

    async fn adopt_existing_position(&self, symbol: &Symbol) -> Option<OpenTrade> {
        let pos = self.deps.exec.get_position(symbol).await;
        if !pos.is_open() {
            return None;
        }
        info!(%symbol, qty = %pos.qty, avg = %pos.avg_price, "adopting existing position");
        let params = self.params();
        let entry_ts = if pos.ts_ms > 0 { pos.ts_ms } else { now_ms() };
        Some(OpenTrade {
            trade_id: new_trade_id(symbol),
            lots: vec![Lot {
                qty: pos.qty,
                entry_price: pos.avg_price,
                entry_ts_ms: entry_ts,
            }],
            frozen: TradeExitParams::freeze(&params, params.stop_loss_bps),
            trailing: TrailingState::default(),
            spread_bps_entry: 0.0,
            imbalance_entry: 0.5,
            mm_at_entry: false,
        })
    }

    /// Fresh market data: scanner row first, book cache as fallback.
    /// Every accepted view also feeds the MM detector.
    async fn market_view(&self, symbol: &Symbol) -> Option<MarketView> {
        let view = match &self.deps.scanner {
            Some(scanner) => match scanner.top(symbol).await {
                Some(row) => MarketView::from_scan_row(&row),
                None => MarketView::from_quote(&self.deps.books.get_quote(symbol)),
            },
            None => MarketView::from_quote(&self.deps.books.get_quote(symbol)),
        }?;

        self.deps.detector.on_book_update(
            symbol,
            view.bid,
            view.ask,
            Size::from_f64(view.bid_qty),
            Size::from_f64(view.ask_qty),
            now_ms(),
        );
        Some(view)
    }

    fn bump_open_count(&self, delta: isize) {
        let count = if delta > 0 {
            self.open_count.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.open_count
                .fetch_sub(1, Ordering::Relaxed)
                .saturating_sub(1)
        };
        self.deps.risk.update_position_count(count);
    }

    // ── entry ──

    async fn try_enter(
        &self,
        symbol: &Symbol,
        params: &StrategyParams,
        view: &MarketView,
        now: i64,
    ) -> Option<OpenTrade> {
        // Re-enter cooldown since the last exit.
        if let Some(last_exit) = self.last_exit_time.get(symbol) {
            if now - *last_exit < params.reenter_cooldown_ms as i64 {
                return None;
            }
        }

        // Trading schedule.
        let schedule = TradingSchedule::from_params(params);
        if !schedule.is_open_at(Utc::now()) {
            trace!(%symbol, "outside trading window");
            return None;
        }

        // Entry filters.
        if let Err(reject) = check_entry_filters(params, view) {
            trace!(%symbol, reject = reject.as_str(), "entry filtered");
            return None;
        }

        // Risk gates.
        if !self.deps.risk.can_trade() {
            trace!(%symbol, "risk: trading not allowed");
            return None;
        }
        if self.deps.risk.is_symbol_on_cooldown(symbol) {
            return None;
        }
        let decision = self
            .deps
            .risk
            .can_open_position(symbol, params.order_size_usd);
        if let Some(reason) = decision.reason() {
            debug!(%symbol, reason, "risk denied entry");
            metrics::RISK_DENIED_TOTAL
                .with_label_values(&[symbol.as_str()])
                .inc();
            return None;
        }

        // MM pattern clamps the size; its absence only means default
        // sizing.
        let mut target_usd = params.order_size_usd;
        let mm_at_entry = match self.deps.detector.get_pattern(symbol, now) {
            Some(pattern) => {
                target_usd = target_usd.min(pattern.safe_order_size_usd);
                debug!(
                    %symbol,
                    confidence = pattern.confidence,
                    safe_usd = pattern.safe_order_size_usd,
                    "MM pattern present"
                );
                true
            }
            None => false,
        };

        // Book-quality haircut from the spoofing analytics.
        target_usd *= self.deps.enhanced.quality_multiplier(symbol);

        // Pluggable ML filter; scoring failures fail open.
        if params.ml_enabled {
            if let Some(predictor) = &self.deps.predictor {
                let features = EntryFeatures {
                    symbol: symbol.clone(),
                    spread_bps: view.spread_bps,
                    imbalance: view.imbalance,
                };
                match predictor.score(&features).await {
                    Ok(score) if score < params.ml_min_confidence => {
                        debug!(%symbol, score, "ML filter rejected entry");
                        return None;
                    }
                    Ok(score) => trace!(%symbol, score, "ML filter passed"),
                    Err(e) => debug!(%symbol, ?e, "ML filter error, failing open"),
                }
            }
        }

        // Per-symbol trade spacing.
        if let Some(last) = self.last_trade_time.get(symbol) {
            if now - *last < (params.min_seconds_between_trades * 1_000) as i64 {
                return None;
            }
        }

        // Size and execute.
        let sizing = self
            .deps
            .sizer
            .calculate(symbol, target_usd, SizingMode::Conservative);
        let bid_f = view.bid.to_f64();
        if bid_f <= 0.0 || sizing.safe_size_usd <= 0.0 {
            return None;
        }
        let qty = Size::from_f64(sizing.safe_size_usd / bid_f);
        if !qty.is_positive() {
            return None;
        }

        let result = self
            .deps
            .smart
            .execute_entry(
                self.deps.exec.as_ref(),
                symbol,
                OrderSide::Buy,
                view.bid,
                qty,
                sizing.split_count,
                Duration::from_secs_f64(sizing.split_delay_sec),
                view.spread_bps,
            )
            .await;
        if !result.is_filled() {
            debug!(%symbol, aborted = ?result.aborted, "entry did not fill");
            if let Some(abort) = result.aborted {
                self.last_error
                    .insert(symbol.clone(), format!("entry_abort:{abort:?}"));
            }
            return None;
        }

        self.last_trade_time.insert(symbol.clone(), now);

        let dynamic_sl = calculate_dynamic_sl(
            view.atr_pct,
            view.spread_bps,
            view.imbalance,
            params.stop_loss_bps,
        );
        let frozen = TradeExitParams::freeze(params, dynamic_sl);

        metrics::ENTRIES_TOTAL
            .with_label_values(&[symbol.as_str()])
            .inc();
        metrics::OPEN_POSITIONS
            .with_label_values(&[symbol.as_str()])
            .set(1.0);
        metrics::SPREAD_BPS_AT_ENTRY
            .with_label_values(&[symbol.as_str()])
            .observe(view.spread_bps.max(0.0));

        let entry_price = if result.avg_fill_price.is_positive() {
            result.avg_fill_price
        } else {
            view.bid
        };
        info!(
            %symbol,
            qty = %result.filled_qty,
            price = %entry_price,
            dynamic_sl_bps = dynamic_sl,
            splits = result.splits_done,
            "ENTRY BUY"
        );

        Some(OpenTrade {
            trade_id: new_trade_id(symbol),
            lots: vec![Lot {
                qty: result.filled_qty,
                entry_price,
                entry_ts_ms: now,
            }],
            frozen,
            trailing: TrailingState::default(),
            spread_bps_entry: view.spread_bps,
            imbalance_entry: view.imbalance,
            mm_at_entry,
        })
    }

    // ── exit ──

    /// Evaluate and, if decided, execute an exit. Returns true when
    /// the position is closed.
    async fn manage_exit(
        &self,
        symbol: &Symbol,
        trade: &mut OpenTrade,
        params: &StrategyParams,
        view: &MarketView,
        now: i64,
    ) -> bool {
        if trade.lots.is_empty() {
            return true;
        }

        let pnl_bps = trade.pnl_bps(view.bid);
        let elapsed_ms = now - trade.oldest_entry_ts_ms();
        // Only trades entered against a detected MM can lose it.
        let mm_gone = trade.mm_at_entry
            && self
                .deps
                .detector
                .is_mm_gone(symbol, view.spread_bps, now)
                .is_some();
        let schedule = TradingSchedule::from_params(params);
        let window_closing = schedule.should_close_before_end(Utc::now());

        let inputs = ExitInputs {
            pnl_bps,
            mid: view.mid.to_f64(),
            elapsed_ms,
            mm_gone,
            window_closing,
        };
        let Some(planned) = evaluate_exit(&trade.frozen, &mut trade.trailing, inputs) else {
            return false;
        };

        self.execute_exit(symbol, trade, planned.reason, planned.maker_first, view, pnl_bps, elapsed_ms)
            .await;
        true
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_exit(
        &self,
        symbol: &Symbol,
        trade: &OpenTrade,
        mut reason: ExitReason,
        maker_first: bool,
        view: &MarketView,
        pnl_bps_at_decision: f64,
        elapsed_ms: i64,
    ) {
        let avg_entry = trade.avg_entry();

        // Sell what is actually held, not what we think we bought.
        let pos = self.deps.exec.get_position(symbol).await;
        if !pos.is_open() {
            warn!(%symbol, "no position to exit, clearing state");
            self.finish_exit(symbol, trade, reason, Price::ZERO, Size::ZERO, 0.0, elapsed_ms)
                .await;
            return;
        }
        let actual_qty = pos.qty;

        let mut exit_price = view.bid;
        let mut exit_order_id: Option<String> = None;

        if maker_first {
            // Maker-limit at the ask earns the spread when it fills.
            let tag = format!("mm_exit_{}", reason.as_str().to_lowercase());
            match self
                .deps
                .exec
                .place_maker(symbol, OrderSide::Sell, view.ask, actual_qty, &tag)
                .await
            {
                Some(order_id) => {
                    exit_price = view.ask;
                    exit_order_id = Some(order_id);
                }
                None => {
                    // Limit did not fill inside the poll window: the
                    // price may have moved. Re-read before crossing.
                    let fresh = self.deps.books.get_quote(symbol);
                    let new_bid = if fresh.is_live() { fresh.bid } else { view.bid };
                    let new_pnl = new_bid.bps_from(avg_entry).unwrap_or(pnl_bps_at_decision);

                    reason = if new_pnl <= trade.frozen.hard_stop_loss_bps {
                        ExitReason::HardSl
                    } else if new_pnl >= MIN_PROFIT_FOR_MARKET_BPS {
                        match reason {
                            ExitReason::Trail => ExitReason::TrailMarket,
                            ExitReason::Tp => ExitReason::TpMarket,
                            other => other,
                        }
                    } else {
                        match reason {
                            ExitReason::Trail => ExitReason::TrailExpired,
                            ExitReason::Tp => ExitReason::TpExpired,
                            other => other,
                        }
                    };
                    warn!(
                        %symbol,
                        old_pnl = pnl_bps_at_decision,
                        new_pnl,
                        reason = reason.as_str(),
                        "maker exit unfilled, falling back to market"
                    );

                    let tag = format!("mm_exit_{}", reason.as_str().to_lowercase());
                    match self
                        .deps
                        .exec
                        .place_market(symbol, OrderSide::Sell, actual_qty, &tag)
                        .await
                    {
                        Some(fill) => {
                            exit_price = fill.fill_price;
                            exit_order_id = Some(fill.order_id);
                        }
                        None => exit_price = new_bid,
                    }
                }
            }
        } else {
            let tag = format!("mm_exit_{}", reason.as_str().to_lowercase());
            match self
                .deps
                .exec
                .place_market(symbol, OrderSide::Sell, actual_qty, &tag)
                .await
            {
                Some(fill) => {
                    exit_price = fill.fill_price;
                    exit_order_id = Some(fill.order_id);
                }
                None => exit_price = view.bid,
            }
        }

        // The decision used an estimate; the fill is the truth.
        let real_pnl_bps = exit_price.bps_from(avg_entry).unwrap_or(0.0);
        if reason == ExitReason::Tp && real_pnl_bps <= TP_SLIPPAGE_BPS {
            warn!(%symbol, real_pnl_bps, "TP filled at a loss, reclassifying");
            reason = ExitReason::TpSlippage;
        }

        self.deps.exec.cancel_orders(symbol).await;
        if exit_order_id.is_none() {
            warn!(%symbol, "exit order failed, forcing flatten");
            self.deps.exec.flatten_symbol(symbol).await;
        } else {
            // A partial exit fill leaves residual inventory; never
            // carry it into the next trade.
            let residual = self.deps.exec.get_position(symbol).await;
            if residual.is_open() {
                self.deps.exec.flatten_symbol(symbol).await;
            }
        }

        info!(
            %symbol,
            qty = %actual_qty,
            price = %exit_price,
            reason = reason.as_str(),
            pnl_bps = real_pnl_bps,
            held_s = elapsed_ms as f64 / 1_000.0,
            "EXIT SELL"
        );

        self.finish_exit(symbol, trade, reason, exit_price, actual_qty, real_pnl_bps, elapsed_ms)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_exit(
        &self,
        symbol: &Symbol,
        trade: &OpenTrade,
        reason: ExitReason,
        exit_price: Price,
        qty: Size,
        pnl_bps: f64,
        elapsed_ms: i64,
    ) {
        let now = now_ms();
        self.last_exit_time.insert(symbol.clone(), now);

        metrics::EXITS_TOTAL
            .with_label_values(&[symbol.as_str(), reason.as_str()])
            .inc();
        metrics::OPEN_POSITIONS
            .with_label_values(&[symbol.as_str()])
            .set(0.0);
        metrics::TRADE_PNL_BPS
            .with_label_values(&[symbol.as_str()])
            .observe(pnl_bps.abs());
        metrics::TRADE_DURATION_SECONDS
            .with_label_values(&[symbol.as_str()])
            .observe((elapsed_ms as f64 / 1_000.0).max(0.0));

        let avg_entry = trade.avg_entry();
        let pnl_usd = (exit_price.to_f64() - avg_entry.to_f64()) * qty.to_f64();

        let outcome = TradeOutcome {
            trade_id: trade.trade_id.clone(),
            symbol: symbol.clone(),
            entry_price: avg_entry,
            exit_price,
            qty,
            pnl_usd,
            pnl_bps,
            exit_reason: reason,
            entry_ts_ms: trade.oldest_entry_ts_ms(),
            exit_ts_ms: now,
            held_ms: elapsed_ms,
            spread_bps_entry: trade.spread_bps_entry,
            imbalance_entry: trade.imbalance_entry,
        };

        // Outcome reporting is detached and bounded: the store must
        // never block the 50 ms loop.
        let risk = Arc::clone(&self.deps.risk);
        let sink = self.deps.outcome_sink.clone();
        let permits = Arc::clone(&self.outcome_permits);
        let sym = symbol.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire().await else {
                return;
            };
            risk.track_trade_result(&sym, outcome.pnl_usd);
            if let Some(sink) = sink {
                sink.record_outcome(&outcome).await;
            }
        });
    }
}

fn new_trade_id(symbol: &Symbol) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", symbol, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use spotmm_detector::DetectorConfig;
    use spotmm_executor::{PaperExecutor, PositionBook};
    use spotmm_risk::RiskSettings;
    use std::str::FromStr;

    struct CapturedOutcomes(Mutex<Vec<TradeOutcome>>);

    #[async_trait::async_trait]
    impl OutcomeSink for CapturedOutcomes {
        async fn record_outcome(&self, outcome: &TradeOutcome) {
            self.0.lock().push(outcome.clone());
        }
    }

    struct Harness {
        books: Arc<BookTracker>,
        engine: Arc<StrategyEngine>,
        outcomes: Arc<CapturedOutcomes>,
        positions: Arc<PositionBook>,
    }

    fn harness(params: StrategyParams) -> Harness {
        let books = Arc::new(BookTracker::new());
        let positions = Arc::new(PositionBook::new());
        let exec = Arc::new(PaperExecutor::new(Arc::clone(&books), Arc::clone(&positions)));
        let detector = Arc::new(MmDetector::new(DetectorConfig::default()));
        let outcomes = Arc::new(CapturedOutcomes(Mutex::new(Vec::new())));
        let sink: Arc<dyn OutcomeSink> = outcomes.clone();

        let deps = EngineDeps {
            exec,
            books: Arc::clone(&books),
            detector: Arc::clone(&detector),
            enhanced: Arc::new(EnhancedBookTracker::new()),
            risk: Arc::new(RiskManager::new(RiskSettings::default())),
            sizer: PositionSizer::new(),
            smart: Arc::new(SmartExecutor::new(detector)),
            scanner: None,
            outcome_sink: Some(sink),
            predictor: None,
        };
        Harness {
            engine: StrategyEngine::new(deps, params),
            books,
            outcomes,
            positions,
        }
    }

    fn quote(books: &BookTracker, sym: &Symbol, bid: &str, ask: &str) {
        books.update_book_ticker(
            sym,
            Price::from_str(bid).unwrap(),
            Size::new(Decimal::from(10)),
            Price::from_str(ask).unwrap(),
            Size::new(Decimal::from(10)),
            now_ms(),
        );
    }

    fn scalp_params() -> StrategyParams {
        StrategyParams {
            min_spread_bps: 0.05,
            edge_floor_bps: 0.05,
            order_size_usd: 20.0,
            take_profit_bps: 2.0,
            stop_loss_bps: -3.0,
            min_hold_ms: 300,
            timeout_exit_sec: 30,
            reenter_cooldown_ms: 100,
            min_seconds_between_trades: 0,
            enable_trailing_stop: false,
            ..Default::default()
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, max_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(max_ms);
        while tokio::time::Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        cond()
    }

    /// Take-profit end to end: enter on a live quote, push the bid up
    /// past TP after min-hold, expect a closed trade with a TP-family
    /// reason and positive realized PnL.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_scenario_take_profit() {
        let h = harness(scalp_params());
        let sym = Symbol::new("ETHUSDT");
        quote(&h.books, &sym, "2000.00", "2000.02");

        h.engine.start_symbols(&[sym.clone()]).await;
        let positions = Arc::clone(&h.positions);
        let entered = wait_for(|| positions.snapshot(&sym).is_open(), 2_000).await;
        assert!(entered, "entry did not happen");

        // Hold past min_hold, then gap up ~30 bps.
        tokio::time::sleep(Duration::from_millis(400)).await;
        quote(&h.books, &sym, "2000.60", "2000.62");

        let outcomes = Arc::clone(&h.outcomes);
        let exited = wait_for(|| !outcomes.0.lock().is_empty(), 2_000).await;
        assert!(exited, "exit did not happen");

        h.engine.stop_all(false).await;

        let recorded = h.outcomes.0.lock();
        let outcome = &recorded[0];
        assert!(
            matches!(
                outcome.exit_reason,
                ExitReason::Tp | ExitReason::TpMarket
            ),
            "reason={:?}",
            outcome.exit_reason
        );
        assert!(outcome.pnl_bps > 1.0, "pnl_bps={}", outcome.pnl_bps);
        assert!(!h.positions.snapshot(&sym).is_open());
    }

    /// Hard stop-loss fires on the touch tick regardless of min-hold.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_scenario_hard_stop_loss() {
        let mut params = scalp_params();
        params.min_hold_ms = 60_000; // min-hold must NOT delay hard SL
        let h = harness(params);
        let sym = Symbol::new("ETHUSDT");
        quote(&h.books, &sym, "100.00", "100.01");

        h.engine.start_symbols(&[sym.clone()]).await;
        let positions = Arc::clone(&h.positions);
        assert!(wait_for(|| positions.snapshot(&sym).is_open(), 2_000).await);

        // Drop ~11 bps below entry.
        quote(&h.books, &sym, "99.89", "99.90");

        let outcomes = Arc::clone(&h.outcomes);
        assert!(wait_for(|| !outcomes.0.lock().is_empty(), 2_000).await);
        h.engine.stop_all(false).await;

        let recorded = h.outcomes.0.lock();
        assert_eq!(recorded[0].exit_reason, ExitReason::HardSl);
        assert!(recorded[0].pnl_bps <= -10.0);
    }

    /// Timeout closes a flat trade.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_scenario_timeout() {
        let mut params = scalp_params();
        params.timeout_exit_sec = 1;
        params.take_profit_bps = 50.0;
        let h = harness(params);
        let sym = Symbol::new("ETHUSDT");
        quote(&h.books, &sym, "100.00", "100.01");

        h.engine.start_symbols(&[sym.clone()]).await;
        let outcomes = Arc::clone(&h.outcomes);
        assert!(wait_for(|| !outcomes.0.lock().is_empty(), 4_000).await);
        h.engine.stop_all(false).await;

        let recorded = h.outcomes.0.lock();
        assert_eq!(recorded[0].exit_reason, ExitReason::Timeout);
    }

    /// Re-enter cooldown: no new entry within the window after an
    /// exit.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_reenter_cooldown() {
        let mut params = scalp_params();
        params.timeout_exit_sec = 1;
        params.take_profit_bps = 50.0;
        params.reenter_cooldown_ms = 60_000;
        let h = harness(params);
        let sym = Symbol::new("ETHUSDT");
        quote(&h.books, &sym, "100.00", "100.01");

        h.engine.start_symbols(&[sym.clone()]).await;
        let outcomes = Arc::clone(&h.outcomes);
        assert!(wait_for(|| !outcomes.0.lock().is_empty(), 4_000).await);

        // Give the loop room to (incorrectly) re-enter.
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.engine.stop_all(false).await;

        assert_eq!(h.outcomes.0.lock().len(), 1);
        assert!(!h.positions.snapshot(&sym).is_open());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blacklisted_symbol_never_starts() {
        let h = harness(scalp_params());
        let sym = Symbol::new("ATOMUSDT");
        quote(&h.books, &sym, "10.00", "10.01");
        h.engine.set_blacklist([sym.clone()]);

        h.engine.start_symbols(&[sym.clone()]).await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!h.positions.snapshot(&sym).is_open());
        h.engine.stop_all(false).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_zero_quotes_no_entry() {
        let h = harness(scalp_params());
        let sym = Symbol::new("ETHUSDT");
        // No quotes seeded at all.
        h.engine.start_symbols(&[sym.clone()]).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        h.engine.stop_all(false).await;
        assert!(!h.positions.snapshot(&sym).is_open());
        assert!(h.outcomes.0.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_max_concurrent_symbols() {
        let mut params = scalp_params();
        params.max_concurrent_symbols = 1;
        let h = harness(params);
        let a = Symbol::new("AAAUSDT");
        let b = Symbol::new("BBBUSDT");
        quote(&h.books, &a, "10.00", "10.01");
        quote(&h.books, &b, "10.00", "10.01");

        h.engine.start_symbols(&[a.clone(), b.clone()]).await;
        let running = h.engine.symbols.lock().await.len();
        assert_eq!(running, 1);
        h.engine.stop_all(false).await;
    }

    #[test]
    fn test_update_params_patch() {
        let h = harness(scalp_params());
        let updated = h.engine.update_params(&serde_json::json!({
            "take_profit_bps": 4.5,
            "not_a_real_key": 1,
            "stop_loss_bps": null,
        }));
        assert_eq!(updated.take_profit_bps, 4.5);
        // Null and unknown keys are ignored.
        assert_eq!(updated.stop_loss_bps, -3.0);
    }
}
