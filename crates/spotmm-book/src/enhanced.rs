//! Order-lifetime and spoofing analytics.
//!
//! Tracks arrivals and departures of L2 price levels. A departed
//! level is flagged as a suspected spoof when it lived under the
//! lifetime floor or refreshed faster than the update-rate ceiling.
//! The resulting scores feed MM confidence and scale down strategy
//! entry quality.

use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use spotmm_core::{DepthLevel, Symbol};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const WINDOW_MS: i64 = 300_000;
const HISTORY_CAP: usize = 1_000;
const SPOOF_SIGNAL_CAP: usize = 100;
const SPREAD_HISTORY_CAP: usize = 300;

/// A level lives below this and it is suspect (seconds).
const SPOOF_LIFETIME_MAX_SEC: f64 = 1.0;
/// A level updating faster than this is suspect (Hz).
const SPOOF_UPDATE_RATE_MIN_HZ: f64 = 5.0;

#[derive(Debug, Clone)]
struct LevelLife {
    first_seen_ms: i64,
    last_seen_ms: i64,
    update_count: u32,
}

impl LevelLife {
    fn lifetime_sec(&self) -> f64 {
        (self.last_seen_ms - self.first_seen_ms).max(0) as f64 / 1_000.0
    }

    fn update_rate_hz(&self) -> f64 {
        let life = self.lifetime_sec();
        if life <= 0.0 {
            return 0.0;
        }
        f64::from(self.update_count) / life
    }

    fn is_spoof(&self) -> bool {
        self.lifetime_sec() < SPOOF_LIFETIME_MAX_SEC || self.update_rate_hz() > SPOOF_UPDATE_RATE_MIN_HZ
    }
}

#[derive(Debug, Default)]
struct SymbolBook {
    bid_levels: HashMap<Decimal, LevelLife>,
    ask_levels: HashMap<Decimal, LevelLife>,
    /// Departed levels, oldest first.
    history: VecDeque<LevelLife>,
    /// Timestamps of suspected spoof departures.
    spoof_events: VecDeque<i64>,
    /// (ts_ms, spread_bps) samples.
    spread_history: VecDeque<(i64, f64)>,
}

/// Aggregated analytics for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookMetrics {
    pub avg_order_lifetime_sec: f64,
    pub median_order_lifetime_sec: f64,
    /// Fraction of departed orders that lived under one second.
    pub short_lived_orders_pct: f64,
    /// 0 = clean book, 1 = saturated with suspected spoofs.
    pub spoofing_score: f64,
    pub spoof_orders_detected: usize,
    /// 1 = stable spread, 0 = volatile.
    pub spread_stability_score: f64,
    pub avg_spread_bps: f64,
    pub book_refresh_rate_hz: f64,
    pub avg_update_count: f64,
}

impl BookMetrics {
    fn empty() -> Self {
        Self {
            spread_stability_score: 1.0,
            ..Self::default()
        }
    }
}

/// Enhanced book tracker.
pub struct EnhancedBookTracker {
    books: DashMap<Symbol, Arc<RwLock<SymbolBook>>>,
}

impl EnhancedBookTracker {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
        }
    }

    fn book(&self, symbol: &Symbol) -> Arc<RwLock<SymbolBook>> {
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolBook::default())))
            .clone()
    }

    /// Process an L2 replace: retire departed levels, refresh or add
    /// the rest, record the spread.
    pub fn on_book_update(
        &self,
        symbol: &Symbol,
        bids: &[DepthLevel],
        asks: &[DepthLevel],
        ts_ms: i64,
    ) {
        let book = self.book(symbol);
        let mut guard = book.write();

        update_side(&mut guard, bids, true, ts_ms);
        update_side(&mut guard, asks, false, ts_ms);

        if let (Some(best_bid), Some(best_ask)) = (bids.first(), asks.first()) {
            let bid = best_bid.price.inner();
            let ask = best_ask.price.inner();
            if bid > Decimal::ZERO && ask > Decimal::ZERO {
                use rust_decimal::prelude::ToPrimitive;
                let mid = (bid + ask) / Decimal::TWO;
                if !mid.is_zero() {
                    let spread_bps = ((ask - bid) / mid * Decimal::from(10_000))
                        .to_f64()
                        .unwrap_or(0.0);
                    if guard.spread_history.len() == SPREAD_HISTORY_CAP {
                        guard.spread_history.pop_front();
                    }
                    guard.spread_history.push_back((ts_ms, spread_bps));
                }
            }
        }

        let cutoff = ts_ms - WINDOW_MS;
        while guard.history.front().is_some_and(|l| l.last_seen_ms < cutoff) {
            guard.history.pop_front();
        }
        while guard.spoof_events.front().is_some_and(|&t| t < cutoff) {
            guard.spoof_events.pop_front();
        }
        while guard.spread_history.front().is_some_and(|&(t, _)| t < cutoff) {
            guard.spread_history.pop_front();
        }
    }

    /// Aggregated metrics for a symbol.
    pub fn metrics(&self, symbol: &Symbol) -> BookMetrics {
        let Some(book) = self.books.get(symbol) else {
            return BookMetrics::empty();
        };
        let guard = book.read();
        if guard.history.is_empty() {
            return BookMetrics::empty();
        }

        let mut lifetimes: Vec<f64> = guard.history.iter().map(LevelLife::lifetime_sec).collect();
        let avg = lifetimes.iter().sum::<f64>() / lifetimes.len() as f64;
        lifetimes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = if lifetimes.len() % 2 == 1 {
            lifetimes[lifetimes.len() / 2]
        } else {
            (lifetimes[lifetimes.len() / 2 - 1] + lifetimes[lifetimes.len() / 2]) / 2.0
        };
        let short_lived =
            lifetimes.iter().filter(|&&l| l < 1.0).count() as f64 / lifetimes.len() as f64;

        let spoof_count = guard.spoof_events.len();
        let spoofing_score = (spoof_count as f64 / 10.0).min(1.0);

        let spreads: Vec<f64> = guard.spread_history.iter().map(|&(_, s)| s).collect();
        let (avg_spread, stability) = if spreads.is_empty() {
            (0.0, 1.0)
        } else {
            let mean = spreads.iter().sum::<f64>() / spreads.len() as f64;
            let std = if spreads.len() > 1 {
                let var = spreads.iter().map(|s| (s - mean).powi(2)).sum::<f64>()
                    / (spreads.len() - 1) as f64;
                var.sqrt()
            } else {
                0.0
            };
            (mean, (1.0 - std / (mean + 0.1)).max(0.0))
        };

        let refresh_rate = {
            let first = guard.history.front().map(|l| l.first_seen_ms).unwrap_or(0);
            let last = guard.history.back().map(|l| l.last_seen_ms).unwrap_or(0);
            let span_sec = (last - first).max(0) as f64 / 1_000.0;
            if span_sec > 0.0 {
                guard.history.len() as f64 / span_sec
            } else {
                0.0
            }
        };

        let avg_updates = guard
            .history
            .iter()
            .map(|l| f64::from(l.update_count))
            .sum::<f64>()
            / guard.history.len() as f64;

        BookMetrics {
            avg_order_lifetime_sec: avg,
            median_order_lifetime_sec: median,
            short_lived_orders_pct: short_lived,
            spoofing_score,
            spoof_orders_detected: spoof_count,
            spread_stability_score: stability,
            avg_spread_bps: avg_spread,
            book_refresh_rate_hz: refresh_rate,
            avg_update_count: avg_updates,
        }
    }

    /// Multiplier the strategy applies to its entry quality: 0.7 on a
    /// spoofy book, a further 0.9 on an unstable spread.
    pub fn quality_multiplier(&self, symbol: &Symbol) -> f64 {
        let metrics = self.metrics(symbol);
        let mut mult = 1.0;
        if metrics.spoofing_score > 0.5 {
            mult *= 0.7;
        }
        if metrics.spread_stability_score < 0.5 {
            mult *= 0.9;
        }
        mult
    }
}

fn update_side(book: &mut SymbolBook, levels: &[DepthLevel], is_bid: bool, ts_ms: i64) {
    let current: std::collections::HashSet<Decimal> =
        levels.iter().map(|l| l.price.inner().round_dp(8)).collect();

    let side = if is_bid {
        &mut book.bid_levels
    } else {
        &mut book.ask_levels
    };

    // Departed levels move to history, spoofs to the signal deque.
    let departed: Vec<Decimal> = side
        .keys()
        .filter(|price| !current.contains(*price))
        .cloned()
        .collect();
    let mut retired = Vec::with_capacity(departed.len());
    for price in departed {
        if let Some(mut life) = side.remove(&price) {
            life.last_seen_ms = ts_ms;
            retired.push(life);
        }
    }

    for level in levels {
        let key = level.price.inner().round_dp(8);
        side.entry(key)
            .and_modify(|life| {
                life.last_seen_ms = ts_ms;
                life.update_count += 1;
            })
            .or_insert(LevelLife {
                first_seen_ms: ts_ms,
                last_seen_ms: ts_ms,
                update_count: 1,
            });
    }

    for life in retired {
        if life.is_spoof() {
            if book.spoof_events.len() == SPOOF_SIGNAL_CAP {
                book.spoof_events.pop_front();
            }
            book.spoof_events.push_back(ts_ms);
        }
        if book.history.len() == HISTORY_CAP {
            book.history.pop_front();
        }
        book.history.push_back(life);
    }
}

impl Default for EnhancedBookTracker {
    fn default() -> Self {
        Self::new()
    }
}
