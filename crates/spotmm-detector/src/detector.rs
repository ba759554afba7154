//! MM pattern inference.
//!
//! Every book update appends a snapshot to a per-symbol bounded
//! window and bumps the counter for its bid/ask price level. Pattern
//! detection reads the window: the most-seen level per side is the
//! boundary, mean top sizes give capacity, and consecutive-change
//! counting gives the refresh rate.

use crate::config::DetectorConfig;
use crate::pattern::MmPattern;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use spotmm_book::TapeTracker;
use spotmm_core::{Price, Size, Symbol};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

const SNAPSHOT_CAP: usize = 1_000;

/// Spread beyond which the MM is assumed gone regardless of pattern.
const MM_GONE_SPREAD_BPS: f64 = 30.0;
/// Confidence below which a cached pattern no longer counts.
const MM_GONE_MIN_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
struct BookObservation {
    bid: Price,
    ask: Price,
    bid_qty: f64,
    ask_qty: f64,
    mid: f64,
    spread_bps: f64,
    ts_ms: i64,
}

#[derive(Default)]
struct SymbolWindow {
    snapshots: VecDeque<BookObservation>,
    bid_levels: HashMap<Decimal, u64>,
    ask_levels: HashMap<Decimal, u64>,
}

/// Market-maker detector. One process-wide instance.
pub struct MmDetector {
    config: DetectorConfig,
    windows: DashMap<Symbol, Arc<RwLock<SymbolWindow>>>,
    patterns: DashMap<Symbol, MmPattern>,
    tape: Option<Arc<TapeTracker>>,
}

impl MmDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            patterns: DashMap::new(),
            tape: None,
        }
    }

    /// Wire in the tape tracker for the pressure boost.
    pub fn with_tape(mut self, tape: Arc<TapeTracker>) -> Self {
        self.tape = Some(tape);
        self
    }

    fn window(&self, symbol: &Symbol) -> Arc<RwLock<SymbolWindow>> {
        self.windows
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolWindow::default())))
            .clone()
    }

    /// Ingest a book update.
    pub fn on_book_update(
        &self,
        symbol: &Symbol,
        bid: Price,
        ask: Price,
        bid_qty: Size,
        ask_qty: Size,
        ts_ms: i64,
    ) {
        if !bid.is_positive() || !ask.is_positive() {
            return;
        }
        let mid = Price::mid(bid, ask).to_f64();
        if mid <= 0.0 {
            return;
        }
        let spread_bps = (ask.to_f64() - bid.to_f64()) / mid * 10_000.0;

        let window = self.window(symbol);
        let mut guard = window.write();
        if guard.snapshots.len() == SNAPSHOT_CAP {
            guard.snapshots.pop_front();
        }
        guard.snapshots.push_back(BookObservation {
            bid,
            ask,
            bid_qty: bid_qty.to_f64(),
            ask_qty: ask_qty.to_f64(),
            mid,
            spread_bps,
            ts_ms,
        });

        *guard.bid_levels.entry(bid.level_key()).or_insert(0) += 1;
        *guard.ask_levels.entry(ask.level_key()).or_insert(0) += 1;

        let cutoff = ts_ms - self.config.window_sec * 1_000;
        while guard.snapshots.front().is_some_and(|s| s.ts_ms < cutoff) {
            guard.snapshots.pop_front();
        }
    }

    /// Sample-count confidence: saturates at 50 snapshots, never
    /// decreases as samples are added.
    fn sample_confidence(count: usize) -> f64 {
        (count as f64 / 50.0).min(1.0)
    }

    /// Refresh-rate confidence: 1 inside the 0.5–5 Hz MM band,
    /// linearly scaled outside it.
    fn refresh_confidence(refresh_hz: f64) -> f64 {
        if (0.5..=5.0).contains(&refresh_hz) {
            1.0
        } else if refresh_hz < 0.5 {
            refresh_hz / 0.5
        } else {
            (1.0 - (refresh_hz - 5.0) / 10.0).max(0.0)
        }
    }

    fn boundary(levels: &HashMap<Decimal, u64>) -> (Option<Price>, f64) {
        let total: u64 = levels.values().sum();
        if total == 0 {
            return (None, 0.0);
        }
        let (price, max_count) = levels
            .iter()
            .max_by_key(|(_, &count)| count)
            .map(|(p, c)| (*p, *c))
            .expect("non-empty level map");
        (Some(Price::new(price)), max_count as f64 / total as f64)
    }

    fn refresh_rate(snapshots: &[BookObservation]) -> f64 {
        if snapshots.len() < 2 {
            return 0.0;
        }
        let changes = snapshots
            .windows(2)
            .filter(|w| w[0].bid != w[1].bid || w[0].ask != w[1].ask)
            .count();
        let span_sec =
            (snapshots[snapshots.len() - 1].ts_ms - snapshots[0].ts_ms).max(0) as f64 / 1_000.0;
        if span_sec <= 0.0 {
            return 0.0;
        }
        changes as f64 / span_sec
    }

    /// Run detection over the current window. `None` when the sample
    /// is too thin or the composite confidence misses the floor.
    pub fn detect_pattern(&self, symbol: &Symbol, now_ms: i64) -> Option<MmPattern> {
        let window = self.window(symbol);
        let guard = window.read();

        let cutoff = now_ms - self.config.window_sec * 1_000;
        let snapshots: Vec<BookObservation> = guard
            .snapshots
            .iter()
            .filter(|s| s.ts_ms >= cutoff)
            .copied()
            .collect();
        if snapshots.len() < self.config.min_samples {
            return None;
        }

        let (lower, lower_conf) = Self::boundary(&guard.bid_levels);
        let (upper, upper_conf) = Self::boundary(&guard.ask_levels);
        drop(guard);

        let n = snapshots.len() as f64;
        let avg_bid_qty = snapshots.iter().map(|s| s.bid_qty).sum::<f64>() / n;
        let avg_ask_qty = snapshots.iter().map(|s| s.ask_qty).sum::<f64>() / n;
        let avg_mid = snapshots.iter().map(|s| s.mid).sum::<f64>() / n;
        let avg_order_size_usd = (avg_bid_qty + avg_ask_qty) / 2.0 * avg_mid;

        let refresh_hz = Self::refresh_rate(&snapshots);
        let avg_spread_bps = snapshots.iter().map(|s| s.spread_bps).sum::<f64>() / n;

        let mut confidence = Self::sample_confidence(snapshots.len()) * 0.3
            + (lower_conf + upper_conf) / 2.0 * 0.5
            + Self::refresh_confidence(refresh_hz) * 0.2;

        // Tape pressure boost: aggressive buying and whale prints both
        // raise the odds that the clustered levels really are an MM.
        if let Some(tape) = &self.tape {
            let metrics = tape.metrics(symbol, now_ms);
            if metrics.total_trades > 5 {
                if metrics.buy_pressure > 0.65 {
                    confidence *= 1.0 + 0.2 * (metrics.buy_pressure - 0.5);
                }
                if metrics.large_trades > 0 {
                    confidence *= 1.05;
                }
            }
        }
        let confidence = confidence.clamp(0.0, 1.0);

        if confidence < self.config.min_confidence {
            trace!(%symbol, confidence, "pattern below confidence floor");
            return None;
        }

        let last = snapshots.last().expect("checked non-empty");
        let pattern = MmPattern {
            lower_bound: lower,
            upper_bound: upper,
            avg_order_size_usd,
            refresh_rate_hz: refresh_hz,
            avg_spread_bps,
            confidence,
            samples_count: snapshots.len(),
            best_entry: lower.or(Some(last.bid)),
            best_exit: upper.or(Some(last.ask)),
            safe_order_size_usd: avg_order_size_usd * 0.8,
            last_updated_ms: now_ms,
        };

        self.patterns.insert(symbol.clone(), pattern.clone());
        Some(pattern)
    }

    /// Cached pattern when fresh, otherwise a new detection pass.
    pub fn get_pattern(&self, symbol: &Symbol, now_ms: i64) -> Option<MmPattern> {
        if let Some(cached) = self.patterns.get(symbol) {
            if cached.age_ms(now_ms) < self.config.cache_ttl_sec * 1_000 {
                return Some(cached.clone());
            }
        }
        self.detect_pattern(symbol, now_ms)
    }

    /// Quick presence check.
    pub fn is_mm_detected(&self, symbol: &Symbol, now_ms: i64) -> bool {
        self.get_pattern(symbol, now_ms)
            .is_some_and(|p| p.confidence >= self.config.min_confidence)
    }

    /// Safe order size from the cached pattern, if any.
    pub fn safe_order_size(&self, symbol: &Symbol, now_ms: i64) -> Option<f64> {
        self.get_pattern(symbol, now_ms)
            .map(|p| p.safe_order_size_usd)
    }

    /// Emergency signal: `Some(reason)` when the previously detected
    /// MM is no longer posting consistent quotes.
    pub fn is_mm_gone(&self, symbol: &Symbol, spread_bps: f64, now_ms: i64) -> Option<String> {
        if spread_bps > MM_GONE_SPREAD_BPS {
            return Some(format!("spread:{spread_bps:.1}bps"));
        }
        let Some(pattern) = self.get_pattern(symbol, now_ms) else {
            return Some("no_pattern".to_string());
        };
        if pattern.confidence < MM_GONE_MIN_CONFIDENCE {
            return Some(format!("conf:{:.2}", pattern.confidence));
        }
        if pattern.avg_spread_bps > 0.0 && spread_bps > pattern.avg_spread_bps * 3.0 {
            return Some("3x_spread".to_string());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn detector() -> MmDetector {
        MmDetector::new(DetectorConfig::default())
    }

    fn feed(
        det: &MmDetector,
        sym: &Symbol,
        bid: rust_decimal::Decimal,
        ask: rust_decimal::Decimal,
        qty: rust_decimal::Decimal,
        ts_ms: i64,
    ) {
        det.on_book_update(
            sym,
            Price::new(bid),
            Price::new(ask),
            Size::new(qty),
            Size::new(qty),
            ts_ms,
        );
    }

    /// Clustered boundaries with a 1 Hz refresh: 30 snapshots, bid
    /// pinned to 10.00 in 20 of them, ask pinned to 10.05 in 25.
    fn feed_clustered(det: &MmDetector, sym: &Symbol) -> i64 {
        let mut ts = 0i64;
        for i in 0..30 {
            let bid = if i % 3 == 2 { dec!(9.99) } else { dec!(10.00) };
            let ask = if i % 6 == 5 { dec!(10.06) } else { dec!(10.05) };
            feed(det, sym, bid, ask, dec!(50), ts);
            ts += 1_000;
        }
        ts
    }

    #[test]
    fn test_insufficient_samples() {
        let det = detector();
        let sym = Symbol::new("TESTUSDT");
        for i in 0..10 {
            feed(&det, &sym, dec!(10.00), dec!(10.05), dec!(50), i * 1_000);
        }
        assert!(det.detect_pattern(&sym, 10_000).is_none());
    }

    #[test]
    fn test_pattern_boundaries_and_sizing() {
        let det = detector();
        let sym = Symbol::new("TESTUSDT");
        let now = feed_clustered(&det, &sym);

        let pattern = det.detect_pattern(&sym, now).expect("pattern detected");
        assert_eq!(pattern.lower_bound.unwrap().inner(), dec!(10.00));
        assert_eq!(pattern.upper_bound.unwrap().inner(), dec!(10.05));
        assert!(pattern.confidence >= 0.7, "confidence={}", pattern.confidence);
        assert_eq!(pattern.samples_count, 30);

        // avg_order_size_usd = mean(top qty) * mean(mid) with both top
        // sizes pinned at 50.
        let avg_mid = pattern.avg_order_size_usd / 50.0;
        assert!((avg_mid - 10.02).abs() < 0.02, "avg_mid={avg_mid}");
        // safe size = 0.8 * capacity
        assert!((pattern.safe_order_size_usd - pattern.avg_order_size_usd * 0.8).abs() < 1e-9);

        assert_eq!(pattern.best_entry, pattern.lower_bound);
        assert_eq!(pattern.best_exit, pattern.upper_bound);
    }

    #[test]
    fn test_confidence_in_unit_interval() {
        let det = detector();
        let sym = Symbol::new("TESTUSDT");
        let now = feed_clustered(&det, &sym);
        let pattern = det.detect_pattern(&sym, now).unwrap();
        assert!((0.0..=1.0).contains(&pattern.confidence));
    }

    #[test]
    fn test_sample_conf_monotonic() {
        let mut last = 0.0;
        for n in 0..200 {
            let conf = MmDetector::sample_confidence(n);
            assert!(conf >= last);
            assert!((0.0..=1.0).contains(&conf));
            last = conf;
        }
    }

    #[test]
    fn test_refresh_confidence_band() {
        assert_eq!(MmDetector::refresh_confidence(1.0), 1.0);
        assert_eq!(MmDetector::refresh_confidence(5.0), 1.0);
        assert!((MmDetector::refresh_confidence(0.25) - 0.5).abs() < 1e-9);
        assert!((MmDetector::refresh_confidence(10.0) - 0.5).abs() < 1e-9);
        assert_eq!(MmDetector::refresh_confidence(20.0), 0.0);
    }

    #[test]
    fn test_cache_ttl() {
        let det = detector();
        let sym = Symbol::new("TESTUSDT");
        let now = feed_clustered(&det, &sym);

        let first = det.get_pattern(&sym, now).unwrap();
        // Within the TTL the cached pattern comes back unchanged.
        let again = det.get_pattern(&sym, now + 30_000).unwrap();
        assert_eq!(first.last_updated_ms, again.last_updated_ms);

        // After the TTL the window has drifted out and detection
        // starts over.
        let later = det.get_pattern(&sym, now + 400_000);
        assert!(later.is_none());
    }

    /// Tight-spread variant (~5 bps) so the 3x-spread signal fires
    /// below the absolute 30 bps cutoff.
    fn feed_tight(det: &MmDetector, sym: &Symbol) -> i64 {
        let mut ts = 0i64;
        for i in 0..30 {
            let bid = if i % 3 == 2 { dec!(9.999) } else { dec!(10.000) };
            let ask = if i % 6 == 5 { dec!(10.006) } else { dec!(10.005) };
            feed(det, sym, bid, ask, dec!(50), ts);
            ts += 1_000;
        }
        ts
    }

    #[test]
    fn test_mm_gone_signals() {
        let det = detector();
        let sym = Symbol::new("TESTUSDT");

        // Wide spread trumps everything.
        assert_eq!(
            det.is_mm_gone(&sym, 31.0, 0).as_deref(),
            Some("spread:31.0bps")
        );

        // No pattern yet.
        assert_eq!(det.is_mm_gone(&sym, 5.0, 0).as_deref(), Some("no_pattern"));

        // Healthy pattern, sane spread.
        let now = feed_tight(&det, &sym);
        assert!(det.is_mm_gone(&sym, 5.0, now).is_none());

        // Spread 3x the pattern's typical spread but still under the
        // absolute cutoff.
        let pattern = det.get_pattern(&sym, now).unwrap();
        assert!(pattern.avg_spread_bps < 10.0);
        let wide = pattern.avg_spread_bps * 3.0 + 1.0;
        assert!(wide < MM_GONE_SPREAD_BPS);
        assert_eq!(det.is_mm_gone(&sym, wide, now).as_deref(), Some("3x_spread"));
    }

    #[test]
    fn test_zero_quotes_ignored() {
        let det = detector();
        let sym = Symbol::new("TESTUSDT");
        feed(&det, &sym, dec!(0), dec!(10), dec!(1), 0);
        feed(&det, &sym, dec!(10), dec!(0), dec!(1), 0);
        assert!(det.detect_pattern(&sym, 1_000).is_none());
    }
}
