//! Prometheus metrics.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration
//! failure means a duplicate metric name, which is a fatal build
//! error that should crash at startup rather than fail silently.
//! These panics only occur during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

/// WebSocket connection state (1 = streaming).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("spotmm_ws_connected", "WebSocket connection state (1=streaming)").unwrap()
});

/// Total WebSocket reconnections.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spotmm_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Market-data ticks by symbol and channel.
pub static TICKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spotmm_ticks_total",
        "Market data ticks received",
        &["symbol", "channel"]
    )
    .unwrap()
});

/// Envelope decode failures.
pub static DECODE_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spotmm_decode_errors_total",
        "Envelope or payload decode failures",
        &["stage"]
    )
    .unwrap()
});

/// Strategy entries by symbol.
pub static ENTRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("spotmm_entries_total", "Strategy entries", &["symbol"]).unwrap()
});

/// Strategy exits by symbol and reason.
pub static EXITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spotmm_exits_total",
        "Strategy exits",
        &["symbol", "reason"]
    )
    .unwrap()
});

/// Open position flag per symbol.
pub static OPEN_POSITIONS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "spotmm_open_positions",
        "Open position flag per symbol",
        &["symbol"]
    )
    .unwrap()
});

/// Running symbol loops.
pub static SYMBOLS_RUNNING: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("spotmm_symbols_running", "Number of running symbol loops").unwrap()
});

/// Per-trade PnL distribution in bps (absolute).
pub static TRADE_PNL_BPS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "spotmm_trade_pnl_bps",
        "Absolute per-trade PnL in basis points",
        &["symbol"],
        vec![0.5, 1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 25.0]
    )
    .unwrap()
});

/// Trade duration distribution in seconds.
pub static TRADE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "spotmm_trade_duration_seconds",
        "Trade holding time in seconds",
        &["symbol"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 40.0, 60.0, 120.0]
    )
    .unwrap()
});

/// Spread observed at entry, in bps.
pub static SPREAD_BPS_AT_ENTRY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "spotmm_spread_bps_at_entry",
        "Spread at entry in basis points",
        &["symbol"],
        vec![0.5, 1.0, 2.0, 3.0, 5.0, 8.0, 12.0, 20.0]
    )
    .unwrap()
});

/// Symbols that delivered a live quote in the last batch interval.
pub static LIVE_QUOTE_SYMBOLS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "spotmm_live_quote_symbols",
        "Symbols with a live quote in the last batch interval"
    )
    .unwrap()
});

/// Risk-gate denials by reason family.
pub static RISK_DENIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "spotmm_risk_denied_total",
        "Entries denied by the risk manager",
        &["symbol"]
    )
    .unwrap()
});
