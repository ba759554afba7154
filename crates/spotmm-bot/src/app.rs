//! Application assembly and lifecycle.
//!
//! Builds the three process singletons (book tracker, MM detector
//! with its enhanced companion, risk manager), wires the WS feed into
//! them, and runs the strategy engine until SIGINT/SIGTERM. Shutdown
//! stops symbol loops without flattening, stops the WS client, and
//! closes the outcome sink.

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::sink::JsonlOutcomeSink;
use spotmm_book::{BookTracker, EnhancedBookTracker, RestClient, TapeTracker};
use spotmm_core::{now_ms, OutcomeSink, Symbol};
use spotmm_detector::MmDetector;
use spotmm_executor::{PaperExecutor, PositionBook, PositionSizer, SmartExecutor};
use spotmm_proto::MarketMessage;
use spotmm_risk::RiskManager;
use spotmm_strategy::{EngineDeps, ScannerClient, StrategyEngine};
use spotmm_telemetry::metrics;
use spotmm_ws::{WsClient, WsClientConfig};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bound on the WS → router channel.
const MARKET_CHANNEL_CAPACITY: usize = 1_024;
/// Cadence of the coalesced quote batches driving depth refresh.
const QUOTE_BATCH_INTERVAL: Duration = Duration::from_secs(1);
/// Silence on the batch stream beyond this means no symbol is live.
const QUOTE_BATCH_STALL: Duration = Duration::from_secs(5);

pub struct Application {
    config: AppConfig,
    symbols: Vec<Symbol>,
    books: Arc<BookTracker>,
    tape: Arc<TapeTracker>,
    enhanced: Arc<EnhancedBookTracker>,
    engine: Arc<StrategyEngine>,
    ws: Arc<WsClient>,
    ws_rx: Option<mpsc::Receiver<MarketMessage>>,
    sink: Arc<JsonlOutcomeSink>,
}

impl Application {
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let symbols: Vec<Symbol> = config.symbols.iter().map(Symbol::new).collect();

        // Singletons.
        let rest = RestClient::new(
            config.rest.base_url.clone(),
            Duration::from_secs(config.rest.timeout_sec),
        )?;
        let books = Arc::new(BookTracker::new().with_rest(rest));
        let tape = Arc::new(TapeTracker::new());
        let enhanced = Arc::new(EnhancedBookTracker::new());
        let detector = Arc::new(
            MmDetector::new(config.detector.clone()).with_tape(Arc::clone(&tape)),
        );
        let risk = Arc::new(RiskManager::new(config.risk.clone()));

        // Execution stack (paper for both paper and demo modes).
        let positions = Arc::new(PositionBook::new());
        let exec = Arc::new(PaperExecutor::new(Arc::clone(&books), positions));
        let smart = Arc::new(SmartExecutor::new(Arc::clone(&detector)));

        let sink = Arc::new(JsonlOutcomeSink::open(&config.outcomes_path).await?);
        let sink_port: Arc<dyn OutcomeSink> = Arc::clone(&sink) as Arc<dyn OutcomeSink>;

        let scanner = config
            .scanner
            .as_ref()
            .and_then(|s| ScannerClient::new(s.base_url.clone()))
            .map(Arc::new);

        let engine = StrategyEngine::new(
            EngineDeps {
                exec,
                books: Arc::clone(&books),
                detector,
                enhanced: Arc::clone(&enhanced),
                risk,
                sizer: PositionSizer::new(),
                smart,
                scanner,
                outcome_sink: Some(sink_port),
                predictor: None,
            },
            config.strategy.clone(),
        );
        engine.set_blacklist(config.blacklist.iter().map(Symbol::new));

        // WS client feeding the router channel.
        let (ws_tx, ws_rx) = mpsc::channel(MARKET_CHANNEL_CAPACITY);
        let ws = WsClient::new(
            WsClientConfig {
                url: config.ws.url.clone(),
                symbols: symbols.clone(),
                depth_levels: config.ws.depth_levels,
                rate_suffix: config.ws.rate_suffix.clone(),
                subscribe_rate_per_sec: config.ws.subscribe_rate_limit_per_sec,
                ping_interval: Duration::from_secs(config.ws.ping_interval_sec),
                max_lifetime: Duration::from_secs(config.ws.max_lifetime_sec),
                open_timeout: Duration::from_secs(config.ws.open_timeout_sec),
                close_timeout: Duration::from_secs(config.ws.close_timeout_sec),
                verbose_frames: config.ws.verbose_frames,
                enable_bruteforce: config.ws.enable_bruteforce,
                ..Default::default()
            },
            ws_tx,
        );

        Ok(Self {
            config,
            symbols,
            books,
            tape,
            enhanced,
            engine,
            ws,
            ws_rx: Some(ws_rx),
            sink,
        })
    }

    /// Route decoded market messages into the book, tape and enhanced
    /// trackers. One writer per symbol entity, per the concurrency
    /// contract.
    fn spawn_router(&mut self) -> JoinHandle<()> {
        let mut rx = self.ws_rx.take().expect("router spawned once");
        let books = Arc::clone(&self.books);
        let tape = Arc::clone(&self.tape);
        let enhanced = Arc::clone(&self.enhanced);
        let keep_levels = self.config.ws.depth_levels as usize;

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    MarketMessage::BookTicker {
                        symbol,
                        bid,
                        bid_qty,
                        ask,
                        ask_qty,
                        ts_ms,
                    } => {
                        metrics::TICKS_TOTAL
                            .with_label_values(&[symbol.as_str(), "bookTicker"])
                            .inc();
                        books.update_book_ticker(&symbol, bid, bid_qty, ask, ask_qty, ts_ms);
                    }
                    MarketMessage::Deals { symbol, trades } => {
                        metrics::TICKS_TOTAL
                            .with_label_values(&[symbol.as_str(), "deals"])
                            .inc();
                        tape.on_trades(&symbol, &trades, now_ms());
                    }
                    MarketMessage::Depth {
                        symbol,
                        bids,
                        asks,
                        ts_ms,
                    } => {
                        metrics::TICKS_TOTAL
                            .with_label_values(&[symbol.as_str(), "depth"])
                            .inc();
                        enhanced.on_book_update(&symbol, &bids, &asks, ts_ms);
                        books.update_partial_depth(&symbol, bids, asks, ts_ms, keep_levels);
                    }
                }
            }
            info!("market router stopped");
        })
    }

    /// Drive the coalesced quote batches over the traded symbols.
    ///
    /// Consuming the stream is what keeps L2 fresh for every cache
    /// reader: a snapshot arriving without depth triggers the REST
    /// `/depth` backfill inside the tracker. The batches themselves
    /// feed the liveness watchdog.
    fn spawn_quote_monitor(&self) -> JoinHandle<()> {
        let mut batches = Arc::clone(&self.books)
            .stream_quote_batches(self.symbols.clone(), QUOTE_BATCH_INTERVAL);

        tokio::spawn(async move {
            let mut live: HashSet<Symbol> = HashSet::new();
            loop {
                match tokio::time::timeout(QUOTE_BATCH_STALL, batches.recv()).await {
                    Ok(Some(batch)) => {
                        let now_live: HashSet<Symbol> =
                            batch.iter().map(|(sym, _)| sym.clone()).collect();
                        for sym in live.difference(&now_live) {
                            warn!(symbol = %sym, "quote stream went quiet");
                        }
                        metrics::LIVE_QUOTE_SYMBOLS.set(now_live.len() as f64);
                        live = now_live;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        if !live.is_empty() {
                            warn!(
                                stalled_s = QUOTE_BATCH_STALL.as_secs(),
                                "no quote batches, all streams quiet"
                            );
                            live.clear();
                        }
                        metrics::LIVE_QUOTE_SYMBOLS.set(0.0);
                    }
                }
            }
            info!("quote monitor stopped");
        })
    }

    /// Run until SIGINT/SIGTERM, then shut down gracefully.
    pub async fn run(mut self) -> AppResult<()> {
        info!(
            provider = ?self.config.active_provider,
            mode = ?self.config.active_mode,
            symbols = self.symbols.len(),
            "starting spotmm"
        );

        let router = self.spawn_router();
        let quote_monitor = self.spawn_quote_monitor();
        let ws_handle = WsClient::spawn(Arc::clone(&self.ws));
        metrics::WS_CONNECTED.set(1.0);

        self.engine.start_symbols(&self.symbols).await;

        wait_for_shutdown().await;
        info!("shutdown signal received");

        // Stop order: symbol loops (no flatten), WS, persistence.
        self.engine.stop_all(false).await;
        self.ws.stop(ws_handle).await;
        metrics::WS_CONNECTED.set(0.0);
        router.abort();
        quote_monitor.abort();
        self.sink.close().await;

        info!("shutdown complete");
        Ok(())
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(?e, "SIGTERM handler unavailable, using ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
