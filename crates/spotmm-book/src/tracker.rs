//! Per-symbol book state with subscriber fan-out.
//!
//! One writer per symbol (the WS frame handler or the REST poller),
//! any number of readers. Top-of-book and L2 snapshots are replaced
//! atomically under a per-symbol lock; derived quote values are
//! recomputed on every read.

use crate::rest::RestClient;
use dashmap::DashMap;
use parking_lot::RwLock;
use spotmm_core::{now_ms, DepthLevel, L2Book, Price, Quote, Size, Symbol, TopOfBook};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

/// Bound for the subscriber channel; overflow drops the oldest event
/// so the stream stays fresh.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Notification that a symbol's book changed.
#[derive(Debug, Clone)]
pub struct BookEvent {
    pub symbol: Symbol,
    pub ts_ms: i64,
}

#[derive(Debug, Default)]
struct BookEntry {
    top: Option<TopOfBook>,
    l2: L2Book,
}

type EntryRef = Arc<RwLock<BookEntry>>;

/// Process-wide book tracker.
pub struct BookTracker {
    books: DashMap<Symbol, EntryRef>,
    events: broadcast::Sender<BookEvent>,
    rest: Option<RestClient>,
}

impl BookTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            books: DashMap::new(),
            events,
            rest: None,
        }
    }

    /// Attach a REST client used to backfill missing L2 snapshots.
    pub fn with_rest(mut self, rest: RestClient) -> Self {
        self.rest = Some(rest);
        self
    }

    fn entry(&self, symbol: &Symbol) -> EntryRef {
        self.books
            .entry(symbol.clone())
            .or_insert_with(|| Arc::new(RwLock::new(BookEntry::default())))
            .clone()
    }

    /// Atomic replace of the top-of-book.
    ///
    /// Zero/zero updates are dropped at ingress; a symbol becomes
    /// visible only once a side is populated. `ts_ms` is clamped
    /// monotonic non-decreasing per symbol.
    pub fn update_book_ticker(
        &self,
        symbol: &Symbol,
        bid: Price,
        bid_qty: Size,
        ask: Price,
        ask_qty: Size,
        ts_ms: i64,
    ) {
        let top = TopOfBook::new(bid, bid_qty, ask, ask_qty, ts_ms);
        if !top.has_any_side() {
            trace!(%symbol, "dropping zero/zero book ticker");
            return;
        }

        let entry = self.entry(symbol);
        let event_ts;
        {
            let mut guard = entry.write();
            let prev_ts = guard.top.as_ref().map(|t| t.ts_ms).unwrap_or(0);
            let mut top = top;
            if top.ts_ms < prev_ts {
                top.ts_ms = prev_ts;
            }
            event_ts = top.ts_ms;
            guard.top = Some(top);
        }

        // Fan-out is lossy by design: a full broadcast ring overwrites
        // the oldest event.
        let _ = self.events.send(BookEvent {
            symbol: symbol.clone(),
            ts_ms: event_ts,
        });
    }

    /// Atomic replace of the L2 snapshot: filter positive, sort, keep
    /// the top `keep_levels`.
    pub fn update_partial_depth(
        &self,
        symbol: &Symbol,
        bids: Vec<DepthLevel>,
        asks: Vec<DepthLevel>,
        ts_ms: i64,
        keep_levels: usize,
    ) {
        let mut bids: Vec<DepthLevel> = bids
            .into_iter()
            .filter(|l| l.price.is_positive() && l.qty.is_positive())
            .collect();
        let mut asks: Vec<DepthLevel> = asks
            .into_iter()
            .filter(|l| l.price.is_positive() && l.qty.is_positive())
            .collect();
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        bids.truncate(keep_levels);
        asks.truncate(keep_levels);

        let entry = self.entry(symbol);
        {
            let mut guard = entry.write();
            guard.l2 = L2Book { bids, asks, ts_ms };
        }

        let _ = self.events.send(BookEvent {
            symbol: symbol.clone(),
            ts_ms,
        });
    }

    /// Derived snapshot for a symbol; the empty shape when unknown or
    /// not yet populated.
    pub fn get_quote(&self, symbol: &Symbol) -> Quote {
        let Some(entry) = self.books.get(symbol) else {
            return Quote::empty();
        };
        let guard = entry.read();
        let Some(top) = &guard.top else {
            return Quote::empty();
        };
        if !top.has_any_side() {
            return Quote::empty();
        }

        let mid = top.mid().unwrap_or(Price::ZERO);
        let spread_bps = top.spread_bps().unwrap_or(0.0);
        Quote {
            bid: top.bid,
            ask: top.ask,
            bid_qty: top.bid_qty,
            ask_qty: top.ask_qty,
            mid,
            spread_bps,
            ts_ms: top.ts_ms,
            bids: guard.l2.bids.clone(),
            asks: guard.l2.asks.clone(),
        }
    }

    /// Symbols with at least one populated side.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.books
            .iter()
            .filter(|e| e.value().read().top.as_ref().is_some_and(|t| t.has_any_side()))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Subscribe to update notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<BookEvent> {
        self.events.subscribe()
    }

    /// Coalesced quote stream: every `interval`, the most recent
    /// snapshot for each subscribed symbol. Snapshots missing L2 get a
    /// best-effort REST depth backfill first.
    pub fn stream_quote_batches(
        self: Arc<Self>,
        symbols: Vec<Symbol>,
        interval: Duration,
    ) -> mpsc::Receiver<Vec<(Symbol, Quote)>> {
        let (tx, rx) = mpsc::channel(8);
        let mut events = self.subscribe();
        let tracker = self;

        tokio::spawn(async move {
            // First batch lands one full interval in, not immediately.
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let mut batch = Vec::with_capacity(symbols.len());
                        for sym in &symbols {
                            let mut quote = tracker.get_quote(sym);
                            if quote.is_live() && !quote.has_depth() {
                                tracker.backfill_depth(sym).await;
                                quote = tracker.get_quote(sym);
                            }
                            if quote.is_live() {
                                batch.push((sym.clone(), quote));
                            }
                        }
                        if !batch.is_empty() && tx.send(batch).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("quote batch stream ended");
        });

        rx
    }

    /// Fetch L2 over REST and write it back. Best-effort.
    async fn backfill_depth(&self, symbol: &Symbol) {
        let Some(rest) = &self.rest else { return };
        match rest.fetch_depth(symbol, 10).await {
            Ok((bids, asks)) => {
                self.update_partial_depth(symbol, bids, asks, now_ms(), 10);
            }
            Err(e) => warn!(%symbol, ?e, "depth backfill failed"),
        }
    }
}

impl Default for BookTracker {
    fn default() -> Self {
        Self::new()
    }
}
