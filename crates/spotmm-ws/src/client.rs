//! WebSocket client lifecycle.
//!
//! State machine: Disconnected → Connecting → Connected → Subscribing
//! → Streaming → Disconnected. The run loop reconnects forever with
//! jittered exponential backoff; `stop()` unsubscribes best-effort,
//! closes the socket and awaits the loop within a bounded timeout.

use crate::error::{WsError, WsResult};
use crate::heartbeat::Heartbeat;
use crate::message::{self, ControlMessage, WsRequest};
use crate::rate_limiter::SubscribePacer;
use crate::topics::TopicPolicy;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use spotmm_core::Symbol;
use spotmm_proto::{EnvelopeDecoder, MarketMessage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Streaming,
}

impl std::fmt::Display for WsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
        };
        f.write_str(s)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    pub url: String,
    pub symbols: Vec<Symbol>,
    /// Depth levels appended to depth topics.
    pub depth_levels: u32,
    /// Initial rate suffix for aggregated channels.
    pub rate_suffix: String,
    /// Subscription sends per second.
    pub subscribe_rate_per_sec: u32,
    pub ping_interval: Duration,
    /// Cycle the connection after this lifetime to stay ahead of
    /// exchange-side disconnects.
    pub max_lifetime: Duration,
    pub open_timeout: Duration,
    pub close_timeout: Duration,
    pub reconnect_floor: Duration,
    pub reconnect_ceil: Duration,
    /// Log every binary frame (hex head and length).
    pub verbose_frames: bool,
    /// Classify payloads on unrecognized channels by wire shape.
    pub enable_bruteforce: bool,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            url: "wss://wbs-api.mexc.com/ws".to_string(),
            symbols: Vec::new(),
            depth_levels: 10,
            rate_suffix: "@100ms".to_string(),
            subscribe_rate_per_sec: 8,
            ping_interval: Duration::from_secs(20),
            max_lifetime: Duration::from_secs(23 * 3600),
            open_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(2),
            reconnect_floor: Duration::from_millis(500),
            reconnect_ceil: Duration::from_secs(30),
            verbose_frames: false,
            enable_bruteforce: true,
        }
    }
}

/// WebSocket market-data client.
pub struct WsClient {
    config: WsClientConfig,
    state: Arc<RwLock<WsState>>,
    policy: Arc<RwLock<TopicPolicy>>,
    subscribed: Arc<RwLock<HashSet<String>>>,
    pacer: SubscribePacer,
    heartbeat: Heartbeat,
    decoder: EnvelopeDecoder,
    next_id: AtomicU64,
    out_tx: mpsc::Sender<MarketMessage>,
    stop: CancellationToken,
    reconnects: AtomicU64,
}

impl WsClient {
    pub fn new(config: WsClientConfig, out_tx: mpsc::Sender<MarketMessage>) -> Arc<Self> {
        Arc::new(Self {
            policy: Arc::new(RwLock::new(TopicPolicy::new(config.rate_suffix.clone()))),
            pacer: SubscribePacer::new(config.subscribe_rate_per_sec),
            heartbeat: Heartbeat::new(config.ping_interval),
            decoder: EnvelopeDecoder::new().with_bruteforce(config.enable_bruteforce),
            state: Arc::new(RwLock::new(WsState::Disconnected)),
            subscribed: Arc::new(RwLock::new(HashSet::new())),
            next_id: AtomicU64::new(1),
            out_tx,
            stop: CancellationToken::new(),
            reconnects: AtomicU64::new(0),
            config,
        })
    }

    pub fn state(&self) -> WsState {
        *self.state.read()
    }

    pub fn decoder_stats(&self) -> &spotmm_proto::DecodeStats {
        self.decoder.stats()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn the run loop on the current runtime.
    pub fn spawn(client: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { client.run().await })
    }

    /// Reconnect-forever loop. Exits only on `stop()`.
    pub async fn run(&self) {
        let mut attempt = 0u32;

        loop {
            if self.stop.is_cancelled() {
                break;
            }

            *self.state.write() = WsState::Connecting;
            match self.run_once().await {
                Ok(()) => {
                    // Lifetime cycle or server-side close: reconnect
                    // from the floor.
                    attempt = 0;
                }
                Err(WsError::Stopped) => break,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    error!(?e, attempt, "WebSocket session error");
                }
            }

            *self.state.write() = WsState::Disconnected;
            self.subscribed.write().clear();
            self.reconnects.fetch_add(1, Ordering::Relaxed);

            if self.stop.is_cancelled() {
                break;
            }

            let delay = self.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.stop.cancelled() => break,
            }
        }

        *self.state.write() = WsState::Disconnected;
        info!("WebSocket client stopped");
    }

    /// One connect → subscribe → stream session.
    async fn run_once(&self) -> WsResult<()> {
        info!(url = %self.config.url, "Connecting to WebSocket");

        let connect = connect_async(self.config.url.as_str());
        let (ws, _resp) = match tokio::time::timeout(self.config.open_timeout, connect).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(WsError::ConnectionFailed(format!(
                    "open timeout after {:?}",
                    self.config.open_timeout
                )))
            }
        };
        let (mut sink, mut source) = ws.split();

        *self.state.write() = WsState::Connected;
        self.heartbeat.reset();
        info!("WebSocket connected");

        *self.state.write() = WsState::Subscribing;
        self.subscribe_all(&mut sink).await?;

        *self.state.write() = WsState::Streaming;
        let result = self.listen(&mut sink, &mut source).await;

        // Leaving the session: try to close the transport cleanly.
        let _ = tokio::time::timeout(self.config.close_timeout, sink.send(Message::Close(None))).await;
        result
    }

    /// Send all topics with pacing; one request per topic so blocked
    /// shapes are attributable.
    async fn subscribe_all(&self, sink: &mut WsSink) -> WsResult<()> {
        let topics = {
            let policy = self.policy.read();
            policy.build_topics(&self.config.symbols, self.config.depth_levels)?
        };

        info!(count = topics.len(), "Subscribing to topics");
        for (i, topic) in topics.iter().enumerate() {
            self.pacer.pace().await;
            if self.stop.is_cancelled() {
                return Err(WsError::Stopped);
            }
            let req = WsRequest::subscribe(vec![topic.clone()], self.next_id());
            let text = serde_json::to_string(&req)?;
            sink.send(Message::Text(text.into())).await?;
            if (i + 1) % 10 == 0 || i + 1 == topics.len() {
                debug!(progress = format!("{}/{}", i + 1, topics.len()), "Subscription progress");
            }
        }
        Ok(())
    }

    /// Main receive loop with heartbeat and lifetime cycling.
    async fn listen(&self, sink: &mut WsSink, source: &mut WsSource) -> WsResult<()> {
        let started = Instant::now();

        loop {
            if self.stop.is_cancelled() {
                self.shutdown_session(sink).await;
                return Err(WsError::Stopped);
            }

            if started.elapsed() > self.config.max_lifetime {
                info!(
                    lifetime_s = started.elapsed().as_secs(),
                    "Max connection lifetime reached, cycling"
                );
                return Ok(());
            }

            if self.heartbeat.is_stale() {
                warn!(idle_s = self.heartbeat.idle().as_secs(), "No traffic, reconnecting");
                return Err(WsError::HeartbeatTimeout);
            }

            if self.heartbeat.should_ping() {
                let ping = WsRequest::ping(self.next_id());
                let text = serde_json::to_string(&ping)?;
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(?e, "Failed to send PING");
                    return Err(e.into());
                }
                self.heartbeat.record_ping();
                debug!("Sent application-level PING");
            }

            // Bounded recv so the heartbeat keeps running on a quiet
            // line.
            let msg = tokio::select! {
                m = tokio::time::timeout(Duration::from_secs(5), source.next()) => m,
                _ = self.stop.cancelled() => {
                    self.shutdown_session(sink).await;
                    return Err(WsError::Stopped);
                }
            };

            let msg = match msg {
                Err(_) => continue, // recv deadline, loop for heartbeat
                Ok(None) => {
                    warn!("WebSocket stream ended");
                    return Ok(());
                }
                Ok(Some(Err(e))) => {
                    error!(?e, "WebSocket read error");
                    return Err(e.into());
                }
                Ok(Some(Ok(m))) => m,
            };

            self.heartbeat.record_recv();

            match msg {
                Message::Binary(payload) => {
                    if self.config.verbose_frames {
                        debug!(
                            len = payload.len(),
                            head = %payload.iter().take(16).map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" "),
                            "WS binary frame"
                        );
                    }
                    for market_msg in self.decoder.decode(&payload) {
                        // Bounded forward; drop on a full channel to
                        // keep the stream fresh.
                        if let Err(e) = self.out_tx.try_send(market_msg) {
                            if matches!(e, mpsc::error::TrySendError::Closed(_)) {
                                warn!("Market message receiver dropped");
                                return Err(WsError::Stopped);
                            }
                        }
                    }
                }
                Message::Text(text) => self.handle_text(sink, &text).await?,
                Message::Ping(data) => {
                    sink.send(Message::Pong(data)).await?;
                }
                Message::Pong(_) => {}
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1000, "normal close".to_string()));
                    warn!(code, %reason, "WebSocket closed by server");
                    return Err(WsError::ConnectionClosed { code, reason });
                }
                _ => {}
            }
        }
    }

    /// Handle a JSON control frame, including the `Blocked!`
    /// downgrade ladder.
    async fn handle_text(&self, sink: &mut WsSink, text: &str) -> WsResult<()> {
        match message::classify(text) {
            ControlMessage::SubscribedOk { topic } => {
                self.policy.write().record_healthy();
                debug!(%topic, "Subscribed");
                self.subscribed.write().insert(topic);
            }
            ControlMessage::Blocked { msg } => {
                let count = self.policy.write().record_blocked();
                warn!(count, %msg, "Subscription Blocked! ack");
                self.downgrade_and_resubscribe(sink).await?;
            }
            ControlMessage::AckError { code, msg } => {
                error!(code, %msg, "ACK error");
            }
            ControlMessage::AckOther { msg } => {
                debug!(%msg, "ACK");
            }
            ControlMessage::Heartbeat | ControlMessage::Other => {}
        }
        Ok(())
    }

    /// Unsubscribe everything and re-subscribe under the downgraded
    /// policy.
    async fn downgrade_and_resubscribe(&self, sink: &mut WsSink) -> WsResult<()> {
        let blocked = self.policy.read().blocked_seen();
        warn!(
            drop_rate_suffix = blocked >= 1,
            drop_aggre = blocked >= 2,
            "Downgrading subscription policy"
        );

        self.unsubscribe_all(sink).await;
        self.subscribed.write().clear();
        tokio::time::sleep(Duration::from_millis(500)).await;
        *self.state.write() = WsState::Subscribing;
        self.subscribe_all(sink).await?;
        *self.state.write() = WsState::Streaming;
        Ok(())
    }

    /// Best-effort unsubscribe of everything we believe is active.
    async fn unsubscribe_all(&self, sink: &mut WsSink) {
        let topics: Vec<String> = self.subscribed.read().iter().cloned().collect();
        debug!(count = topics.len(), "Unsubscribing topics");
        for topic in topics {
            let req = WsRequest::unsubscribe(vec![topic], self.next_id());
            let Ok(text) = serde_json::to_string(&req) else { continue };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop path inside a live session: unsubscribe, close.
    async fn shutdown_session(&self, sink: &mut WsSink) {
        let _ = tokio::time::timeout(self.config.close_timeout, async {
            self.unsubscribe_all(sink).await;
            let _ = sink.send(Message::Close(None)).await;
        })
        .await;
    }

    /// Request shutdown and wait for the run loop (owned by the
    /// caller's join handle) to observe it.
    pub async fn stop(&self, handle: JoinHandle<()>) {
        self.stop.cancel();
        match tokio::time::timeout(self.config.close_timeout, handle).await {
            Ok(_) => info!("WebSocket loop joined"),
            Err(_) => warn!("WebSocket loop did not stop in time, dropping"),
        }
    }

    /// Exponential backoff from the floor to the ceiling, with 0–25%
    /// additive jitter. Clock-derived jitter keeps the crate free of
    /// an RNG dependency.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let floor = self.config.reconnect_floor.as_millis() as u64;
        let ceil = self.config.reconnect_ceil.as_millis() as u64;
        let exponent = attempt.saturating_sub(1).min(10);
        let base = floor.saturating_mul(1u64 << exponent).min(ceil);

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let jitter_frac = f64::from(nanos % 250) / 1_000.0; // 0–0.25
        let jitter = (base as f64 * jitter_frac) as u64;
        Duration::from_millis(base + jitter)
    }
}
