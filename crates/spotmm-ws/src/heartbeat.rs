//! Application-level heartbeat bookkeeping.
//!
//! The exchange expects a JSON PING when the line goes quiet. A ping
//! is due once nothing has been received for the ping interval and no
//! ping was sent inside the same window; total silence beyond the
//! stale threshold forces a reconnect.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub struct Heartbeat {
    ping_interval: Duration,
    /// Silence longer than this means the connection is dead.
    stale_after: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    last_recv: Instant,
    last_ping: Instant,
}

impl Heartbeat {
    pub fn new(ping_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            ping_interval,
            stale_after: ping_interval * 6,
            inner: Mutex::new(Inner {
                last_recv: now,
                last_ping: now.checked_sub(ping_interval).unwrap_or(now),
            }),
        }
    }

    pub fn reset(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.last_recv = now;
        inner.last_ping = now.checked_sub(self.ping_interval).unwrap_or(now);
    }

    pub fn record_recv(&self) {
        self.inner.lock().last_recv = Instant::now();
    }

    pub fn record_ping(&self) {
        self.inner.lock().last_ping = Instant::now();
    }

    /// A ping is due: idle past the interval and no ping sent within
    /// the same window.
    pub fn should_ping(&self) -> bool {
        let inner = self.inner.lock();
        inner.last_recv.elapsed() > self.ping_interval
            && inner.last_ping.elapsed() > self.ping_interval
    }

    /// Zero traffic for an extended period; the listen loop should
    /// exit and reconnect.
    pub fn is_stale(&self) -> bool {
        self.inner.lock().last_recv.elapsed() > self.stale_after
    }

    pub fn idle(&self) -> Duration {
        self.inner.lock().last_recv.elapsed()
    }
}
