//! Send pacing for subscription requests.
//!
//! Sliding-window limiter: at most N sends per second, with a short
//! inter-message delay so a burst of topics does not trip exchange
//! flood protection.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding one-second window limiter.
pub struct SubscribePacer {
    max_per_sec: u32,
    timestamps: Mutex<VecDeque<Instant>>,
    /// Fixed delay between consecutive sends.
    inter_message_delay: Duration,
}

impl SubscribePacer {
    pub fn new(max_per_sec: u32) -> Self {
        let max_per_sec = max_per_sec.max(1);
        Self {
            max_per_sec,
            timestamps: Mutex::new(VecDeque::with_capacity(max_per_sec as usize)),
            inter_message_delay: Duration::from_millis(1_000 / u64::from(max_per_sec) / 2),
        }
    }

    fn cleanup(&self, now: Instant) {
        let cutoff = now - Duration::from_secs(1);
        let mut ts = self.timestamps.lock();
        while ts.front().is_some_and(|&t| t < cutoff) {
            ts.pop_front();
        }
    }

    fn can_send(&self) -> bool {
        let now = Instant::now();
        self.cleanup(now);
        self.timestamps.lock().len() < self.max_per_sec as usize
    }

    fn record_send(&self) {
        self.timestamps.lock().push_back(Instant::now());
    }

    /// Wait for a send slot, record it, then apply the inter-message
    /// delay.
    pub async fn pace(&self) {
        while !self.can_send() {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        self.record_send();
        tokio::time::sleep(self.inter_message_delay).await;
    }

    pub fn current_count(&self) -> usize {
        self.cleanup(Instant::now());
        self.timestamps.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_window() {
        let pacer = SubscribePacer::new(8);
        assert!(pacer.can_send());
        for _ in 0..8 {
            pacer.record_send();
        }
        assert!(!pacer.can_send());
        assert_eq!(pacer.current_count(), 8);
    }

    #[tokio::test]
    async fn test_pace_applies_delay() {
        let pacer = SubscribePacer::new(8);
        let start = Instant::now();
        pacer.pace().await;
        pacer.pace().await;
        // Two paced sends include two inter-message delays (62ms each
        // at 8/sec).
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
