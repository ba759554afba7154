//! Topic grammar and the `Blocked!` downgrade ladder.
//!
//! Topics follow `spot@public.<channel>.v3.api.pb<rate>@<SYMBOL>` with
//! depth appending `@<levels>`. Some deployments refuse the aggregated
//! or rate-suffixed shapes with a `Blocked!` ack; each refusal steps
//! the policy down: first drop the rate suffix, then drop the `aggre`
//! prefix variant. A healthy ack resets the counter.

use crate::error::{WsError, WsResult};
use spotmm_core::Symbol;

/// Hard cap on topics per connection; beyond it the caller must shard.
pub const MAX_TOPICS_PER_CONN: usize = 30;

/// Subscribed channel families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    BookTicker,
    Deals,
    Depth,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::BookTicker, Channel::Deals, Channel::Depth];

    /// Channel path segment, honoring the aggre downgrade stage.
    fn path(&self, drop_aggre: bool) -> &'static str {
        match (self, drop_aggre) {
            (Channel::BookTicker, false) => "aggre.bookTicker",
            (Channel::BookTicker, true) => "bookTicker",
            (Channel::Deals, false) => "aggre.deals",
            (Channel::Deals, true) => "deals",
            // Partial depth has no aggre variant.
            (Channel::Depth, _) => "limit.depth",
        }
    }
}

/// Current subscription shape, stepped down on `Blocked!` acks.
#[derive(Debug, Clone)]
pub struct TopicPolicy {
    /// Rate suffix such as `@100ms` or `@500ms`; dropped at stage 1.
    rate_suffix: String,
    /// Consecutive `Blocked!` acks seen.
    blocked_seen: u32,
}

impl TopicPolicy {
    pub fn new(rate_suffix: impl Into<String>) -> Self {
        Self {
            rate_suffix: rate_suffix.into(),
            blocked_seen: 0,
        }
    }

    pub fn blocked_seen(&self) -> u32 {
        self.blocked_seen
    }

    /// Record a `Blocked!` ack. Returns the new count.
    pub fn record_blocked(&mut self) -> u32 {
        self.blocked_seen += 1;
        self.blocked_seen
    }

    /// A healthy ack clears the ladder.
    pub fn record_healthy(&mut self) {
        self.blocked_seen = 0;
    }

    fn effective_suffix(&self) -> &str {
        if self.blocked_seen >= 1 {
            ""
        } else {
            &self.rate_suffix
        }
    }

    fn drop_aggre(&self) -> bool {
        self.blocked_seen >= 2
    }

    /// Build the topic string for one channel and symbol.
    pub fn topic_for(&self, channel: Channel, symbol: &Symbol, depth_levels: u32) -> String {
        let base = format!(
            "spot@public.{}.v3.api.pb{}@{}",
            channel.path(self.drop_aggre()),
            self.effective_suffix(),
            symbol
        );
        match channel {
            Channel::Depth => format!("{base}@{depth_levels}"),
            _ => base,
        }
    }

    /// Enumerate all topics for a symbol set, enforcing the per-
    /// connection cap.
    pub fn build_topics(&self, symbols: &[Symbol], depth_levels: u32) -> WsResult<Vec<String>> {
        let mut topics = Vec::with_capacity(symbols.len() * Channel::ALL.len());
        for sym in symbols {
            for ch in Channel::ALL {
                topics.push(self.topic_for(ch, sym, depth_levels));
            }
        }
        if topics.len() > MAX_TOPICS_PER_CONN {
            return Err(WsError::ShardNeeded {
                count: topics.len(),
                max: MAX_TOPICS_PER_CONN,
            });
        }
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_rate_topics() {
        let policy = TopicPolicy::new("@100ms");
        let sym = Symbol::new("ETHUSDT");
        assert_eq!(
            policy.topic_for(Channel::BookTicker, &sym, 10),
            "spot@public.aggre.bookTicker.v3.api.pb@100ms@ETHUSDT"
        );
        assert_eq!(
            policy.topic_for(Channel::Depth, &sym, 10),
            "spot@public.limit.depth.v3.api.pb@100ms@ETHUSDT@10"
        );
    }

    #[test]
    fn test_first_downgrade_drops_rate() {
        let mut policy = TopicPolicy::new("@100ms");
        policy.record_blocked();
        let sym = Symbol::new("ETHUSDT");
        assert_eq!(
            policy.topic_for(Channel::Deals, &sym, 10),
            "spot@public.aggre.deals.v3.api.pb@ETHUSDT"
        );
    }

    #[test]
    fn test_second_downgrade_drops_aggre() {
        let mut policy = TopicPolicy::new("@100ms");
        policy.record_blocked();
        policy.record_blocked();
        let sym = Symbol::new("ETHUSDT");
        assert_eq!(
            policy.topic_for(Channel::BookTicker, &sym, 10),
            "spot@public.bookTicker.v3.api.pb@ETHUSDT"
        );
        // Depth never had an aggre variant.
        assert_eq!(
            policy.topic_for(Channel::Depth, &sym, 10),
            "spot@public.limit.depth.v3.api.pb@ETHUSDT@10"
        );
    }

    #[test]
    fn test_healthy_ack_resets() {
        let mut policy = TopicPolicy::new("@100ms");
        policy.record_blocked();
        policy.record_healthy();
        assert_eq!(policy.blocked_seen(), 0);
        let sym = Symbol::new("ETHUSDT");
        assert!(policy
            .topic_for(Channel::BookTicker, &sym, 10)
            .contains("@100ms"));
    }

    #[test]
    fn test_topic_cap() {
        let policy = TopicPolicy::new("@100ms");
        let symbols: Vec<Symbol> = (0..11).map(|i| Symbol::new(format!("SYM{i}USDT"))).collect();
        // 11 symbols * 3 channels = 33 > 30
        match policy.build_topics(&symbols, 10) {
            Err(WsError::ShardNeeded { count: 33, max: 30 }) => {}
            other => panic!("expected shard error, got {other:?}"),
        }

        let ok: Vec<Symbol> = (0..10).map(|i| Symbol::new(format!("SYM{i}USDT"))).collect();
        assert_eq!(policy.build_topics(&ok, 10).unwrap().len(), 30);
    }
}
