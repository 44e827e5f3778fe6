//! per-pair loss streaks and per-receiver delivery times
//!
//! Backs the oracle's streak penalty and the 5 ms collision guard. The
//! guard only ever sees *successful* deliveries; drops never arm it.
//! Dashmap shards keep the read-modify-writes per key.

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Default)]
pub struct PairHistory {
    streaks: DashMap<(u64, u64), u32>,
    last_delivery: DashMap<u64, Instant>,
}

impl PairHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streak(&self, sender: u64, receiver: u64) -> u32 {
        self.streaks.get(&(sender, receiver)).map(|s| *s).unwrap_or(0)
    }

    /// Bump the pair's consecutive-loss count and return the new value.
    pub fn record_drop(&self, sender: u64, receiver: u64) -> u32 {
        let mut entry = self.streaks.entry((sender, receiver)).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn record_delivery(&self, sender: u64, receiver: u64, at: Instant) {
        self.streaks.insert((sender, receiver), 0);
        self.last_delivery.insert(receiver, at);
    }

    pub fn millis_since_delivery(&self, receiver: u64, now: Instant) -> Option<f64> {
        self.last_delivery
            .get(&receiver)
            .map(|at| now.duration_since(*at).as_secs_f64() * 1000.0)
    }

    /// Drop all state naming a departed node.
    pub fn forget(&self, node_id: u64) {
        self.streaks
            .retain(|(sender, receiver), _| *sender != node_id && *receiver != node_id);
        self.last_delivery.remove(&node_id);
    }
}
