//! the broker: shared state plus the per-frame decision path

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use tokio::time::Instant;

use etherwave_medium::{compute_link, evaluate_drop, ChannelLoad, DropReason};
use etherwave_proto::{Frame, Route, TxMeta};

use crate::history::PairHistory;
use crate::inflight::InFlight;
use crate::registry::{NodeEntry, Registry};
use crate::rng::SharedRng;
use crate::scheduler::{self, Delivery};
use crate::BrokerConfig;

/// All broker state. One value, shared by reference with every reader and
/// delivery task; its locks and atomics define the access discipline.
pub struct Broker {
    config: BrokerConfig,
    pub(crate) registry: Registry,
    pub(crate) inflight: InFlight,
    pub(crate) history: PairHistory,
    pub(crate) rng: SharedRng,
    frames_seen: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    next_conn_id: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerStats {
    /// Accepted `tx` frames, counted once each before fan-out.
    pub frames_seen: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub in_flight: u64,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        let rng = SharedRng::new(config.rng_seed);
        Arc::new(Self {
            config,
            registry: Registry::new(),
            inflight: InFlight::new(),
            history: PairHistory::new(),
            rng,
            frames_seen: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            frames_seen: self.frames_seen.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            in_flight: self.inflight.active(),
        }
    }

    pub async fn node_count(&self) -> usize {
        self.registry.len().await
    }

    /// Current consecutive-loss count for a sender/receiver pair.
    pub fn pair_streak(&self, sender: u64, receiver: u64) -> u32 {
        self.history.streak(sender, receiver)
    }

    pub(crate) fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn note_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a node and its pair history, if `conn_id` still owns it.
    pub(crate) async fn drop_node(&self, id: u64, conn_id: u64) -> bool {
        if self.registry.remove(id, conn_id).await {
            self.history.forget(id);
            log::info!("DISCONNECT node={}", id);
            true
        } else {
            false
        }
    }

    /// Route one accepted `tx` frame: resolve recipients, run the channel
    /// model per link, and hand survivors to the delivery scheduler.
    pub async fn process_tx(self: &Arc<Self>, from: u64, data: String, meta: TxMeta) {
        let Some(sender) = self.registry.lookup(from).await else {
            self.note_dropped();
            warn!("DROPPED from={} reason={}", from, DropReason::Unregistered);
            return;
        };
        self.frames_seen.fetch_add(1, Ordering::Relaxed);

        let params = meta.resolve(data.len());
        let recipients: Vec<(u64, NodeEntry)> = match meta.route() {
            Route::Unicast(to) => match self.registry.lookup(to).await {
                Some(entry) => vec![(to, entry)],
                None => {
                    self.note_dropped();
                    warn!("DROPPED from={} to={} reason={}", from, to, DropReason::NoRoute);
                    return;
                }
            },
            Route::Broadcast => self.registry.list_except(from).await,
        };

        for (to, entry) in recipients {
            let link = self
                .rng
                .with(|rng| compute_link(&params, sender.location, entry.location, rng));

            self.inflight.acquire(params.sf);
            let load = ChannelLoad {
                active: self.inflight.active(),
                max_inflight: self.config.max_inflight,
                loss_streak: self.history.streak(from, to),
                concurrent_same_sf: self.inflight.concurrent(params.sf),
                millis_since_last_delivery: self
                    .history
                    .millis_since_delivery(to, Instant::now()),
            };
            let verdict = self.rng.with(|rng| evaluate_drop(&link, params.sf, &load, rng));

            if let Some(reason) = verdict {
                let streak = self.history.record_drop(from, to);
                self.note_dropped();
                self.inflight.release(params.sf);
                warn!(
                    "DROPPED from={} to={} sf={} rssi={:.2} snr={:.2} delay_ms={:.2} reason={} streak={}",
                    from, to, params.sf, link.rssi_dbm, link.snr_db, link.delay_ms, reason, streak
                );
                continue;
            }

            let line = Frame::rx(data.clone(), link.rssi_dbm, link.snr_db, from, &meta).to_line();
            scheduler::spawn_delivery(
                self.clone(),
                Delivery { from, to, sf: params.sf, link, line, entry },
            );
        }
    }
}
