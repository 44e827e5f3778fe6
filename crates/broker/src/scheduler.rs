//! delivery scheduler: hold each accepted frame for its modeled delay,
//! then write it to the receiver
//!
//! One spawned task per accepted frame. The receiver's writer mutex
//! serializes the wire, so frames land in the order their delays elapse.
//! A write that errors or outlasts the timeout means the peer is gone.

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use log::{info, warn};
use tokio::time::{timeout, Instant};

use etherwave_medium::{DropReason, LinkBudget};

use crate::broker::Broker;
use crate::registry::NodeEntry;

pub(crate) struct Delivery {
    pub from: u64,
    pub to: u64,
    pub sf: u8,
    pub link: LinkBudget,
    pub line: String,
    pub entry: NodeEntry,
}

pub(crate) fn spawn_delivery(broker: Arc<Broker>, delivery: Delivery) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs_f64(delivery.link.delay_ms / 1000.0)).await;

        let result = {
            let mut writer = delivery.entry.writer.lock().await;
            timeout(broker.config().write_timeout, writer.send(delivery.line)).await
        };

        match result {
            Ok(Ok(())) => {
                broker
                    .history
                    .record_delivery(delivery.from, delivery.to, Instant::now());
                broker.note_delivered();
                broker.inflight.release(delivery.sf);
                info!(
                    "DELIVERED from={} to={} sf={} rssi={:.2} snr={:.2} delay_ms={:.2}",
                    delivery.from,
                    delivery.to,
                    delivery.sf,
                    delivery.link.rssi_dbm,
                    delivery.link.snr_db,
                    delivery.link.delay_ms
                );
            }
            _ => {
                broker.note_dropped();
                broker.inflight.release(delivery.sf);
                warn!(
                    "DROPPED from={} to={} sf={} rssi={:.2} snr={:.2} delay_ms={:.2} reason={}",
                    delivery.from,
                    delivery.to,
                    delivery.sf,
                    delivery.link.rssi_dbm,
                    delivery.link.snr_db,
                    delivery.link.delay_ms,
                    DropReason::PeerGone
                );
                // The stream is dead: evict the node and stop its reader.
                delivery.entry.cancel.cancel();
                broker.drop_node(delivery.to, delivery.entry.conn_id).await;
            }
        }
    });
}
