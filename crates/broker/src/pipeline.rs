//! per-connection frame pipeline
//!
//! One reader task per TCP connection. The first frame must be a
//! `register`; anything unparseable is logged and skipped without harming
//! the connection. Registration hands the write half to the registry and
//! can displace an older connection claiming the same node id.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

use etherwave_medium::DropReason;
use etherwave_proto::Frame;

use crate::broker::Broker;
use crate::registry::NodeEntry;

pub async fn handle_connection(broker: Arc<Broker>, stream: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, LinesCodec::new());
    let writer = Arc::new(Mutex::new(FramedWrite::new(write_half, LinesCodec::new())));
    let cancel = CancellationToken::new();
    let conn_id = broker.next_conn_id();
    let mut node_id: Option<u64> = None;

    loop {
        let line = tokio::select! {
            // A newer connection re-registered our id, or a delivery task
            // declared this peer gone.
            _ = cancel.cancelled() => break,
            next = reader.next() => match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!("read error from {}: {}", peer, e);
                    break;
                }
                None => break,
            },
        };

        match Frame::parse(&line) {
            Ok(Frame::Register { node_id: id, location }) => {
                if id == 0 {
                    warn!("discarding register with invalid node_id from {}", peer);
                    continue;
                }
                if node_id == Some(id) {
                    broker.registry.update_location(id, conn_id, location).await;
                    info!(
                        "REGISTER node={} location=({:.3},{:.3}) refreshed",
                        id, location.0, location.1
                    );
                    continue;
                }
                if let Some(previous) = node_id.take() {
                    // This connection changed identity; release the old id.
                    broker.drop_node(previous, conn_id).await;
                }
                let entry = NodeEntry {
                    location,
                    writer: writer.clone(),
                    conn_id,
                    cancel: cancel.clone(),
                };
                if let Some(displaced) = broker.registry.register(id, entry).await {
                    displaced.cancel.cancel();
                }
                node_id = Some(id);
                info!(
                    "REGISTER node={} location=({:.3},{:.3}) peer={}",
                    id, location.0, location.1, peer
                );
            }
            Ok(Frame::Tx { from, data, meta }) => {
                if node_id.is_none() {
                    broker.note_dropped();
                    warn!("DROPPED from={} reason={}", from, DropReason::Unregistered);
                    continue;
                }
                broker.process_tx(from, data, meta).await;
            }
            Ok(Frame::Rx { .. }) => {
                warn!("discarding unexpected rx frame from {}", peer);
            }
            Err(e) => {
                warn!("discarding malformed frame from {}: {}", peer, e);
            }
        }
    }

    match node_id {
        Some(id) => {
            broker.drop_node(id, conn_id).await;
        }
        None => debug!("connection {} closed before registering", peer),
    }
}
