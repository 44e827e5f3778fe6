//! node registry: who is connected and where they sit
//!
//! Reads vastly outnumber writes (every recipient resolution is a read),
//! so the map lives behind a read-preferring `RwLock`. Entries carry the
//! connection epoch so a stale task can never evict a newer registration
//! for the same id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};
use tokio_util::codec::{FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;

/// Write half of a node's connection. The mutex is the per-receiver
/// serialization point: whoever holds it owns the wire.
pub type NodeWriter = Arc<Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>>;

#[derive(Clone)]
pub struct NodeEntry {
    pub location: (f64, f64),
    pub writer: NodeWriter,
    /// Epoch of the connection that created this entry.
    pub conn_id: u64,
    /// Cancels the owning connection's reader task.
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<u64, NodeEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`, returning the displaced one
    /// so the caller can cancel its connection.
    pub async fn register(&self, id: u64, entry: NodeEntry) -> Option<NodeEntry> {
        self.inner.write().await.insert(id, entry)
    }

    pub async fn lookup(&self, id: u64) -> Option<NodeEntry> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Everyone except `id`, for broadcast fan-out. Sorted by node id so
    /// seeded runs consume RNG draws in a stable order.
    pub async fn list_except(&self, id: u64) -> Vec<(u64, NodeEntry)> {
        let mut peers: Vec<(u64, NodeEntry)> = self
            .inner
            .read()
            .await
            .iter()
            .filter(|(other, _)| **other != id)
            .map(|(other, entry)| (*other, entry.clone()))
            .collect();
        peers.sort_unstable_by_key(|(other, _)| *other);
        peers
    }

    /// Refresh the location, but only while `conn_id` still owns the entry.
    pub async fn update_location(&self, id: u64, conn_id: u64, location: (f64, f64)) -> bool {
        let mut map = self.inner.write().await;
        match map.get_mut(&id) {
            Some(entry) if entry.conn_id == conn_id => {
                entry.location = location;
                true
            }
            _ => false,
        }
    }

    /// Remove `id` if the entry still belongs to `conn_id`. Idempotent.
    pub async fn remove(&self, id: u64, conn_id: u64) -> bool {
        let mut map = self.inner.write().await;
        match map.get(&id) {
            Some(entry) if entry.conn_id == conn_id => {
                map.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
