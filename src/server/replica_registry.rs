use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

/// A connected replica: the sink half of its passive write pipe, and a
/// counter of ACKs observed since the most recent broadcast.
struct ReplicaSession {
    sink: mpsc::UnboundedSender<Bytes>,
    ack_counter: AtomicU64,
}

pub type ReplicaId = u64;

/// The set of connected replicas, keyed by a monotonic id assigned at
/// registration. `ack_counter` is atomic so that [`ReplicaRegistry::ack`]
/// never needs to hold the map lock across a `WAIT` command's poll loop —
/// only the brief lookup does.
#[derive(Default)]
pub struct ReplicaRegistry {
    sessions: Mutex<HashMap<ReplicaId, ReplicaSession>>,
    next_id: AtomicU64,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a new replica session with `ack_counter = 0` and returns its
    /// id.
    pub async fn add(&self, sink: mpsc::UnboundedSender<Bytes>) -> ReplicaId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().await.insert(
            id,
            ReplicaSession {
                sink,
                ack_counter: AtomicU64::new(0),
            },
        );
        id
    }

    /// Idempotent.
    pub async fn remove(&self, id: ReplicaId) {
        self.sessions.lock().await.remove(&id);
    }

    /// Writes `bytes` to every replica's sink, after resetting every
    /// replica's ack counter to 0. A write failure (the sink's receiver is
    /// gone) removes that replica without aborting the others.
    pub async fn broadcast(&self, bytes: Bytes) {
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values() {
            session.ack_counter.store(0, Ordering::SeqCst);
        }
        sessions.retain(|_, session| session.sink.send(bytes.clone()).is_ok());
    }

    pub async fn ack(&self, id: ReplicaId) {
        if let Some(session) = self.sessions.lock().await.get(&id) {
            session.ack_counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub async fn count_acked(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.ack_counter.load(Ordering::SeqCst) >= 1)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_counter_starts_at_zero_and_increments() {
        let registry = ReplicaRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.add(tx).await;
        assert_eq!(registry.count_acked().await, 0);
        registry.ack(id).await;
        assert_eq!(registry.count_acked().await, 1);
    }

    #[tokio::test]
    async fn broadcast_resets_ack_counters_to_zero() {
        let registry = ReplicaRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.add(tx).await;
        registry.ack(id).await;
        registry.ack(id).await;
        assert_eq!(registry.count_acked().await, 1);

        registry.broadcast(Bytes::from_static(b"*1\r\n$4\r\nPING\r\n")).await;
        assert_eq!(registry.count_acked().await, 0);
    }

    #[tokio::test]
    async fn failed_write_removes_only_that_replica() {
        let registry = ReplicaRegistry::new();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        drop(rx_dead);
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();

        registry.add(tx_dead).await;
        registry.add(tx_live).await;
        assert_eq!(registry.len().await, 2);

        registry.broadcast(Bytes::from_static(b"x")).await;
        assert_eq!(registry.len().await, 1);
        assert_eq!(rx_live.recv().await, Some(Bytes::from_static(b"x")));
    }
}
