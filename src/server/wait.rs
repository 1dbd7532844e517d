use std::time::{Duration, Instant};

use super::replica_registry::ReplicaRegistry;
use super::value::RedisValue;

/// Broadcasts `REPLCONF GETACK *` to every replica, then polls
/// `count_acked()` at 10ms intervals until it reaches `n` or `timeout`
/// elapses. Returns the ack count observed — this may be less than `n` on
/// timeout, or more if additional acks land during the final poll.
pub async fn wait_for_acks(registry: &ReplicaRegistry, n: usize, timeout: Duration) -> usize {
    let getack = RedisValue::command(&[b"REPLCONF", b"GETACK", b"*"]).encode();
    registry.broadcast(getack).await;

    let deadline = Instant::now() + timeout;
    loop {
        let acked = registry.count_acked().await;
        if acked >= n || Instant::now() >= deadline {
            return acked;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn returns_once_threshold_met() {
        let registry = std::sync::Arc::new(ReplicaRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.add(tx).await;

        let registry_clone = registry.clone();
        tokio::spawn(async move {
            // simulate the replica's ACK arriving shortly after GETACK
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry_clone.ack(id).await;
        });

        let acked = wait_for_acks(&registry, 1, Duration::from_millis(500)).await;
        assert_eq!(acked, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn times_out_when_threshold_unmet() {
        let registry = ReplicaRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.add(tx).await;

        let start = Instant::now();
        let acked = wait_for_acks(&registry, 5, Duration::from_millis(50)).await;
        assert_eq!(acked, 0);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
