//! Order Book Snapshot Publisher (§4.7): best-effort depth broadcast, never
//! blocking the matching engine. Capacity-1 channel, matching the "only the
//! latest view matters" semantics of a depth feed - a slow consumer just
//! misses intermediate snapshots instead of applying backpressure.

use crate::core_types::SymbolId;
use crate::orderbook::DepthSnapshot;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

pub const SNAPSHOT_CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Clone)]
pub struct SnapshotUpdate {
    pub symbol_id: SymbolId,
    pub snapshot: DepthSnapshot,
    pub ts: DateTime<Utc>,
}

pub type SnapshotSender = broadcast::Sender<SnapshotUpdate>;
pub type SnapshotReceiver = broadcast::Receiver<SnapshotUpdate>;

pub fn channel() -> (SnapshotSender, SnapshotReceiver) {
    broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY)
}

/// Drops the update silently if there are no subscribers or the channel is
/// momentarily full - the engine must never wait on a snapshot consumer.
pub fn publish(tx: &SnapshotSender, symbol_id: SymbolId, snapshot: DepthSnapshot) {
    let _ = tx.send(SnapshotUpdate {
        symbol_id,
        snapshot,
        ts: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let (tx, _rx) = channel();
        publish(&tx, 1, DepthSnapshot::default());
    }

    #[tokio::test]
    async fn subscriber_receives_latest_snapshot() {
        let (tx, mut rx) = channel();
        publish(&tx, 7, DepthSnapshot::default());
        let update = rx.recv().await.unwrap();
        assert_eq!(update.symbol_id, 7);
    }
}
