//! Partition-sharded event queue.
//!
//! The relay presents one logical event queue to producers, but physically the
//! queue is sharded per worker: each worker owns an exclusive FIFO shard holding
//! only the partitions assigned to it. Workers never touch each other's shard,
//! which removes the need for cross-worker locking on the hot path.
//!
//! Intra-partition FIFO is a contract of this layer: once routing has placed two
//! events for the same partition into a shard in enqueue order, the shard delivers
//! them to the draining worker in that order.

use tokio::sync::mpsc;

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;
use crate::types::ReplicationEvent;

/// Producer side of one worker's shard.
#[derive(Debug, Clone)]
pub struct ShardTx {
    tx: mpsc::UnboundedSender<ReplicationEvent>,
}

impl ShardTx {
    /// Appends an event to the shard in FIFO order.
    ///
    /// Fails with [`ErrorKind::QueueClosed`] if the owning worker has been closed
    /// and its shard torn down.
    pub fn push(&self, event: ReplicationEvent) -> RelayResult<()> {
        self.tx
            .send(event)
            .map_err(|_| relay_error!(ErrorKind::QueueClosed, "Worker shard is closed"))
    }
}

/// Consumer side of one worker's shard, owned exclusively by that worker.
#[derive(Debug)]
pub struct EventShard {
    rx: mpsc::UnboundedReceiver<ReplicationEvent>,
}

impl EventShard {
    /// Receives up to `limit` buffered events, waiting for at least one.
    ///
    /// Returns the number of events appended to `buffer`. A return of zero means
    /// all producer handles were dropped and the shard is drained.
    pub async fn recv_batch(
        &mut self,
        buffer: &mut Vec<ReplicationEvent>,
        limit: usize,
    ) -> usize {
        self.rx.recv_many(buffer, limit).await
    }

    /// Closes the shard, preventing further pushes.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Creates the sharded queue for a group of `worker_count` workers.
///
/// Returns one `(ShardTx, EventShard)` pair per worker. The sender halves are kept
/// by the group facade for routing; each receiver half is handed to exactly one
/// worker.
pub fn create_sharded_queue(worker_count: u16) -> (Vec<ShardTx>, Vec<EventShard>) {
    let mut senders = Vec::with_capacity(worker_count as usize);
    let mut shards = Vec::with_capacity(worker_count as usize);

    for _ in 0..worker_count {
        let (tx, rx) = mpsc::unbounded_channel();
        senders.push(ShardTx { tx });
        shards.push(EventShard { rx });
    }

    (senders, shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartitionKey, ReplicationEvent};

    #[tokio::test]
    async fn shard_preserves_fifo_order() {
        let (senders, mut shards) = create_sharded_queue(1);

        for i in 0..10u8 {
            senders[0]
                .push(ReplicationEvent::new(PartitionKey(1), vec![i]))
                .unwrap();
        }

        let mut buffer = Vec::new();
        let received = shards[0].recv_batch(&mut buffer, 100).await;
        assert_eq!(received, 10);
        for (i, event) in buffer.iter().enumerate() {
            assert_eq!(event.payload.as_ref(), &[i as u8]);
        }
    }

    #[tokio::test]
    async fn push_fails_after_close() {
        let (senders, mut shards) = create_sharded_queue(1);
        shards[0].close();

        let result = senders[0].push(ReplicationEvent::new(PartitionKey(0), "x"));
        assert_eq!(result.unwrap_err().kind(), crate::error::ErrorKind::QueueClosed);
    }

    #[tokio::test]
    async fn recv_batch_respects_limit() {
        let (senders, mut shards) = create_sharded_queue(1);

        for i in 0..5u8 {
            senders[0]
                .push(ReplicationEvent::new(PartitionKey(0), vec![i]))
                .unwrap();
        }

        let mut buffer = Vec::new();
        let received = shards[0].recv_batch(&mut buffer, 2).await;
        assert_eq!(received, 2);
    }
}
