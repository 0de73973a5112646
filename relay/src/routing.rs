//! Partition-to-worker assignment.
//!
//! Routing is the only piece of the relay that decides which worker handles an
//! event, and it is deliberately a pure function: assignment must stay total,
//! deterministic, and immutable for the lifetime of a group, because changing it
//! mid-stream would reorder or duplicate delivery for a partition.

use crate::types::{PartitionKey, WorkerIndex};

/// Maps a partition key to a worker index.
///
/// Computed as `key mod worker_count`. All events for a given partition land on
/// the same worker, and a single worker drains its assigned partitions strictly
/// in arrival order, which together yield per-partition ordering under parallel
/// dispatch.
///
/// `worker_count` is validated to be non-zero at group construction, so this
/// function does not re-check it.
pub fn route(partition: PartitionKey, worker_count: u16) -> WorkerIndex {
    (partition.0 % worker_count as u64) as WorkerIndex
}
