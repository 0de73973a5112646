//! The remote transmission seam.

use std::future::Future;

use crate::error::RelayResult;
use crate::types::{ReplicationEvent, WorkerIndex};

/// Trait for the engine that transmits events to the remote site.
///
/// [`Dispatcher`] implementations define how a worker's share of the event stream
/// is serialized and delivered. The relay guarantees that `dispatch` calls for one
/// `worker_index` are sequential and carry events in per-partition commit order;
/// calls for different worker indexes run concurrently, so implementations must
/// tolerate concurrent use by disjoint workers.
///
/// Connection management, the wire protocol, and remote-side conflict resolution
/// are entirely the implementation's concern.
pub trait Dispatcher {
    /// Returns the name of the dispatcher, used in logs.
    fn name() -> &'static str;

    /// Prepares per-worker transmission resources.
    ///
    /// Called once by each worker during start-up, before any dispatch. An error
    /// here is that worker's start-up failure and fails the whole group start.
    /// The default implementation is a no-op.
    fn open(&self, _worker_index: WorkerIndex) -> impl Future<Output = RelayResult<()>> + Send {
        async { Ok(()) }
    }

    /// Transmits a batch of events drained by one worker.
    ///
    /// Events are provided in the order the worker drained them from its shard,
    /// which is commit order within each partition. Implementations must preserve
    /// that order on the remote side.
    fn dispatch(
        &self,
        worker_index: WorkerIndex,
        events: Vec<ReplicationEvent>,
    ) -> impl Future<Output = RelayResult<()>> + Send;

    /// Releases per-worker transmission resources.
    ///
    /// Called once by each worker when its drain loop exits. An error here is
    /// reported as that worker's stop failure but never blocks sibling workers.
    /// The default implementation is a no-op.
    fn close(&self, _worker_index: WorkerIndex) -> impl Future<Output = RelayResult<()>> + Send {
        async { Ok(()) }
    }
}
