//! The dispatcher group facade.
//!
//! [`DispatcherGroup`] is the single entry point callers use: enqueue fans one
//! event out to exactly one worker via the partition router, while lifecycle
//! calls broadcast across the whole worker set through the coordinator and fold
//! the individual outcomes into one aggregate result.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::bail;
use crate::concurrency::pause::create_pause_channel;
use crate::config::GroupConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::queue::{ShardTx, create_sharded_queue};
use crate::routing::route;
use crate::types::{ReplicationEvent, WorkerIndex};
use crate::workers::coordinator::{GroupRunState, LifecycleCoordinator};
use crate::workers::dispatch::{DispatchWorker, DispatchWorkerState};

/// A fixed-size group of worker dispatchers treated as one logical dispatcher.
///
/// The group is built with `worker_count` workers, each owning an exclusive shard
/// of the shared event source; the assignment of partitions to workers never
/// changes while the group is live. The dispatcher `D` is shared across workers
/// and must tolerate concurrent use by disjoint worker indexes.
#[derive(Debug)]
pub struct DispatcherGroup<D> {
    config: Arc<GroupConfig>,
    dispatcher: D,
    shard_txs: Vec<ShardTx>,
    coordinator: LifecycleCoordinator<D>,
}

impl<D> DispatcherGroup<D>
where
    D: Dispatcher + Clone + Send + Sync + 'static,
{
    /// Builds a group from a validated configuration and a dispatcher.
    ///
    /// Workers and their shards are created here, so events can be enqueued before
    /// `start()`; they accumulate in the shards until workers begin draining.
    pub fn new(config: GroupConfig, dispatcher: D) -> RelayResult<Self> {
        if let Err(err) = config.validate() {
            let detail = err.to_string();
            bail!(
                ErrorKind::ConfigError,
                "Invalid group configuration",
                detail,
                source: err
            );
        }

        info!(
            group_id = config.id,
            worker_count = config.worker_count,
            "creating dispatcher group"
        );

        let (shard_txs, shards) = create_sharded_queue(config.worker_count);
        let pause_tx = create_pause_channel();

        let workers = shards
            .into_iter()
            .enumerate()
            .map(|(worker_index, shard)| {
                DispatchWorker::new(
                    config.id,
                    worker_index,
                    config.batch.max_size,
                    dispatcher.clone(),
                    shard,
                    pause_tx.subscribe(),
                )
            })
            .collect();

        let coordinator = LifecycleCoordinator::new(
            config.id,
            config.start_timeout_ms.map(Duration::from_millis),
            pause_tx,
            workers,
        );

        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            shard_txs,
            coordinator,
        })
    }

    /// Routes an event to its assigned worker's shard.
    ///
    /// The event is delivered to exactly one worker; broadcasting would duplicate
    /// delivery and break per-partition ordering. Events for the same partition
    /// enqueued in order are drained by the same worker in that order.
    ///
    /// Fails with `RoutingFailed` when the event's partition is unresolved (the
    /// event is not enqueued anywhere, never silently dropped into worker 0), and
    /// with `InvalidState` once the group has been stopped.
    pub fn enqueue(&self, event: ReplicationEvent) -> RelayResult<()> {
        if self.coordinator.stop_requested() {
            bail!(
                ErrorKind::InvalidState,
                "Group is stopped",
                "events cannot be enqueued into a stopped group"
            );
        }

        let Some(partition) = event.partition else {
            bail!(
                ErrorKind::RoutingFailed,
                "Event partition is unresolved",
                "an event without a resolved partition cannot be routed"
            );
        };

        let worker_index = route(partition, self.config.worker_count);
        self.shard_txs[worker_index].push(event)
    }

    /// Starts all workers and waits until every one reports healthy or failed.
    ///
    /// Returning `Ok` means the group is fully running. Returning an error means
    /// at least one worker failed during start-up; the group is `Failed` and must
    /// be stopped or closed before building a replacement. Workers that started
    /// successfully keep running until then.
    pub async fn start(&self) -> RelayResult<()> {
        self.coordinator.start().await
    }

    /// Stops all workers concurrently and releases their resources; idempotent.
    pub async fn stop(&self) -> RelayResult<()> {
        self.coordinator.stop().await
    }

    /// Pauses dispatch; returns only after every worker has parked.
    pub async fn pause(&self) -> RelayResult<()> {
        self.coordinator.pause().await
    }

    /// Resumes dispatch; workers unpark independently.
    pub async fn resume(&self) -> RelayResult<()> {
        self.coordinator.resume().await
    }

    /// Returns whether every worker in the group is currently running.
    pub async fn is_running(&self) -> bool {
        self.coordinator.is_running().await
    }

    /// Stops the group and releases all resources; idempotent.
    pub async fn close(&self) -> RelayResult<()> {
        self.coordinator.stop().await
    }

    /// Returns the current aggregate run-state.
    pub async fn run_state(&self) -> GroupRunState {
        self.coordinator.run_state().await
    }

    /// Returns the per-worker state handles for introspection and testing.
    ///
    /// Read-only observation; run-state transitions are driven only by the
    /// coordinator and by workers reporting failure.
    pub fn worker_states(&self) -> &[DispatchWorkerState] {
        self.coordinator.worker_states()
    }

    /// Returns the dispatcher performing remote transmission, for diagnostics.
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Returns the per-worker stop failures recorded by the last stop.
    pub async fn stop_failures(&self) -> Vec<(WorkerIndex, RelayError)> {
        self.coordinator.stop_failures().await
    }

    /// Returns the number of workers in the group.
    pub fn worker_count(&self) -> u16 {
        self.config.worker_count
    }
}
