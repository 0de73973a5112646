use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::dispatcher::Dispatcher;
use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;
use crate::types::{ReplicationEvent, WorkerIndex};

#[derive(Debug, Default)]
struct Inner {
    dispatched: Vec<(WorkerIndex, ReplicationEvent)>,
    opened: HashSet<WorkerIndex>,
    closed: HashSet<WorkerIndex>,
    fail_open: HashSet<WorkerIndex>,
    hang_open: HashSet<WorkerIndex>,
    fail_dispatch: HashSet<WorkerIndex>,
    fail_close: HashSet<WorkerIndex>,
    dispatched_waiters: Vec<(usize, Arc<Notify>)>,
}

/// In-memory dispatcher for testing dispatcher groups.
///
/// [`MemoryDispatcher`] records every dispatched event together with the worker
/// index that delivered it, which is enough to assert both routing decisions and
/// per-partition ordering. Faults can be injected per worker index to exercise
/// start-up failures, dispatch failures, and unclean stops.
#[derive(Debug, Clone, Default)]
pub struct MemoryDispatcher {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDispatcher {
    /// Creates a new empty memory dispatcher with no injected faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open` fail for the given worker index, simulating a worker that
    /// fails during start-up.
    pub async fn fail_open_for(&self, worker_index: WorkerIndex) {
        self.inner.lock().await.fail_open.insert(worker_index);
    }

    /// Makes `open` hang forever for the given worker index, simulating a worker
    /// stuck in start-up.
    pub async fn hang_open_for(&self, worker_index: WorkerIndex) {
        self.inner.lock().await.hang_open.insert(worker_index);
    }

    /// Makes `dispatch` fail for the given worker index.
    pub async fn fail_dispatch_for(&self, worker_index: WorkerIndex) {
        self.inner.lock().await.fail_dispatch.insert(worker_index);
    }

    /// Makes `close` fail for the given worker index, simulating a worker that
    /// does not stop cleanly.
    pub async fn fail_close_for(&self, worker_index: WorkerIndex) {
        self.inner.lock().await.fail_close.insert(worker_index);
    }

    /// Returns all dispatched events in delivery order, tagged with the worker
    /// that delivered them.
    pub async fn dispatched(&self) -> Vec<(WorkerIndex, ReplicationEvent)> {
        self.inner.lock().await.dispatched.clone()
    }

    /// Returns the payloads delivered by one worker, in delivery order.
    pub async fn payloads_for_worker(&self, worker_index: WorkerIndex) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .await
            .dispatched
            .iter()
            .filter(|(index, _)| *index == worker_index)
            .map(|(_, event)| event.payload.to_vec())
            .collect()
    }

    /// Returns the payloads delivered per partition, in delivery order.
    pub async fn payloads_per_partition(&self) -> HashMap<u64, Vec<Vec<u8>>> {
        let inner = self.inner.lock().await;

        let mut per_partition: HashMap<u64, Vec<Vec<u8>>> = HashMap::new();
        for (_, event) in &inner.dispatched {
            if let Some(partition) = event.partition {
                per_partition
                    .entry(partition.0)
                    .or_default()
                    .push(event.payload.to_vec());
            }
        }

        per_partition
    }

    /// Returns the worker indexes for which `open` was invoked.
    pub async fn opened_workers(&self) -> HashSet<WorkerIndex> {
        self.inner.lock().await.opened.clone()
    }

    /// Returns the worker indexes for which `close` was invoked.
    pub async fn closed_workers(&self) -> HashSet<WorkerIndex> {
        self.inner.lock().await.closed.clone()
    }

    /// Returns a notify that fires once at least `count` events were dispatched.
    ///
    /// If the count is already reached, the notify is pre-armed so awaiting it
    /// returns immediately.
    pub async fn wait_for_dispatched_count(&self, count: usize) -> Arc<Notify> {
        let mut inner = self.inner.lock().await;

        let notify = Arc::new(Notify::new());
        if inner.dispatched.len() >= count {
            notify.notify_one();
        } else {
            inner.dispatched_waiters.push((count, notify.clone()));
        }

        notify
    }
}

impl Dispatcher for MemoryDispatcher {
    fn name() -> &'static str {
        "memory"
    }

    async fn open(&self, worker_index: WorkerIndex) -> RelayResult<()> {
        let hang = {
            let mut inner = self.inner.lock().await;
            inner.opened.insert(worker_index);
            inner.hang_open.contains(&worker_index)
        };

        if hang {
            std::future::pending::<()>().await;
        }

        let inner = self.inner.lock().await;
        if inner.fail_open.contains(&worker_index) {
            return Err(relay_error!(
                ErrorKind::WorkerStartFailed,
                "Injected start-up failure",
                format!("worker {worker_index} was configured to fail on open")
            ));
        }

        Ok(())
    }

    async fn dispatch(
        &self,
        worker_index: WorkerIndex,
        events: Vec<ReplicationEvent>,
    ) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.fail_dispatch.contains(&worker_index) {
            return Err(relay_error!(
                ErrorKind::DispatchFailed,
                "Injected dispatch failure",
                format!("worker {worker_index} was configured to fail on dispatch")
            ));
        }

        inner
            .dispatched
            .extend(events.into_iter().map(|event| (worker_index, event)));

        let dispatched = inner.dispatched.len();
        inner.dispatched_waiters.retain(|(target, notify)| {
            if dispatched >= *target {
                notify.notify_one();
                false
            } else {
                true
            }
        });

        Ok(())
    }

    async fn close(&self, worker_index: WorkerIndex) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;
        inner.closed.insert(worker_index);

        if inner.fail_close.contains(&worker_index) {
            return Err(relay_error!(
                ErrorKind::WorkerStopFailed,
                "Injected stop failure",
                format!("worker {worker_index} was configured to fail on close")
            ));
        }

        Ok(())
    }
}
