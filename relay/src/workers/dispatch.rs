use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::concurrency::pause::PauseRx;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::dispatcher::Dispatcher;
use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::queue::EventShard;
use crate::relay_error;
use crate::types::{GroupId, ReplicationEvent, WorkerIndex};

/// Run-state of a single worker dispatcher.
///
/// Transitions are driven only by the lifecycle coordinator or by the worker
/// itself reporting failure. `Stopped` and `Failed` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WorkerRunState {
    /// Created but not yet started.
    Created,
    /// Draining its shard and dispatching.
    Running,
    /// Parked on a pause request; not mid-dispatch.
    Paused,
    /// Drain loop exited cleanly.
    Stopped,
    /// Drain loop exited with a failure; the cause is recorded on the handle.
    Failed,
}

impl fmt::Display for WorkerRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerRunState::Created => "created",
            WorkerRunState::Running => "running",
            WorkerRunState::Paused => "paused",
            WorkerRunState::Stopped => "stopped",
            WorkerRunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Internal state of [`DispatchWorkerState`].
#[derive(Debug)]
pub struct DispatchWorkerStateInner {
    /// Index of the worker whose state this structure tracks.
    worker_index: WorkerIndex,
    /// Current run-state, the authoritative in-memory state.
    run_state: WorkerRunState,
    /// Terminal failure cause, set at most once.
    failure: Option<RelayError>,
    /// Whether `close()` has been invoked on the owning handle.
    closed: bool,
    /// Notification mechanism for broadcasting state changes to waiters.
    state_change: Arc<Notify>,
}

impl DispatchWorkerStateInner {
    /// Updates the worker's run-state and notifies all waiting observers.
    ///
    /// Note that the notify will not wake up waiters arriving in the future since
    /// no permit is stored; only active listeners are notified.
    fn set(&mut self, run_state: WorkerRunState) {
        debug!(
            worker_index = self.worker_index,
            from_state = %self.run_state,
            to_state = %run_state,
            "worker run-state changing",
        );

        self.run_state = run_state;
        self.state_change.notify_waiters();
    }

    /// Records a terminal failure cause and transitions to `Failed`.
    ///
    /// The first cause wins; later calls keep the original cause but still
    /// notify waiters of the transition.
    fn set_failed(&mut self, cause: RelayError) {
        if self.failure.is_none() {
            self.failure = Some(cause);
        }
        self.set(WorkerRunState::Failed);
    }

    /// Marks the handle closed, forcing a terminal run-state if necessary.
    fn mark_closed(&mut self) {
        self.closed = true;
        if !matches!(
            self.run_state,
            WorkerRunState::Stopped | WorkerRunState::Failed
        ) {
            self.set(WorkerRunState::Stopped);
        } else {
            self.state_change.notify_waiters();
        }
    }

    /// Returns the current run-state.
    pub fn run_state(&self) -> WorkerRunState {
        self.run_state
    }

    /// Returns the terminal failure cause, if the worker failed.
    pub fn failure(&self) -> Option<RelayError> {
        self.failure.clone()
    }

    /// Returns whether `close()` was invoked on the owning handle.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Thread-safe, shareable view of one worker's run-state.
///
/// [`DispatchWorkerState`] is the coordinator's observation window into a worker:
/// it supports atomic reads, and blocking waits for specific run-states through
/// the worker's private notification, so one slow worker never hides another
/// worker's failure.
#[derive(Debug, Clone)]
pub struct DispatchWorkerState {
    inner: Arc<Mutex<DispatchWorkerStateInner>>,
}

impl DispatchWorkerState {
    fn new(worker_index: WorkerIndex) -> Self {
        let inner = DispatchWorkerStateInner {
            worker_index,
            run_state: WorkerRunState::Created,
            failure: None,
            closed: false,
            state_change: Arc::new(Notify::new()),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns the current run-state.
    pub async fn run_state(&self) -> WorkerRunState {
        self.inner.lock().await.run_state
    }

    /// Returns whether the worker is currently running.
    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.run_state == WorkerRunState::Running
    }

    /// Returns the terminal failure cause, if any.
    pub async fn failure(&self) -> Option<RelayError> {
        self.inner.lock().await.failure.clone()
    }

    /// Returns whether the owning handle was closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Waits until the worker reaches one of the given run-states.
    ///
    /// Returns the locked state so the caller can read the run-state and failure
    /// cause atomically with respect to further transitions.
    pub async fn wait_for_run_state(
        &self,
        run_states: &[WorkerRunState],
    ) -> MutexGuard<'_, DispatchWorkerStateInner> {
        loop {
            let inner = self.inner.lock().await;

            if run_states.contains(&inner.run_state) {
                return inner;
            }

            // We create the notified future while holding the lock to avoid the race
            // where the state changes between releasing the lock and subscribing, in
            // which case the notification would be missed and the wait would stall.
            let state_change = inner.state_change.clone();
            let state_changed = state_change.notified();

            // The lock must be dropped here so that state changes can actually happen.
            drop(inner);

            state_changed.await;
        }
    }

    async fn set(&self, run_state: WorkerRunState) {
        self.inner.lock().await.set(run_state);
    }

    async fn set_failed(&self, cause: RelayError) {
        self.inner.lock().await.set_failed(cause);
    }

    async fn mark_closed(&self) {
        self.inner.lock().await.mark_closed();
    }
}

/// A worker dispatcher that has not been started yet.
///
/// [`DispatchWorker`] owns one exclusive shard of the shared event source and the
/// dispatcher seam used to transmit its share of the stream. Created at group
/// construction time; consumed by [`DispatchWorker::spawn`] when the coordinator
/// starts the group.
#[derive(Debug)]
pub struct DispatchWorker<D> {
    group_id: GroupId,
    worker_index: WorkerIndex,
    batch_max_size: usize,
    dispatcher: D,
    shard: EventShard,
    state: DispatchWorkerState,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
    pause_rx: PauseRx,
}

impl<D> DispatchWorker<D> {
    /// Creates an unstarted worker bound to its exclusive shard.
    ///
    /// The shutdown subscription is taken here, before any task exists, so a stop
    /// signaled between construction and spawn is still observed.
    pub fn new(
        group_id: GroupId,
        worker_index: WorkerIndex,
        batch_max_size: usize,
        dispatcher: D,
        shard: EventShard,
        pause_rx: PauseRx,
    ) -> Self {
        let shutdown_tx = create_shutdown_channel();
        let shutdown_rx = shutdown_tx.subscribe();

        Self {
            group_id,
            worker_index,
            batch_max_size,
            dispatcher,
            shard,
            state: DispatchWorkerState::new(worker_index),
            shutdown_tx,
            shutdown_rx,
            pause_rx,
        }
    }

    /// Returns a shareable view of this worker's run-state.
    pub fn state(&self) -> DispatchWorkerState {
        self.state.clone()
    }

    /// Releases the resources of a worker that was never started.
    pub(crate) async fn close(mut self) {
        self.shard.close();
        self.state.mark_closed().await;
    }
}

impl<D> DispatchWorker<D>
where
    D: Dispatcher + Send + Sync + 'static,
{
    /// Starts the drain loop on its own task and returns the control handle.
    ///
    /// Spawning is asynchronous with respect to "fully running": callers observe
    /// readiness through the state handle, which transitions to `Running` once the
    /// dispatcher is open, or to `Failed` with the start-up cause.
    pub fn spawn(self) -> DispatchWorkerHandle {
        let worker_index = self.worker_index;
        let state = self.state.clone();
        let shutdown_tx = self.shutdown_tx.clone();

        let span = tracing::info_span!(
            "dispatch_worker",
            group_id = self.group_id,
            worker_index,
            dispatcher = D::name()
        );
        let join = tokio::spawn(self.run().instrument(span));

        DispatchWorkerHandle {
            worker_index,
            state,
            shutdown_tx,
            join: Arc::new(Mutex::new(Some(join))),
        }
    }

    async fn run(mut self) -> RelayResult<()> {
        info!("starting dispatch worker");

        // Start-up races against shutdown so a hung dispatcher open cannot make
        // the worker unjoinable during stop.
        let open_result = tokio::select! {
            biased;

            _ = self.shutdown_rx.changed() => {
                debug!("shutdown requested before start-up completed");
                self.state.set(WorkerRunState::Stopped).await;
                return Ok(());
            }

            result = self.dispatcher.open(self.worker_index) => result,
        };

        if let Err(err) = open_result {
            error!(error = %err, "dispatch worker failed during start-up");
            self.state.set_failed(err.clone()).await;
            return Err(err);
        }

        self.state.set(WorkerRunState::Running).await;

        let worker_index = self.worker_index;
        let batch_max_size = self.batch_max_size;
        let state = self.state;
        let dispatcher = self.dispatcher;
        let mut shard = self.shard;
        let mut shutdown_rx = self.shutdown_rx;
        let mut pause_rx = self.pause_rx;

        let mut buffer: Vec<ReplicationEvent> = Vec::new();
        let mut dispatch_failure: Option<RelayError> = None;

        loop {
            if *pause_rx.borrow() {
                debug!("dispatch worker parked");
                state.set(WorkerRunState::Paused).await;

                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => break,

                    result = pause_rx.wait_for(|paused| !*paused) => {
                        // A dropped pause channel means the group is gone.
                        if result.is_err() {
                            break;
                        }
                    }
                }

                state.set(WorkerRunState::Running).await;
                debug!("dispatch worker resumed");
                continue;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => break,

                result = pause_rx.changed() => {
                    if result.is_err() {
                        break;
                    }
                    // Loop around to re-evaluate the pause flag.
                }

                received = shard.recv_batch(&mut buffer, batch_max_size) => {
                    if received == 0 {
                        debug!("shard closed and drained, dispatch worker exiting");
                        break;
                    }

                    let events = std::mem::take(&mut buffer);
                    debug!(events = events.len(), "dispatching events");

                    if let Err(err) = dispatcher.dispatch(worker_index, events).await {
                        // The failure is contained to this worker; siblings keep
                        // dispatching their own partitions.
                        error!(error = %err, "dispatch failed, worker entering failed state");
                        dispatch_failure = Some(err);
                        break;
                    }
                }
            }
        }

        // Resources are released even when the data path failed.
        let close_result = dispatcher.close(worker_index).await;

        if let Some(err) = dispatch_failure {
            // The dispatch failure stays the worker's cause; a close failure on
            // this path is only logged.
            if let Err(close_err) = close_result {
                warn!(error = %close_err, "dispatcher close failed after dispatch failure");
            }

            state.set_failed(err.clone()).await;
            return Err(err);
        }

        if let Err(err) = close_result {
            warn!(error = %err, "dispatcher close failed");
            state.set_failed(err.clone()).await;
            return Err(err);
        }

        state.set(WorkerRunState::Stopped).await;
        info!("dispatch worker stopped");

        Ok(())
    }
}

/// Handle for observing and controlling a running worker dispatcher.
///
/// The handle is cheaply cloneable so the coordinator can fan stop requests out
/// across concurrent tasks. Exactly one caller joins the worker task; others
/// observe the outcome through the state handle.
#[derive(Debug, Clone)]
pub struct DispatchWorkerHandle {
    worker_index: WorkerIndex,
    state: DispatchWorkerState,
    shutdown_tx: ShutdownTx,
    join: Arc<Mutex<Option<JoinHandle<RelayResult<()>>>>>,
}

impl DispatchWorkerHandle {
    /// Returns the index of the worker this handle controls.
    pub fn worker_index(&self) -> WorkerIndex {
        self.worker_index
    }

    /// Returns a shareable view of the worker's run-state.
    pub fn state(&self) -> DispatchWorkerState {
        self.state.clone()
    }

    /// Returns whether the worker is currently running.
    pub async fn is_running(&self) -> bool {
        self.state.is_running().await
    }

    /// Returns the worker's terminal failure cause, if any.
    pub async fn failure(&self) -> Option<RelayError> {
        self.state.failure().await
    }

    /// Blocks until the worker has observed the pause request and parked.
    ///
    /// Terminal states also satisfy the wait, so pausing a group with an already
    /// dead worker cannot deadlock.
    pub async fn wait_until_paused(&self) {
        self.state
            .wait_for_run_state(&[
                WorkerRunState::Paused,
                WorkerRunState::Stopped,
                WorkerRunState::Failed,
            ])
            .await;
    }

    /// Requests graceful shutdown of the drain loop and waits for it to exit.
    ///
    /// Returns `Ok(true)` if the worker stopped cleanly, `Ok(false)` if its task
    /// was aborted or another caller already collected an unclean outcome, and an
    /// error when the drain loop itself failed to stop cleanly or panicked.
    pub async fn stop(&self) -> RelayResult<bool> {
        self.shutdown_tx.shutdown();

        let join = self.join.lock().await.take();
        let Some(join) = join else {
            // Another caller owns the join; observe the terminal state instead.
            let inner = self
                .state
                .wait_for_run_state(&[WorkerRunState::Stopped, WorkerRunState::Failed])
                .await;
            return Ok(inner.run_state() == WorkerRunState::Stopped);
        };

        match join.await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(err)) => Err(err),
            Err(join_err) if join_err.is_cancelled() => Ok(false),
            Err(join_err) => {
                let err = relay_error!(
                    ErrorKind::WorkerPanic,
                    "Dispatch worker panicked",
                    source: join_err
                );
                self.state.set_failed(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Releases all resources held by the worker; idempotent.
    ///
    /// A still-live task is aborted. The state handle remains valid after close
    /// for inspection.
    pub async fn close(&self) {
        if let Some(join) = self.join.lock().await.take() {
            join.abort();
        }

        self.state.mark_closed().await;
    }
}
