use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bail;
use crate::concurrency::pause::PauseTx;
use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::relay_error;
use crate::types::{GroupId, WorkerIndex};
use crate::workers::dispatch::{
    DispatchWorker, DispatchWorkerHandle, DispatchWorkerState, WorkerRunState,
};

/// Aggregate run-state of a dispatcher group.
///
/// `Created → Starting → Running`, `Running ⇄ Paused`, any state `→ Stopped`,
/// `Starting → Failed`. `Stopped` and `Failed` are terminal; a failed group must
/// be stopped and a new group built before dispatch can continue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GroupRunState {
    Created,
    Starting,
    Running,
    Paused,
    Stopped,
    Failed,
}

impl fmt::Display for GroupRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupRunState::Created => "created",
            GroupRunState::Starting => "starting",
            GroupRunState::Running => "running",
            GroupRunState::Paused => "paused",
            GroupRunState::Stopped => "stopped",
            GroupRunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Mutable coordinator state, guarded by the single coordination lock.
#[derive(Debug)]
struct CoordinatorInner<D> {
    run_state: GroupRunState,
    /// Workers built at group construction, drained when the group starts.
    pending: Vec<DispatchWorker<D>>,
    /// Handles of started workers.
    handles: Vec<DispatchWorkerHandle>,
    /// The aggregate start-up failure, if the group failed to start.
    start_failure: Option<RelayError>,
    /// Per-worker stop failures, swallowed during stop and retained here so they
    /// can be asserted on without scraping logs.
    stop_failures: Vec<(WorkerIndex, RelayError)>,
}

/// Orchestrates the lifecycle of all worker dispatchers as one logical unit.
///
/// [`LifecycleCoordinator`] owns the start-up barrier, the concurrent stop
/// protocol, the pause barrier, and the aggregate group run-state. All lifecycle
/// operations serialize on one coordination lock; per-worker waits go through
/// each worker's private state notification, never a single undifferentiated
/// broadcast.
#[derive(Debug)]
pub struct LifecycleCoordinator<D> {
    group_id: GroupId,
    start_timeout: Option<Duration>,
    pause_tx: PauseTx,
    /// Set before any worker is touched during stop, so interleaved enqueues are
    /// rejected without taking the coordination lock on the hot path.
    stop_requested: Arc<AtomicBool>,
    /// Immutable observation snapshot, available without the coordination lock.
    worker_states: Vec<DispatchWorkerState>,
    inner: Mutex<CoordinatorInner<D>>,
}

impl<D> LifecycleCoordinator<D>
where
    D: crate::dispatcher::Dispatcher + Send + Sync + 'static,
{
    /// Creates a coordinator owning the given unstarted workers.
    pub fn new(
        group_id: GroupId,
        start_timeout: Option<Duration>,
        pause_tx: PauseTx,
        workers: Vec<DispatchWorker<D>>,
    ) -> Self {
        let worker_states = workers.iter().map(|worker| worker.state()).collect();

        Self {
            group_id,
            start_timeout,
            pause_tx,
            stop_requested: Arc::new(AtomicBool::new(false)),
            worker_states,
            inner: Mutex::new(CoordinatorInner {
                run_state: GroupRunState::Created,
                pending: workers,
                handles: Vec::new(),
                start_failure: None,
                stop_failures: Vec::new(),
            }),
        }
    }

    /// Returns the current aggregate run-state.
    pub async fn run_state(&self) -> GroupRunState {
        self.inner.lock().await.run_state
    }

    /// Returns whether every worker is currently running.
    ///
    /// Folds the per-worker states directly, so a worker that failed mid-stream is
    /// reflected here even before any lifecycle call observes it.
    pub async fn is_running(&self) -> bool {
        for state in &self.worker_states {
            if !state.is_running().await {
                return false;
            }
        }

        !self.worker_states.is_empty()
    }

    /// Returns the per-worker state handles for read-only introspection.
    pub fn worker_states(&self) -> &[DispatchWorkerState] {
        &self.worker_states
    }

    /// Returns whether enqueues should be rejected because stop was requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Returns the per-worker stop failures recorded by the last stop.
    pub async fn stop_failures(&self) -> Vec<(WorkerIndex, RelayError)> {
        self.inner.lock().await.stop_failures.clone()
    }

    /// Starts every worker and waits on the start-up barrier.
    ///
    /// Workers are spawned in index order, though ordering is irrelevant since
    /// they are independent. The barrier then waits on each handle's private
    /// notification until that handle reports `Running` or `Failed`; all handles
    /// are awaited before the aggregate outcome is reported, so one slow worker
    /// cannot hide another worker's failure.
    ///
    /// On any failure the group transitions to `Failed` and an aggregate
    /// `WorkerStartFailed` error is returned, with the first observed cause as
    /// primary and the remaining causes retained for diagnostics. Workers that
    /// started successfully keep running until `stop()` or `close()` is called.
    pub async fn start(&self) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;

        match inner.run_state {
            GroupRunState::Created => {}
            GroupRunState::Starting | GroupRunState::Running | GroupRunState::Paused => {
                debug!("group already started, nothing to do");
                return Ok(());
            }
            GroupRunState::Stopped | GroupRunState::Failed => {
                bail!(
                    ErrorKind::InvalidState,
                    "Group cannot be restarted",
                    format!(
                        "group {} is {} and must be rebuilt before reuse",
                        self.group_id, inner.run_state
                    )
                );
            }
        }

        inner.run_state = GroupRunState::Starting;
        info!(
            group_id = self.group_id,
            workers = inner.pending.len(),
            "starting dispatcher group"
        );

        let workers = std::mem::take(&mut inner.pending);
        for worker in workers {
            inner.handles.push(worker.spawn());
        }

        let failures = match self.start_timeout {
            Some(timeout) => {
                match tokio::time::timeout(timeout, wait_for_startup(&inner.handles)).await {
                    Ok(failures) => failures,
                    Err(_) => {
                        let err = relay_error!(
                            ErrorKind::WorkerStartFailed,
                            "Group start timed out",
                            format!(
                                "not all workers reported within {}ms",
                                timeout.as_millis()
                            )
                        );
                        inner.run_state = GroupRunState::Failed;
                        inner.start_failure = Some(err.clone());
                        return Err(err);
                    }
                }
            }
            None => wait_for_startup(&inner.handles).await,
        };

        if failures.is_empty() {
            inner.run_state = GroupRunState::Running;
            info!(group_id = self.group_id, "dispatcher group running");
            return Ok(());
        }

        let failed_workers = failures
            .iter()
            .map(|(worker_index, _)| worker_index.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let causes: Vec<RelayError> = failures.into_iter().map(|(_, cause)| cause).collect();
        let err = relay_error!(
            ErrorKind::WorkerStartFailed,
            "Group start failed",
            format!(
                "workers [{}] failed during start-up; healthy workers keep running until the group is stopped",
                failed_workers
            ),
            source: RelayError::from(causes)
        );

        inner.run_state = GroupRunState::Failed;
        inner.start_failure = Some(err.clone());

        Err(err)
    }

    /// Stops every worker concurrently and closes every handle; idempotent.
    ///
    /// The group is marked stopped before any worker is touched, so interleaved
    /// enqueues are rejected. One stop task per handle runs in a [`JoinSet`], so no
    /// worker's shutdown blocks on another's. A worker that fails to stop cleanly
    /// is logged and recorded in `stop_failures()` without failing the call; only a
    /// failure of the stopping machinery itself escalates.
    pub async fn stop(&self) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.run_state == GroupRunState::Stopped {
            debug!("group already stopped, nothing to do");
            return Ok(());
        }

        // Stop intent is visible to producers before any worker is touched.
        self.stop_requested.store(true, Ordering::Release);
        inner.run_state = GroupRunState::Stopped;
        info!(group_id = self.group_id, "stopping dispatcher group");

        // Workers that never started only need their resources released.
        let pending = std::mem::take(&mut inner.pending);
        for worker in pending {
            worker.close().await;
        }

        let mut stoppers: JoinSet<(WorkerIndex, RelayResult<bool>)> = JoinSet::new();
        for handle in &inner.handles {
            let handle = handle.clone();
            stoppers.spawn(async move { (handle.worker_index(), handle.stop().await) });
        }

        while let Some(result) = stoppers.join_next().await {
            match result {
                Ok((worker_index, Ok(clean))) => {
                    debug!(
                        worker_index,
                        "{} stopped dispatching",
                        if clean { "successfully" } else { "unsuccessfully" }
                    );
                }
                Ok((worker_index, Err(cause))) => {
                    // Swallowed so a single bad worker cannot block its siblings;
                    // retained for the observability hook.
                    warn!(worker_index, error = %cause, "worker failed to stop cleanly");
                    inner.stop_failures.push((worker_index, cause));
                }
                Err(join_err) => {
                    // The stopping machinery itself failed; worker state can no
                    // longer be trusted.
                    return Err(relay_error!(
                        ErrorKind::CoordinationInterrupted,
                        "Worker stopper task failed",
                        source: join_err
                    ));
                }
            }
        }

        // Resource release is unconditional, including handles whose stop failed.
        for handle in &inner.handles {
            handle.close().await;
        }

        info!(group_id = self.group_id, "dispatcher group stopped");

        Ok(())
    }

    /// Broadcasts pause and blocks until every worker has parked.
    ///
    /// This is a full barrier: callers rely on "no worker is mid-dispatch" being
    /// total before the call returns. The coordination lock is held across the
    /// barrier, so a concurrently queued `resume()` cannot unpark workers before
    /// each one has been observed parked. Pausing an already-paused group re-runs
    /// the barrier and returns without error.
    pub async fn pause(&self) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;

        match inner.run_state {
            GroupRunState::Running | GroupRunState::Paused => {}
            _ => {
                debug!(run_state = %inner.run_state, "group not running, pause is a no-op");
                return Ok(());
            }
        }

        self.pause_tx.pause();

        for handle in &inner.handles {
            handle.wait_until_paused().await;
        }

        inner.run_state = GroupRunState::Paused;
        info!(group_id = self.group_id, "dispatcher group paused");

        Ok(())
    }

    /// Broadcasts resume; no barrier, workers resume independently.
    pub async fn resume(&self) -> RelayResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.run_state != GroupRunState::Paused {
            debug!(run_state = %inner.run_state, "group not paused, resume is a no-op");
            return Ok(());
        }

        self.pause_tx.resume();
        inner.run_state = GroupRunState::Running;
        info!(group_id = self.group_id, "dispatcher group resumed");

        Ok(())
    }
}

/// Runs the start-up barrier over all handles.
///
/// Waits per handle, in order, returning once every handle has reported either
/// `Running` or `Failed`. Failures are collected in observation order together
/// with the failing worker's index.
async fn wait_for_startup(
    handles: &[DispatchWorkerHandle],
) -> Vec<(WorkerIndex, RelayError)> {
    let mut failures = Vec::new();

    for handle in handles {
        let state = handle.state();
        let inner = state
            .wait_for_run_state(&[WorkerRunState::Running, WorkerRunState::Failed])
            .await;

        if inner.run_state() == WorkerRunState::Failed {
            let cause = inner.failure().unwrap_or_else(|| {
                relay_error!(
                    ErrorKind::WorkerStartFailed,
                    "Worker failed during start-up without a recorded cause"
                )
            });
            failures.push((handle.worker_index(), cause));
        }
    }

    failures
}
