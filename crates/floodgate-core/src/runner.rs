//! Task runner.
//!
//! One tick-driver per registered task: sleep until the schedule's next fire
//! instant, take the task's lease, execute the handler, record success, and
//! release. A separate low-frequency worker sweeps long-dead lease rows so
//! the lock table stays bounded.
//!
//! Failure semantics:
//! - A lost acquisition is a skipped tick, logged at debug level.
//! - Handler errors and panics are contained within the tick; the next tick
//!   is scheduled normally.
//! - A run that exceeds `max_run_duration` is cancelled cooperatively, then
//!   aborted after a short grace.
//! - On shutdown every active run is cancelled, drivers are joined within a
//!   grace period, and all held leases are released.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use floodgate_store::LockStore;

use crate::lock::LockService;
use crate::task::{TaskDefinition, TaskRegistry};

/// Runner timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Cadence of the lock-table sweep.
    pub sweep_interval: Duration,
    /// How long past expiry a lease row must be before the sweep deletes it.
    pub sweep_grace: Duration,
    /// How long a cancelled handler gets to wind down before it is aborted.
    pub cancel_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(3600),
            sweep_grace: Duration::from_secs(3600),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Drives registered tasks until shutdown.
pub struct TaskRunner;

impl TaskRunner {
    /// Spawn one driver per task plus the lock sweeper, returning a handle
    /// used to stop them.
    #[must_use]
    pub fn start(
        registry: TaskRegistry,
        lock_service: Arc<LockService>,
        lock_store: Arc<dyn LockStore>,
        config: RunnerConfig,
    ) -> RunnerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = Vec::new();

        for task in registry.into_tasks() {
            let lock_service = Arc::clone(&lock_service);
            let shutdown = shutdown_rx.clone();
            workers.push(tokio::spawn(async move {
                drive(task, lock_service, shutdown, config.cancel_grace).await;
            }));
        }

        {
            let shutdown = shutdown_rx;
            workers.push(tokio::spawn(async move {
                sweep_locks(lock_store, shutdown, config).await;
            }));
        }

        RunnerHandle {
            shutdown_tx,
            workers,
            lock_service,
        }
    }
}

/// Handle to a running [`TaskRunner`].
pub struct RunnerHandle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    lock_service: Arc<LockService>,
}

impl RunnerHandle {
    /// Stop the runner: signal every driver, wait up to `grace` for them to
    /// finish, abort stragglers, then release every held lease.
    ///
    /// Leases abandoned by an aborted driver expire naturally and are
    /// reaped by another replica's sweep.
    pub async fn shutdown(self, grace: Duration) {
        info!("task runner shutting down");
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + grace;
        for worker in self.workers {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, worker).await.is_err() {
                warn!("task driver did not stop within grace, abandoning");
            }
        }

        self.lock_service.release_all().await;
        info!("task runner stopped");
    }
}

impl std::fmt::Debug for RunnerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerHandle").finish_non_exhaustive()
    }
}

/// Tick loop for a single task.
async fn drive(
    task: TaskDefinition,
    lock_service: Arc<LockService>,
    mut shutdown: watch::Receiver<bool>,
    cancel_grace: Duration,
) {
    info!(task = %task.name, "task driver started");
    loop {
        let Some(fire_at) = task.schedule.next_fire(Utc::now()) else {
            info!(task = %task.name, "schedule exhausted, driver stopping");
            return;
        };
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            () = tokio::time::sleep(delay) => {
                run_guarded(&task, &lock_service, &mut shutdown, cancel_grace).await;
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = shutdown.changed() => {
                debug!(task = %task.name, "task driver stopping");
                return;
            }
        }
    }
}

/// Execute one tick under the task's lease.
async fn run_guarded(
    task: &TaskDefinition,
    lock_service: &LockService,
    shutdown: &mut watch::Receiver<bool>,
    cancel_grace: Duration,
) {
    if !lock_service.acquire(&task.name).await {
        debug!(task = %task.name, "tick skipped, lease not acquired");
        return;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let handler = Arc::clone(&task.handler);
    let mut run = tokio::spawn(async move { handler.run(cancel_rx).await });

    let cancelled = tokio::select! {
        result = &mut run => {
            match result {
                Ok(Ok(())) => {
                    lock_service.mark_success(&task.name).await;
                    debug!(task = %task.name, "task completed");
                }
                Ok(Err(e)) => {
                    error!(task = %task.name, error = %e, "task handler failed");
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(task = %task.name, "task handler panicked");
                }
                Err(_) => {
                    warn!(task = %task.name, "task handler cancelled");
                }
            }
            false
        }
        () = tokio::time::sleep(task.max_run_duration) => {
            warn!(
                task = %task.name,
                max_run_ms = task.max_run_duration.as_millis() as u64,
                "task exceeded max run duration, cancelling"
            );
            true
        }
        _ = shutdown.changed() => {
            info!(task = %task.name, "shutdown during task run, cancelling");
            true
        }
    };

    if cancelled {
        let _ = cancel_tx.send(true);
        match tokio::time::timeout(cancel_grace, &mut run).await {
            Ok(_) => debug!(task = %task.name, "cancelled handler wound down"),
            Err(_) => {
                run.abort();
                warn!(task = %task.name, "cancelled handler did not stop, aborted");
            }
        }
    }

    lock_service.release(&task.name).await;
}

/// Low-frequency worker deleting long-dead lease rows.
async fn sweep_locks(
    lock_store: Arc<dyn LockStore>,
    mut shutdown: watch::Receiver<bool>,
    config: RunnerConfig,
) {
    let mut interval = tokio::time::interval(config.sweep_interval);
    interval.tick().await;
    info!(
        interval_secs = config.sweep_interval.as_secs(),
        "lock sweeper started"
    );
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match lock_store.sweep_expired(config.sweep_grace).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "swept dead lease rows"),
                    Err(e) => warn!(error = %e, "lock sweep failed, will retry next tick"),
                }
            }
            _ = shutdown.changed() => {
                debug!("lock sweeper stopping");
                return;
            }
        }
    }
}
