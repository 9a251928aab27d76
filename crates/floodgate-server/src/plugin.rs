//! Scheduler plugin — process-lifecycle glue.
//!
//! Registers the deployment's periodic tasks, starts the task runner, and
//! hands back the shutdown hook `main` invokes after the HTTP server
//! drains. Task handlers are built over the same injected collaborators the
//! HTTP handlers use.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use floodgate_core::lock::LockService;
use floodgate_core::runner::{RunnerConfig, RunnerHandle, TaskRunner};
use floodgate_core::schedule::Schedule;
use floodgate_core::task::{BoxError, TaskDefinition, TaskHandler, TaskRegistry};
use floodgate_core::upload_engine::UploadEngine;
use floodgate_store::LockStore;

use crate::config::ServerConfig;

/// Maximum records one sweep run examines.
const SWEEP_BATCH: i64 = 100;

/// Periodic task: re-reconcile in-flight uploads whose clients stopped
/// polling, failing the ones the scanner no longer knows.
struct SweepUploads {
    engine: Arc<UploadEngine>,
    stale_after: Duration,
}

#[async_trait::async_trait]
impl TaskHandler for SweepUploads {
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), BoxError> {
        let examined = self
            .engine
            .sweep_stale(self.stale_after, SWEEP_BATCH, shutdown)
            .await?;
        debug!(examined, "upload sweep complete");
        Ok(())
    }
}

/// Register the maintenance tasks and start the runner.
///
/// Returns the runner handle (for shutdown) and the registered task names
/// (for the introspection route).
///
/// # Errors
///
/// Returns an error when task registration rules are violated — a
/// configuration bug caught at startup.
pub fn start_scheduler(
    config: &ServerConfig,
    engine: Arc<UploadEngine>,
    lock_service: Arc<LockService>,
    lock_store: Arc<dyn LockStore>,
) -> anyhow::Result<(RunnerHandle, Vec<String>)> {
    let mut registry = TaskRegistry::new(config.lock_timeout);

    registry.register(TaskDefinition {
        name: "sweep-uploads".to_owned(),
        schedule: Schedule::every(config.sweep_interval),
        handler: Arc::new(SweepUploads {
            engine,
            stale_after: config.upload_stale_after,
        }),
        max_run_duration: config.lock_timeout / 2,
    })?;

    let task_names = registry.task_names();
    info!(tasks = ?task_names, "scheduler tasks registered");

    let handle = TaskRunner::start(
        registry,
        lock_service,
        lock_store,
        RunnerConfig {
            sweep_interval: config.sweep_interval,
            ..RunnerConfig::default()
        },
    );

    Ok((handle, task_names))
}
