//! Task definitions and the startup-time registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::TaskError;
use crate::schedule::Schedule;

/// Boxed error returned by task handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A periodic unit of work.
///
/// Handlers must be idempotent: the lease prevents concurrent execution
/// across replicas in the common case, but a paused replica resuming past
/// its lease expiry can briefly overlap with the new holder.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Execute one run.
    ///
    /// `shutdown` flips to `true` when the run is cancelled — on process
    /// shutdown or when the run exceeds its `max_run_duration`. Handlers
    /// should check it at natural suspension points and wind down promptly;
    /// a handler that ignores it is aborted after a short grace.
    ///
    /// # Errors
    ///
    /// Any error is logged by the runner; the run is not retried within the
    /// same tick.
    async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), BoxError>;
}

/// A registered task: name, schedule, handler, and run-duration cap.
#[derive(Clone)]
pub struct TaskDefinition {
    /// Unique task name — also the lease name.
    pub name: String,
    /// When the task fires.
    pub schedule: Schedule,
    /// The work itself.
    pub handler: Arc<dyn TaskHandler>,
    /// Upper bound on a single execution. Must be below the lease duration.
    pub max_run_duration: Duration,
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("max_run_duration", &self.max_run_duration)
            .finish_non_exhaustive()
    }
}

/// Collects task definitions at startup, enforcing registration rules.
#[derive(Debug)]
pub struct TaskRegistry {
    lease_duration: Duration,
    tasks: Vec<TaskDefinition>,
}

impl TaskRegistry {
    /// Create a registry that checks run durations against `lease_duration`.
    #[must_use]
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            lease_duration,
            tasks: Vec::new(),
        }
    }

    /// Register a task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Duplicate`] when the name is already registered.
    /// - [`TaskError::RunTooLong`] when `max_run_duration` is not below the
    ///   lease duration.
    pub fn register(&mut self, task: TaskDefinition) -> Result<(), TaskError> {
        if self.tasks.iter().any(|t| t.name == task.name) {
            return Err(TaskError::Duplicate { name: task.name });
        }
        if task.max_run_duration >= self.lease_duration {
            return Err(TaskError::RunTooLong {
                name: task.name,
                max_run_ms: task.max_run_duration.as_millis(),
                lease_ms: self.lease_duration.as_millis(),
            });
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Names of every registered task, in registration order.
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    /// Consume the registry, yielding its definitions.
    #[must_use]
    pub fn into_tasks(self) -> Vec<TaskDefinition> {
        self.tasks
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait::async_trait]
    impl TaskHandler for Noop {
        async fn run(&self, _shutdown: watch::Receiver<bool>) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn task(name: &str, max_run: Duration) -> TaskDefinition {
        TaskDefinition {
            name: name.to_owned(),
            schedule: Schedule::every_secs(10),
            handler: Arc::new(Noop),
            max_run_duration: max_run,
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = TaskRegistry::new(Duration::from_secs(300));
        registry.register(task("sweep", Duration::from_secs(30))).unwrap();
        let err = registry
            .register(task("sweep", Duration::from_secs(30)))
            .unwrap_err();
        assert!(matches!(err, TaskError::Duplicate { .. }));
    }

    #[test]
    fn run_duration_must_be_below_lease() {
        let mut registry = TaskRegistry::new(Duration::from_secs(300));
        let err = registry
            .register(task("sweep", Duration::from_secs(300)))
            .unwrap_err();
        assert!(matches!(err, TaskError::RunTooLong { .. }));
    }

    #[test]
    fn task_names_preserve_registration_order() {
        let mut registry = TaskRegistry::new(Duration::from_secs(300));
        registry.register(task("b", Duration::from_secs(1))).unwrap();
        registry.register(task("a", Duration::from_secs(1))).unwrap();
        assert_eq!(registry.task_names(), vec!["b", "a"]);
    }
}
