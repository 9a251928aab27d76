//! Scheduler introspection routes: `/scheduler/*`
//!
//! Read-only view of the lease table for the tasks this deployment
//! registers. Useful for checking which replica currently holds each task
//! and when it last ran.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use floodgate_store::LockRow;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/scheduler` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/tasks", get(list_tasks))
}

/// One registered task's lease state.
#[derive(Debug, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_name: String,
    /// Replica holding the lease, if any.
    pub owner_id: Option<String>,
    /// Lease expiry, absent until the task has been acquired once.
    pub expires_at: Option<DateTime<Utc>>,
    /// Most recent successful completion, by any owner.
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    /// Owner id this replica writes into lease rows, to correlate with
    /// `owner_id` in the task list.
    pub replica_owner_id: String,
    pub tasks: Vec<TaskStatus>,
}

/// Join registered task names against the lease table.
///
/// Tasks that have never been acquired still appear, with empty lease
/// fields.
fn join_tasks(names: &[String], rows: &[LockRow]) -> Vec<TaskStatus> {
    names
        .iter()
        .map(|name| {
            let row = rows.iter().find(|r| &r.task_name == name);
            TaskStatus {
                task_name: name.clone(),
                owner_id: row.and_then(|r| r.owner_id.clone()),
                expires_at: row.map(|r| r.expires_at),
                last_run_at: row.and_then(|r| r.last_run_at),
            }
        })
        .collect()
}

/// List every registered task with its current lease state.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TaskListResponse>, AppError> {
    let rows = state.lock_store.list().await?;
    Ok(Json(TaskListResponse {
        replica_owner_id: state.lock_service.owner_id().to_owned(),
        tasks: join_tasks(&state.task_names, &rows),
    }))
}
