//! Shared application state for the Floodgate server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. Collaborators are dependency-injected — tests
//! construct their own state over the in-memory backends.

use std::sync::Arc;

use floodgate_core::lock::LockService;
use floodgate_core::upload_engine::UploadEngine;
use floodgate_store::LockStore;

use crate::config::ServerConfig;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Upload lifecycle engine.
    pub upload_engine: Arc<UploadEngine>,
    /// This replica's lock service (introspection only — the runner drives
    /// it).
    pub lock_service: Arc<LockService>,
    /// Lock store, read by the scheduler introspection route.
    pub lock_store: Arc<dyn LockStore>,
    /// Names of the tasks registered at startup, in registration order.
    pub task_names: Vec<String>,
    /// The configuration the process was started with.
    pub config: ServerConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
