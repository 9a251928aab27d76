//! Persistence layer for Floodgate.
//!
//! This crate defines the two storage traits the service coordinates
//! through — [`LockStore`] for the scheduler's named leases and
//! [`UploadStore`] for file-upload records — plus [`ProjectFileSink`], the
//! one-way cache write that attaches the latest successful upload to a
//! project row.
//!
//! Two backend families are provided:
//!
//! - [`MemoryLockStore`] / [`MemoryUploadStore`] / [`MemoryProjectFileSink`]
//!   — in-memory, for tests and single-replica dev mode
//! - [`PgLockStore`] / [`PgUploadStore`] / [`PgProjectFileSink`] — PostgreSQL
//!   via sqlx (feature `postgres-backend`), the production default
//!
//! Every trait method maps to a single atomic statement against the backing
//! store: the lock service's safety argument rests on `try_acquire` having
//! exactly one winner under concurrency, which Postgres provides via a
//! conditional upsert and the memory backend via its mutex.

mod error;
mod memory;
mod model;
#[cfg(feature = "postgres-backend")]
mod postgres;

pub use error::StoreError;
pub use memory::{MemoryLockStore, MemoryProjectFileSink, MemoryUploadStore};
pub use model::{
    FileStatus, LockRow, NewUpload, ProjectFileUpdate, UploadOutcome, UploadRecord, UploadStatus,
};
#[cfg(feature = "postgres-backend")]
pub use postgres::{PgLockStore, PgProjectFileSink, PgUploadStore, connect_pool};

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Persistent table of named leases with owner and expiry.
///
/// A lease row is "live" while it has an owner and its `expires_at` is in
/// the future. All mutations are conditioned on `(name, owner)` so a replica
/// can never clobber a lease it does not hold.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait LockStore: Send + Sync + 'static {
    /// Atomically claim the lease `name` for `owner` until `expires_at`.
    ///
    /// Succeeds only when no row exists for `name`, or the existing row is
    /// dead (no owner, or expiry in the past). Returns `true` iff the caller
    /// is now the owner. Concurrent calls for the same name yield exactly
    /// one winner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the underlying store fails.
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Check that the live row for `name` is owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the underlying store fails.
    async fn verify(&self, name: &str, owner: &str) -> Result<bool, StoreError>;

    /// Extend the lease to `new_expires_at` iff `owner` still holds it.
    ///
    /// Returns `false` when the lease has been taken over or released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the underlying store fails.
    async fn refresh(
        &self,
        name: &str,
        owner: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Clear ownership of `name` iff `owner` holds it. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the underlying store fails.
    async fn release(&self, name: &str, owner: &str) -> Result<bool, StoreError>;

    /// Stamp `last_run_at = now` iff `owner` holds the lease.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the underlying store fails.
    async fn update_last_run(&self, name: &str, owner: &str) -> Result<bool, StoreError>;

    /// Delete rows whose expiry is more than `grace` in the past.
    ///
    /// Keeps the table bounded; a swept row is recreated by the next
    /// successful acquisition. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Delete`] if the underlying store fails.
    async fn sweep_expired(&self, grace: Duration) -> Result<u64, StoreError>;

    /// Clear every row owned by `owner`. Process-shutdown hook.
    ///
    /// Returns the number of rows released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the underlying store fails.
    async fn release_all_by_owner(&self, owner: &str) -> Result<u64, StoreError>;

    /// Snapshot every lease row, for introspection endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the underlying store fails.
    async fn list(&self) -> Result<Vec<LockRow>, StoreError>;
}

/// Persistent table of upload records keyed by `upload_id`.
///
/// Records move through a finite status set (see [`UploadStatus`]) and are
/// never physically removed in the hot path — `deleted` is a status, not a
/// row deletion.
#[async_trait::async_trait]
pub trait UploadStore: Send + Sync + 'static {
    /// Insert a freshly initiated record and return it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] on conflict or store failure.
    async fn insert(&self, new: NewUpload) -> Result<UploadRecord, StoreError>;

    /// Fetch a record by id, `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the underlying store fails.
    async fn get(&self, upload_id: &str) -> Result<Option<UploadRecord>, StoreError>;

    /// Write back a reconciliation outcome and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UploadNotFound`] for an unknown id, or
    /// [`StoreError::Write`] if the underlying store fails.
    async fn apply_outcome(
        &self,
        upload_id: &str,
        outcome: &UploadOutcome,
    ) -> Result<UploadRecord, StoreError>;

    /// Transition a record to `deleted` and bump `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UploadNotFound`] for an unknown id, or
    /// [`StoreError::Write`] if the underlying store fails.
    async fn mark_deleted(&self, upload_id: &str) -> Result<UploadRecord, StoreError>;

    /// List non-terminal records created before `older_than`, oldest first.
    ///
    /// Used by the sweep task to find uploads whose clients stopped polling.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::List`] if the underlying store fails.
    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadRecord>, StoreError>;
}

/// One-way write of file metadata onto the project row it belongs to.
///
/// The project row is a cache of the latest successful upload for a business
/// reference; it is written when an upload transitions to ready and is never
/// read back by the upload engine.
#[async_trait::async_trait]
pub trait ProjectFileSink: Send + Sync + 'static {
    /// Upsert the latest-upload cache for `update.reference`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] if the underlying store fails.
    async fn record_latest_upload(&self, update: &ProjectFileUpdate) -> Result<(), StoreError>;
}
