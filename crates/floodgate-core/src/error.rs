//! Error types for `floodgate-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Adapter errors keep the transport cause so callers can tell a
//! timeout from a permanent rejection.

use floodgate_store::{StoreError, UploadStatus};

/// Errors from lock service construction.
///
/// The running lock service itself never errors — an unreachable store
/// surfaces as a failed acquisition, not an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The refresh interval leaves no safety margin before lease expiry.
    #[error(
        "refresh interval {refresh_ms}ms must be below half the lease duration {lease_ms}ms"
    )]
    InvalidRefreshInterval { refresh_ms: u128, lease_ms: u128 },
}

/// Errors from schedule parsing.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The cron expression did not parse.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
}

/// Errors from task registration.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// A task with this name is already registered.
    #[error("duplicate task name '{name}'")]
    Duplicate { name: String },

    /// The task could outlive its lease, breaking the exclusion argument.
    #[error(
        "task '{name}' max_run_duration {max_run_ms}ms must be below the lease duration {lease_ms}ms"
    )]
    RunTooLong {
        name: String,
        max_run_ms: u128,
        lease_ms: u128,
    },
}

/// Errors from the external service adapters.
///
/// A single kind per failure mode: HTTP status responses keep the status and
/// body, transport failures keep the cause. Callers treat `Status`/`Transport`
/// as transient and `InvalidPayload` as a contract violation.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The remote service answered with a non-success HTTP status.
    #[error("{service} request failed with status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The request never completed (connect failure, timeout, TLS).
    #[error("{service} transport error: {reason}")]
    Transport {
        service: &'static str,
        reason: String,
    },

    /// The response arrived but did not match the expected shape.
    #[error("{service} returned an invalid payload: {reason}")]
    InvalidPayload {
        service: &'static str,
        reason: String,
    },

    /// The call was abandoned because its cancellation signal fired.
    #[error("{service} request cancelled")]
    Cancelled { service: &'static str },
}

impl AdapterError {
    /// HTTP status carried by this error, when the remote answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } | Self::InvalidPayload { .. } | Self::Cancelled { .. } => None,
        }
    }
}

/// Errors from the upload lifecycle engine.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No record exists for the given upload id.
    #[error("upload not found: {upload_id}")]
    NotFound { upload_id: String },

    /// Download requested before the upload reached `ready`.
    #[error("upload {upload_id} is not ready for download (status: {status})")]
    NotReady {
        upload_id: String,
        status: UploadStatus,
    },

    /// The scanner quarantined the file — downloads are refused.
    #[error("upload {upload_id} is quarantined")]
    Quarantined { upload_id: String },

    /// The record claims `ready` but carries no storage location.
    #[error("upload {upload_id} has no storage location")]
    MissingStorage { upload_id: String },

    /// The underlying store failed.
    #[error("upload store error: {0}")]
    Store(#[from] StoreError),

    /// An external adapter failed.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}
