//! Storage error types.
//!
//! Every variant carries enough context to diagnose the problem without a
//! debugger. Reasons are the backend's own message, never a rephrasing.

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to connect to the backing store or run its migration.
    #[error("failed to open store at '{target}': {reason}")]
    Open { target: String, reason: String },

    /// A read query failed.
    #[error("failed to read '{key}': {reason}")]
    Read { key: String, reason: String },

    /// A write statement failed.
    #[error("failed to write '{key}': {reason}")]
    Write { key: String, reason: String },

    /// A delete statement failed.
    #[error("failed to delete '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// A listing query failed.
    #[error("failed to list '{scope}': {reason}")]
    List { scope: String, reason: String },

    /// A write targeted an upload record that does not exist.
    #[error("upload record not found: {upload_id}")]
    UploadNotFound { upload_id: String },

    /// An insert collided with an existing record for the same upload id.
    #[error("upload record already exists: {upload_id}")]
    DuplicateUpload { upload_id: String },

    /// A stored status string is not a member of the finite status set.
    #[error("corrupt status '{value}' on record '{key}'")]
    CorruptStatus { key: String, value: String },
}
