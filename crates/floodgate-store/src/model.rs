//! Row and record types shared by every store backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduler lease row.
///
/// The row is live while `owner_id` is set and `expires_at` is in the
/// future. `last_run_at` survives releases and takeovers — it records the
/// most recent successful completion by any owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRow {
    /// Unique task name this lease guards.
    pub task_name: String,
    /// Replica currently holding the lease, `None` after release.
    pub owner_id: Option<String>,
    /// Instant after which the lease is considered void.
    pub expires_at: DateTime<Utc>,
    /// Most recent successful completion, by any owner.
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Upload record lifecycle status.
///
/// Transitions are `pending → processing → {ready | failed}`,
/// `ready → deleted`, and `{pending | processing} → failed`. The three
/// terminal statuses accept no further reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Session opened, waiting for the client to upload and the scanner to
    /// report.
    Pending,
    /// Server-to-server fetch in progress (initiate supplied download URLs).
    Processing,
    /// Scanned clean and persisted to the object store.
    Ready,
    /// Rejected by the scanner or by validation.
    Failed,
    /// Removed from the object store on user request.
    Deleted,
}

impl UploadStatus {
    /// Stable string form, matching the wire and column encoding.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    /// Parse the column encoding back into the enum.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Terminal statuses accept no further automatic transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Deleted)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scanner's verdict on the file itself, orthogonal to [`UploadStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Upload finished, scan not yet complete.
    Complete,
    /// Scanned clean.
    Scanned,
    /// Flagged by the scanner — downloads are refused regardless of
    /// upload status.
    Quarantined,
    /// Rejected by scan or validation rules.
    Rejected,
}

impl FileStatus {
    /// Stable string form, matching the wire and column encoding.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Scanned => "scanned",
            Self::Quarantined => "quarantined",
            Self::Rejected => "rejected",
        }
    }

    /// Parse the column encoding back into the enum.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "complete" => Some(Self::Complete),
            "scanned" => Some(Self::Scanned),
            "quarantined" => Some(Self::Quarantined),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored upload record.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    /// Opaque id issued by the scan service (or generated locally).
    pub upload_id: String,
    /// Lifecycle status.
    pub upload_status: UploadStatus,
    /// Scanner's file verdict, once known.
    pub file_status: Option<FileStatus>,
    /// Original filename as reported by the scanner.
    pub filename: Option<String>,
    /// Declared MIME type.
    pub content_type: Option<String>,
    /// MIME type detected by the scanner (authoritative for validation).
    pub detected_content_type: Option<String>,
    /// Size in bytes as reported by the scanner.
    pub content_length: Option<i64>,
    /// Content checksum as reported by the scanner.
    pub checksum: Option<String>,
    /// Object-store bucket, set when ready.
    pub storage_bucket: Option<String>,
    /// Object-store key, set when ready.
    pub storage_key: Option<String>,
    /// Business key linking the upload to a project.
    pub reference: Option<String>,
    /// Kind of entity the upload belongs to.
    pub entity_type: String,
    /// Id of the entity the upload belongs to.
    pub entity_id: String,
    /// Human-readable reason the upload failed, when it did.
    pub rejection_reason: Option<String>,
    /// Number of rejections reported by the scanner.
    pub rejected_count: i32,
    /// User who initiated the upload, when authenticated.
    pub owner_user_id: Option<String>,
    /// Record creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Instant the record reached `ready`.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a freshly initiated upload.
#[derive(Debug, Clone)]
pub struct NewUpload {
    /// Id issued by the scan service.
    pub upload_id: String,
    /// `Pending`, or `Processing` when the scanner fetches server-to-server.
    pub upload_status: UploadStatus,
    /// Kind of entity the upload belongs to.
    pub entity_type: String,
    /// Id of the entity the upload belongs to.
    pub entity_id: String,
    /// Business key linking the upload to a project.
    pub reference: Option<String>,
    /// User who initiated the upload.
    pub owner_user_id: Option<String>,
}

/// Reconciliation write-back payload.
///
/// Fields left `None` overwrite the stored value with `None` — the outcome
/// is the scanner's full view at reconciliation time, not a patch.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// New lifecycle status.
    pub upload_status: UploadStatus,
    /// New file verdict.
    pub file_status: Option<FileStatus>,
    /// Filename reported by the scanner.
    pub filename: Option<String>,
    /// Declared MIME type.
    pub content_type: Option<String>,
    /// Detected MIME type.
    pub detected_content_type: Option<String>,
    /// Size in bytes.
    pub content_length: Option<i64>,
    /// Content checksum.
    pub checksum: Option<String>,
    /// Object-store bucket.
    pub storage_bucket: Option<String>,
    /// Object-store key.
    pub storage_key: Option<String>,
    /// Failure reason, set on `failed`.
    pub rejection_reason: Option<String>,
    /// Rejection count reported by the scanner.
    pub rejected_count: i32,
    /// Set to now when the outcome is `ready`.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Cache write attaching the latest successful upload to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectFileUpdate {
    /// Business reference identifying the project row.
    pub reference: String,
    /// Filename of the uploaded artifact.
    pub filename: Option<String>,
    /// MIME type of the uploaded artifact.
    pub content_type: Option<String>,
    /// Size in bytes.
    pub content_length: Option<i64>,
    /// Content checksum.
    pub checksum: Option<String>,
    /// Freshly generated presigned download URL.
    pub download_url: String,
    /// Wall-clock expiry of the presigned URL.
    pub download_url_expires_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_column_encoding() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Processing,
            UploadStatus::Ready,
            UploadStatus::Failed,
            UploadStatus::Deleted,
        ] {
            assert_eq!(UploadStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(UploadStatus::parse("uploaded"), None);
    }

    #[test]
    fn terminal_statuses_are_exactly_ready_failed_deleted() {
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(!UploadStatus::Processing.is_terminal());
        assert!(UploadStatus::Ready.is_terminal());
        assert!(UploadStatus::Failed.is_terminal());
        assert!(UploadStatus::Deleted.is_terminal());
    }

    #[test]
    fn file_status_roundtrips_through_column_encoding() {
        for status in [
            FileStatus::Complete,
            FileStatus::Scanned,
            FileStatus::Quarantined,
            FileStatus::Rejected,
        ] {
            assert_eq!(FileStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FileStatus::parse("clean"), None);
    }
}
