//! Upload lifecycle engine.
//!
//! Drives an upload record from initiation through scan, ready, failed, or
//! deleted. The engine owns no state of its own — the record's stored status
//! is the single source of truth, which is what makes the poll path and the
//! callback path safe to run concurrently: both feed the scanner's view into
//! the same transition function, and a record in a terminal status is never
//! reconciled again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use floodgate_store::{
    FileStatus, NewUpload, ProjectFileSink, ProjectFileUpdate, UploadOutcome, UploadRecord,
    UploadStatus, UploadStore,
};

use crate::cancel::{self, CancelSignal};
use crate::error::{AdapterError, UploadError};
use crate::object_store::ObjectStore;
use crate::scan::{ScanInitiateRequest, ScanService, ScanStatus};
use crate::validation::{ValidationRules, validate};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct UploadEngineConfig {
    /// Bucket scanned files land in.
    pub storage_bucket: String,
    /// Key prefix within the bucket.
    pub storage_path_prefix: Option<String>,
    /// Presigned download URL lifetime.
    pub download_url_ttl: Duration,
    /// Public callback URL handed to the scan service, when callbacks are
    /// enabled.
    pub callback_url: Option<String>,
    /// Validation rules applied on every transition to ready.
    pub rules: ValidationRules,
}

impl Default for UploadEngineConfig {
    fn default() -> Self {
        Self {
            storage_bucket: "floodgate-uploads".to_owned(),
            storage_path_prefix: None,
            download_url_ttl: Duration::from_secs(900),
            callback_url: None,
            rules: ValidationRules::default(),
        }
    }
}

/// Request to open an upload session.
#[derive(Debug, Clone)]
pub struct InitiateUpload {
    /// Kind of entity the upload belongs to.
    pub entity_type: String,
    /// Id of the entity the upload belongs to.
    pub entity_id: String,
    /// Business key used to attach the artifact to a project.
    pub reference: Option<String>,
    /// Where the scan service redirects the browser after upload.
    pub redirect: String,
    /// URLs for the scanner to fetch server-to-server instead of a browser
    /// upload.
    pub download_urls: Option<Vec<String>>,
    /// Initiating user, when authenticated.
    pub user_id: Option<String>,
}

/// An opened session, returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct InitiatedUpload {
    /// Id assigned by the scan service.
    pub upload_id: String,
    /// Where the client POSTs the file.
    pub upload_url: String,
    /// Where the client polls for progress.
    pub status_url: String,
    /// Business reference echoed back.
    pub reference: Option<String>,
}

/// A record snapshot plus non-fatal warnings from downstream writes.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// The record after reconciliation.
    pub record: UploadRecord,
    /// Non-fatal problems (downstream project write failures).
    pub warnings: Vec<String>,
}

/// A presigned download URL with its wall-clock expiry.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadUrl {
    /// The presigned URL.
    pub url: String,
    /// Instant the URL stops working.
    pub expires_at: DateTime<Utc>,
}

/// State machine coordinating the scan service, the object store, the
/// upload record, and the downstream project cache.
pub struct UploadEngine {
    uploads: Arc<dyn UploadStore>,
    scanner: Arc<dyn ScanService>,
    objects: Arc<dyn ObjectStore>,
    projects: Arc<dyn ProjectFileSink>,
    config: UploadEngineConfig,
}

impl UploadEngine {
    /// Assemble the engine from its injected collaborators.
    #[must_use]
    pub fn new(
        uploads: Arc<dyn UploadStore>,
        scanner: Arc<dyn ScanService>,
        objects: Arc<dyn ObjectStore>,
        projects: Arc<dyn ProjectFileSink>,
        config: UploadEngineConfig,
    ) -> Self {
        Self {
            uploads,
            scanner,
            objects,
            projects,
            config,
        }
    }

    /// Open an upload session with the scan service and persist the record.
    ///
    /// The record starts `pending`, or `processing` when `download_urls`
    /// asks the scanner to fetch server-to-server.
    ///
    /// # Errors
    ///
    /// - [`UploadError::Adapter`] when the scan service call fails.
    /// - [`UploadError::Store`] when the insert fails.
    pub async fn initiate(&self, request: InitiateUpload) -> Result<InitiatedUpload, UploadError> {
        let session = self
            .scanner
            .initiate(
                &ScanInitiateRequest {
                    redirect: request.redirect,
                    callback: self.config.callback_url.clone(),
                    metadata: serde_json::json!({
                        "entity_type": &request.entity_type,
                        "entity_id": &request.entity_id,
                        "reference": &request.reference,
                    }),
                    mime_types: self.config.rules.allowed_mime_types.clone(),
                    max_file_size: self.config.rules.max_file_size,
                    storage_bucket: self.config.storage_bucket.clone(),
                    storage_path: self.config.storage_path_prefix.clone(),
                    download_urls: request.download_urls.clone(),
                },
                cancel::never(),
            )
            .await?;

        let upload_status = if request.download_urls.is_some() {
            UploadStatus::Processing
        } else {
            UploadStatus::Pending
        };

        let record = self
            .uploads
            .insert(NewUpload {
                upload_id: session.upload_id.clone(),
                upload_status,
                entity_type: request.entity_type,
                entity_id: request.entity_id,
                reference: request.reference,
                owner_user_id: request.user_id,
            })
            .await?;

        info!(upload_id = %record.upload_id, status = %record.upload_status, "upload initiated");

        Ok(InitiatedUpload {
            upload_id: record.upload_id,
            upload_url: session.upload_url,
            status_url: session.status_url,
            reference: record.reference,
        })
    }

    /// Reconcile-on-read: return the record, first folding in the scanner's
    /// view when the record is still in flight.
    ///
    /// # Errors
    ///
    /// - [`UploadError::NotFound`] for an unknown id.
    /// - [`UploadError::Adapter`] when the scanner is unreachable — the
    ///   record is not mutated, so the caller can simply retry.
    pub async fn status(&self, upload_id: &str) -> Result<StatusSnapshot, UploadError> {
        let record = self.load(upload_id).await?;
        if record.upload_status.is_terminal() {
            return Ok(StatusSnapshot {
                record,
                warnings: Vec::new(),
            });
        }

        let external = self.scanner.status(upload_id, cancel::never()).await?;
        self.reconcile(record, &external, cancel::never()).await
    }

    /// Callback path: identical reconciliation, but the scanner pushed the
    /// status document instead of being polled.
    ///
    /// Safe to run before, after, or concurrently with a poll: transitions
    /// are keyed on the stored status, and terminal records are returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - [`UploadError::NotFound`] for an unknown id.
    /// - [`UploadError::Store`] when the write-back fails.
    pub async fn callback(
        &self,
        upload_id: &str,
        external: &ScanStatus,
    ) -> Result<StatusSnapshot, UploadError> {
        let record = self.load(upload_id).await?;
        if record.upload_status.is_terminal() {
            return Ok(StatusSnapshot {
                record,
                warnings: Vec::new(),
            });
        }
        self.reconcile(record, external, cancel::never()).await
    }

    /// Generate a presigned download URL for a ready, non-quarantined
    /// record.
    ///
    /// # Errors
    ///
    /// - [`UploadError::Quarantined`] whenever the file is quarantined,
    ///   regardless of upload status.
    /// - [`UploadError::NotReady`] before the upload reaches `ready`.
    /// - [`UploadError::MissingStorage`] when a ready record carries no
    ///   storage location.
    /// - [`UploadError::Adapter`] when presigning fails.
    pub async fn download_url(&self, upload_id: &str) -> Result<DownloadUrl, UploadError> {
        let record = self.load(upload_id).await?;

        if record.file_status == Some(FileStatus::Quarantined) {
            return Err(UploadError::Quarantined {
                upload_id: upload_id.to_owned(),
            });
        }
        if record.upload_status != UploadStatus::Ready {
            return Err(UploadError::NotReady {
                upload_id: upload_id.to_owned(),
                status: record.upload_status,
            });
        }
        let (bucket, key) = storage_location(&record)?;

        let url = self
            .objects
            .presigned_download(
                bucket,
                key,
                self.config.download_url_ttl,
                record.filename.as_deref(),
                cancel::never(),
            )
            .await?;

        Ok(DownloadUrl {
            url,
            expires_at: Utc::now() + ttl_chrono(self.config.download_url_ttl),
        })
    }

    /// Delete the stored object and mark the record `deleted`.
    ///
    /// Idempotent: a record already deleted is returned as-is without
    /// touching the object store, so retries converge. When the object-store
    /// delete fails the record is not mutated.
    ///
    /// # Errors
    ///
    /// - [`UploadError::NotFound`] for an unknown id.
    /// - [`UploadError::MissingStorage`] when the record has no storage
    ///   location.
    /// - [`UploadError::Adapter`] when the object-store delete fails.
    pub async fn delete(&self, upload_id: &str) -> Result<UploadRecord, UploadError> {
        let record = self.load(upload_id).await?;
        if record.upload_status == UploadStatus::Deleted {
            return Ok(record);
        }
        let (bucket, key) = storage_location(&record)?;

        self.objects
            .delete_object(bucket, key, cancel::never())
            .await?;
        let record = self.uploads.mark_deleted(upload_id).await?;
        info!(upload_id, "upload deleted");
        Ok(record)
    }

    /// Sweep in-flight records older than `older_than`: re-reconcile each
    /// with the scanner, failing records the scanner no longer knows.
    ///
    /// `shutdown` stops the sweep between records and cancels the adapter
    /// call in flight; a partial sweep is safe because every record is
    /// handled independently and the next run picks up where this one
    /// stopped.
    ///
    /// Returns the number of records examined. Individual failures are
    /// logged and skipped so one bad record cannot stall the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Store`] when the stale listing itself fails.
    pub async fn sweep_stale(
        &self,
        older_than: Duration,
        limit: i64,
        shutdown: CancelSignal,
    ) -> Result<u64, UploadError> {
        let cutoff = Utc::now() - ttl_chrono(older_than);
        let stale = self.uploads.list_stale(cutoff, limit).await?;
        let mut examined = 0u64;

        for record in stale {
            if *shutdown.borrow() {
                info!(examined, "upload sweep cancelled by shutdown");
                break;
            }
            let upload_id = record.upload_id.clone();
            examined += 1;
            match self.scanner.status(&upload_id, shutdown.clone()).await {
                Ok(external) => {
                    if let Err(e) = self.reconcile(record, &external, shutdown.clone()).await {
                        warn!(upload_id = %upload_id, error = %e, "stale upload reconcile failed");
                    }
                }
                Err(AdapterError::Cancelled { .. }) => {
                    info!(upload_id = %upload_id, "upload sweep cancelled mid-call");
                    break;
                }
                Err(AdapterError::Status { status: 404, .. }) => {
                    let outcome = expired_outcome(&record);
                    if let Err(e) = self.uploads.apply_outcome(&upload_id, &outcome).await {
                        warn!(upload_id = %upload_id, error = %e, "failed to expire orphaned upload");
                    } else {
                        info!(upload_id = %upload_id, "orphaned upload marked failed");
                    }
                }
                Err(e) => {
                    warn!(upload_id = %upload_id, error = %e, "scanner unreachable for stale upload");
                }
            }
        }

        Ok(examined)
    }

    async fn load(&self, upload_id: &str) -> Result<UploadRecord, UploadError> {
        self.uploads
            .get(upload_id)
            .await?
            .ok_or_else(|| UploadError::NotFound {
                upload_id: upload_id.to_owned(),
            })
    }

    /// Fold the scanner's view into the stored record.
    ///
    /// The derived status differs from the scanner's in two cases: a
    /// nominally ready upload with rejections recorded becomes `failed`,
    /// and a ready upload failing validation becomes `failed` with the rule
    /// messages as its rejection reason.
    async fn reconcile(
        &self,
        record: UploadRecord,
        external: &ScanStatus,
        cancel: CancelSignal,
    ) -> Result<StatusSnapshot, UploadError> {
        let external_status = UploadStatus::parse(&external.upload_status).ok_or_else(|| {
            AdapterError::InvalidPayload {
                service: "scan-service",
                reason: format!("unknown upload status '{}'", external.upload_status),
            }
        })?;

        if external_status == record.upload_status {
            return Ok(StatusSnapshot {
                record,
                warnings: Vec::new(),
            });
        }

        let file = &external.form.file;
        let mut derived = external_status;
        let mut rejection_reason = file.rejection_reason.clone();
        let mut rejected_count = external.rejected_count;
        let mut file_status = file.file_status.as_deref().and_then(FileStatus::parse);

        if derived == UploadStatus::Ready
            && (external.rejected_count > 0 || file.rejection_reason.is_some())
        {
            derived = UploadStatus::Failed;
        }

        if derived == UploadStatus::Ready {
            if let Err(errors) = validate(file, &self.config.rules) {
                derived = UploadStatus::Failed;
                rejection_reason = Some(errors.join("; "));
                rejected_count = rejected_count.max(1);
                file_status = Some(FileStatus::Rejected);
            }
        }

        let outcome = UploadOutcome {
            upload_status: derived,
            file_status,
            filename: file.filename.clone(),
            content_type: file.content_type.clone(),
            detected_content_type: file.detected_content_type.clone(),
            content_length: file.content_length,
            checksum: file.checksum.clone(),
            storage_bucket: file.s3_bucket.clone(),
            storage_key: file.s3_key.clone(),
            rejection_reason,
            rejected_count,
            completed_at: (derived == UploadStatus::Ready).then(Utc::now),
        };

        let updated = self.uploads.apply_outcome(&record.upload_id, &outcome).await?;
        debug!(
            upload_id = %updated.upload_id,
            from = %record.upload_status,
            to = %updated.upload_status,
            "upload reconciled"
        );

        let mut warnings = Vec::new();
        if updated.upload_status == UploadStatus::Ready {
            if let Some(reference) = updated.reference.clone() {
                if let Err(e) = self.notify_project(&updated, &reference, cancel).await {
                    warn!(
                        upload_id = %updated.upload_id,
                        reference = %reference,
                        error = %e,
                        "project file update failed, upload remains ready"
                    );
                    warnings.push(format!("project update for '{reference}' failed: {e}"));
                }
            }
        }

        Ok(StatusSnapshot {
            record: updated,
            warnings,
        })
    }

    /// Write file metadata and a fresh presigned URL onto the project row.
    async fn notify_project(
        &self,
        record: &UploadRecord,
        reference: &str,
        cancel: CancelSignal,
    ) -> Result<(), UploadError> {
        let (bucket, key) = storage_location(record)?;
        let url = self
            .objects
            .presigned_download(
                bucket,
                key,
                self.config.download_url_ttl,
                record.filename.as_deref(),
                cancel,
            )
            .await?;

        self.projects
            .record_latest_upload(&ProjectFileUpdate {
                reference: reference.to_owned(),
                filename: record.filename.clone(),
                content_type: record.content_type.clone(),
                content_length: record.content_length,
                checksum: record.checksum.clone(),
                download_url: url,
                download_url_expires_at: Utc::now() + ttl_chrono(self.config.download_url_ttl),
            })
            .await?;

        Ok(())
    }
}

impl std::fmt::Debug for UploadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn storage_location(record: &UploadRecord) -> Result<(&str, &str), UploadError> {
    match (record.storage_bucket.as_deref(), record.storage_key.as_deref()) {
        (Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(UploadError::MissingStorage {
            upload_id: record.upload_id.clone(),
        }),
    }
}

/// Outcome for a record whose session the scanner no longer knows.
///
/// Preserves the record's existing file fields — there is no fresh scanner
/// view to mirror.
fn expired_outcome(record: &UploadRecord) -> UploadOutcome {
    UploadOutcome {
        upload_status: UploadStatus::Failed,
        file_status: record.file_status,
        filename: record.filename.clone(),
        content_type: record.content_type.clone(),
        detected_content_type: record.detected_content_type.clone(),
        content_length: record.content_length,
        checksum: record.checksum.clone(),
        storage_bucket: record.storage_bucket.clone(),
        storage_key: record.storage_key.clone(),
        rejection_reason: Some("upload session no longer known to the scan service".to_owned()),
        rejected_count: record.rejected_count.max(1),
        completed_at: record.completed_at,
    }
}

fn ttl_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(900))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use floodgate_store::{MemoryProjectFileSink, MemoryUploadStore};

    use crate::object_store::MemoryObjectStore;
    use crate::scan::{FileReport, ScanForm, ScanSession};

    /// Scanner stub: fixed session, scripted status document.
    struct StubScanner {
        status: StdMutex<Option<ScanStatus>>,
    }

    impl StubScanner {
        fn new() -> Self {
            Self {
                status: StdMutex::new(None),
            }
        }

        fn set_status(&self, status: ScanStatus) {
            *self.status.lock().unwrap() = Some(status);
        }
    }

    #[async_trait::async_trait]
    impl ScanService for StubScanner {
        async fn initiate(
            &self,
            _request: &ScanInitiateRequest,
            _cancel: CancelSignal,
        ) -> Result<ScanSession, AdapterError> {
            Ok(ScanSession {
                upload_id: "U1".to_owned(),
                upload_url: "https://scan.example/u/U1".to_owned(),
                status_url: "https://scan.example/u/U1/status".to_owned(),
            })
        }

        async fn status(
            &self,
            _upload_id: &str,
            cancel: CancelSignal,
        ) -> Result<ScanStatus, AdapterError> {
            if *cancel.borrow() {
                return Err(AdapterError::Cancelled {
                    service: "scan-service",
                });
            }
            self.status
                .lock()
                .unwrap()
                .clone()
                .ok_or(AdapterError::Status {
                    service: "scan-service",
                    status: 404,
                    body: "unknown upload".to_owned(),
                })
        }
    }

    struct Harness {
        engine: UploadEngine,
        scanner: Arc<StubScanner>,
        objects: Arc<MemoryObjectStore>,
        projects: Arc<MemoryProjectFileSink>,
        uploads: Arc<MemoryUploadStore>,
    }

    fn harness() -> Harness {
        let uploads = Arc::new(MemoryUploadStore::new());
        let scanner = Arc::new(StubScanner::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let projects = Arc::new(MemoryProjectFileSink::new());
        let engine = UploadEngine::new(
            Arc::clone(&uploads) as Arc<dyn UploadStore>,
            Arc::clone(&scanner) as Arc<dyn ScanService>,
            Arc::clone(&objects) as Arc<dyn ObjectStore>,
            Arc::clone(&projects) as Arc<dyn ProjectFileSink>,
            UploadEngineConfig::default(),
        );
        Harness {
            engine,
            scanner,
            objects,
            projects,
            uploads,
        }
    }

    fn initiate_request() -> InitiateUpload {
        InitiateUpload {
            entity_type: "project".to_owned(),
            entity_id: "P-100".to_owned(),
            reference: Some("FRS-2024-001".to_owned()),
            redirect: "https://app.example/done".to_owned(),
            download_urls: None,
            user_id: Some("u-7".to_owned()),
        }
    }

    fn ready_status() -> ScanStatus {
        ScanStatus {
            upload_status: "ready".to_owned(),
            rejected_count: 0,
            form: ScanForm {
                file: FileReport {
                    filename: Some("plan.pdf".to_owned()),
                    content_type: Some("application/pdf".to_owned()),
                    detected_content_type: Some("application/pdf".to_owned()),
                    content_length: Some(1024),
                    checksum: Some("abc123".to_owned()),
                    file_status: Some("scanned".to_owned()),
                    rejection_reason: None,
                    s3_bucket: Some("b".to_owned()),
                    s3_key: Some("k".to_owned()),
                    contents: Vec::new(),
                },
            },
        }
    }

    #[tokio::test]
    async fn initiate_persists_pending_record() {
        let h = harness();
        let initiated = h.engine.initiate(initiate_request()).await.unwrap();

        assert_eq!(initiated.upload_id, "U1");
        assert_eq!(initiated.reference.as_deref(), Some("FRS-2024-001"));

        let record = h.uploads.get("U1").await.unwrap().unwrap();
        assert_eq!(record.upload_status, UploadStatus::Pending);
        assert_eq!(record.owner_user_id.as_deref(), Some("u-7"));
    }

    #[tokio::test]
    async fn initiate_with_download_urls_starts_processing() {
        let h = harness();
        let mut request = initiate_request();
        request.download_urls = Some(vec!["https://source.example/file.pdf".to_owned()]);
        h.engine.initiate(request).await.unwrap();

        let record = h.uploads.get("U1").await.unwrap().unwrap();
        assert_eq!(record.upload_status, UploadStatus::Processing);
    }

    #[tokio::test]
    async fn reconcile_to_ready_sets_storage_and_completed_at() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());

        let snapshot = h.engine.status("U1").await.unwrap();
        let record = &snapshot.record;

        assert_eq!(record.upload_status, UploadStatus::Ready);
        assert_eq!(record.storage_bucket.as_deref(), Some("b"));
        assert_eq!(record.storage_key.as_deref(), Some("k"));
        assert_eq!(record.file_status, Some(FileStatus::Scanned));
        assert!(record.completed_at.is_some());
        assert!(snapshot.warnings.is_empty());
    }

    #[tokio::test]
    async fn ready_transition_writes_project_cache() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());
        h.engine.status("U1").await.unwrap();

        let update = h.projects.latest("FRS-2024-001").await.unwrap();
        assert_eq!(update.filename.as_deref(), Some("plan.pdf"));
        assert_eq!(update.content_length, Some(1024));
        assert!(update.download_url.contains("/b/k"));
    }

    #[tokio::test]
    async fn rejected_upload_becomes_failed() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();

        let mut status = ready_status();
        status.rejected_count = 1;
        status.form.file.rejection_reason = Some("Virus detected".to_owned());
        h.scanner.set_status(status);

        let record = h.engine.status("U1").await.unwrap().record;
        assert_eq!(record.upload_status, UploadStatus::Failed);
        assert_eq!(record.rejection_reason.as_deref(), Some("Virus detected"));
        assert_eq!(record.rejected_count, 1);

        let err = h.engine.download_url("U1").await.unwrap_err();
        assert!(matches!(err, UploadError::NotReady { .. }));
    }

    #[tokio::test]
    async fn archive_with_disallowed_entry_fails_validation() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();

        let mut status = ready_status();
        status.form.file.content_type = Some("application/zip".to_owned());
        status.form.file.detected_content_type = Some("application/zip".to_owned());
        status.form.file.contents = vec!["doc.pdf".to_owned(), "malware.exe".to_owned()];
        h.scanner.set_status(status);

        let record = h.engine.status("U1").await.unwrap().record;
        assert_eq!(record.upload_status, UploadStatus::Failed);
        assert!(record.rejection_reason.unwrap().contains("malware.exe"));
        assert_eq!(record.file_status, Some(FileStatus::Rejected));
        assert!(record.rejected_count >= 1);
    }

    #[tokio::test]
    async fn empty_file_fails_validation() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();

        let mut status = ready_status();
        status.form.file.content_length = Some(0);
        h.scanner.set_status(status);

        let record = h.engine.status("U1").await.unwrap().record;
        assert_eq!(record.upload_status, UploadStatus::Failed);
        assert!(record.rejection_reason.unwrap().contains("file is empty"));
    }

    #[tokio::test]
    async fn terminal_records_are_not_reconciled_again() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());
        let first = h.engine.status("U1").await.unwrap().record;

        // Scanner now claims failed; the terminal record must not move.
        let mut status = ready_status();
        status.upload_status = "failed".to_owned();
        h.scanner.set_status(status);

        let second = h.engine.status("U1").await.unwrap().record;
        assert_eq!(second.upload_status, UploadStatus::Ready);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn matching_external_status_leaves_record_untouched() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        let before = h.uploads.get("U1").await.unwrap().unwrap();

        h.scanner.set_status(ScanStatus {
            upload_status: "pending".to_owned(),
            ..ScanStatus::default()
        });

        let after = h.engine.status("U1").await.unwrap().record;
        assert_eq!(after.upload_status, UploadStatus::Pending);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn unknown_upload_is_not_found() {
        let h = harness();
        let err = h.engine.status("missing").await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound { .. }));
    }

    #[tokio::test]
    async fn download_url_for_ready_record() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());
        h.engine.status("U1").await.unwrap();

        let download = h.engine.download_url("U1").await.unwrap();
        assert!(download.url.contains("/b/k"));
        assert!(download.url.contains("expires=900"));
        assert!(download.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn download_refused_before_ready() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        let err = h.engine.download_url("U1").await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::NotReady {
                status: UploadStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn quarantined_download_refused_regardless_of_status() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();

        let mut status = ready_status();
        status.form.file.file_status = Some("quarantined".to_owned());
        h.scanner.set_status(status);

        let record = h.engine.status("U1").await.unwrap().record;
        assert_eq!(record.upload_status, UploadStatus::Ready);
        assert_eq!(record.file_status, Some(FileStatus::Quarantined));

        let err = h.engine.download_url("U1").await.unwrap_err();
        assert!(matches!(err, UploadError::Quarantined { .. }));
    }

    #[tokio::test]
    async fn delete_removes_object_then_marks_record() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());
        h.engine.status("U1").await.unwrap();

        let record = h.engine.delete("U1").await.unwrap();
        assert_eq!(record.upload_status, UploadStatus::Deleted);
        assert_eq!(h.objects.delete_calls(), 1);
    }

    #[tokio::test]
    async fn repeated_delete_skips_the_object_store() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());
        h.engine.status("U1").await.unwrap();

        h.engine.delete("U1").await.unwrap();
        let record = h.engine.delete("U1").await.unwrap();
        assert_eq!(record.upload_status, UploadStatus::Deleted);
        assert_eq!(h.objects.delete_calls(), 1);
    }

    #[tokio::test]
    async fn delete_without_storage_location_is_refused() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        let err = h.engine.delete("U1").await.unwrap_err();
        assert!(matches!(err, UploadError::MissingStorage { .. }));
    }

    #[tokio::test]
    async fn callback_reconciles_like_a_poll() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();

        let snapshot = h.engine.callback("U1", &ready_status()).await.unwrap();
        assert_eq!(snapshot.record.upload_status, UploadStatus::Ready);

        // A second identical callback is a no-op on the terminal record.
        let again = h.engine.callback("U1", &ready_status()).await.unwrap();
        assert_eq!(again.record.updated_at, snapshot.record.updated_at);
    }

    #[tokio::test]
    async fn sweep_fails_records_the_scanner_forgot() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        // Scanner stub returns 404 until a status is scripted.

        let examined = h
            .engine
            .sweep_stale(Duration::ZERO, 10, cancel::never())
            .await
            .unwrap();
        assert_eq!(examined, 1);

        let record = h.uploads.get("U1").await.unwrap().unwrap();
        assert_eq!(record.upload_status, UploadStatus::Failed);
        assert!(
            record
                .rejection_reason
                .unwrap()
                .contains("no longer known")
        );
    }

    #[tokio::test]
    async fn sweep_reconciles_records_the_scanner_still_knows() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());

        let examined = h
            .engine
            .sweep_stale(Duration::ZERO, 10, cancel::never())
            .await
            .unwrap();
        assert_eq!(examined, 1);

        let record = h.uploads.get("U1").await.unwrap().unwrap();
        assert_eq!(record.upload_status, UploadStatus::Ready);
    }

    #[tokio::test]
    async fn sweep_stops_when_shutdown_fires() {
        let h = harness();
        h.engine.initiate(initiate_request()).await.unwrap();
        h.scanner.set_status(ready_status());

        let (_tx, cancelled) = tokio::sync::watch::channel(true);
        let examined = h
            .engine
            .sweep_stale(Duration::ZERO, 10, cancelled)
            .await
            .unwrap();
        assert_eq!(examined, 0);

        // Record untouched — the sweep never reached it.
        let record = h.uploads.get("U1").await.unwrap().unwrap();
        assert_eq!(record.upload_status, UploadStatus::Pending);
    }
}
