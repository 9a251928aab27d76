//! Scan service adapter.
//!
//! The external scan service accepts an upload session, virus-scans the
//! file, and reports a final status. This module defines the typed surface
//! the engine consumes ([`ScanService`]) and the production HTTP
//! implementation over `reqwest`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::{self, CancelSignal};
use crate::error::AdapterError;

const SERVICE: &str = "scan-service";

/// Request to open an upload session.
#[derive(Debug, Clone, Serialize)]
pub struct ScanInitiateRequest {
    /// Where the scan service redirects the browser after upload.
    pub redirect: String,
    /// Push-notification URL for status changes, when callbacks are enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    /// Opaque business metadata echoed back in status reports.
    pub metadata: serde_json::Value,
    /// MIME types the session should accept.
    pub mime_types: Vec<String>,
    /// Maximum accepted file size in bytes.
    pub max_file_size: i64,
    /// Bucket the scanned file lands in.
    pub storage_bucket: String,
    /// Key prefix within the bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    /// URLs for the scan service to fetch server-to-server, instead of a
    /// browser upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_urls: Option<Vec<String>>,
}

/// An opened upload session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    /// Id the scan service assigned to this upload.
    pub upload_id: String,
    /// Where the client POSTs the file.
    pub upload_url: String,
    /// Where the client polls for progress.
    pub status_url: String,
}

/// The scan service's view of an upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStatus {
    /// Lifecycle status as the scanner reports it.
    pub upload_status: String,
    /// Number of rejections so far.
    #[serde(default)]
    pub rejected_count: i32,
    /// Form payload wrapping the file report.
    #[serde(default)]
    pub form: ScanForm,
}

/// Form wrapper in the scanner's status document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanForm {
    /// The file report itself.
    #[serde(default)]
    pub file: FileReport,
}

/// Per-file metadata reported by the scanner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileReport {
    /// Original filename.
    #[serde(default)]
    pub filename: Option<String>,
    /// Declared MIME type.
    #[serde(default)]
    pub content_type: Option<String>,
    /// MIME type the scanner detected from content.
    #[serde(default)]
    pub detected_content_type: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub content_length: Option<i64>,
    /// Content checksum.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Scanner's file verdict (`complete`, `scanned`, `quarantined`,
    /// `rejected`).
    #[serde(default)]
    pub file_status: Option<String>,
    /// Human-readable rejection reason.
    #[serde(default)]
    pub rejection_reason: Option<String>,
    /// Bucket the scanned file landed in.
    #[serde(default)]
    pub s3_bucket: Option<String>,
    /// Key the scanned file landed at.
    #[serde(default)]
    pub s3_key: Option<String>,
    /// Entry names, when the file is an archive.
    #[serde(default)]
    pub contents: Vec<String>,
}

/// Typed surface of the external scan service.
///
/// Every call races against its [`CancelSignal`] so shutdown can stop a
/// fan-out mid-call.
#[async_trait::async_trait]
pub trait ScanService: Send + Sync + 'static {
    /// Open an upload session.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] carrying the HTTP status or transport
    /// cause, or [`AdapterError::Cancelled`] when `cancel` fires first.
    async fn initiate(
        &self,
        request: &ScanInitiateRequest,
        cancel: CancelSignal,
    ) -> Result<ScanSession, AdapterError>;

    /// Fetch the scanner's current view of an upload.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] carrying the HTTP status or transport
    /// cause, or [`AdapterError::Cancelled`] when `cancel` fires first.
    async fn status(
        &self,
        upload_id: &str,
        cancel: CancelSignal,
    ) -> Result<ScanStatus, AdapterError>;
}

/// Production scan service client.
#[derive(Debug, Clone)]
pub struct HttpScanService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScanService {
    /// Build a client against `base_url` with a hard per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] if the TLS backend fails to
    /// initialize.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Transport {
                service: SERVICE,
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AdapterError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| AdapterError::InvalidPayload {
                service: SERVICE,
                reason: e.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl ScanService for HttpScanService {
    async fn initiate(
        &self,
        request: &ScanInitiateRequest,
        cancel: CancelSignal,
    ) -> Result<ScanSession, AdapterError> {
        let send = self
            .client
            .post(format!("{}/uploads", self.base_url))
            .json(request)
            .send();

        tokio::select! {
            response = send => {
                let response = response.map_err(|e| AdapterError::Transport {
                    service: SERVICE,
                    reason: e.to_string(),
                })?;
                Self::decode(response).await
            }
            () = cancel::fired(cancel) => Err(AdapterError::Cancelled { service: SERVICE }),
        }
    }

    async fn status(
        &self,
        upload_id: &str,
        cancel: CancelSignal,
    ) -> Result<ScanStatus, AdapterError> {
        let send = self
            .client
            .get(format!("{}/uploads/{upload_id}/status", self.base_url))
            .send();

        tokio::select! {
            response = send => {
                let response = response.map_err(|e| AdapterError::Transport {
                    service: SERVICE,
                    reason: e.to_string(),
                })?;
                Self::decode(response).await
            }
            () = cancel::fired(cancel) => Err(AdapterError::Cancelled { service: SERVICE }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn initiate_posts_session_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/uploads"))
            .and(body_partial_json(serde_json::json!({
                "redirect": "https://app.example/done",
                "storage_bucket": "b",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "upload_id": "U1",
                "upload_url": "https://scan.example/u/U1",
                "status_url": "https://scan.example/u/U1/status",
            })))
            .mount(&server)
            .await;

        let client = HttpScanService::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let session = client
            .initiate(
                &ScanInitiateRequest {
                    redirect: "https://app.example/done".to_owned(),
                    callback: None,
                    metadata: serde_json::json!({"reference": "FRS-1"}),
                    mime_types: vec!["application/pdf".to_owned()],
                    max_file_size: 1024,
                    storage_bucket: "b".to_owned(),
                    storage_path: None,
                    download_urls: None,
                },
                cancel::never(),
            )
            .await
            .unwrap();

        assert_eq!(session.upload_id, "U1");
        assert_eq!(session.status_url, "https://scan.example/u/U1/status");
    }

    #[tokio::test]
    async fn status_decodes_file_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/U1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "upload_status": "ready",
                "rejected_count": 0,
                "form": {"file": {
                    "filename": "plan.pdf",
                    "content_type": "application/pdf",
                    "detected_content_type": "application/pdf",
                    "content_length": 1024,
                    "s3_bucket": "b",
                    "s3_key": "k",
                }},
            })))
            .mount(&server)
            .await;

        let client = HttpScanService::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let status = client.status("U1", cancel::never()).await.unwrap();

        assert_eq!(status.upload_status, "ready");
        assert_eq!(status.form.file.content_length, Some(1024));
        assert_eq!(status.form.file.s3_key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn error_status_carries_http_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/missing/status"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such upload"))
            .mount(&server)
            .await;

        let client = HttpScanService::new(&server.uri(), Duration::from_secs(2)).unwrap();
        let err = client.status("missing", cancel::never()).await.unwrap_err();

        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn unreachable_service_is_a_transport_error() {
        // Port 9 (discard) is not listening.
        let client =
            HttpScanService::new("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
        let err = client.status("U1", cancel::never()).await.unwrap_err();

        assert!(matches!(err, AdapterError::Transport { .. }));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn fired_cancel_signal_abandons_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uploads/U1/status"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"upload_status": "pending"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = HttpScanService::new(&server.uri(), Duration::from_secs(10)).unwrap();
        let (_tx, cancelled) = tokio::sync::watch::channel(true);
        let err = client.status("U1", cancelled).await.unwrap_err();

        assert!(matches!(err, AdapterError::Cancelled { .. }));
    }
}
