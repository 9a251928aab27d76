//! Object-store adapter.
//!
//! Thin typed interface over the bucket the scan service deposits clean
//! files into: presigned download URLs, raw reads, and deletes. The
//! production implementation is `aws-sdk-s3`; [`MemoryObjectStore`] backs
//! tests and single-process dev mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use tokio::sync::Mutex;

use crate::cancel::{self, CancelSignal};
use crate::error::AdapterError;

const SERVICE: &str = "object-store";

/// Typed surface of the object store.
///
/// Every call races against its [`CancelSignal`] so shutdown can stop a
/// fan-out mid-call.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Generate a time-limited download URL.
    ///
    /// `filename`, when supplied, sets a content-disposition header encoded
    /// per RFC 6266 so browsers save the object under its original name.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] carrying the HTTP status or transport
    /// cause, or [`AdapterError::Cancelled`] when `cancel` fires first.
    async fn presigned_download(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        filename: Option<&str>,
        cancel: CancelSignal,
    ) -> Result<String, AdapterError>;

    /// Fetch an object's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] carrying the HTTP status or transport
    /// cause, or [`AdapterError::Cancelled`] when `cancel` fires first.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: CancelSignal,
    ) -> Result<Vec<u8>, AdapterError>;

    /// Delete an object. Deleting a missing object is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] carrying the HTTP status or transport
    /// cause, or [`AdapterError::Cancelled`] when `cancel` fires first.
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: CancelSignal,
    ) -> Result<(), AdapterError>;
}

/// RFC 6266 content-disposition with an ASCII fallback and a UTF-8 form.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == '"' || !(c.is_ascii_graphic() || c == ' ') {
                '_'
            } else {
                c
            }
        })
        .collect();
    let encoded = urlencoding::encode(filename);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

fn sdk_err<E>(err: SdkError<E>) -> AdapterError
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(ctx) => AdapterError::Status {
            service: SERVICE,
            status: ctx.raw().status().as_u16(),
            body: ctx.err().to_string(),
        },
        other => AdapterError::Transport {
            service: SERVICE,
            reason: other.to_string(),
        },
    }
}

/// Production object store over S3 (or any S3-compatible endpoint).
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Build a client from the ambient AWS environment.
    ///
    /// `endpoint` switches to an S3-compatible local service (path-style
    /// addressing), used for development against MinIO-style stores.
    pub async fn connect(region: &str, endpoint: Option<&str>) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_owned()))
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    /// Wrap an already-configured client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn presigned_download(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        filename: Option<&str>,
        cancel: CancelSignal,
    ) -> Result<String, AdapterError> {
        let presign =
            PresigningConfig::expires_in(expires_in).map_err(|e| AdapterError::InvalidPayload {
                service: SERVICE,
                reason: e.to_string(),
            })?;

        let mut request = self.client.get_object().bucket(bucket).key(key);
        if let Some(filename) = filename {
            request = request.response_content_disposition(content_disposition(filename));
        }

        tokio::select! {
            presigned = request.presigned(presign) => {
                Ok(presigned.map_err(sdk_err)?.uri().to_string())
            }
            () = cancel::fired(cancel) => Err(AdapterError::Cancelled { service: SERVICE }),
        }
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: CancelSignal,
    ) -> Result<Vec<u8>, AdapterError> {
        let send = self.client.get_object().bucket(bucket).key(key).send();

        let output = tokio::select! {
            output = send => output.map_err(sdk_err)?,
            () = cancel::fired(cancel.clone()) => {
                return Err(AdapterError::Cancelled { service: SERVICE });
            }
        };

        let collect = output.body.collect();
        tokio::select! {
            data = collect => {
                let data = data.map_err(|e| AdapterError::Transport {
                    service: SERVICE,
                    reason: e.to_string(),
                })?;
                Ok(data.into_bytes().to_vec())
            }
            () = cancel::fired(cancel) => Err(AdapterError::Cancelled { service: SERVICE }),
        }
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: CancelSignal,
    ) -> Result<(), AdapterError> {
        let send = self.client.delete_object().bucket(bucket).key(key).send();

        tokio::select! {
            result = send => {
                result.map_err(sdk_err)?;
                Ok(())
            }
            () = cancel::fired(cancel) => Err(AdapterError::Cancelled { service: SERVICE }),
        }
    }
}

/// In-memory object store for tests and dev mode.
///
/// Presigned URLs are deterministic pseudo-URLs; delete calls are counted so
/// tests can assert idempotence at the adapter boundary.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
    delete_calls: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object, for tests.
    pub async fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.objects
            .lock()
            .await
            .insert((bucket.to_owned(), key.to_owned()), bytes);
    }

    /// How many delete calls reached this adapter.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

fn check_cancel(cancel: &CancelSignal) -> Result<(), AdapterError> {
    if *cancel.borrow() {
        return Err(AdapterError::Cancelled { service: SERVICE });
    }
    Ok(())
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn presigned_download(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
        filename: Option<&str>,
        cancel: CancelSignal,
    ) -> Result<String, AdapterError> {
        check_cancel(&cancel)?;
        let mut url = format!(
            "https://objects.invalid/{bucket}/{key}?expires={}",
            expires_in.as_secs()
        );
        if let Some(filename) = filename {
            url.push_str("&filename=");
            url.push_str(&urlencoding::encode(filename));
        }
        Ok(url)
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: CancelSignal,
    ) -> Result<Vec<u8>, AdapterError> {
        check_cancel(&cancel)?;
        self.objects
            .lock()
            .await
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
            .ok_or(AdapterError::Status {
                service: SERVICE,
                status: 404,
                body: "no such object".to_owned(),
            })
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: CancelSignal,
    ) -> Result<(), AdapterError> {
        check_cancel(&cancel)?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .await
            .remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn disposition_keeps_ascii_and_encodes_utf8() {
        let header = content_disposition("flood plan (v2).pdf");
        assert!(header.starts_with("attachment; filename=\"flood plan (v2).pdf\""));
        assert!(header.contains("filename*=UTF-8''flood%20plan%20%28v2%29.pdf"));
    }

    #[test]
    fn disposition_replaces_quotes_and_control_chars() {
        let header = content_disposition("a\"b\nc.pdf");
        assert!(header.contains("filename=\"a_b_c.pdf\""));
    }

    #[tokio::test]
    async fn memory_store_roundtrip_and_delete_count() {
        let store = MemoryObjectStore::new();
        store.put_object("b", "k", b"data".to_vec()).await;
        assert_eq!(
            store.get_object("b", "k", cancel::never()).await.unwrap(),
            b"data".to_vec()
        );

        store.delete_object("b", "k", cancel::never()).await.unwrap();
        store.delete_object("b", "k", cancel::never()).await.unwrap();
        assert_eq!(store.delete_calls(), 2);
        assert!(store.get_object("b", "k", cancel::never()).await.is_err());
    }

    #[tokio::test]
    async fn memory_presigned_url_carries_expiry_and_filename() {
        let store = MemoryObjectStore::new();
        let url = store
            .presigned_download(
                "b",
                "k",
                Duration::from_secs(900),
                Some("plan.pdf"),
                cancel::never(),
            )
            .await
            .unwrap();
        assert!(url.contains("expires=900"));
        assert!(url.contains("filename=plan.pdf"));
    }

    #[tokio::test]
    async fn fired_cancel_signal_refuses_the_call() {
        let store = MemoryObjectStore::new();
        store.put_object("b", "k", b"data".to_vec()).await;
        let (_tx, cancelled) = tokio::sync::watch::channel(true);

        let err = store.get_object("b", "k", cancelled.clone()).await.unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled { .. }));

        let err = store.delete_object("b", "k", cancelled).await.unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled { .. }));
        assert_eq!(store.delete_calls(), 0);
    }
}
