//! HTTP error types for the Floodgate server.
//!
//! Maps domain errors from `floodgate-core` and `floodgate-store` into
//! appropriate HTTP responses. Every error variant produces a JSON body with
//! a machine-readable `error` field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use floodgate_core::error::{AdapterError, UploadError};
use floodgate_store::StoreError;

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input, or the operation is not valid for the
    /// record's current state.
    BadRequest(String),
    /// The operation is refused outright (quarantined file).
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// The request collided with existing state (duplicate upload id).
    Conflict(String),
    /// Internal server error (store, adapter, or missing storage fields).
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::NotFound { .. } => Self::NotFound(err.to_string()),
            UploadError::NotReady { .. } => Self::BadRequest(err.to_string()),
            UploadError::Quarantined { .. } => Self::Forbidden(err.to_string()),
            UploadError::MissingStorage { .. } => Self::Internal(err.to_string()),
            UploadError::Store(StoreError::UploadNotFound { .. }) => {
                Self::NotFound(err.to_string())
            }
            UploadError::Store(StoreError::DuplicateUpload { .. }) => {
                Self::Conflict(err.to_string())
            }
            UploadError::Store(_) | UploadError::Adapter(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<AdapterError> for AppError {
    fn from(err: AdapterError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UploadNotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::DuplicateUpload { .. } => Self::Conflict(err.to_string()),
            _ => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use floodgate_store::UploadStatus;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn not_ready_maps_to_400() {
        let err = UploadError::NotReady {
            upload_id: "U1".to_owned(),
            status: UploadStatus::Pending,
        };
        assert_eq!(status_of(err.into()), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn quarantined_maps_to_403() {
        let err = UploadError::Quarantined {
            upload_id: "U1".to_owned(),
        };
        assert_eq!(status_of(err.into()), StatusCode::FORBIDDEN);
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = UploadError::NotFound {
            upload_id: "U1".to_owned(),
        };
        assert_eq!(status_of(err.into()), StatusCode::NOT_FOUND);
    }

    #[test]
    fn duplicate_upload_maps_to_409() {
        let err = UploadError::Store(StoreError::DuplicateUpload {
            upload_id: "U1".to_owned(),
        });
        assert_eq!(status_of(err.into()), StatusCode::CONFLICT);
    }

    #[test]
    fn missing_storage_maps_to_500() {
        let err = UploadError::MissingStorage {
            upload_id: "U1".to_owned(),
        };
        assert_eq!(status_of(err.into()), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn adapter_failure_maps_to_500() {
        let err = UploadError::Adapter(AdapterError::Transport {
            service: "scan-service",
            reason: "timed out".to_owned(),
        });
        assert_eq!(status_of(err.into()), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
