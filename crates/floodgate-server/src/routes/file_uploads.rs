//! File-upload routes: `/file-uploads/*`
//!
//! Paths:
//! - `POST   /file-uploads/initiate` — open an upload session
//! - `POST   /file-uploads/callback` — scan-service push (when enabled)
//! - `GET    /file-uploads/{upload_id}/status` — poll and reconcile
//! - `GET    /file-uploads/{upload_id}/download` — presigned download URL
//! - `DELETE /file-uploads/{upload_id}` — delete the stored object

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use floodgate_core::scan::ScanStatus;
use floodgate_core::upload_engine::{DownloadUrl, InitiateUpload, InitiatedUpload};
use floodgate_store::UploadRecord;

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/file-uploads` router.
///
/// The callback route is only mounted when `enable_callback` is set — a
/// deployment that relies on polling alone leaves the push endpoint closed.
pub fn router(enable_callback: bool) -> Router<Arc<AppState>> {
    let mut router = Router::new()
        .route("/initiate", post(initiate))
        .route("/{upload_id}/status", get(status))
        .route("/{upload_id}/download", get(download))
        .route("/{upload_id}", axum::routing::delete(delete_upload));

    if enable_callback {
        router = router.route("/callback", post(callback));
    }
    router
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub entity_type: String,
    pub entity_id: String,
    pub reference: Option<String>,
    pub redirect: String,
    pub download_urls: Option<Vec<String>>,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub upload_id: String,
    #[serde(flatten)]
    pub status: ScanStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub record: UploadRecord,
    /// Non-fatal problems surfaced by the reconciliation (downstream
    /// project-cache write failures).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Open an upload session with the scan service.
async fn initiate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<InitiatedUpload>), AppError> {
    let initiated = state
        .upload_engine
        .initiate(InitiateUpload {
            entity_type: body.entity_type,
            entity_id: body.entity_id,
            reference: body.reference,
            redirect: body.redirect,
            download_urls: body.download_urls,
            user_id: body.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(initiated)))
}

/// Receive a scan-service push and reconcile.
///
/// The payload is parsed manually so a malformed body yields a 400 rather
/// than the extractor's default rejection.
async fn callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SuccessResponse>, AppError> {
    let request: CallbackRequest = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("invalid callback payload: {e}")))?;

    state
        .upload_engine
        .callback(&request.upload_id, &request.status)
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Poll an upload's status, reconciling with the scanner when in flight.
async fn status(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let snapshot = state.upload_engine.status(&upload_id).await?;
    Ok(Json(StatusResponse {
        record: snapshot.record,
        warnings: snapshot.warnings,
    }))
}

/// Generate a presigned download URL.
async fn download(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Json<DownloadUrl>, AppError> {
    let download = state.upload_engine.download_url(&upload_id).await?;
    Ok(Json(download))
}

/// Delete the stored object and mark the record deleted.
async fn delete_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    state.upload_engine.delete(&upload_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}
