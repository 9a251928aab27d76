//! In-memory store backends for testing and single-replica dev mode.
//!
//! All state lives in a `HashMap` behind a `tokio::sync::Mutex`, which
//! linearizes every operation — the same atomicity the PostgreSQL backend
//! gets from single-statement writes. Data is lost when the process exits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{
    LockRow, NewUpload, ProjectFileUpdate, UploadOutcome, UploadRecord, UploadStatus,
};
use crate::{LockStore, ProjectFileSink, UploadStore};

/// An in-memory [`LockStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    rows: Arc<Mutex<HashMap<String, LockRow>>>,
}

impl MemoryLockStore {
    /// Create a new empty lock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryLockStore {
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        match rows.get_mut(name) {
            None => {
                rows.insert(
                    name.to_owned(),
                    LockRow {
                        task_name: name.to_owned(),
                        owner_id: Some(owner.to_owned()),
                        expires_at,
                        last_run_at: None,
                    },
                );
                Ok(true)
            }
            Some(row) if row.owner_id.is_none() || row.expires_at <= now => {
                row.owner_id = Some(owner.to_owned());
                row.expires_at = expires_at;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn verify(&self, name: &str, owner: &str) -> Result<bool, StoreError> {
        let rows = self.rows.lock().await;
        let now = Utc::now();
        Ok(rows
            .get(name)
            .is_some_and(|row| row.owner_id.as_deref() == Some(owner) && row.expires_at > now))
    }

    async fn refresh(
        &self,
        name: &str,
        owner: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(name) {
            Some(row) if row.owner_id.as_deref() == Some(owner) => {
                row.expires_at = new_expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(name) {
            Some(row) if row.owner_id.as_deref() == Some(owner) => {
                row.owner_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_last_run(&self, name: &str, owner: &str) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(name) {
            Some(row) if row.owner_id.as_deref() == Some(owner) => {
                row.last_run_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_expired(&self, grace: Duration) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let before = rows.len();
        rows.retain(|_, row| row.expires_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn release_all_by_owner(&self, owner: &str) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let mut released = 0u64;
        for row in rows.values_mut() {
            if row.owner_id.as_deref() == Some(owner) {
                row.owner_id = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn list(&self) -> Result<Vec<LockRow>, StoreError> {
        let rows = self.rows.lock().await;
        let mut all: Vec<LockRow> = rows.values().cloned().collect();
        all.sort_by(|a, b| a.task_name.cmp(&b.task_name));
        Ok(all)
    }
}

/// An in-memory [`UploadStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryUploadStore {
    records: Arc<Mutex<HashMap<String, UploadRecord>>>,
}

impl MemoryUploadStore {
    /// Create a new empty upload store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl UploadStore for MemoryUploadStore {
    async fn insert(&self, new: NewUpload) -> Result<UploadRecord, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&new.upload_id) {
            return Err(StoreError::DuplicateUpload {
                upload_id: new.upload_id,
            });
        }
        let now = Utc::now();
        let record = UploadRecord {
            upload_id: new.upload_id.clone(),
            upload_status: new.upload_status,
            file_status: None,
            filename: None,
            content_type: None,
            detected_content_type: None,
            content_length: None,
            checksum: None,
            storage_bucket: None,
            storage_key: None,
            reference: new.reference,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            rejection_reason: None,
            rejected_count: 0,
            owner_user_id: new.owner_user_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        records.insert(new.upload_id, record.clone());
        Ok(record)
    }

    async fn get(&self, upload_id: &str) -> Result<Option<UploadRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(upload_id).cloned())
    }

    async fn apply_outcome(
        &self,
        upload_id: &str,
        outcome: &UploadOutcome,
    ) -> Result<UploadRecord, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::UploadNotFound {
                upload_id: upload_id.to_owned(),
            })?;
        record.upload_status = outcome.upload_status;
        record.file_status = outcome.file_status;
        record.filename.clone_from(&outcome.filename);
        record.content_type.clone_from(&outcome.content_type);
        record
            .detected_content_type
            .clone_from(&outcome.detected_content_type);
        record.content_length = outcome.content_length;
        record.checksum.clone_from(&outcome.checksum);
        record.storage_bucket.clone_from(&outcome.storage_bucket);
        record.storage_key.clone_from(&outcome.storage_key);
        record
            .rejection_reason
            .clone_from(&outcome.rejection_reason);
        record.rejected_count = outcome.rejected_count;
        record.completed_at = outcome.completed_at;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn mark_deleted(&self, upload_id: &str) -> Result<UploadRecord, StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::UploadNotFound {
                upload_id: upload_id.to_owned(),
            })?;
        record.upload_status = UploadStatus::Deleted;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut stale: Vec<UploadRecord> = records
            .values()
            .filter(|r| !r.upload_status.is_terminal() && r.created_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.created_at);
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }
}

/// An in-memory [`ProjectFileSink`] recording the last write per reference.
#[derive(Debug, Clone, Default)]
pub struct MemoryProjectFileSink {
    updates: Arc<Mutex<HashMap<String, ProjectFileUpdate>>>,
}

impl MemoryProjectFileSink {
    /// Create a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the latest cache write for a reference, for test assertions.
    pub async fn latest(&self, reference: &str) -> Option<ProjectFileUpdate> {
        self.updates.lock().await.get(reference).cloned()
    }
}

#[async_trait::async_trait]
impl ProjectFileSink for MemoryProjectFileSink {
    async fn record_latest_upload(&self, update: &ProjectFileUpdate) -> Result<(), StoreError> {
        let mut updates = self.updates.lock().await;
        updates.insert(update.reference.clone(), update.clone());
        Ok(())
    }
}
