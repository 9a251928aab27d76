//! PostgreSQL store backends.
//!
//! Feature-gated behind `postgres-backend`. Uses sqlx with the Tokio runtime
//! for fully async operations. Each trait method is a single SQL statement;
//! the lock store's conditional upsert is what makes concurrent `try_acquire`
//! calls yield exactly one winner — the row lock taken by `INSERT ... ON
//! CONFLICT DO UPDATE` serializes competing claims on the same task name.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::error::StoreError;
use crate::model::{
    FileStatus, LockRow, NewUpload, ProjectFileUpdate, UploadOutcome, UploadRecord, UploadStatus,
};
use crate::{LockStore, ProjectFileSink, UploadStore};

/// Open a connection pool against `database_url`.
///
/// # Errors
///
/// Returns [`StoreError::Open`] if the connection fails.
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Open {
            target: "postgres".to_owned(),
            reason: e.to_string(),
        })
}

fn open_err(e: sqlx::Error) -> StoreError {
    StoreError::Open {
        target: "postgres".to_owned(),
        reason: format!("migration failed: {e}"),
    }
}

/// A [`LockStore`] backed by a `scheduler_locks` table.
#[derive(Debug, Clone)]
pub struct PgLockStore {
    pool: PgPool,
}

impl PgLockStore {
    /// Create the store, running the table migration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the migration fails.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scheduler_locks (\
                task_name   TEXT PRIMARY KEY, \
                owner_id    TEXT, \
                expires_at  TIMESTAMPTZ NOT NULL, \
                last_run_at TIMESTAMPTZ\
            )",
        )
        .execute(&pool)
        .await
        .map_err(open_err)?;

        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct LockRowRaw {
    task_name: String,
    owner_id: Option<String>,
    expires_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
}

impl From<LockRowRaw> for LockRow {
    fn from(raw: LockRowRaw) -> Self {
        Self {
            task_name: raw.task_name,
            owner_id: raw.owner_id,
            expires_at: raw.expires_at,
            last_run_at: raw.last_run_at,
        }
    }
}

#[async_trait::async_trait]
impl LockStore for PgLockStore {
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO scheduler_locks (task_name, owner_id, expires_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (task_name) DO UPDATE \
             SET owner_id = EXCLUDED.owner_id, expires_at = EXCLUDED.expires_at \
             WHERE scheduler_locks.owner_id IS NULL \
                OR scheduler_locks.expires_at <= NOW()",
        )
        .bind(name)
        .bind(owner)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Write {
            key: name.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn verify(&self, name: &str, owner: &str) -> Result<bool, StoreError> {
        let row: Option<(bool,)> = sqlx::query_as(
            "SELECT EXISTS(\
                SELECT 1 FROM scheduler_locks \
                WHERE task_name = $1 AND owner_id = $2 AND expires_at > NOW()\
            )",
        )
        .bind(name)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Read {
            key: name.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(row.is_some_and(|(held,)| held))
    }

    async fn refresh(
        &self,
        name: &str,
        owner: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE scheduler_locks SET expires_at = $3 \
             WHERE task_name = $1 AND owner_id = $2",
        )
        .bind(name)
        .bind(owner)
        .bind(new_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Write {
            key: name.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE scheduler_locks SET owner_id = NULL \
             WHERE task_name = $1 AND owner_id = $2",
        )
        .bind(name)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Write {
            key: name.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_last_run(&self, name: &str, owner: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE scheduler_locks SET last_run_at = NOW() \
             WHERE task_name = $1 AND owner_id = $2",
        )
        .bind(name)
        .bind(owner)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Write {
            key: name.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn sweep_expired(&self, grace: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let result = sqlx::query("DELETE FROM scheduler_locks WHERE expires_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Delete {
                key: "scheduler_locks".to_owned(),
                reason: e.to_string(),
            })?;

        if result.rows_affected() > 0 {
            tracing::debug!(removed = result.rows_affected(), "swept dead lease rows");
        }
        Ok(result.rows_affected())
    }

    async fn release_all_by_owner(&self, owner: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE scheduler_locks SET owner_id = NULL WHERE owner_id = $1")
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Write {
                key: owner.to_owned(),
                reason: e.to_string(),
            })?;

        tracing::debug!(owner, released = result.rows_affected(), "released rows by owner");
        Ok(result.rows_affected())
    }

    async fn list(&self) -> Result<Vec<LockRow>, StoreError> {
        let rows: Vec<LockRowRaw> = sqlx::query_as(
            "SELECT task_name, owner_id, expires_at, last_run_at \
             FROM scheduler_locks ORDER BY task_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::List {
            scope: "scheduler_locks".to_owned(),
            reason: e.to_string(),
        })?;

        Ok(rows.into_iter().map(LockRow::from).collect())
    }
}

const UPLOAD_COLUMNS: &str = "upload_id, upload_status, file_status, filename, content_type, \
     detected_content_type, content_length, checksum, storage_bucket, storage_key, \
     reference, entity_type, entity_id, rejection_reason, rejected_count, \
     owner_user_id, created_at, updated_at, completed_at";

/// An [`UploadStore`] backed by a `file_uploads` table.
#[derive(Debug, Clone)]
pub struct PgUploadStore {
    pool: PgPool,
}

impl PgUploadStore {
    /// Create the store, running the table migration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the migration fails.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS file_uploads (\
                upload_id             TEXT PRIMARY KEY, \
                upload_status         TEXT NOT NULL, \
                file_status           TEXT, \
                filename              TEXT, \
                content_type          TEXT, \
                detected_content_type TEXT, \
                content_length        BIGINT, \
                checksum              TEXT, \
                storage_bucket        TEXT, \
                storage_key           TEXT, \
                reference             TEXT, \
                entity_type           TEXT NOT NULL, \
                entity_id             TEXT NOT NULL, \
                rejection_reason      TEXT, \
                rejected_count        INTEGER NOT NULL DEFAULT 0, \
                owner_user_id         TEXT, \
                created_at            TIMESTAMPTZ NOT NULL, \
                updated_at            TIMESTAMPTZ NOT NULL, \
                completed_at          TIMESTAMPTZ\
            )",
        )
        .execute(&pool)
        .await
        .map_err(open_err)?;

        // Partial index serving list_stale.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_file_uploads_stale \
             ON file_uploads (created_at) \
             WHERE upload_status IN ('pending', 'processing')",
        )
        .execute(&pool)
        .await
        .map_err(open_err)?;

        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct UploadRecordRaw {
    upload_id: String,
    upload_status: String,
    file_status: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    detected_content_type: Option<String>,
    content_length: Option<i64>,
    checksum: Option<String>,
    storage_bucket: Option<String>,
    storage_key: Option<String>,
    reference: Option<String>,
    entity_type: String,
    entity_id: String,
    rejection_reason: Option<String>,
    rejected_count: i32,
    owner_user_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<UploadRecordRaw> for UploadRecord {
    type Error = StoreError;

    fn try_from(raw: UploadRecordRaw) -> Result<Self, StoreError> {
        let upload_status =
            UploadStatus::parse(&raw.upload_status).ok_or_else(|| StoreError::CorruptStatus {
                key: raw.upload_id.clone(),
                value: raw.upload_status.clone(),
            })?;
        let file_status = match &raw.file_status {
            None => None,
            Some(value) => Some(FileStatus::parse(value).ok_or_else(|| {
                StoreError::CorruptStatus {
                    key: raw.upload_id.clone(),
                    value: value.clone(),
                }
            })?),
        };
        Ok(Self {
            upload_id: raw.upload_id,
            upload_status,
            file_status,
            filename: raw.filename,
            content_type: raw.content_type,
            detected_content_type: raw.detected_content_type,
            content_length: raw.content_length,
            checksum: raw.checksum,
            storage_bucket: raw.storage_bucket,
            storage_key: raw.storage_key,
            reference: raw.reference,
            entity_type: raw.entity_type,
            entity_id: raw.entity_id,
            rejection_reason: raw.rejection_reason,
            rejected_count: raw.rejected_count,
            owner_user_id: raw.owner_user_id,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            completed_at: raw.completed_at,
        })
    }
}

#[async_trait::async_trait]
impl UploadStore for PgUploadStore {
    async fn insert(&self, new: NewUpload) -> Result<UploadRecord, StoreError> {
        let raw: UploadRecordRaw = sqlx::query_as(&format!(
            "INSERT INTO file_uploads \
             (upload_id, upload_status, entity_type, entity_id, reference, \
              owner_user_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW()) \
             RETURNING {UPLOAD_COLUMNS}"
        ))
        .bind(&new.upload_id)
        .bind(new.upload_status.as_str())
        .bind(&new.entity_type)
        .bind(&new.entity_id)
        .bind(&new.reference)
        .bind(&new.owner_user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                StoreError::DuplicateUpload {
                    upload_id: new.upload_id.clone(),
                }
            } else {
                StoreError::Write {
                    key: new.upload_id.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        UploadRecord::try_from(raw)
    }

    async fn get(&self, upload_id: &str) -> Result<Option<UploadRecord>, StoreError> {
        let raw: Option<UploadRecordRaw> = sqlx::query_as(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM file_uploads WHERE upload_id = $1"
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Read {
            key: upload_id.to_owned(),
            reason: e.to_string(),
        })?;

        raw.map(UploadRecord::try_from).transpose()
    }

    async fn apply_outcome(
        &self,
        upload_id: &str,
        outcome: &UploadOutcome,
    ) -> Result<UploadRecord, StoreError> {
        let raw: Option<UploadRecordRaw> = sqlx::query_as(&format!(
            "UPDATE file_uploads SET \
                upload_status = $2, \
                file_status = $3, \
                filename = $4, \
                content_type = $5, \
                detected_content_type = $6, \
                content_length = $7, \
                checksum = $8, \
                storage_bucket = $9, \
                storage_key = $10, \
                rejection_reason = $11, \
                rejected_count = $12, \
                completed_at = $13, \
                updated_at = NOW() \
             WHERE upload_id = $1 \
             RETURNING {UPLOAD_COLUMNS}"
        ))
        .bind(upload_id)
        .bind(outcome.upload_status.as_str())
        .bind(outcome.file_status.map(FileStatus::as_str))
        .bind(&outcome.filename)
        .bind(&outcome.content_type)
        .bind(&outcome.detected_content_type)
        .bind(outcome.content_length)
        .bind(&outcome.checksum)
        .bind(&outcome.storage_bucket)
        .bind(&outcome.storage_key)
        .bind(&outcome.rejection_reason)
        .bind(outcome.rejected_count)
        .bind(outcome.completed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Write {
            key: upload_id.to_owned(),
            reason: e.to_string(),
        })?;

        raw.ok_or_else(|| StoreError::UploadNotFound {
            upload_id: upload_id.to_owned(),
        })
        .and_then(UploadRecord::try_from)
    }

    async fn mark_deleted(&self, upload_id: &str) -> Result<UploadRecord, StoreError> {
        let raw: Option<UploadRecordRaw> = sqlx::query_as(&format!(
            "UPDATE file_uploads SET upload_status = 'deleted', updated_at = NOW() \
             WHERE upload_id = $1 \
             RETURNING {UPLOAD_COLUMNS}"
        ))
        .bind(upload_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Write {
            key: upload_id.to_owned(),
            reason: e.to_string(),
        })?;

        raw.ok_or_else(|| StoreError::UploadNotFound {
            upload_id: upload_id.to_owned(),
        })
        .and_then(UploadRecord::try_from)
    }

    async fn list_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UploadRecord>, StoreError> {
        let raws: Vec<UploadRecordRaw> = sqlx::query_as(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM file_uploads \
             WHERE upload_status IN ('pending', 'processing') AND created_at < $1 \
             ORDER BY created_at LIMIT $2"
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::List {
            scope: "file_uploads".to_owned(),
            reason: e.to_string(),
        })?;

        raws.into_iter().map(UploadRecord::try_from).collect()
    }
}

/// A [`ProjectFileSink`] backed by a `project_files` cache table.
#[derive(Debug, Clone)]
pub struct PgProjectFileSink {
    pool: PgPool,
}

impl PgProjectFileSink {
    /// Create the sink, running the table migration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the migration fails.
    pub async fn connect(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS project_files (\
                reference               TEXT PRIMARY KEY, \
                filename                TEXT, \
                content_type            TEXT, \
                content_length          BIGINT, \
                checksum                TEXT, \
                download_url            TEXT NOT NULL, \
                download_url_expires_at TIMESTAMPTZ NOT NULL, \
                updated_at              TIMESTAMPTZ NOT NULL\
            )",
        )
        .execute(&pool)
        .await
        .map_err(open_err)?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl ProjectFileSink for PgProjectFileSink {
    async fn record_latest_upload(&self, update: &ProjectFileUpdate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO project_files \
             (reference, filename, content_type, content_length, checksum, \
              download_url, download_url_expires_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             ON CONFLICT (reference) DO UPDATE SET \
                filename = EXCLUDED.filename, \
                content_type = EXCLUDED.content_type, \
                content_length = EXCLUDED.content_length, \
                checksum = EXCLUDED.checksum, \
                download_url = EXCLUDED.download_url, \
                download_url_expires_at = EXCLUDED.download_url_expires_at, \
                updated_at = NOW()",
        )
        .bind(&update.reference)
        .bind(&update.filename)
        .bind(&update.content_type)
        .bind(update.content_length)
        .bind(&update.checksum)
        .bind(&update.download_url)
        .bind(update.download_url_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Write {
            key: update.reference.clone(),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}
