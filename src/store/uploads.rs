// Copyright (c) 2025 - Cowboy AI, LLC.

//! Upload repository
//!
//! The file hash is unique: re-uploading identical bytes surfaces
//! [`PkdError::DuplicateUpload`] with the existing row's id.

use crate::error::{PkdError, Result};
use crate::types::{FileFormat, ProcessingMode, UploadStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Input for an upload insert
#[derive(Debug, Clone)]
pub struct NewUpload {
    /// Client-supplied file name
    pub file_name: String,
    /// SHA-256 of the raw bytes, lowercase hex
    pub file_hash_sha256: String,
    /// Detected or forced format
    pub file_format: FileFormat,
    /// Size in bytes
    pub file_size: i64,
    /// AUTO or MANUAL
    pub processing_mode: ProcessingMode,
}

/// A persisted upload row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadRow {
    /// Row id
    pub id: Uuid,
    /// File name
    pub file_name: String,
    /// Content hash
    pub file_hash_sha256: String,
    /// Format
    pub file_format: String,
    /// Size in bytes
    pub file_size: i64,
    /// Lifecycle status
    pub status: String,
    /// Processing mode
    pub processing_mode: String,
    /// Entries discovered at parse time
    pub total_entries: i32,
    /// Entries processed so far
    pub processed_entries: i32,
    /// CSCA count
    pub csca_count: i32,
    /// DSC count
    pub dsc_count: i32,
    /// Non-conformant DSC count
    pub dsc_nc_count: i32,
    /// MLSC count
    pub mlsc_count: i32,
    /// CRL count
    pub crl_count: i32,
    /// Master-list count
    pub ml_count: i32,
    /// VALID outcomes
    pub valid_count: i32,
    /// EXPIRED_VALID outcomes
    pub expired_valid_count: i32,
    /// INVALID outcomes
    pub invalid_count: i32,
    /// PENDING outcomes
    pub pending_count: i32,
    /// ERROR outcomes
    pub error_count: i32,
    /// Duplicate sightings
    pub duplicate_count: i32,
    /// Upload-level error
    pub error_message: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

const UPLOAD_COLUMNS: &str = "id, file_name, file_hash_sha256, file_format, file_size, status,
    processing_mode, total_entries, processed_entries, csca_count, dsc_count, dsc_nc_count,
    mlsc_count, crl_count, ml_count, valid_count, expired_valid_count, invalid_count,
    pending_count, error_count, duplicate_count, error_message, created_at";

/// Per-upload validation outcome counters
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadCounters {
    /// CSCA rows
    pub csca: i32,
    /// DSC rows
    pub dsc: i32,
    /// Non-conformant DSC rows
    pub dsc_nc: i32,
    /// MLSC rows
    pub mlsc: i32,
    /// CRLs
    pub crl: i32,
    /// Master lists
    pub ml: i32,
    /// VALID outcomes
    pub valid: i32,
    /// EXPIRED_VALID outcomes
    pub expired_valid: i32,
    /// INVALID outcomes
    pub invalid: i32,
    /// PENDING outcomes
    pub pending: i32,
    /// ERROR outcomes
    pub error: i32,
    /// Duplicate sightings
    pub duplicate: i32,
}

/// Upload repository over the shared pool
#[derive(Clone)]
pub struct UploadRepo {
    pool: PgPool,
}

impl UploadRepo {
    /// Create over a pool handle
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new upload; identical bytes are rejected with
    /// [`PkdError::DuplicateUpload`] carrying the existing id.
    pub async fn create(&self, upload: &NewUpload) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO uploads (id, file_name, file_hash_sha256, file_format, file_size,
                                 status, processing_mode)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (file_hash_sha256) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&upload.file_name)
        .bind(&upload.file_hash_sha256)
        .bind(upload.file_format.as_str())
        .bind(upload.file_size)
        .bind(UploadStatus::Uploaded.as_str())
        .bind(upload.processing_mode.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some((id,)) => Ok(id),
            None => {
                let (existing,): (Uuid,) =
                    sqlx::query_as("SELECT id FROM uploads WHERE file_hash_sha256 = $1")
                        .bind(&upload.file_hash_sha256)
                        .fetch_one(&self.pool)
                        .await?;
                Err(PkdError::DuplicateUpload {
                    existing_id: existing,
                })
            }
        }
    }

    /// Fetch one upload
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<UploadRow>> {
        let sql = format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = $1");
        let row = sqlx::query_as::<_, UploadRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Transition status with state-machine enforcement
    pub async fn update_status(
        &self,
        id: Uuid,
        status: UploadStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| PkdError::NotFound(format!("upload {id}")))?;
        let current_status = UploadStatus::parse(&current.status)
            .ok_or_else(|| PkdError::InvalidState(format!("unknown status {}", current.status)))?;
        if !current_status.can_transition_to(status) {
            return Err(PkdError::InvalidState(format!(
                "upload {id}: illegal transition {current_status} -> {status}"
            )));
        }

        sqlx::query(
            "UPDATE uploads SET status = $2, error_message = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update entry progress
    pub async fn update_progress(&self, id: Uuid, total: i32, processed: i32) -> Result<()> {
        sqlx::query(
            "UPDATE uploads SET total_entries = $2, processed_entries = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(total)
        .bind(processed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist accumulated counters
    pub async fn update_counters(&self, id: Uuid, counters: &UploadCounters) -> Result<()> {
        sqlx::query(
            "UPDATE uploads SET csca_count = $2, dsc_count = $3, dsc_nc_count = $4,
                 mlsc_count = $5, crl_count = $6, ml_count = $7, valid_count = $8,
                 expired_valid_count = $9, invalid_count = $10, pending_count = $11,
                 error_count = $12, duplicate_count = $13, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(counters.csca)
        .bind(counters.dsc)
        .bind(counters.dsc_nc)
        .bind(counters.mlsc)
        .bind(counters.crl)
        .bind(counters.ml)
        .bind(counters.valid)
        .bind(counters.expired_valid)
        .bind(counters.invalid)
        .bind(counters.pending)
        .bind(counters.error)
        .bind(counters.duplicate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upload history, newest first, optionally filtered by status and
    /// format
    pub async fn history(
        &self,
        status: Option<UploadStatus>,
        format: Option<FileFormat>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UploadRow>> {
        let sql = format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads
             WHERE status <> 'DELETED'
               AND ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR file_format = $2)
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, UploadRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .bind(format.map(|f| f.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Matching row count for the same filters
    pub async fn count_history(
        &self,
        status: Option<UploadStatus>,
        format: Option<FileFormat>,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM uploads
             WHERE status <> 'DELETED'
               AND ($1::text IS NULL OR status = $1)
               AND ($2::text IS NULL OR file_format = $2)",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(format.map(|f| f.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Aggregate counters across every non-deleted upload
    pub async fn global_statistics(&self) -> Result<UploadCounters> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(csca_count), 0), COALESCE(SUM(dsc_count), 0),
                    COALESCE(SUM(dsc_nc_count), 0), COALESCE(SUM(mlsc_count), 0),
                    COALESCE(SUM(crl_count), 0), COALESCE(SUM(ml_count), 0),
                    COALESCE(SUM(valid_count), 0), COALESCE(SUM(expired_valid_count), 0),
                    COALESCE(SUM(invalid_count), 0), COALESCE(SUM(pending_count), 0),
                    COALESCE(SUM(error_count), 0), COALESCE(SUM(duplicate_count), 0)
             FROM uploads WHERE status <> 'DELETED'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(UploadCounters {
            csca: row.0 as i32,
            dsc: row.1 as i32,
            dsc_nc: row.2 as i32,
            mlsc: row.3 as i32,
            crl: row.4 as i32,
            ml: row.5 as i32,
            valid: row.6 as i32,
            expired_valid: row.7 as i32,
            invalid: row.8 as i32,
            pending: row.9 as i32,
            error: row.10 as i32,
            duplicate: row.11 as i32,
        })
    }

    /// Soft-delete the row (children are removed by the orchestrator)
    pub async fn mark_deleted(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE uploads SET status = 'DELETED', updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
