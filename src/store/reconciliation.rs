// Copyright (c) 2025 - Cowboy AI, LLC.

//! Reconciliation summary and per-object log repository

use crate::error::Result;
use crate::types::{ReconcileOp, ReconcileStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Per-type added/deleted counters accumulated during a run
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryCounters {
    /// CSCA entries added
    pub csca_added: i32,
    /// CSCA entries deleted
    pub csca_deleted: i32,
    /// DSC entries added
    pub dsc_added: i32,
    /// DSC entries deleted
    pub dsc_deleted: i32,
    /// Non-conformant DSC entries added
    pub dsc_nc_added: i32,
    /// Non-conformant DSC entries deleted
    pub dsc_nc_deleted: i32,
    /// MLSC entries added
    pub mlsc_added: i32,
    /// MLSC entries deleted
    pub mlsc_deleted: i32,
    /// CRL entries added
    pub crl_added: i32,
    /// CRL entries deleted
    pub crl_deleted: i32,
    /// Successful operations
    pub success: i32,
    /// Failed operations
    pub failed: i32,
}

/// A persisted reconciliation summary
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SummaryRow {
    /// Run id
    pub id: Uuid,
    /// Who triggered the run
    pub triggered_by: String,
    /// Dry-run flag
    pub dry_run: bool,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Status
    pub status: String,
    /// Successful operations
    pub success_count: i32,
    /// Failed operations
    pub failed_count: i32,
    /// Total run duration
    pub duration_ms: i64,
}

/// Reconciliation repository over the shared pool
#[derive(Clone)]
pub struct ReconciliationRepo {
    pool: PgPool,
}

impl ReconciliationRepo {
    /// Create over a pool handle
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a new IN_PROGRESS summary row
    pub async fn create_summary(&self, triggered_by: &str, dry_run: bool) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO reconciliation_summaries (id, triggered_by, dry_run, status)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(triggered_by)
        .bind(dry_run)
        .bind(ReconcileStatus::InProgress.as_str())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Close a summary row with final counters
    pub async fn complete_summary(
        &self,
        id: Uuid,
        status: ReconcileStatus,
        counters: &SummaryCounters,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE reconciliation_summaries
             SET completed_at = now(), status = $2,
                 csca_added = $3, csca_deleted = $4, dsc_added = $5, dsc_deleted = $6,
                 dsc_nc_added = $7, dsc_nc_deleted = $8, mlsc_added = $9, mlsc_deleted = $10,
                 crl_added = $11, crl_deleted = $12,
                 success_count = $13, failed_count = $14, duration_ms = $15, error_message = $16
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(counters.csca_added)
        .bind(counters.csca_deleted)
        .bind(counters.dsc_added)
        .bind(counters.dsc_deleted)
        .bind(counters.dsc_nc_added)
        .bind(counters.dsc_nc_deleted)
        .bind(counters.mlsc_added)
        .bind(counters.mlsc_deleted)
        .bind(counters.crl_added)
        .bind(counters.crl_deleted)
        .bind(counters.success)
        .bind(counters.failed)
        .bind(duration_ms)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record one per-object operation
    pub async fn log_operation(
        &self,
        summary_id: Uuid,
        fingerprint: &str,
        cert_type: &str,
        country_code: &str,
        operation: ReconcileOp,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO reconciliation_logs
                 (summary_id, fingerprint, cert_type, country_code, operation, result,
                  error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(summary_id)
        .bind(fingerprint)
        .bind(cert_type)
        .bind(country_code)
        .bind(operation.as_str())
        .bind(if success { "SUCCESS" } else { "FAILED" })
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recent summaries, newest first
    pub async fn history(&self, limit: i64, offset: i64) -> Result<Vec<SummaryRow>> {
        let rows = sqlx::query_as::<_, SummaryRow>(
            "SELECT id, triggered_by, dry_run, started_at, completed_at, status,
                    success_count, failed_count, duration_ms
             FROM reconciliation_summaries
             ORDER BY started_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
