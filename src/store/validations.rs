// Copyright (c) 2025 - Cowboy AI, LLC.

//! Validation-result repository

use crate::error::Result;
use crate::types::{ComplianceLevel, CrlCheckStatus, ValidationStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Input for a validation-result insert
#[derive(Debug, Clone)]
pub struct NewValidationResult {
    /// Certificate the result belongs to
    pub certificate_id: Uuid,
    /// Upload that produced it (owner; cascade-deleted with the upload)
    pub upload_id: Uuid,
    /// Outcome
    pub validation_status: ValidationStatus,
    /// Chain complete and signatures verified
    pub trust_chain_valid: bool,
    /// Rendered chain path
    pub trust_chain_path: Option<String>,
    /// A DN-matching CSCA existed
    pub csca_found: bool,
    /// Subject DN of the selected (or fallback) issuer
    pub csca_subject_dn: Option<String>,
    /// Every signature verified
    pub signature_verified: bool,
    /// Leaf past notAfter
    pub is_expired: bool,
    /// CRL check performed
    pub crl_checked: bool,
    /// Serial found in the CRL
    pub crl_revoked: bool,
    /// CRL verdict
    pub crl_status: CrlCheckStatus,
    /// Doc 9303 grade
    pub icao_compliance_level: Option<ComplianceLevel>,
    /// Violation tags, JSON-encoded
    pub icao_violations: Option<String>,
    /// Machine-readable failure reason (CSCA_NOT_FOUND, ...)
    pub error_code: Option<String>,
    /// Human-readable failure message
    pub error_message: Option<String>,
    /// Wall-clock validation time
    pub validation_duration_ms: i64,
}

/// A persisted validation result (revalidator view)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ValidationRow {
    /// Row id
    pub id: Uuid,
    /// Certificate id
    pub certificate_id: Option<Uuid>,
    /// Outcome
    pub validation_status: String,
    /// Machine-readable failure reason
    pub error_code: Option<String>,
    /// Leaf expired flag
    pub is_expired: bool,
}

/// Validation repository over the shared pool
#[derive(Clone)]
pub struct ValidationRepo {
    pool: PgPool,
}

impl ValidationRepo {
    /// Create over a pool handle
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one result row
    pub async fn insert(&self, result: &NewValidationResult) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO validation_results
                (id, certificate_id, upload_id, validation_status, trust_chain_valid,
                 trust_chain_path, csca_found, csca_subject_dn, signature_verified,
                 is_expired, crl_checked, crl_revoked, crl_status,
                 icao_compliance_level, icao_violations, error_code, error_message,
                 validation_duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18)
            "#,
        )
        .bind(id)
        .bind(result.certificate_id)
        .bind(result.upload_id)
        .bind(result.validation_status.as_str())
        .bind(result.trust_chain_valid)
        .bind(&result.trust_chain_path)
        .bind(result.csca_found)
        .bind(&result.csca_subject_dn)
        .bind(result.signature_verified)
        .bind(result.is_expired)
        .bind(result.crl_checked)
        .bind(result.crl_revoked)
        .bind(result.crl_status.as_str())
        .bind(result.icao_compliance_level.map(|l| l.as_str()))
        .bind(&result.icao_violations)
        .bind(&result.error_code)
        .bind(&result.error_message)
        .bind(result.validation_duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Rewrite chain fields after a revalidation pass
    pub async fn update_revalidation(
        &self,
        certificate_id: Uuid,
        status: ValidationStatus,
        trust_chain_valid: bool,
        csca_found: bool,
        signature_verified: bool,
        trust_chain_path: Option<&str>,
        csca_subject_dn: Option<&str>,
        error_code: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE validation_results
             SET validation_status = $2, trust_chain_valid = $3, csca_found = $4,
                 signature_verified = $5, trust_chain_path = $6, csca_subject_dn = $7,
                 error_code = $8, updated_at = now()
             WHERE certificate_id = $1",
        )
        .bind(certificate_id)
        .bind(status.as_str())
        .bind(trust_chain_valid)
        .bind(csca_found)
        .bind(signature_verified)
        .bind(trust_chain_path)
        .bind(csca_subject_dn)
        .bind(error_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest result for a certificate
    pub async fn find_by_certificate(&self, certificate_id: Uuid) -> Result<Option<ValidationRow>> {
        let row = sqlx::query_as::<_, ValidationRow>(
            "SELECT id, certificate_id, validation_status, error_code, is_expired
             FROM validation_results WHERE certificate_id = $1
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(certificate_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Mark results expired whose certificate's notAfter has passed since
    /// the last sweep. Returns the number of rows touched.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE validation_results v
             SET is_expired = TRUE,
                 validation_status = CASE WHEN v.validation_status = 'VALID'
                                          THEN 'EXPIRED_VALID'
                                          ELSE v.validation_status END,
                 updated_at = now()
             FROM certificates c
             WHERE v.certificate_id = c.id AND c.not_after < $1 AND NOT v.is_expired",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Outcome counts for one upload
    pub async fn statistics_by_upload(&self, upload_id: Uuid) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT validation_status, COUNT(*) FROM validation_results
             WHERE upload_id = $1 GROUP BY validation_status",
        )
        .bind(upload_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Outcome counts across every stored result
    pub async fn global_status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT validation_status, COUNT(*) FROM validation_results
             GROUP BY validation_status ORDER BY validation_status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete results owned by an upload (explicit cascade for retry)
    pub async fn delete_by_upload(&self, upload_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM validation_results WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
