// Copyright (c) 2025 - Cowboy AI, LLC.

//! Certificate repository
//!
//! The SHA-256 fingerprint is the identity: a second sighting of the same
//! bytes is recorded as a duplicate event, never a second row. CSCA lookup
//! by subject DN deliberately returns every match so the chain builder can
//! do key-matched selection across rollover generations.

use crate::chain::{CscaProvider, StoredCsca};
use crate::error::Result;
use crate::types::{CertType, ValidationStatus};
use crate::x509::dn;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Input for a certificate insert
#[derive(Debug, Clone)]
pub struct NewCertificate {
    /// Owning upload (first sighting)
    pub upload_id: Uuid,
    /// Category; link certs arrive as `LinkCert` and persist as CSCA
    pub cert_type: CertType,
    /// ISO 3166 alpha-2 country
    pub country_code: String,
    /// Subject DN
    pub subject_dn: String,
    /// Issuer DN
    pub issuer_dn: String,
    /// Serial, uppercase hex
    pub serial_number: String,
    /// SHA-256 fingerprint, lowercase hex
    pub fingerprint_sha256: String,
    /// Validity start
    pub not_before: DateTime<Utc>,
    /// Validity end
    pub not_after: DateTime<Utc>,
    /// DER bytes
    pub der_bytes: Vec<u8>,
    /// Initial validation status
    pub validation_status: ValidationStatus,
}

/// A persisted certificate row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CertificateRow {
    /// Row id
    pub id: Uuid,
    /// SHA-256 fingerprint
    pub fingerprint_sha256: String,
    /// First-sighting upload
    pub upload_id: Option<Uuid>,
    /// Stored type (CSCA, DSC, DSC_NC, MLSC)
    pub cert_type: String,
    /// Country code
    pub country_code: String,
    /// Subject DN
    pub subject_dn: String,
    /// Issuer DN
    pub issuer_dn: String,
    /// Serial, uppercase hex
    pub serial_number: String,
    /// Validity start
    pub not_before: DateTime<Utc>,
    /// Validity end
    pub not_after: DateTime<Utc>,
    /// DER bytes as stored
    pub der_bytes: Vec<u8>,
    /// Present in the directory
    pub stored_in_ldap: bool,
    /// Directory DN when synced
    pub ldap_dn: Option<String>,
    /// Latest validation status
    pub validation_status: String,
    /// Duplicate sighting counter
    pub duplicate_count: i32,
}

/// Certificate repository over the shared pool
#[derive(Clone)]
pub struct CertificateRepo {
    pool: PgPool,
}

impl CertificateRepo {
    /// Create over a pool handle
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert with fingerprint-keyed dedup. Returns `(id, was_duplicate)`;
    /// a duplicate bumps the counter instead of creating a row.
    pub async fn save_with_duplicate_check(&self, cert: &NewCertificate) -> Result<(Uuid, bool)> {
        let id = Uuid::new_v4();
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO certificates
                (id, fingerprint_sha256, upload_id, cert_type, country_code,
                 subject_dn, subject_dn_norm, issuer_dn, issuer_dn_norm,
                 serial_number, not_before, not_after, der_bytes, validation_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (fingerprint_sha256) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&cert.fingerprint_sha256)
        .bind(cert.upload_id)
        .bind(cert.cert_type.db_type())
        .bind(&cert.country_code)
        .bind(&cert.subject_dn)
        .bind(dn::normalize(&cert.subject_dn))
        .bind(&cert.issuer_dn)
        .bind(dn::normalize(&cert.issuer_dn))
        .bind(&cert.serial_number)
        .bind(cert.not_before)
        .bind(cert.not_after)
        .bind(&cert.der_bytes)
        .bind(cert.validation_status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id,)) = inserted {
            return Ok((id, false));
        }

        let (existing_id,): (Uuid,) = sqlx::query_as(
            "UPDATE certificates SET duplicate_count = duplicate_count + 1, updated_at = now()
             WHERE fingerprint_sha256 = $1 RETURNING id",
        )
        .bind(&cert.fingerprint_sha256)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing_id, true))
    }

    /// Record where a (possibly duplicate) sighting came from
    pub async fn track_duplicate_source(
        &self,
        certificate_id: Uuid,
        upload_id: Uuid,
        source_type: &str,
        source_country: &str,
        source_entry_dn: &str,
        source_file_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO certificate_duplicates
                 (certificate_id, upload_id, source_type, source_country,
                  source_entry_dn, source_file_name)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(certificate_id)
        .bind(upload_id)
        .bind(source_type)
        .bind(source_country)
        .bind(source_entry_dn)
        .bind(source_file_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every CSCA whose normalized subject DN matches. No DN dedup here:
    /// rollover generations must all come back.
    pub async fn find_all_cscas_by_subject_dn(
        &self,
        subject_dn: &str,
    ) -> Result<Vec<CertificateRow>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "SELECT id, fingerprint_sha256, upload_id, cert_type, country_code,
                    subject_dn, issuer_dn, serial_number, not_before, not_after,
                    der_bytes, stored_in_ldap, ldap_dn, validation_status, duplicate_count
             FROM certificates
             WHERE cert_type = 'CSCA' AND subject_dn_norm = $1
             ORDER BY created_at",
        )
        .bind(dn::normalize(subject_dn))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Fetch one row by fingerprint
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CertificateRow>> {
        let row = sqlx::query_as::<_, CertificateRow>(
            "SELECT id, fingerprint_sha256, upload_id, cert_type, country_code,
                    subject_dn, issuer_dn, serial_number, not_before, not_after,
                    der_bytes, stored_in_ldap, ldap_dn, validation_status, duplicate_count
             FROM certificates WHERE fingerprint_sha256 = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Rows of one DB type not yet present in the directory (ADD candidates)
    pub async fn find_unsynced(&self, db_type: &str, limit: i64) -> Result<Vec<CertificateRow>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "SELECT id, fingerprint_sha256, upload_id, cert_type, country_code,
                    subject_dn, issuer_dn, serial_number, not_before, not_after,
                    der_bytes, stored_in_ldap, ldap_dn, validation_status, duplicate_count
             FROM certificates
             WHERE cert_type = $1 AND NOT stored_in_ldap
             ORDER BY created_at
             LIMIT $2",
        )
        .bind(db_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All fingerprints of one DB type
    pub async fn fingerprints_by_type(&self, db_type: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT fingerprint_sha256 FROM certificates WHERE cert_type = $1")
                .bind(db_type)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(fp,)| fp).collect())
    }

    /// Mark a row as present in the directory
    pub async fn mark_stored_in_ldap(&self, id: Uuid, ldap_dn: &str) -> Result<()> {
        sqlx::query(
            "UPDATE certificates SET stored_in_ldap = TRUE, ldap_dn = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(ldap_dn)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update the cached validation status on the certificate row
    pub async fn update_validation_status(
        &self,
        id: Uuid,
        status: ValidationStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE certificates SET validation_status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// DSCs whose chain could not complete: PENDING (CSCA missing) or
    /// INVALID for a key mismatch. Revalidation candidates.
    pub async fn find_for_revalidation(&self, limit: i64) -> Result<Vec<CertificateRow>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "SELECT c.id, c.fingerprint_sha256, c.upload_id, c.cert_type, c.country_code,
                    c.subject_dn, c.issuer_dn, c.serial_number, c.not_before, c.not_after,
                    c.der_bytes, c.stored_in_ldap, c.ldap_dn, c.validation_status, c.duplicate_count
             FROM certificates c
             WHERE c.cert_type IN ('DSC', 'DSC_NC')
               AND (c.validation_status = 'PENDING'
                    OR (c.validation_status = 'INVALID' AND EXISTS (
                          SELECT 1 FROM validation_results v
                          WHERE v.certificate_id = c.id
                            AND v.error_code IN ('CSCA_NOT_FOUND', 'SIGNATURE_KEY_MISMATCH'))))
             ORDER BY c.created_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Rows of one DB type, oldest first (LDIF export)
    pub async fn list_by_type(&self, db_type: &str, limit: i64) -> Result<Vec<CertificateRow>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "SELECT id, fingerprint_sha256, upload_id, cert_type, country_code,
                    subject_dn, issuer_dn, serial_number, not_before, not_after,
                    der_bytes, stored_in_ldap, ldap_dn, validation_status, duplicate_count
             FROM certificates WHERE cert_type = $1 ORDER BY created_at LIMIT $2",
        )
        .bind(db_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Counts per DB type, for sync-status reporting
    pub async fn counts_by_type(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT cert_type, COUNT(*) FROM certificates GROUP BY cert_type")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    /// Count of rows already synced to the directory
    pub async fn count_stored_in_ldap(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM certificates WHERE stored_in_ldap")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Delete certificates first-sighted by an upload (cascade of an
    /// upload delete). Shared certificates re-uploaded elsewhere survive
    /// through their duplicate rows.
    pub async fn delete_by_upload(&self, upload_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM certificates WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Per-country counts (country statistics supplement)
    pub async fn counts_by_country(&self, limit: i64) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT country_code, COUNT(*) AS n FROM certificates
             GROUP BY country_code ORDER BY n DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl CscaProvider for CertificateRepo {
    async fn find_by_subject_dn(&self, subject_dn: &str) -> Result<Vec<StoredCsca>> {
        let rows = self.find_all_cscas_by_subject_dn(subject_dn).await?;
        Ok(rows
            .into_iter()
            .map(|row| StoredCsca {
                fingerprint_sha256: row.fingerprint_sha256,
                subject_dn: row.subject_dn,
                der: crate::crl::decode_bytea_relaxed(&row.der_bytes),
            })
            .collect())
    }
}
