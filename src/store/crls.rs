// Copyright (c) 2025 - Cowboy AI, LLC.

//! CRL repository

use crate::crl::{CrlProvider, StoredCrl};
use crate::error::Result;
use crate::types::RevokedEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Input for a CRL insert
#[derive(Debug, Clone)]
pub struct NewCrl {
    /// Owning upload
    pub upload_id: Uuid,
    /// Country the CRL applies to
    pub country_code: String,
    /// Issuer DN
    pub issuer_dn: String,
    /// thisUpdate
    pub this_update: DateTime<Utc>,
    /// nextUpdate
    pub next_update: Option<DateTime<Utc>>,
    /// CRLNumber, decimal
    pub crl_number: Option<String>,
    /// SHA-256 fingerprint, lowercase hex
    pub fingerprint_sha256: String,
    /// DER bytes
    pub der_bytes: Vec<u8>,
    /// Revoked serials
    pub revoked: Vec<RevokedEntry>,
}

/// A persisted CRL row (reconciler view)
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CrlRow {
    /// Row id
    pub id: Uuid,
    /// SHA-256 fingerprint
    pub fingerprint_sha256: String,
    /// Country code
    pub country_code: String,
    /// Issuer DN
    pub issuer_dn: String,
    /// DER bytes as stored
    pub der_bytes: Vec<u8>,
    /// Present in the directory
    pub stored_in_ldap: bool,
}

/// CRL repository over the shared pool
#[derive(Clone)]
pub struct CrlRepo {
    pool: PgPool,
}

impl CrlRepo {
    /// Create over a pool handle
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert with fingerprint-keyed dedup; revoked entries are persisted
    /// only for a fresh row. Returns `(id, was_duplicate)`.
    pub async fn save_with_duplicate_check(&self, crl: &NewCrl) -> Result<(Uuid, bool)> {
        let id = Uuid::new_v4();
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO crls
                (id, fingerprint_sha256, upload_id, country_code, issuer_dn,
                 this_update, next_update, crl_number, der_bytes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (fingerprint_sha256) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&crl.fingerprint_sha256)
        .bind(crl.upload_id)
        .bind(&crl.country_code)
        .bind(&crl.issuer_dn)
        .bind(crl.this_update)
        .bind(crl.next_update)
        .bind(&crl.crl_number)
        .bind(&crl.der_bytes)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some((id,)) => {
                for entry in &crl.revoked {
                    sqlx::query(
                        "INSERT INTO crl_revoked_entries (crl_id, serial, revocation_date, reason)
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(id)
                    .bind(&entry.serial)
                    .bind(entry.revocation_date)
                    .bind(&entry.reason)
                    .execute(&self.pool)
                    .await?;
                }
                Ok((id, false))
            }
            None => {
                let (existing,): (Uuid,) =
                    sqlx::query_as("SELECT id FROM crls WHERE fingerprint_sha256 = $1")
                        .bind(&crl.fingerprint_sha256)
                        .fetch_one(&self.pool)
                        .await?;
                Ok((existing, true))
            }
        }
    }

    /// Most recent CRL bytes for a country
    pub async fn latest_raw_by_country(&self, country_code: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT der_bytes FROM crls WHERE country_code = $1
             ORDER BY this_update DESC LIMIT 1",
        )
        .bind(country_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(bytes,)| bytes))
    }

    /// Fetch one CRL row by fingerprint
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<CrlRow>> {
        let row = sqlx::query_as::<_, CrlRow>(
            "SELECT id, fingerprint_sha256, country_code, issuer_dn, der_bytes, stored_in_ldap
             FROM crls WHERE fingerprint_sha256 = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// CRL rows not yet present in the directory
    pub async fn find_unsynced(&self, limit: i64) -> Result<Vec<CrlRow>> {
        let rows = sqlx::query_as::<_, CrlRow>(
            "SELECT id, fingerprint_sha256, country_code, issuer_dn, der_bytes, stored_in_ldap
             FROM crls WHERE NOT stored_in_ldap ORDER BY created_at LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// All CRL fingerprints
    pub async fn fingerprints(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT fingerprint_sha256 FROM crls")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(fp,)| fp).collect())
    }

    /// Mark a CRL as present in the directory
    pub async fn mark_stored_in_ldap(&self, id: Uuid, ldap_dn: &str) -> Result<()> {
        sqlx::query("UPDATE crls SET stored_in_ldap = TRUE, ldap_dn = $2 WHERE id = $1")
            .bind(id)
            .bind(ldap_dn)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Total CRL count
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM crls")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete CRLs first-sighted by an upload
    pub async fn delete_by_upload(&self, upload_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM crls WHERE upload_id = $1")
            .bind(upload_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CrlProvider for CrlRepo {
    async fn latest_by_country(&self, country_code: &str) -> Result<Option<StoredCrl>> {
        Ok(self
            .latest_raw_by_country(country_code)
            .await?
            .map(|raw| StoredCrl {
                country_code: country_code.to_string(),
                raw,
            }))
    }
}
