// Copyright (c) 2025 - Cowboy AI, LLC.

//! Master-list and deviation-list repositories

use crate::error::Result;
use crate::types::DeviationEntry;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Master-list repository over the shared pool
#[derive(Clone)]
pub struct MasterListRepo {
    pool: PgPool,
}

impl MasterListRepo {
    /// Create over a pool handle
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert with fingerprint-keyed dedup; returns `(id, was_duplicate)`
    pub async fn save_with_duplicate_check(
        &self,
        upload_id: Uuid,
        country_code: &str,
        signer_dn: Option<&str>,
        fingerprint: &str,
        csca_count: i32,
        cms_bytes: &[u8],
    ) -> Result<(Uuid, bool)> {
        let id = Uuid::new_v4();
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO master_lists
                (id, fingerprint_sha256, upload_id, country_code, signer_dn, cms_bytes, csca_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (fingerprint_sha256) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(fingerprint)
        .bind(upload_id)
        .bind(country_code)
        .bind(signer_dn)
        .bind(cms_bytes)
        .bind(csca_count)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some((id,)) => Ok((id, false)),
            None => {
                let (existing,): (Uuid,) =
                    sqlx::query_as("SELECT id FROM master_lists WHERE fingerprint_sha256 = $1")
                        .bind(fingerprint)
                        .fetch_one(&self.pool)
                        .await?;
                Ok((existing, true))
            }
        }
    }

    /// Mark a master list as present in the directory
    pub async fn mark_stored_in_ldap(&self, id: Uuid, ldap_dn: &str) -> Result<()> {
        sqlx::query("UPDATE master_lists SET stored_in_ldap = TRUE, ldap_dn = $2 WHERE id = $1")
            .bind(id)
            .bind(ldap_dn)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Total master-list count
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM master_lists")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Deviation-list repository over the shared pool
#[derive(Clone)]
pub struct DeviationListRepo {
    pool: PgPool,
}

impl DeviationListRepo {
    /// Create over a pool handle
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a deviation list with its entries; dedup on the fingerprint
    #[allow(clippy::too_many_arguments)]
    pub async fn save(
        &self,
        upload_id: Uuid,
        country_code: &str,
        version: Option<i64>,
        signing_time: Option<DateTime<Utc>>,
        signer_dn: Option<&str>,
        verified: bool,
        fingerprint: &str,
        der_bytes: &[u8],
        entries: &[DeviationEntry],
    ) -> Result<(Uuid, bool)> {
        let id = Uuid::new_v4();
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO deviation_lists
                (id, fingerprint_sha256, upload_id, country_code, version, signing_time,
                 signer_dn, verified, der_bytes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (fingerprint_sha256) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(fingerprint)
        .bind(upload_id)
        .bind(country_code)
        .bind(version)
        .bind(signing_time)
        .bind(signer_dn)
        .bind(verified)
        .bind(der_bytes)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some((id,)) => {
                for entry in entries {
                    sqlx::query(
                        "INSERT INTO deviation_entries
                             (deviation_list_id, cert_issuer_dn, cert_serial, defect_oid,
                              defect_description)
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(id)
                    .bind(&entry.cert_issuer_dn)
                    .bind(&entry.cert_serial)
                    .bind(&entry.defect_oid)
                    .bind(&entry.defect_description)
                    .execute(&self.pool)
                    .await?;
                }
                Ok((id, false))
            }
            None => {
                let (existing,): (Uuid,) =
                    sqlx::query_as("SELECT id FROM deviation_lists WHERE fingerprint_sha256 = $1")
                        .bind(fingerprint)
                        .fetch_one(&self.pool)
                        .await?;
                Ok((existing, true))
            }
        }
    }
}
