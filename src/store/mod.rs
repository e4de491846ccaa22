// Copyright (c) 2025 - Cowboy AI, LLC.

//! Relational store
//!
//! sqlx/Postgres repositories for every persisted entity. Each repository
//! owns a cheap clone of the shared pool; queries are runtime-checked so
//! the crate builds without a live database. Duplicate detection relies on
//! `INSERT … ON CONFLICT DO NOTHING`, never on check-then-insert.

pub mod certificates;
pub mod crls;
pub mod lists;
pub mod reconciliation;
pub mod uploads;
pub mod validations;

pub use certificates::{CertificateRepo, CertificateRow, NewCertificate};
pub use crls::{CrlRepo, CrlRow, NewCrl};
pub use lists::{DeviationListRepo, MasterListRepo};
pub use reconciliation::{ReconciliationRepo, SummaryCounters};
pub use uploads::{NewUpload, UploadCounters, UploadRepo, UploadRow};
pub use validations::{NewValidationResult, ValidationRepo, ValidationRow};

use crate::config::AppConfig;
use crate::error::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Aggregate handle over every repository
#[derive(Clone)]
pub struct Store {
    /// Certificate repository
    pub certificates: CertificateRepo,
    /// CRL repository
    pub crls: CrlRepo,
    /// Upload repository
    pub uploads: UploadRepo,
    /// Validation-result repository
    pub validations: ValidationRepo,
    /// Master-list repository
    pub master_lists: MasterListRepo,
    /// Deviation-list repository
    pub deviation_lists: DeviationListRepo,
    /// Reconciliation repository
    pub reconciliation: ReconciliationRepo,
    pool: PgPool,
}

impl Store {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self {
            certificates: CertificateRepo::new(pool.clone()),
            crls: CrlRepo::new(pool.clone()),
            uploads: UploadRepo::new(pool.clone()),
            validations: ValidationRepo::new(pool.clone()),
            master_lists: MasterListRepo::new(pool.clone()),
            deviation_lists: DeviationListRepo::new(pool.clone()),
            reconciliation: ReconciliationRepo::new(pool.clone()),
            pool,
        }
    }

    /// Connect per configuration and run migrations
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.db.pool_min)
            .max_connections(config.db.pool_max)
            .acquire_timeout(Duration::from_secs(config.db.acquire_timeout_secs))
            .connect(&config.db_url())
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!(
            "connected to {} (pool {}..{})",
            config.db.name,
            config.db.pool_min,
            config.db.pool_max
        );

        Ok(Self::new(pool))
    }

    /// The underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
