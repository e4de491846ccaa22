// Copyright (c) 2025 - Cowboy AI, LLC.

//! LDAP connection discipline
//!
//! Writes go through one exclusive session bound directly to the primary
//! master, serialized behind a mutex. Reads draw from a pool of sessions
//! balanced round-robin across the configured host list. Every acquisition
//! is bounded: a blocked acquire fails with [`PkdError::Timeout`] instead
//! of blocking indefinitely. All sessions are protocol v3, referrals off,
//! with a per-operation network timeout.

use crate::config::LdapConfig;
use crate::error::{PkdError, Result};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};

async fn connect(url: &str, config: &LdapConfig) -> Result<Ldap> {
    let settings = LdapConnSettings::new()
        .set_conn_timeout(Duration::from_secs(config.network_timeout_secs))
        .set_no_tls_verify(false);
    let (conn, mut ldap) = LdapConnAsync::with_settings(settings, url).await?;
    ldap3::drive!(conn);
    ldap.with_timeout(Duration::from_secs(config.network_timeout_secs));
    ldap.simple_bind(&config.bind_dn, &config.bind_password)
        .await?
        .success()?;
    Ok(ldap)
}

/// Exclusive write session plus round-robin read pool
pub struct LdapPool {
    config: LdapConfig,
    write: Mutex<Ldap>,
    write_gate: Arc<Semaphore>,
    readers: Vec<Mutex<Ldap>>,
    read_gate: Arc<Semaphore>,
    next_reader: AtomicUsize,
    acquire_timeout: Duration,
    network_timeout: Duration,
}

/// A bounded acquisition of a pooled session
pub struct PooledLdap<'a> {
    guard: MutexGuard<'a, Ldap>,
    _permit: OwnedSemaphorePermit,
    network_timeout: Duration,
}

impl PooledLdap<'_> {
    /// The session, with the per-operation timeout armed
    pub fn ldap(&mut self) -> &mut Ldap {
        self.guard.with_timeout(self.network_timeout);
        &mut *self.guard
    }
}

impl LdapPool {
    /// Connect the write session and the read pool per configuration
    pub async fn connect(config: &LdapConfig) -> Result<Self> {
        let write_url = format!("ldap://{}:{}", config.write_host, config.write_port);
        let write = connect(&write_url, config).await?;
        tracing::info!("LDAP write session bound to {write_url}");

        let pool_size = config.pool_max.clamp(1, config.read_hosts.len().max(1) * 4);
        let mut readers = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let host = &config.read_hosts[i % config.read_hosts.len()];
            let url = format!("ldap://{host}");
            let ldap = connect(&url, config).await?;
            tracing::debug!("LDAP read session {i} bound to {url}");
            readers.push(Mutex::new(ldap));
        }
        tracing::info!(
            "LDAP read pool: {} sessions over {} host(s)",
            readers.len(),
            config.read_hosts.len()
        );

        Ok(Self {
            write: Mutex::new(write),
            write_gate: Arc::new(Semaphore::new(1)),
            read_gate: Arc::new(Semaphore::new(readers.len())),
            readers,
            next_reader: AtomicUsize::new(0),
            acquire_timeout: Duration::from_secs(config.pool_timeout_secs),
            network_timeout: Duration::from_secs(config.network_timeout_secs),
            config: config.clone(),
        })
    }

    /// Acquire the exclusive write session (bounded)
    pub async fn write(&self) -> Result<PooledLdap<'_>> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.write_gate.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PkdError::Timeout("LDAP write"))?
        .map_err(|_| PkdError::LdapTransient("write gate closed".to_string()))?;
        let guard = self.write.lock().await;
        Ok(PooledLdap {
            guard,
            _permit: permit,
            network_timeout: self.network_timeout,
        })
    }

    /// Acquire a read session, round-robin over the pool (bounded)
    pub async fn read(&self) -> Result<PooledLdap<'_>> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.read_gate.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PkdError::Timeout("LDAP read"))?
        .map_err(|_| PkdError::LdapTransient("read gate closed".to_string()))?;

        // Walk from the round-robin cursor to the first free session; the
        // semaphore guarantees one exists.
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.readers.len() {
            let idx = (start + offset) % self.readers.len();
            if let Ok(guard) = self.readers[idx].try_lock() {
                return Ok(PooledLdap {
                    guard,
                    _permit: permit,
                    network_timeout: self.network_timeout,
                });
            }
        }
        // Raced between try_locks; fall back to waiting on the cursor's session
        let guard = self.readers[start % self.readers.len()].lock().await;
        Ok(PooledLdap {
            guard,
            _permit: permit,
            network_timeout: self.network_timeout,
        })
    }

    /// The configuration this pool was built from
    pub fn config(&self) -> &LdapConfig {
        &self.config
    }
}
