// Copyright (c) 2025 - Cowboy AI, LLC.

//! Configuration Module
//!
//! Environment-driven configuration for the PKD core: database connection,
//! LDAP read/write topology, trust anchor, pool sizing, and the periodic
//! reconciler interval. Credentials are required at startup; everything else
//! has a usable default.

use crate::error::{PkdError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration
    pub db: DbConfig,

    /// LDAP directory configuration
    pub ldap: LdapConfig,

    /// Path to the PEM trust anchor for Master List CMS verification
    pub trust_anchor_path: PathBuf,

    /// Directory for staged MANUAL-mode temp files
    pub temp_dir: PathBuf,

    /// Upload size cap in megabytes
    pub max_body_size_mb: u32,

    /// Reconciler tick interval in minutes (0 disables the ticker)
    pub auto_reconcile_interval_min: u32,

    /// Line cap for ASN.1 structure dumps
    pub asn1_max_lines: u32,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Store adapter; only "postgres" is supported
    pub db_type: String,
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub name: String,
    /// Database user
    pub user: String,
    /// Database password (required at startup)
    #[serde(skip_serializing)]
    pub password: String,
    /// Minimum pool size
    pub pool_min: u32,
    /// Maximum pool size
    pub pool_max: u32,
    /// Pool acquire timeout
    pub acquire_timeout_secs: u64,
}

/// LDAP directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Read hosts, round-robin balanced ("host:port" entries)
    pub read_hosts: Vec<String>,
    /// Write host (primary master, exclusive session)
    pub write_host: String,
    /// Write port
    pub write_port: u16,
    /// Simple bind DN
    pub bind_dn: String,
    /// Simple bind password (required at startup)
    #[serde(skip_serializing)]
    pub bind_password: String,
    /// Root of the managed DIT
    pub base_dn: String,
    /// RDN of the conformant data container below the base DN
    pub data_container: String,
    /// RDN of the non-conformant data container below the base DN
    pub nc_data_container: String,
    /// Read pool minimum size
    pub pool_min: usize,
    /// Read pool maximum size
    pub pool_max: usize,
    /// Pool acquire timeout in seconds
    pub pool_timeout_secs: u64,
    /// Per-operation network timeout in seconds
    pub network_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            db_type: "postgres".to_string(),
            host: "postgres".to_string(),
            port: 5432,
            name: "localpkd".to_string(),
            user: "localpkd".to_string(),
            password: String::new(),
            pool_min: 2,
            pool_max: 16,
            acquire_timeout_secs: 10,
        }
    }
}

impl Default for LdapConfig {
    fn default() -> Self {
        Self {
            read_hosts: vec!["openldap1:389".to_string(), "openldap2:389".to_string()],
            write_host: "openldap1".to_string(),
            write_port: 389,
            bind_dn: "cn=admin,dc=ldap,dc=smartcoreinc,dc=com".to_string(),
            bind_password: String::new(),
            base_dn: "dc=pkd,dc=ldap,dc=smartcoreinc,dc=com".to_string(),
            data_container: "dc=data".to_string(),
            nc_data_container: "dc=nc-data".to_string(),
            pool_min: 1,
            pool_max: 8,
            pool_timeout_secs: 5,
            network_timeout_secs: 10,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            ldap: LdapConfig::default(),
            trust_anchor_path: PathBuf::from("/app/data/cert/UN_CSCA_2.pem"),
            temp_dir: std::env::temp_dir().join("icao-pkd"),
            max_body_size_mb: 100,
            auto_reconcile_interval_min: 60,
            asn1_max_lines: 100,
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Parse an integer env value, clamping to [min, max] and falling back to
/// the default on garbage, with a warning (never a startup failure).
fn env_clamped<T>(key: &str, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(v) if v < min => min,
            Ok(v) if v > max => max,
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Invalid integer env value {key}='{raw}', using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        let mut config = AppConfig::default();

        if let Some(v) = env_str("DB_TYPE") {
            config.db.db_type = v.to_lowercase();
        }
        if let Some(v) = env_str("DB_HOST") {
            config.db.host = v;
        }
        config.db.port = env_clamped("DB_PORT", config.db.port, 1, 65535);
        if let Some(v) = env_str("DB_NAME") {
            config.db.name = v;
        }
        if let Some(v) = env_str("DB_USER") {
            config.db.user = v;
        }
        if let Some(v) = env_str("DB_PASSWORD") {
            config.db.password = v;
        }

        if let Some(v) = env_str("LDAP_READ_HOSTS") {
            let hosts: Vec<String> = v
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
            if !hosts.is_empty() {
                config.ldap.read_hosts = hosts;
            }
        }
        if let Some(v) = env_str("LDAP_WRITE_HOST") {
            config.ldap.write_host = v;
        }
        config.ldap.write_port = env_clamped("LDAP_WRITE_PORT", config.ldap.write_port, 1, 65535);
        if let Some(v) = env_str("LDAP_BIND_DN") {
            config.ldap.bind_dn = v;
        }
        if let Some(v) = env_str("LDAP_BIND_PASSWORD") {
            config.ldap.bind_password = v;
        }
        if let Some(v) = env_str("LDAP_BASE_DN") {
            config.ldap.base_dn = v;
        }
        if let Some(v) = env_str("LDAP_DATA_CONTAINER") {
            config.ldap.data_container = v;
        }
        if let Some(v) = env_str("LDAP_NC_DATA_CONTAINER") {
            config.ldap.nc_data_container = v;
        }
        config.ldap.pool_min = env_clamped("LDAP_POOL_MIN", config.ldap.pool_min, 1, 64);
        config.ldap.pool_max = env_clamped("LDAP_POOL_MAX", config.ldap.pool_max, 1, 64);
        config.ldap.pool_timeout_secs =
            env_clamped("LDAP_POOL_TIMEOUT", config.ldap.pool_timeout_secs, 1, 300);
        config.ldap.network_timeout_secs =
            env_clamped("LDAP_NETWORK_TIMEOUT", config.ldap.network_timeout_secs, 1, 300);

        if let Some(v) = env_str("TRUST_ANCHOR_PATH") {
            config.trust_anchor_path = PathBuf::from(v);
        }
        if let Some(v) = env_str("PKD_TEMP_DIR") {
            config.temp_dir = PathBuf::from(v);
        }
        config.max_body_size_mb = env_clamped("MAX_BODY_SIZE_MB", config.max_body_size_mb, 1, 500);
        config.auto_reconcile_interval_min = env_clamped(
            "AUTO_RECONCILE_INTERVAL",
            config.auto_reconcile_interval_min,
            0,
            1440,
        );
        config.asn1_max_lines = env_clamped("ASN1_MAX_LINES", config.asn1_max_lines, 10, 10000);

        config
    }

    /// Validate required settings; failures here abort startup
    pub fn validate(&self) -> Result<()> {
        if self.db.db_type != "postgres" {
            return Err(PkdError::Config(format!(
                "Unsupported DB_TYPE '{}': only 'postgres' is available",
                self.db.db_type
            )));
        }
        if self.db.password.is_empty() {
            return Err(PkdError::Config(
                "DB_PASSWORD environment variable not set".to_string(),
            ));
        }
        if self.ldap.bind_password.is_empty() {
            return Err(PkdError::Config(
                "LDAP_BIND_PASSWORD environment variable not set".to_string(),
            ));
        }
        if self.ldap.read_hosts.is_empty() {
            return Err(PkdError::Config(
                "LDAP_READ_HOSTS is empty or invalid".to_string(),
            ));
        }
        if self.ldap.pool_min > self.ldap.pool_max {
            return Err(PkdError::Config(format!(
                "LDAP_POOL_MIN ({}) exceeds LDAP_POOL_MAX ({})",
                self.ldap.pool_min, self.ldap.pool_max
            )));
        }
        // An unreadable trust anchor is a process-level error: fail the
        // boot instead of silently skipping Master-List verification.
        self.load_trust_anchor()?;
        Ok(())
    }

    /// Read and decode the Master-List trust anchor (PEM `CERTIFICATE` or
    /// raw DER). Called during [`AppConfig::validate`]; an unreadable or
    /// undecodable anchor fails startup.
    pub fn load_trust_anchor(&self) -> Result<Vec<u8>> {
        let path = self.trust_anchor_path.display();
        let bytes = std::fs::read(&self.trust_anchor_path)
            .map_err(|e| PkdError::Config(format!("trust anchor unreadable at {path}: {e}")))?;

        let der = match std::str::from_utf8(&bytes) {
            Ok(text) if text.contains("-----BEGIN") => crate::x509::pem_to_der(text)
                .map_err(|e| PkdError::Config(format!("trust anchor at {path} is not valid PEM: {e}")))?,
            _ => bytes,
        };
        crate::x509::extract_metadata(&der).map_err(|e| {
            PkdError::Config(format!("trust anchor at {path} is not an X.509 certificate: {e}"))
        })?;
        Ok(der)
    }

    /// Postgres connection URL for sqlx
    pub fn db_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db.user, self.db.password, self.db.host, self.db.port, self.db.name
        )
    }

    /// Per-operation LDAP network timeout
    pub fn ldap_network_timeout(&self) -> Duration {
        Duration::from_secs(self.ldap.network_timeout_secs)
    }

    /// Bounded LDAP pool acquire timeout
    pub fn ldap_pool_timeout(&self) -> Duration {
        Duration::from_secs(self.ldap.pool_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A parseable PEM anchor on disk for validate() tests
    fn write_test_anchor() -> (tempfile::TempDir, PathBuf) {
        let mut params = rcgen::CertificateParams::new(Vec::new()).expect("params");
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "UN CSCA");
        let key = rcgen::KeyPair::generate().expect("keypair");
        let cert = params.self_signed(&key).expect("self-signed");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("UN_CSCA_2.pem");
        std::fs::write(&path, cert.pem()).expect("write anchor");
        (dir, path)
    }

    #[test]
    fn default_config_has_sane_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.db.db_type, "postgres");
        assert_eq!(config.ldap.read_hosts.len(), 2);
        assert_eq!(config.max_body_size_mb, 100);
    }

    #[test]
    fn validate_requires_credentials() {
        let (_dir, anchor) = write_test_anchor();
        let mut config = AppConfig::default();
        config.trust_anchor_path = anchor;
        assert!(config.validate().is_err());

        config.db.password = "secret".to_string();
        assert!(config.validate().is_err());

        config.ldap.bind_password = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unknown_db_type() {
        let mut config = AppConfig::default();
        config.db.password = "x".to_string();
        config.ldap.bind_password = "x".to_string();
        config.db.db_type = "oracle".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_fails_on_unreadable_trust_anchor() {
        let mut config = AppConfig::default();
        config.db.password = "x".to_string();
        config.ldap.bind_password = "x".to_string();
        config.trust_anchor_path = PathBuf::from("/nonexistent/UN_CSCA_2.pem");
        let err = config.validate().expect_err("anchor must be fatal");
        assert!(err.to_string().contains("trust anchor"));
    }

    #[test]
    fn validate_fails_on_garbage_trust_anchor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("anchor.pem");
        std::fs::write(&path, b"not a certificate").expect("write");

        let mut config = AppConfig::default();
        config.db.password = "x".to_string();
        config.ldap.bind_password = "x".to_string();
        config.trust_anchor_path = path;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_trust_anchor_returns_der() {
        let (_dir, anchor) = write_test_anchor();
        let mut config = AppConfig::default();
        config.trust_anchor_path = anchor;
        let der = config.load_trust_anchor().expect("anchor loads");
        assert!(crate::x509::extract_metadata(&der).is_ok());
    }

    #[test]
    fn db_url_shape() {
        let mut config = AppConfig::default();
        config.db.password = "pw".to_string();
        assert_eq!(config.db_url(), "postgres://localpkd:pw@postgres:5432/localpkd");
    }
}
