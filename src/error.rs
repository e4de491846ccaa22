// Copyright (c) 2025 - Cowboy AI, LLC.

//! Error types for PKD processing operations

use thiserror::Error;

/// Result type alias for PKD operations
pub type Result<T> = std::result::Result<T, PkdError>;

/// Main error type for the PKD management core
#[derive(Error, Debug)]
pub enum PkdError {
    /// Byte-level decode failure (DER, PEM, CMS, LDIF, base64 payloads)
    #[error("Parse error: {0}")]
    Parse(String),

    /// A file with identical bytes was already uploaded; carries the existing id
    #[error("Duplicate upload: file already ingested as {existing_id}")]
    DuplicateUpload {
        /// Id of the upload that first carried these bytes
        existing_id: uuid::Uuid,
    },

    /// No CSCA candidate found for an issuer DN; the cert stays PENDING
    #[error("CSCA not found for issuer: {0}")]
    CscaNotFound(String),

    /// Trust-chain signature verification failed
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// LDAP operation failed but may succeed on retry (connection, timeout)
    #[error("LDAP transient error: {0}")]
    LdapTransient(String),

    /// LDAP operation failed permanently (schema violation, bad DN)
    #[error("LDAP permanent error: {0}")]
    LdapPermanent(String),

    /// Bounded pool acquisition timed out
    #[error("Timed out acquiring {0} connection")]
    Timeout(&'static str),

    /// Database errors
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    /// Database migration errors
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// IO errors (staged temp files, trust anchor)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors (staged LDIF entries, statistics snapshots)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Base64 decoding errors
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Upload, certificate, or summary row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Illegal upload state transition or concurrent dispatch
    #[error("Invalid upload state: {0}")]
    InvalidState(String),

    /// Configuration error; at startup this is fatal
    #[error("Configuration error: {0}")]
    Config(String),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

impl From<ldap3::LdapError> for PkdError {
    fn from(err: ldap3::LdapError) -> Self {
        use ldap3::LdapError;
        match &err {
            // Result-code errors are permanent (bad DN, schema, already exists);
            // everything else (IO, timeouts, closed channels) is worth a retry.
            LdapError::LdapResult { .. } => PkdError::LdapPermanent(err.to_string()),
            _ => PkdError::LdapTransient(err.to_string()),
        }
    }
}
