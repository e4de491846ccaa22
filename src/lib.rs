//! # ICAO PKD Management Core
//!
//! Ingestion, validation, storage, and directory synchronization for the
//! X.509 certificate material behind ePassport verification: LDIF bundles,
//! ICAO CMS Master Lists, Deviation Lists, CRLs, and raw certificates.
//!
//! ## Subsystems
//!
//! - **Ingestion pipeline** (`pipeline`): parses heterogeneous bundles,
//!   classifies each artifact, validates it, persists to Postgres and LDAP,
//!   and streams progress to subscribers.
//! - **Trust-chain validator** (`chain`): builds verifier-key-matched
//!   chains from Document Signer Certificates to self-signed CSCAs,
//!   handling link certificates and key rollover under the ICAO Doc 9303
//!   hybrid rule (signatures are hard, expiration is informational).
//! - **Reconciler** (`reconcile`): a periodic control loop diffing the
//!   relational store against the LDAP tree per type, with dry-run support
//!   and an auditable per-object log.
//!
//! ## Architecture
//!
//! The crate is organized into focused modules:
//! - `x509`: metadata extraction, DN handling, Doc 9303 compliance
//! - `ldif`, `cms`, `crl`: wire-format parsers
//! - `classify`: certificate type classification
//! - `store`: sqlx/Postgres repositories
//! - `ldap`: directory DNs, connection pool, entry store
//! - `pipeline`: upload orchestration and progress fan-out
//! - `reconcile`, `revalidate`: background control loops

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod chain;
pub mod classify;
pub mod cms;
pub mod config;
pub mod crl;
pub mod error;
pub mod ldap;
pub mod ldif;
pub mod pipeline;
pub mod reconcile;
pub mod revalidate;
pub mod store;
pub mod types;
pub mod x509;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{PkdError, Result};
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::chain::{build_chain, ChainResult, CscaProvider, StoredCsca};
    pub use crate::classify::classify;
    pub use crate::config::AppConfig;
    pub use crate::error::{PkdError, Result};
    pub use crate::ldap::{Directory, LdapPool, LdapStore};
    pub use crate::pipeline::progress::ProgressManager;
    pub use crate::pipeline::Pipeline;
    pub use crate::reconcile::Reconciler;
    pub use crate::revalidate::Revalidator;
    pub use crate::store::Store;
    pub use crate::types::*;
}
