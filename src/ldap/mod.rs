// Copyright (c) 2025 - Cowboy AI, LLC.

//! LDAP directory layer
//!
//! DN construction and escaping, the bounded read/write connection pool,
//! and the entry-building store behind the [`Directory`] trait.

pub mod dn;
pub mod pool;
pub mod store;

pub use pool::LdapPool;
pub use store::{CertificateEntry, Directory, LdapStore};
