// Copyright (c) 2025 - Cowboy AI, LLC.

//! Directory writes: entry building and OU provisioning
//!
//! Entries land in a fixed DIT (see [`super::dn`]). Containers, country
//! nodes and organizational units are provisioned on first use. An add
//! hitting ALREADY_EXISTS degrades to a replace of the binary payload,
//! which is also how a reconciler rewrite migrates a legacy entry.

use super::dn as ldap_dn;
use super::pool::LdapPool;
use crate::error::Result;
use crate::types::CertType;
use async_trait::async_trait;
use ldap3::{Ldap, LdapError, Mod, Scope, SearchEntry};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const RC_ALREADY_EXISTS: u32 = 68;
const RC_NO_SUCH_OBJECT: u32 = 32;

/// A certificate ready for the directory
#[derive(Debug, Clone)]
pub struct CertificateEntry {
    /// Category (decides OU and container)
    pub cert_type: CertType,
    /// Country node
    pub country_code: String,
    /// Full subject DN (description attribute, legacy RDN)
    pub subject_dn: String,
    /// Serial, uppercase hex (sn attribute)
    pub serial_number: String,
    /// SHA-256 fingerprint (v2 RDN)
    pub fingerprint_sha256: String,
    /// DER payload
    pub der_bytes: Vec<u8>,
    /// DSC-NC conformance code
    pub conformance_code: Option<String>,
    /// DSC-NC conformance text
    pub conformance_text: Option<String>,
    /// DSC-NC PKD version
    pub pkd_version: Option<String>,
    /// Emit the legacy subject+serial RDN instead of the fingerprint RDN
    pub use_legacy_dn: bool,
}

/// Abstract directory surface used by the pipeline and the reconciler
#[async_trait]
pub trait Directory: Send + Sync {
    /// Write (or replace) a certificate entry; returns its DN
    async fn store_certificate(&self, entry: &CertificateEntry) -> Result<String>;
    /// Write (or replace) a CRL entry; returns its DN
    async fn store_crl(&self, country_code: &str, fingerprint: &str, der: &[u8])
        -> Result<String>;
    /// Write (or replace) a master-list entry; returns its DN
    async fn store_master_list(
        &self,
        country_code: &str,
        fingerprint: &str,
        cms: &[u8],
    ) -> Result<String>;
    /// Fingerprint -> entry DN for every entry under the OU scope of a type
    async fn list_fingerprints(&self, cert_type: CertType) -> Result<HashMap<String, String>>;
    /// Fingerprint -> entry DN for every CRL entry
    async fn list_crl_fingerprints(&self) -> Result<HashMap<String, String>>;
    /// Delete one entry by its DN
    async fn delete_entry(&self, dn: &str) -> Result<()>;
    /// Entry counts per OU, for sync-status reporting
    async fn counts_by_type(&self) -> Result<HashMap<String, i64>>;
}

/// The production directory client
pub struct LdapStore {
    pool: Arc<LdapPool>,
}

type Attrs = Vec<(Vec<u8>, HashSet<Vec<u8>>)>;

fn attr(name: &str, values: &[&[u8]]) -> (Vec<u8>, HashSet<Vec<u8>>) {
    (
        name.as_bytes().to_vec(),
        values.iter().map(|v| v.to_vec()).collect(),
    )
}

fn rc_of(err: &LdapError) -> Option<u32> {
    match err {
        LdapError::LdapResult { result } => Some(result.rc),
        _ => None,
    }
}

async fn add_ignoring_exists(ldap: &mut Ldap, dn: &str, attrs: Attrs) -> Result<bool> {
    match ldap.add(dn, attrs).await?.success() {
        Ok(_) => Ok(true),
        Err(e) if rc_of(&e) == Some(RC_ALREADY_EXISTS) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl LdapStore {
    /// Create over a connected pool
    pub fn new(pool: Arc<LdapPool>) -> Self {
        Self { pool }
    }

    /// Provision container, country node, and OUs on first use
    async fn ensure_country_ou(&self, ldap: &mut Ldap, country_code: &str, nc: bool) -> Result<()> {
        let config = self.pool.config().clone();
        let container = if nc {
            &config.nc_data_container
        } else {
            &config.data_container
        };
        let container_dn = format!("{},{}", container, config.base_dn);
        let dc_value = container
            .split_once('=')
            .map(|(_, v)| v)
            .unwrap_or(container);

        let container_missing = match ldap
            .search(&container_dn, Scope::Base, "(objectClass=*)", vec!["dn"])
            .await?
            .success()
        {
            Ok(_) => false,
            Err(e) if rc_of(&e) == Some(RC_NO_SUCH_OBJECT) => true,
            Err(e) => return Err(e.into()),
        };
        if container_missing {
            let attrs = vec![
                attr("objectClass", &[b"top", b"dcObject", b"organization"]),
                attr("dc", &[dc_value.as_bytes()]),
                attr("o", &[dc_value.as_bytes()]),
            ];
            if add_ignoring_exists(ldap, &container_dn, attrs).await? {
                tracing::info!("created LDAP data container {container_dn}");
            }
        }

        let country_dn = ldap_dn::country_dn(&config, country_code, nc);
        let country_missing = match ldap
            .search(&country_dn, Scope::Base, "(objectClass=*)", vec!["dn"])
            .await?
            .success()
        {
            Ok(_) => false,
            Err(e) if rc_of(&e) == Some(RC_NO_SUCH_OBJECT) => true,
            Err(e) => return Err(e.into()),
        };
        if !country_missing {
            return Ok(());
        }

        let attrs = vec![
            attr("objectClass", &[b"country", b"top"]),
            attr("c", &[country_code.as_bytes()]),
        ];
        add_ignoring_exists(ldap, &country_dn, attrs).await?;

        let ous: &[&str] = if nc {
            &["dsc"]
        } else {
            &["csca", "dsc", "lc", "mlsc", "crl", "ml"]
        };
        for ou in ous {
            let ou_dn = format!("o={ou},{country_dn}");
            let attrs = vec![
                attr("objectClass", &[b"organization", b"top"]),
                attr("o", &[ou.as_bytes()]),
            ];
            add_ignoring_exists(ldap, &ou_dn, attrs).await?;
        }
        tracing::debug!("provisioned OUs for c={country_code} (nc={nc})");
        Ok(())
    }

    async fn add_or_replace(
        &self,
        ldap: &mut Ldap,
        dn: &str,
        attrs: Attrs,
        binary_attr: &str,
        payload: &[u8],
    ) -> Result<()> {
        match ldap.add(dn, attrs).await?.success() {
            Ok(_) => Ok(()),
            Err(e) if rc_of(&e) == Some(RC_ALREADY_EXISTS) => {
                let values: HashSet<Vec<u8>> = std::iter::once(payload.to_vec()).collect();
                ldap.modify(
                    dn,
                    vec![Mod::Replace(binary_attr.as_bytes().to_vec(), values)],
                )
                .await?
                .success()?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_fingerprints_scoped(
        &self,
        ou: &str,
        filter: &str,
        include_nc: bool,
    ) -> Result<HashMap<String, String>> {
        let config = self.pool.config().clone();
        let mut out = HashMap::new();

        let mut bases = vec![format!("{},{}", config.data_container, config.base_dn)];
        if include_nc {
            bases = vec![format!("{},{}", config.nc_data_container, config.base_dn)];
        }

        let mut handle = self.pool.read().await?;
        let ldap = handle.ldap();
        for base in bases {
            let result = match ldap
                .search(&base, Scope::Subtree, filter, vec!["cn"])
                .await?
                .success()
            {
                Ok((entries, _)) => entries,
                Err(e) if rc_of(&e) == Some(RC_NO_SUCH_OBJECT) => continue,
                Err(e) => return Err(e.into()),
            };
            let ou_marker = format!(",o={ou},");
            for raw in result {
                let entry = SearchEntry::construct(raw);
                if !entry.dn.to_ascii_lowercase().contains(&ou_marker) {
                    continue;
                }
                for cn in entry.attrs.get("cn").into_iter().flatten() {
                    // v2 RDNs are SHA-256 fingerprints; skip legacy values
                    if cn.len() == 64 && cn.bytes().all(|b| b.is_ascii_hexdigit()) {
                        out.insert(cn.to_ascii_lowercase(), entry.dn.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    async fn delete_dn(&self, dn: &str) -> Result<()> {
        let mut handle = self.pool.write().await?;
        handle.ldap().delete(dn).await?.success()?;
        Ok(())
    }
}

#[async_trait]
impl Directory for LdapStore {
    async fn store_certificate(&self, entry: &CertificateEntry) -> Result<String> {
        let config = self.pool.config().clone();
        let dn = if entry.use_legacy_dn {
            ldap_dn::certificate_dn_legacy(
                &config,
                entry.cert_type,
                &entry.country_code,
                &entry.subject_dn,
                &entry.serial_number,
            )
        } else {
            ldap_dn::certificate_dn_v2(
                &config,
                entry.cert_type,
                &entry.country_code,
                &entry.fingerprint_sha256,
            )
        };

        let (standard_dn, non_standard) =
            crate::x509::dn::split_standard_attributes(&entry.subject_dn);
        let description = if non_standard.is_empty() {
            format!(
                "Subject DN: {} | Fingerprint: {}",
                entry.subject_dn, entry.fingerprint_sha256
            )
        } else {
            format!(
                "Full Subject DN: {} | Non-standard attributes: {} | Fingerprint: {}",
                entry.subject_dn, non_standard, entry.fingerprint_sha256
            )
        };

        let mut attrs: Attrs = vec![
            attr(
                "objectClass",
                &[
                    b"top",
                    b"person",
                    b"organizationalPerson",
                    b"inetOrgPerson",
                    b"pkdDownload",
                ],
            ),
            if entry.use_legacy_dn {
                attr(
                    "cn",
                    &[standard_dn.as_bytes(), entry.fingerprint_sha256.as_bytes()],
                )
            } else {
                attr("cn", &[entry.fingerprint_sha256.as_bytes()])
            },
            attr("sn", &[entry.serial_number.as_bytes()]),
            attr("description", &[description.as_bytes()]),
            attr("userCertificate;binary", &[&entry.der_bytes]),
        ];

        if entry.cert_type.is_nc() {
            if let Some(code) = &entry.conformance_code {
                attrs.push(attr("pkdConformanceCode", &[code.as_bytes()]));
            }
            if let Some(text) = &entry.conformance_text {
                attrs.push(attr("pkdConformanceText", &[text.as_bytes()]));
            }
            if let Some(version) = &entry.pkd_version {
                attrs.push(attr("pkdVersion", &[version.as_bytes()]));
            }
        }

        let mut handle = self.pool.write().await?;
        let ldap = handle.ldap();
        self.ensure_country_ou(ldap, &entry.country_code, entry.cert_type.is_nc())
            .await?;
        self.add_or_replace(ldap, &dn, attrs, "userCertificate;binary", &entry.der_bytes)
            .await?;
        tracing::debug!("stored certificate in directory: {dn}");
        Ok(dn)
    }

    async fn store_crl(
        &self,
        country_code: &str,
        fingerprint: &str,
        der: &[u8],
    ) -> Result<String> {
        let config = self.pool.config().clone();
        let dn = ldap_dn::crl_dn(&config, country_code, fingerprint);
        let attrs: Attrs = vec![
            attr("objectClass", &[b"top", b"cRLDistributionPoint", b"pkdDownload"]),
            attr("cn", &[fingerprint.as_bytes()]),
            attr("certificateRevocationList;binary", &[der]),
        ];

        let mut handle = self.pool.write().await?;
        let ldap = handle.ldap();
        self.ensure_country_ou(ldap, country_code, false).await?;
        self.add_or_replace(ldap, &dn, attrs, "certificateRevocationList;binary", der)
            .await?;
        tracing::debug!("stored CRL in directory: {dn}");
        Ok(dn)
    }

    async fn store_master_list(
        &self,
        country_code: &str,
        fingerprint: &str,
        cms: &[u8],
    ) -> Result<String> {
        let config = self.pool.config().clone();
        let dn = ldap_dn::master_list_dn(&config, country_code, fingerprint);
        let attrs: Attrs = vec![
            attr(
                "objectClass",
                &[b"top", b"person", b"pkdMasterList", b"pkdDownload"],
            ),
            attr("cn", &[fingerprint.as_bytes()]),
            attr("sn", &[b"1"]),
            attr("pkdMasterListContent", &[cms]),
            attr("pkdVersion", &[b"70"]),
        ];

        let mut handle = self.pool.write().await?;
        let ldap = handle.ldap();
        self.ensure_country_ou(ldap, country_code, false).await?;
        self.add_or_replace(ldap, &dn, attrs, "pkdMasterListContent", cms)
            .await?;
        tracing::info!("stored master list in directory: {dn}");
        Ok(dn)
    }

    async fn list_fingerprints(&self, cert_type: CertType) -> Result<HashMap<String, String>> {
        self.list_fingerprints_scoped(
            cert_type.ldap_ou(),
            "(objectClass=inetOrgPerson)",
            cert_type.is_nc(),
        )
        .await
    }

    async fn list_crl_fingerprints(&self) -> Result<HashMap<String, String>> {
        self.list_fingerprints_scoped("crl", "(objectClass=cRLDistributionPoint)", false)
            .await
    }

    async fn delete_entry(&self, dn: &str) -> Result<()> {
        self.delete_dn(dn).await
    }

    async fn counts_by_type(&self) -> Result<HashMap<String, i64>> {
        let mut counts = HashMap::new();
        for cert_type in [CertType::Csca, CertType::Dsc, CertType::DscNc, CertType::Mlsc] {
            let n = self.list_fingerprints(cert_type).await?.len() as i64;
            let key = if cert_type == CertType::DscNc {
                "DSC_NC".to_string()
            } else {
                cert_type.db_type().to_string()
            };
            *counts.entry(key).or_insert(0) += n;
        }
        counts.insert("CRL".to_string(), self.list_crl_fingerprints().await?.len() as i64);
        Ok(counts)
    }
}
