// Copyright (c) 2025 - Cowboy AI, LLC.

//! Shared fixtures: rcgen-generated CSCA/DSC/link-cert material and an
//! in-memory CSCA provider for chain tests.

#![allow(dead_code)]

use async_trait::async_trait;
use icao_pkd::chain::{CscaProvider, StoredCsca};
use icao_pkd::error::PkdError;
use icao_pkd::ldap::{CertificateEntry, Directory};
use icao_pkd::types::CertType;
use icao_pkd::x509::dn;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use std::collections::HashMap;
use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

/// A generated certificate plus its signing key
pub struct TestCert {
    pub der: Vec<u8>,
    pub key: KeyPair,
    pub params: CertificateParams,
}

fn base_params(common_name: &str, country: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::new()).expect("params");
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.distinguished_name.push(DnType::CountryName, country);
    params.not_before = OffsetDateTime::now_utc() - Duration::days(30);
    params.not_after = OffsetDateTime::now_utc() + Duration::days(365);
    params
}

/// Self-signed CSCA (CA, keyCertSign + cRLSign)
pub fn make_csca(common_name: &str, country: &str) -> TestCert {
    let mut params = base_params(common_name, country);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.key_usages.push(KeyUsagePurpose::CrlSign);

    let key = KeyPair::generate().expect("keypair");
    let cert = params.clone().self_signed(&key).expect("self-signed");
    TestCert {
        der: cert.der().to_vec(),
        key,
        params,
    }
}

/// Self-signed CSCA with explicit validity bounds
pub fn make_csca_with_validity(
    common_name: &str,
    country: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> TestCert {
    let mut params = base_params(common_name, country);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate().expect("keypair");
    let cert = params.clone().self_signed(&key).expect("self-signed");
    TestCert {
        der: cert.der().to_vec(),
        key,
        params,
    }
}

/// Leaf DSC signed by the given CSCA
pub fn make_dsc(common_name: &str, country: &str, issuer: &TestCert) -> TestCert {
    make_dsc_with_validity(
        common_name,
        country,
        issuer,
        OffsetDateTime::now_utc() - Duration::days(30),
        OffsetDateTime::now_utc() + Duration::days(90),
    )
}

/// Leaf DSC with explicit validity bounds
pub fn make_dsc_with_validity(
    common_name: &str,
    country: &str,
    issuer: &TestCert,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> TestCert {
    let mut params = base_params(common_name, country);
    params.is_ca = IsCa::NoCa;
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);
    params.not_before = not_before;
    params.not_after = not_after;

    let key = KeyPair::generate().expect("keypair");
    let issuer_key = KeyPair::try_from(issuer.key.serialize_der()).expect("issuer keypair");
    let signer = Issuer::new(issuer.params.clone(), issuer_key);
    let cert = params.clone().signed_by(&key, &signer).expect("signed");
    TestCert {
        der: cert.der().to_vec(),
        key,
        params,
    }
}

/// CA certificate cross-signed by another CSCA (a link certificate)
pub fn make_link_cert(common_name: &str, country: &str, issuer: &TestCert) -> TestCert {
    let mut params = base_params(common_name, country);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);

    let key = KeyPair::generate().expect("keypair");
    let issuer_key = KeyPair::try_from(issuer.key.serialize_der()).expect("issuer keypair");
    let signer = Issuer::new(issuer.params.clone(), issuer_key);
    let cert = params.clone().signed_by(&key, &signer).expect("signed");
    TestCert {
        der: cert.der().to_vec(),
        key,
        params,
    }
}

/// Flip a byte inside the signature (the tail of the DER) so the structure
/// still parses but the self-signature no longer verifies.
pub fn tamper_signature(der: &[u8]) -> Vec<u8> {
    let mut tampered = der.to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    tampered
}

/// In-memory CSCA provider
#[derive(Default)]
pub struct MemoryProvider {
    cscas: Mutex<Vec<StoredCsca>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_der(&self, der: &[u8]) {
        let meta = icao_pkd::x509::extract_metadata(der).expect("parseable CSCA");
        self.cscas.lock().unwrap().push(StoredCsca {
            fingerprint_sha256: meta.fingerprint_sha256,
            subject_dn: meta.subject_dn,
            der: der.to_vec(),
        });
    }
}

#[async_trait]
impl CscaProvider for MemoryProvider {
    async fn find_by_subject_dn(&self, subject_dn: &str) -> icao_pkd::Result<Vec<StoredCsca>> {
        Ok(self
            .cscas
            .lock()
            .unwrap()
            .iter()
            .filter(|c| dn::equals(&c.subject_dn, subject_dn))
            .cloned()
            .collect())
    }
}

/// What one fake directory entry holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Cert { ou: &'static str, nc: bool },
    Crl,
    MasterList,
}

#[derive(Debug, Clone)]
pub struct FakeEntry {
    pub kind: EntryKind,
    pub fingerprint: String,
}

/// In-memory [`Directory`] fake: entries keyed by DN, mirroring the DIT
/// shape closely enough for listing, deleting, and healing tests.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: Mutex<HashMap<String, FakeEntry>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn dn_for(ou: &str, nc: bool, country: &str, fingerprint: &str) -> String {
        let container = if nc { "dc=nc-data" } else { "dc=data" };
        format!("cn={fingerprint},o={ou},c={country},{container},dc=pkd")
    }

    /// Simulate an out-of-band deletion (an admin removing an entry)
    pub fn remove_by_fingerprint(&self, fingerprint: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let dns: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.fingerprint == fingerprint)
            .map(|(dn, _)| dn.clone())
            .collect();
        for dn in &dns {
            entries.remove(dn);
        }
        !dns.is_empty()
    }

    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .values()
            .any(|e| e.fingerprint == fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn list(&self, wanted: impl Fn(&EntryKind) -> bool) -> HashMap<String, String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| wanted(&e.kind))
            .map(|(dn, e)| (e.fingerprint.clone(), dn.clone()))
            .collect()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn store_certificate(&self, entry: &CertificateEntry) -> icao_pkd::Result<String> {
        let dn = Self::dn_for(
            entry.cert_type.ldap_ou(),
            entry.cert_type.is_nc(),
            &entry.country_code,
            &entry.fingerprint_sha256,
        );
        self.entries.lock().unwrap().insert(
            dn.clone(),
            FakeEntry {
                kind: EntryKind::Cert {
                    ou: entry.cert_type.ldap_ou(),
                    nc: entry.cert_type.is_nc(),
                },
                fingerprint: entry.fingerprint_sha256.clone(),
            },
        );
        Ok(dn)
    }

    async fn store_crl(
        &self,
        country_code: &str,
        fingerprint: &str,
        _der: &[u8],
    ) -> icao_pkd::Result<String> {
        let dn = Self::dn_for("crl", false, country_code, fingerprint);
        self.entries.lock().unwrap().insert(
            dn.clone(),
            FakeEntry {
                kind: EntryKind::Crl,
                fingerprint: fingerprint.to_string(),
            },
        );
        Ok(dn)
    }

    async fn store_master_list(
        &self,
        country_code: &str,
        fingerprint: &str,
        _cms: &[u8],
    ) -> icao_pkd::Result<String> {
        let dn = Self::dn_for("ml", false, country_code, fingerprint);
        self.entries.lock().unwrap().insert(
            dn.clone(),
            FakeEntry {
                kind: EntryKind::MasterList,
                fingerprint: fingerprint.to_string(),
            },
        );
        Ok(dn)
    }

    async fn list_fingerprints(
        &self,
        cert_type: CertType,
    ) -> icao_pkd::Result<HashMap<String, String>> {
        Ok(self.list(|kind| {
            matches!(kind, EntryKind::Cert { ou, nc }
                if *ou == cert_type.ldap_ou() && *nc == cert_type.is_nc())
        }))
    }

    async fn list_crl_fingerprints(&self) -> icao_pkd::Result<HashMap<String, String>> {
        Ok(self.list(|kind| matches!(kind, EntryKind::Crl)))
    }

    async fn delete_entry(&self, dn: &str) -> icao_pkd::Result<()> {
        match self.entries.lock().unwrap().remove(dn) {
            Some(_) => Ok(()),
            None => Err(PkdError::LdapPermanent(format!("no such object: {dn}"))),
        }
    }

    async fn counts_by_type(&self) -> icao_pkd::Result<HashMap<String, i64>> {
        let mut counts = HashMap::new();
        for entry in self.entries.lock().unwrap().values() {
            let key = match &entry.kind {
                EntryKind::Cert { ou: "csca", .. } | EntryKind::Cert { ou: "lc", .. } => "CSCA",
                EntryKind::Cert { ou: "mlsc", .. } => "MLSC",
                EntryKind::Cert { nc: true, .. } => "DSC_NC",
                EntryKind::Cert { .. } => "DSC",
                EntryKind::Crl => "CRL",
                EntryKind::MasterList => "ML",
            };
            *counts.entry(key.to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
