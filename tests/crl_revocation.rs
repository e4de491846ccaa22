// Copyright (c) 2025 - Cowboy AI, LLC.

//! CRL parsing and revocation checks against generated revocation lists.

mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::*;
use icao_pkd::crl::{check_revocation, parse_crl, CrlProvider, StoredCrl};
use icao_pkd::types::CrlCheckStatus;
use rcgen::{
    CertificateRevocationListParams, Issuer, KeyIdMethod, KeyPair, RevocationReason,
    RevokedCertParams, SerialNumber,
};
use std::sync::Mutex;
use time::{Duration, OffsetDateTime};

fn make_crl(issuer: &TestCert, revoked_serials: &[&[u8]], next_update_days: i64) -> Vec<u8> {
    let params = CertificateRevocationListParams {
        this_update: OffsetDateTime::now_utc() - Duration::days(1),
        next_update: OffsetDateTime::now_utc() + Duration::days(next_update_days),
        crl_number: SerialNumber::from(7u64),
        issuing_distribution_point: None,
        revoked_certs: revoked_serials
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from_slice(serial),
                revocation_time: OffsetDateTime::now_utc() - Duration::days(2),
                reason_code: Some(RevocationReason::KeyCompromise),
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    };
    let issuer_key = KeyPair::try_from(issuer.key.serialize_der()).expect("issuer keypair");
    let signer = Issuer::new(issuer.params.clone(), issuer_key);
    let crl = params.signed_by(&signer).expect("CRL signed");
    crl.der().to_vec()
}

#[derive(Default)]
struct MemoryCrls {
    by_country: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryCrls {
    fn add(&self, country: &str, der: Vec<u8>) {
        self.by_country
            .lock()
            .unwrap()
            .push((country.to_string(), der));
    }
}

#[async_trait]
impl CrlProvider for MemoryCrls {
    async fn latest_by_country(&self, country_code: &str) -> icao_pkd::Result<Option<StoredCrl>> {
        Ok(self
            .by_country
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(country, _)| country == country_code)
            .map(|(country, der)| StoredCrl {
                country_code: country.clone(),
                raw: der.clone(),
            }))
    }
}

#[test]
fn parse_crl_extracts_revoked_serials() {
    let csca = make_csca("CSCA-KR", "KR");
    let der = make_crl(&csca, &[&[0x12, 0x34], &[0x56, 0x78]], 30);

    let meta = parse_crl(&der).unwrap();
    assert_eq!(meta.revoked.len(), 2);
    assert!(meta.revoked.iter().any(|e| e.serial == "1234"));
    assert!(meta.revoked.iter().any(|e| e.serial == "5678"));
    assert!(meta.next_update.is_some());
    assert!(meta.issuer_dn.to_lowercase().contains("csca-kr"));
    assert_eq!(
        meta.revoked[0].reason.as_deref(),
        Some("keyCompromise")
    );
}

#[tokio::test]
async fn revoked_serial_is_flagged() {
    let csca = make_csca("CSCA-KR", "KR");
    let crls = MemoryCrls::default();
    crls.add("KR", make_crl(&csca, &[&[0x12, 0x34]], 30));

    let result = check_revocation("1234", "KR", &crls, Utc::now()).await.unwrap();
    assert_eq!(result.status, CrlCheckStatus::Revoked);
}

#[tokio::test]
async fn unlisted_serial_is_not_revoked() {
    let csca = make_csca("CSCA-KR", "KR");
    let crls = MemoryCrls::default();
    crls.add("KR", make_crl(&csca, &[&[0x12, 0x34]], 30));

    let result = check_revocation("9999", "KR", &crls, Utc::now()).await.unwrap();
    assert_eq!(result.status, CrlCheckStatus::NotRevoked);
}

#[tokio::test]
async fn missing_crl_is_not_checked() {
    let crls = MemoryCrls::default();
    let result = check_revocation("1234", "FR", &crls, Utc::now()).await.unwrap();
    assert_eq!(result.status, CrlCheckStatus::NotChecked);
}

#[tokio::test]
async fn expired_crl_still_reports_its_verdict() {
    let csca = make_csca("CSCA-KR", "KR");
    let crls = MemoryCrls::default();
    crls.add("KR", make_crl(&csca, &[&[0x12, 0x34]], -5));

    let result = check_revocation("1234", "KR", &crls, Utc::now()).await.unwrap();
    assert_eq!(result.status, CrlCheckStatus::Revoked);
}

#[tokio::test]
async fn garbage_crl_bytes_are_an_error_verdict() {
    let crls = MemoryCrls::default();
    crls.add("KR", b"definitely not DER".to_vec());

    let result = check_revocation("1234", "KR", &crls, Utc::now()).await.unwrap();
    assert_eq!(result.status, CrlCheckStatus::Error);
}

#[tokio::test]
async fn hex_encoded_crl_column_is_accepted() {
    let csca = make_csca("CSCA-KR", "KR");
    let der = make_crl(&csca, &[&[0x12, 0x34]], 30);
    let mut encoded = b"\\x".to_vec();
    encoded.extend(hex::encode(&der).into_bytes());

    let crls = MemoryCrls::default();
    crls.add("KR", encoded);

    let result = check_revocation("1234", "KR", &crls, Utc::now()).await.unwrap();
    assert_eq!(result.status, CrlCheckStatus::Revoked);
}
