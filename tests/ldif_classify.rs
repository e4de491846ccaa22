// Copyright (c) 2025 - Cowboy AI, LLC.

//! LDIF-to-classification flow over generated certificates: the parser
//! feeds the extractor and classifier exactly as the upload pipeline does.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::*;
use icao_pkd::classify::classify;
use icao_pkd::ldif::parse_bytes;
use icao_pkd::pipeline::Pipeline;
use icao_pkd::types::{CertType, FileFormat};
use icao_pkd::x509::extract_metadata;

fn ldif_with_cert(dn: &str, attr: &str, der: &[u8]) -> String {
    format!("dn: {dn}\nobjectClass: inetOrgPerson\n{attr}:: {}\n", BASE64.encode(der))
}

#[test]
fn csca_entry_classifies_from_ldif() {
    let csca = make_csca("CSCA-KR", "KR");
    let ldif = ldif_with_cert(
        "cn=abc,o=csca,c=KR,dc=data,dc=pkd",
        "cACertificate",
        &csca.der,
    );

    let entries = parse_bytes(ldif.as_bytes()).unwrap();
    assert_eq!(entries.len(), 1);
    let der = entries[0].first_binary("cACertificate").unwrap().unwrap();
    let meta = extract_metadata(&der).unwrap();

    assert!(meta.is_self_signed);
    assert_eq!(classify(&meta, &entries[0].dn), CertType::Csca);
    assert_eq!(meta.country_code(), "KR");
}

#[test]
fn dsc_entry_classifies_from_ldif() {
    let csca = make_csca("CSCA-KR", "KR");
    let dsc = make_dsc("DS-KR-1", "KR", &csca);
    let ldif = ldif_with_cert(
        "cn=def,o=dsc,c=KR,dc=data,dc=pkd",
        "userCertificate",
        &dsc.der,
    );

    let entries = parse_bytes(ldif.as_bytes()).unwrap();
    let der = entries[0].first_binary("userCertificate").unwrap().unwrap();
    let meta = extract_metadata(&der).unwrap();

    assert!(!meta.is_self_signed);
    assert_eq!(classify(&meta, &entries[0].dn), CertType::Dsc);
}

#[test]
fn nc_data_path_forces_dsc_nc() {
    let csca = make_csca("CSCA-KR", "KR");
    let dsc = make_dsc("DS-KR-2", "KR", &csca);
    let ldif = ldif_with_cert(
        "cn=ghi,o=dsc,c=KR,dc=nc-data,dc=pkd",
        "userCertificate",
        &dsc.der,
    );

    let entries = parse_bytes(ldif.as_bytes()).unwrap();
    let der = entries[0].first_binary("userCertificate").unwrap().unwrap();
    let meta = extract_metadata(&der).unwrap();

    assert_eq!(classify(&meta, &entries[0].dn), CertType::DscNc);
}

#[test]
fn link_cert_classifies_as_link() {
    let root = make_csca("CSCA-LV Root", "LV");
    let link = make_link_cert("CSCA-LV", "LV", &root);
    let meta = extract_metadata(&link.der).unwrap();

    assert!(meta.is_ca);
    assert!(!meta.is_self_signed);
    assert_eq!(classify(&meta, ""), CertType::LinkCert);
}

#[test]
fn extractor_reports_key_and_algorithm() {
    let csca = make_csca("CSCA-NO", "NO");
    let meta = extract_metadata(&csca.der).unwrap();

    assert_eq!(meta.version, 3);
    assert_eq!(meta.public_key_algorithm, "ECDSA");
    assert_eq!(meta.public_key_size, 256);
    assert_eq!(meta.public_key_curve.as_deref(), Some("prime256v1"));
    assert_eq!(meta.signature_algorithm, "ecdsa-with-SHA256");
    assert!(meta.key_usage.iter().any(|u| u == "keyCertSign"));
    assert_eq!(meta.fingerprint_sha256.len(), 64);
    assert_eq!(meta.fingerprint_sha1.len(), 40);
}

#[test]
fn pem_round_trip_preserves_der() {
    let csca = make_csca("CSCA-DK", "DK");
    let pem = icao_pkd::x509::der_to_pem(&csca.der);
    let back = icao_pkd::x509::pem_to_der(&pem).unwrap();
    assert_eq!(back, csca.der);
}

#[test]
fn ingesting_identical_ldif_is_detected_by_hash() {
    // The dedup gate is the content hash; equal bytes, equal hash.
    use sha2::{Digest, Sha256};
    let csca = make_csca("CSCA-FI", "FI");
    let ldif = ldif_with_cert("cn=x,o=csca,c=FI,dc=data", "cACertificate", &csca.der);
    let h1 = hex::encode(Sha256::digest(ldif.as_bytes()));
    let h2 = hex::encode(Sha256::digest(ldif.as_bytes()));
    assert_eq!(h1, h2);
}

#[test]
fn format_detection() {
    let csca = make_csca("CSCA-IS", "IS");

    let ldif = ldif_with_cert("cn=x,o=csca,c=IS,dc=data", "cACertificate", &csca.der);
    assert_eq!(
        Pipeline::detect_format("bundle.ldif", ldif.as_bytes()).unwrap(),
        FileFormat::Ldif
    );
    assert_eq!(
        Pipeline::detect_format("noext", ldif.as_bytes()).unwrap(),
        FileFormat::Ldif
    );
    assert_eq!(
        Pipeline::detect_format("cert.der", &csca.der).unwrap(),
        FileFormat::Cert
    );
    let pem = icao_pkd::x509::der_to_pem(&csca.der);
    assert_eq!(
        Pipeline::detect_format("cert.pem", pem.as_bytes()).unwrap(),
        FileFormat::Cert
    );
    assert!(Pipeline::detect_format("junk.bin", b"not anything").is_err());
}
