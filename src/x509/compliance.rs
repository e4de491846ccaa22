// Copyright (c) 2025 - Cowboy AI, LLC.

//! ICAO Doc 9303 compliance checking
//!
//! Informational profile check, independent of trust-chain validation: it
//! never gates a certificate, it grades one. The approved-algorithm,
//! key-size, validity and extension tables are policy data carried in
//! [`CompliancePolicy`]; the walk itself mirrors the RFC 5280 check style
//! (one aspect per function, appending findings).

use super::CertMetadata;
use crate::types::{CertType, ComplianceLevel};
use serde::{Deserialize, Serialize};

/// One profile violation
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    /// Category tag: keyUsage, algorithm, keySize, validityPeriod, dnFormat, extensions
    pub category: &'static str,
    /// Human-readable finding
    pub message: String,
    /// Whether this violation alone makes the certificate non-conformant
    pub fatal: bool,
}

/// Result of a compliance check
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    /// Overall grade
    pub level: ComplianceLevel,
    /// Individual findings, empty when conformant
    pub violations: Vec<Violation>,
}

impl ComplianceReport {
    fn grade(violations: Vec<Violation>) -> Self {
        let level = if violations.is_empty() {
            ComplianceLevel::Conformant
        } else if violations.iter().any(|v| v.fatal) {
            ComplianceLevel::NonConformant
        } else {
            ComplianceLevel::Warning
        };
        Self { level, violations }
    }
}

/// Policy tables for the Doc 9303 certificate profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompliancePolicy {
    /// Approved signature algorithm names
    pub approved_signature_algorithms: Vec<String>,
    /// Minimum RSA modulus bits per cert type
    pub min_rsa_bits_csca: u32,
    /// Minimum RSA modulus bits for DSCs
    pub min_rsa_bits_dsc: u32,
    /// Minimum ECDSA field bits
    pub min_ec_bits: u32,
    /// Maximum DSC validity in days (profile expectation, warning only)
    pub max_dsc_validity_days: i64,
    /// Maximum CSCA validity in days
    pub max_csca_validity_days: i64,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            approved_signature_algorithms: [
                "sha256WithRSAEncryption",
                "sha384WithRSAEncryption",
                "sha512WithRSAEncryption",
                "rsassaPss",
                "ecdsa-with-SHA256",
                "ecdsa-with-SHA384",
                "ecdsa-with-SHA512",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            min_rsa_bits_csca: 3072,
            min_rsa_bits_dsc: 2048,
            min_ec_bits: 256,
            max_dsc_validity_days: 457,   // ~15 months
            max_csca_validity_days: 5844, // ~16 years
        }
    }
}

fn check_algorithm(meta: &CertMetadata, policy: &CompliancePolicy, out: &mut Vec<Violation>) {
    if meta.signature_algorithm == "unknown" {
        out.push(Violation {
            category: "algorithm",
            message: format!("unrecognized signature algorithm {}", meta.signature_algorithm_oid),
            fatal: true,
        });
    } else if !policy
        .approved_signature_algorithms
        .iter()
        .any(|a| a == &meta.signature_algorithm)
    {
        out.push(Violation {
            category: "algorithm",
            message: format!("signature algorithm {} not approved", meta.signature_algorithm),
            fatal: meta.signature_hash_algorithm == "SHA-1",
        });
    }
}

fn check_key_size(
    meta: &CertMetadata,
    cert_type: CertType,
    policy: &CompliancePolicy,
    out: &mut Vec<Violation>,
) {
    match meta.public_key_algorithm.as_str() {
        "RSA" => {
            let min = match cert_type {
                CertType::Csca | CertType::LinkCert | CertType::Mlsc => policy.min_rsa_bits_csca,
                _ => policy.min_rsa_bits_dsc,
            };
            if meta.public_key_size < min {
                out.push(Violation {
                    category: "keySize",
                    message: format!("RSA key {} bits below minimum {min}", meta.public_key_size),
                    fatal: meta.public_key_size < 2048,
                });
            }
        }
        "ECDSA" => {
            if meta.public_key_size < policy.min_ec_bits {
                out.push(Violation {
                    category: "keySize",
                    message: format!(
                        "ECDSA key {} bits below minimum {}",
                        meta.public_key_size, policy.min_ec_bits
                    ),
                    fatal: true,
                });
            }
        }
        "Unknown" => out.push(Violation {
            category: "algorithm",
            message: "unrecognized public key algorithm".to_string(),
            fatal: true,
        }),
        _ => {}
    }
}

fn check_key_usage(meta: &CertMetadata, cert_type: CertType, out: &mut Vec<Violation>) {
    let has = |bit: &str| meta.key_usage.iter().any(|u| u == bit);
    match cert_type {
        CertType::Csca | CertType::LinkCert => {
            if !has("keyCertSign") {
                out.push(Violation {
                    category: "keyUsage",
                    message: "CA certificate without keyCertSign".to_string(),
                    fatal: true,
                });
            }
            if !has("cRLSign") {
                out.push(Violation {
                    category: "keyUsage",
                    message: "CSCA without cRLSign".to_string(),
                    fatal: false,
                });
            }
        }
        CertType::Dsc | CertType::DscNc | CertType::Mlsc => {
            if !has("digitalSignature") {
                out.push(Violation {
                    category: "keyUsage",
                    message: "signer certificate without digitalSignature".to_string(),
                    fatal: false,
                });
            }
            if has("keyCertSign") {
                out.push(Violation {
                    category: "keyUsage",
                    message: "end-entity certificate asserts keyCertSign".to_string(),
                    fatal: true,
                });
            }
        }
    }
}

fn check_validity(
    meta: &CertMetadata,
    cert_type: CertType,
    policy: &CompliancePolicy,
    out: &mut Vec<Violation>,
) {
    let days = (meta.not_after - meta.not_before).num_days();
    if days <= 0 {
        out.push(Violation {
            category: "validityPeriod",
            message: "notBefore is not before notAfter".to_string(),
            fatal: true,
        });
        return;
    }
    let max = match cert_type {
        CertType::Csca | CertType::LinkCert => policy.max_csca_validity_days,
        _ => policy.max_dsc_validity_days,
    };
    if days > max {
        out.push(Violation {
            category: "validityPeriod",
            message: format!("validity of {days} days exceeds profile maximum {max}"),
            fatal: false,
        });
    }
}

fn check_dn_and_extensions(meta: &CertMetadata, cert_type: CertType, out: &mut Vec<Violation>) {
    if super::dn::attribute(&meta.subject_dn, "C").is_none()
        && super::dn::attribute(&meta.subject_dn, "O")
            .map(|o| !o.eq_ignore_ascii_case("United Nations"))
            .unwrap_or(true)
    {
        out.push(Violation {
            category: "dnFormat",
            message: "subject DN carries no country component".to_string(),
            fatal: false,
        });
    }
    if meta.version != 3 {
        out.push(Violation {
            category: "extensions",
            message: format!("certificate version v{} (v3 required)", meta.version),
            fatal: true,
        });
    }
    if meta.subject_key_identifier.is_none() {
        out.push(Violation {
            category: "extensions",
            message: "SubjectKeyIdentifier missing".to_string(),
            fatal: false,
        });
    }
    if !meta.is_self_signed && meta.authority_key_identifier.is_none() {
        out.push(Violation {
            category: "extensions",
            message: "AuthorityKeyIdentifier missing on non-root certificate".to_string(),
            fatal: false,
        });
    }
    if matches!(cert_type, CertType::Dsc | CertType::DscNc) && meta.crl_distribution_points.is_empty()
    {
        out.push(Violation {
            category: "extensions",
            message: "DSC without CRL distribution point".to_string(),
            fatal: false,
        });
    }
}

/// Grade a certificate against the Doc 9303 profile for its type
pub fn check(meta: &CertMetadata, cert_type: CertType, policy: &CompliancePolicy) -> ComplianceReport {
    let mut violations = Vec::new();
    check_algorithm(meta, policy, &mut violations);
    check_key_size(meta, cert_type, policy, &mut violations);
    check_key_usage(meta, cert_type, &mut violations);
    check_validity(meta, cert_type, policy, &mut violations);
    check_dn_and_extensions(meta, cert_type, &mut violations);
    ComplianceReport::grade(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn base_meta() -> CertMetadata {
        let now = Utc::now();
        CertMetadata {
            version: 3,
            signature_algorithm_oid: "1.2.840.113549.1.1.11".to_string(),
            signature_algorithm: "sha256WithRSAEncryption".to_string(),
            signature_hash_algorithm: "SHA-256".to_string(),
            public_key_algorithm: "RSA".to_string(),
            public_key_size: 3072,
            public_key_curve: None,
            subject_dn: "CN=CSCA-KR,O=MOFA,C=KR".to_string(),
            issuer_dn: "CN=CSCA-KR,O=MOFA,C=KR".to_string(),
            serial_number: "01".to_string(),
            not_before: now - Duration::days(30),
            not_after: now + Duration::days(3650),
            fingerprint_sha1: String::new(),
            fingerprint_sha256: String::new(),
            is_ca: true,
            path_len_constraint: Some(0),
            key_usage: vec!["keyCertSign".to_string(), "cRLSign".to_string()],
            extended_key_usage: vec![],
            subject_key_identifier: Some("ab".to_string()),
            authority_key_identifier: None,
            crl_distribution_points: vec![],
            ocsp_responder_url: None,
            is_self_signed: true,
        }
    }

    #[test]
    fn conformant_csca() {
        let report = check(&base_meta(), CertType::Csca, &CompliancePolicy::default());
        assert_eq!(report.level, ComplianceLevel::Conformant);
    }

    #[test]
    fn sha1_signature_is_non_conformant() {
        let mut meta = base_meta();
        meta.signature_algorithm = "sha1WithRSAEncryption".to_string();
        meta.signature_hash_algorithm = "SHA-1".to_string();
        let report = check(&meta, CertType::Csca, &CompliancePolicy::default());
        assert_eq!(report.level, ComplianceLevel::NonConformant);
    }

    #[test]
    fn small_rsa_key_grades_down() {
        let mut meta = base_meta();
        meta.public_key_size = 2048;
        let report = check(&meta, CertType::Csca, &CompliancePolicy::default());
        assert_eq!(report.level, ComplianceLevel::Warning);
        assert!(report.violations.iter().any(|v| v.category == "keySize"));
    }

    #[test]
    fn dsc_with_key_cert_sign_is_fatal() {
        let mut meta = base_meta();
        meta.is_ca = false;
        meta.is_self_signed = false;
        meta.key_usage = vec!["digitalSignature".to_string(), "keyCertSign".to_string()];
        let report = check(&meta, CertType::Dsc, &CompliancePolicy::default());
        assert_eq!(report.level, ComplianceLevel::NonConformant);
    }

    #[test]
    fn check_is_pure() {
        let meta = base_meta();
        let policy = CompliancePolicy::default();
        let a = check(&meta, CertType::Csca, &policy);
        let b = check(&meta, CertType::Csca, &policy);
        assert_eq!(a.level, b.level);
        assert_eq!(a.violations.len(), b.violations.len());
    }
}
