// Copyright (c) 2025 - Cowboy AI, LLC.

//! X.509 Certificate Metadata Extraction
//!
//! Decodes DER/PEM certificates and extracts every field the store and the
//! compliance checker need: algorithms, key parameters, validity, the
//! RFC 5280 extension set, and SHA-1/SHA-256 fingerprints. Parsing failures
//! surface as [`PkdError::Parse`]; malformed input never panics.

pub mod asn1dump;
pub mod compliance;
pub mod dn;

use crate::error::{PkdError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

/// Complete metadata of one X.509 certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertMetadata {
    /// Certificate version (1, 2, or 3)
    pub version: u32,
    /// Signature algorithm OID in dotted form
    pub signature_algorithm_oid: String,
    /// Signature algorithm name (e.g. "sha256WithRSAEncryption")
    pub signature_algorithm: String,
    /// Hash sub-algorithm (e.g. "SHA-256")
    pub signature_hash_algorithm: String,
    /// Public key algorithm ("RSA", "ECDSA", "DSA", "Ed25519")
    pub public_key_algorithm: String,
    /// Public key size in bits
    pub public_key_size: u32,
    /// Named curve (ECDSA only)
    pub public_key_curve: Option<String>,
    /// Subject DN, RFC 2253 rendering
    pub subject_dn: String,
    /// Issuer DN, RFC 2253 rendering
    pub issuer_dn: String,
    /// Serial number, uppercase hex without leading zero octets
    pub serial_number: String,
    /// Start of the validity period
    pub not_before: DateTime<Utc>,
    /// End of the validity period
    pub not_after: DateTime<Utc>,
    /// SHA-1 fingerprint of the DER encoding, lowercase hex
    pub fingerprint_sha1: String,
    /// SHA-256 fingerprint of the DER encoding, lowercase hex
    pub fingerprint_sha256: String,
    /// BasicConstraints CA flag
    pub is_ca: bool,
    /// BasicConstraints path length, when constrained
    pub path_len_constraint: Option<u32>,
    /// KeyUsage bits by name ("digitalSignature", "keyCertSign", ...)
    pub key_usage: Vec<String>,
    /// ExtendedKeyUsage OIDs in dotted form
    pub extended_key_usage: Vec<String>,
    /// Subject Key Identifier, lowercase hex
    pub subject_key_identifier: Option<String>,
    /// Authority Key Identifier, lowercase hex
    pub authority_key_identifier: Option<String>,
    /// CRL distribution point URLs
    pub crl_distribution_points: Vec<String>,
    /// OCSP responder URL from AuthorityInfoAccess
    pub ocsp_responder_url: Option<String>,
    /// Whether subject DN equals issuer DN (case-insensitive)
    pub is_self_signed: bool,
}

impl CertMetadata {
    /// True once the validity period has ended
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after < now
    }

    /// True before the validity period starts
    pub fn is_not_yet_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before > now
    }

    /// Country code per the PKD rules (subject first, issuer fallback)
    pub fn country_code(&self) -> String {
        dn::country_code_with_fallback(&self.subject_dn, &self.issuer_dn)
    }
}

/// SHA-256 fingerprint of a DER blob, lowercase hex
pub fn fingerprint_sha256(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

/// SHA-1 fingerprint of a DER blob, lowercase hex. Display/legacy only.
pub fn fingerprint_sha1(der: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, der);
    hex::encode(digest.as_ref())
}

/// Uppercase-hex serial without leading zero octets (at least one octet kept)
pub fn serial_hex(raw: &[u8]) -> String {
    let start = raw
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(raw.len().saturating_sub(1));
    hex::encode_upper(&raw[start..])
}

fn asn1_time_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| PkdError::Parse("certificate validity time out of range".to_string()))
}

/// Compact RFC 2253 rendering of an X509Name
fn name_to_string(name: &X509Name<'_>) -> String {
    name.to_string().replace(", ", ",")
}

fn signature_algorithm_name(oid: &str) -> (&'static str, &'static str) {
    match oid {
        "1.2.840.113549.1.1.5" => ("sha1WithRSAEncryption", "SHA-1"),
        "1.2.840.113549.1.1.11" => ("sha256WithRSAEncryption", "SHA-256"),
        "1.2.840.113549.1.1.12" => ("sha384WithRSAEncryption", "SHA-384"),
        "1.2.840.113549.1.1.13" => ("sha512WithRSAEncryption", "SHA-512"),
        "1.2.840.113549.1.1.10" => ("rsassaPss", "SHA-256"),
        "1.2.840.10045.4.1" => ("ecdsa-with-SHA1", "SHA-1"),
        "1.2.840.10045.4.3.2" => ("ecdsa-with-SHA256", "SHA-256"),
        "1.2.840.10045.4.3.3" => ("ecdsa-with-SHA384", "SHA-384"),
        "1.2.840.10045.4.3.4" => ("ecdsa-with-SHA512", "SHA-512"),
        "1.3.101.112" => ("Ed25519", "SHA-512"),
        "1.2.840.10040.4.3" => ("dsa-with-SHA1", "SHA-1"),
        "2.16.840.1.101.3.4.3.2" => ("dsa-with-SHA256", "SHA-256"),
        _ => ("unknown", "unknown"),
    }
}

fn curve_name(oid: &str) -> Option<&'static str> {
    match oid {
        "1.2.840.10045.3.1.7" => Some("prime256v1"),
        "1.3.132.0.34" => Some("secp384r1"),
        "1.3.132.0.35" => Some("secp521r1"),
        "1.3.36.3.3.2.8.1.1.7" => Some("brainpoolP256r1"),
        "1.3.36.3.3.2.8.1.1.11" => Some("brainpoolP384r1"),
        "1.3.36.3.3.2.8.1.1.13" => Some("brainpoolP512r1"),
        _ => None,
    }
}

fn key_usage_names(ku: &KeyUsage) -> Vec<String> {
    let mut names = Vec::new();
    if ku.digital_signature() {
        names.push("digitalSignature".to_string());
    }
    if ku.non_repudiation() {
        names.push("nonRepudiation".to_string());
    }
    if ku.key_encipherment() {
        names.push("keyEncipherment".to_string());
    }
    if ku.data_encipherment() {
        names.push("dataEncipherment".to_string());
    }
    if ku.key_agreement() {
        names.push("keyAgreement".to_string());
    }
    if ku.key_cert_sign() {
        names.push("keyCertSign".to_string());
    }
    if ku.crl_sign() {
        names.push("cRLSign".to_string());
    }
    if ku.encipher_only() {
        names.push("encipherOnly".to_string());
    }
    if ku.decipher_only() {
        names.push("decipherOnly".to_string());
    }
    names
}

/// Extract complete metadata from a DER-encoded certificate
pub fn extract_metadata(der: &[u8]) -> Result<CertMetadata> {
    let (rest, cert) = X509Certificate::from_der(der)
        .map_err(|e| PkdError::Parse(format!("X.509 DER decode failed: {e}")))?;
    if !rest.is_empty() {
        tracing::debug!("{} trailing bytes after certificate DER", rest.len());
    }

    let subject_dn = name_to_string(cert.subject());
    let issuer_dn = name_to_string(cert.issuer());

    let sig_oid = cert.signature_algorithm.algorithm.to_id_string();
    let (sig_name, hash_name) = signature_algorithm_name(&sig_oid);

    let spki = cert.public_key();
    let (pk_algorithm, pk_size, pk_curve) = match spki.parsed() {
        Ok(parsed) => {
            let size = parsed.key_size() as u32;
            match parsed {
                PublicKey::RSA(_) => ("RSA".to_string(), size, None),
                PublicKey::EC(_) => {
                    let curve = spki
                        .algorithm
                        .parameters
                        .as_ref()
                        .and_then(|p| p.as_oid().ok())
                        .map(|oid| oid.to_id_string())
                        .and_then(|oid| curve_name(&oid).map(str::to_string).or(Some(oid)));
                    ("ECDSA".to_string(), size, curve)
                }
                PublicKey::DSA(_) => ("DSA".to_string(), size, None),
                _ if sig_oid == "1.3.101.112" => ("Ed25519".to_string(), 256, None),
                _ => ("Unknown".to_string(), size, None),
            }
        }
        Err(_) => ("Unknown".to_string(), 0, None),
    };

    let mut is_ca = false;
    let mut path_len_constraint = None;
    let mut key_usage = Vec::new();
    let mut extended_key_usage = Vec::new();
    let mut subject_key_identifier = None;
    let mut authority_key_identifier = None;
    let mut crl_distribution_points = Vec::new();
    let mut ocsp_responder_url = None;

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::BasicConstraints(bc) => {
                is_ca = bc.ca;
                path_len_constraint = bc.path_len_constraint;
            }
            ParsedExtension::KeyUsage(ku) => {
                key_usage = key_usage_names(ku);
            }
            ParsedExtension::ExtendedKeyUsage(eku) => {
                // id-kp arc, 1.3.6.1.5.5.7.3.x
                if eku.server_auth {
                    extended_key_usage.push("1.3.6.1.5.5.7.3.1".to_string());
                }
                if eku.client_auth {
                    extended_key_usage.push("1.3.6.1.5.5.7.3.2".to_string());
                }
                if eku.code_signing {
                    extended_key_usage.push("1.3.6.1.5.5.7.3.3".to_string());
                }
                if eku.email_protection {
                    extended_key_usage.push("1.3.6.1.5.5.7.3.4".to_string());
                }
                if eku.time_stamping {
                    extended_key_usage.push("1.3.6.1.5.5.7.3.8".to_string());
                }
                if eku.ocsp_signing {
                    extended_key_usage.push("1.3.6.1.5.5.7.3.9".to_string());
                }
                for oid in &eku.other {
                    extended_key_usage.push(oid.to_id_string());
                }
            }
            ParsedExtension::SubjectKeyIdentifier(ski) => {
                subject_key_identifier = Some(hex::encode(ski.0));
            }
            ParsedExtension::AuthorityKeyIdentifier(aki) => {
                authority_key_identifier =
                    aki.key_identifier.as_ref().map(|ki| hex::encode(ki.0));
            }
            ParsedExtension::CRLDistributionPoints(points) => {
                for point in points.iter() {
                    if let Some(DistributionPointName::FullName(names)) = &point.distribution_point
                    {
                        for name in names {
                            if let GeneralName::URI(uri) = name {
                                crl_distribution_points.push(uri.to_string());
                            }
                        }
                    }
                }
            }
            ParsedExtension::AuthorityInfoAccess(aia) => {
                for desc in &aia.accessdescs {
                    if desc.access_method.to_id_string() == "1.3.6.1.5.5.7.48.1" {
                        if let GeneralName::URI(uri) = &desc.access_location {
                            ocsp_responder_url = Some(uri.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Ok(CertMetadata {
        version: cert.version().0 + 1,
        signature_algorithm_oid: sig_oid,
        signature_algorithm: sig_name.to_string(),
        signature_hash_algorithm: hash_name.to_string(),
        public_key_algorithm: pk_algorithm,
        public_key_size: pk_size,
        public_key_curve: pk_curve,
        is_self_signed: dn::equals(&subject_dn, &issuer_dn),
        serial_number: serial_hex(cert.raw_serial()),
        not_before: asn1_time_to_utc(&cert.validity().not_before)?,
        not_after: asn1_time_to_utc(&cert.validity().not_after)?,
        fingerprint_sha1: fingerprint_sha1(der),
        fingerprint_sha256: fingerprint_sha256(der),
        subject_dn,
        issuer_dn,
        is_ca,
        path_len_constraint,
        key_usage,
        extended_key_usage,
        subject_key_identifier,
        authority_key_identifier,
        crl_distribution_points,
        ocsp_responder_url,
    })
}

/// Convert a DER certificate to PEM
pub fn der_to_pem(der: &[u8]) -> String {
    let block = ::pem::Pem::new("CERTIFICATE", der.to_vec());
    ::pem::encode(&block)
}

/// Convert a PEM certificate to DER; the label must be CERTIFICATE
pub fn pem_to_der(pem_text: &str) -> Result<Vec<u8>> {
    let block = ::pem::parse(pem_text).map_err(|e| PkdError::Parse(format!("PEM: {e}")))?;
    if block.tag() != "CERTIFICATE" {
        return Err(PkdError::Parse(format!(
            "unexpected PEM label '{}'",
            block.tag()
        )));
    }
    Ok(block.contents().to_vec())
}

/// Detected payload of [`parse_auto`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectedFormat {
    /// A single certificate (DER bytes returned)
    Certificate(Vec<u8>),
    /// A certificate revocation list (DER bytes returned)
    Crl(Vec<u8>),
    /// A CMS SignedData blob (DER bytes returned)
    Cms(Vec<u8>),
}

/// Format auto-detection: PEM markers first, then raw DER certificate, CRL,
/// or CMS, reporting the first success.
pub fn parse_auto(bytes: &[u8]) -> Result<DetectedFormat> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if text.contains("-----BEGIN") {
            let block = ::pem::parse(text).map_err(|e| PkdError::Parse(format!("PEM: {e}")))?;
            let der = block.contents().to_vec();
            return match block.tag() {
                "CERTIFICATE" => Ok(DetectedFormat::Certificate(der)),
                "X509 CRL" => Ok(DetectedFormat::Crl(der)),
                "CMS" | "PKCS7" => Ok(DetectedFormat::Cms(der)),
                other => Err(PkdError::Parse(format!("unsupported PEM label '{other}'"))),
            };
        }
    }

    if X509Certificate::from_der(bytes).is_ok() {
        return Ok(DetectedFormat::Certificate(bytes.to_vec()));
    }
    if CertificateRevocationList::from_der(bytes).is_ok() {
        return Ok(DetectedFormat::Crl(bytes.to_vec()));
    }
    if cryptographic_message_syntax::SignedData::parse_ber(bytes).is_ok() {
        return Ok(DetectedFormat::Cms(bytes.to_vec()));
    }

    Err(PkdError::Parse(
        "input is neither PEM, DER certificate, CRL, nor CMS".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_hex_strips_leading_zeros() {
        assert_eq!(serial_hex(&[0x00, 0x1A, 0x2B]), "1A2B");
        assert_eq!(serial_hex(&[0x00]), "00");
        assert_eq!(serial_hex(&[0xFF]), "FF");
    }

    #[test]
    fn fingerprints_are_lowercase_hex() {
        let fp = fingerprint_sha256(b"test");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        let fp1 = fingerprint_sha1(b"test");
        assert_eq!(fp1.len(), 40);
    }

    #[test]
    fn pem_der_round_trip() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x01];
        let pem_text = der_to_pem(&der);
        assert!(pem_text.contains("BEGIN CERTIFICATE"));
        assert_eq!(pem_to_der(&pem_text).unwrap(), der);
    }

    #[test]
    fn parse_auto_rejects_garbage() {
        assert!(parse_auto(b"not a certificate at all").is_err());
    }
}
