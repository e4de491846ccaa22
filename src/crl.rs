// Copyright (c) 2025 - Cowboy AI, LLC.

//! CRL parsing and revocation checking
//!
//! Revocation is checked against the most recent CRL for the certificate's
//! issuer country. An expired CRL (nextUpdate in the past) is still
//! consulted; its verdict is informational but reported. Stored CRL bytes
//! may arrive hex-encoded once or twice (engine-dependent BYTEA handling);
//! [`decode_bytea_relaxed`] accepts every observed form.

use crate::error::{PkdError, Result};
use crate::types::{CrlCheckStatus, RevokedEntry};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::prelude::*;

/// Metadata of one parsed CRL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlMetadata {
    /// Issuer DN, RFC 2253 rendering
    pub issuer_dn: String,
    /// thisUpdate
    pub this_update: DateTime<Utc>,
    /// nextUpdate, when present
    pub next_update: Option<DateTime<Utc>>,
    /// CRLNumber extension, decimal rendering
    pub crl_number: Option<String>,
    /// SHA-256 of the DER encoding, lowercase hex
    pub fingerprint_sha256: String,
    /// Revoked serials
    pub revoked: Vec<RevokedEntry>,
}

/// A stored CRL as the provider returns it
#[derive(Debug, Clone)]
pub struct StoredCrl {
    /// Country the CRL applies to
    pub country_code: String,
    /// Raw column bytes; may be hex-encoded once or twice
    pub raw: Vec<u8>,
}

/// Source of the most recent CRL per country
#[async_trait]
pub trait CrlProvider: Send + Sync {
    /// The latest CRL for a country, or None
    async fn latest_by_country(&self, country_code: &str) -> Result<Option<StoredCrl>>;
}

/// Outcome of a revocation check
#[derive(Debug, Clone)]
pub struct CrlCheckResult {
    /// Verdict
    pub status: CrlCheckStatus,
    /// Informational detail (missing CRL, expired CRL, decode failure)
    pub message: String,
}

fn is_hex(bytes: &[u8]) -> bool {
    !bytes.is_empty() && bytes.len() % 2 == 0 && bytes.iter().all(u8::is_ascii_hexdigit)
}

/// Decode possibly hex-encoded (once or twice) column bytes to raw DER.
///
/// Accepted forms: raw bytes, ASCII hex, `\x`-prefixed ASCII hex, and the
/// doubly-encoded case where the first decode yields another `\x` blob.
pub fn decode_bytea_relaxed(raw: &[u8]) -> Vec<u8> {
    fn decode_once(bytes: &[u8]) -> Option<Vec<u8>> {
        if let Some(body) = bytes.strip_prefix(b"\\x") {
            return if is_hex(body) { hex::decode(body).ok() } else { None };
        }
        if bytes.first() == Some(&0x30) {
            return None; // already DER
        }
        if is_hex(bytes) {
            hex::decode(bytes).ok()
        } else {
            None
        }
    }

    let mut current = raw.to_vec();
    for _ in 0..2 {
        match decode_once(&current) {
            Some(decoded) => current = decoded,
            None => break,
        }
    }
    current
}

fn asn1_time_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| PkdError::Parse("CRL time out of range".to_string()))
}

fn reason_name(code: u8) -> &'static str {
    match code {
        0 => "unspecified",
        1 => "keyCompromise",
        2 => "cACompromise",
        3 => "affiliationChanged",
        4 => "superseded",
        5 => "cessationOfOperation",
        6 => "certificateHold",
        8 => "removeFromCRL",
        9 => "privilegeWithdrawn",
        10 => "aACompromise",
        _ => "unknown",
    }
}

/// Parse a DER (or PEM `X509 CRL`) revocation list
pub fn parse_crl(bytes: &[u8]) -> Result<CrlMetadata> {
    let der = if let Ok(text) = std::str::from_utf8(bytes) {
        if text.contains("-----BEGIN") {
            let block = ::pem::parse(text).map_err(|e| PkdError::Parse(format!("PEM: {e}")))?;
            if block.tag() != "X509 CRL" {
                return Err(PkdError::Parse(format!(
                    "unexpected PEM label '{}' for CRL",
                    block.tag()
                )));
            }
            block.contents().to_vec()
        } else {
            bytes.to_vec()
        }
    } else {
        bytes.to_vec()
    };

    let (_, crl) = CertificateRevocationList::from_der(&der)
        .map_err(|e| PkdError::Parse(format!("CRL DER decode failed: {e}")))?;

    let crl_number = crl.crl_number().map(|n| n.to_string());

    let revoked = crl
        .iter_revoked_certificates()
        .map(|entry| RevokedEntry {
            serial: crate::x509::serial_hex(entry.raw_serial()),
            revocation_date: asn1_time_to_utc(&entry.revocation_date).ok(),
            reason: entry
                .reason_code()
                .map(|(_, reason)| reason_name(reason.0).to_string()),
        })
        .collect();

    Ok(CrlMetadata {
        issuer_dn: crl.issuer().to_string().replace(", ", ","),
        this_update: asn1_time_to_utc(&crl.last_update())?,
        next_update: crl.next_update().map(|t| asn1_time_to_utc(&t)).transpose()?,
        crl_number,
        fingerprint_sha256: crate::x509::fingerprint_sha256(&der),
        revoked,
    })
}

/// Test a certificate serial against the country's latest CRL
pub async fn check_revocation(
    serial_hex: &str,
    country_code: &str,
    provider: &dyn CrlProvider,
    now: DateTime<Utc>,
) -> Result<CrlCheckResult> {
    let stored = match provider.latest_by_country(country_code).await? {
        Some(s) => s,
        None => {
            return Ok(CrlCheckResult {
                status: CrlCheckStatus::NotChecked,
                message: format!("no CRL on file for country {country_code}"),
            })
        }
    };

    let der = decode_bytea_relaxed(&stored.raw);
    let meta = match parse_crl(&der) {
        Ok(m) => m,
        Err(e) => {
            return Ok(CrlCheckResult {
                status: CrlCheckStatus::Error,
                message: format!("CRL for {country_code} undecodable: {e}"),
            })
        }
    };

    let mut message = String::new();
    if let Some(next_update) = meta.next_update {
        if next_update < now {
            message = format!("CRL for {country_code} expired {next_update}; verdict informational");
            tracing::info!("{message}");
        }
    }

    let wanted = serial_hex.to_ascii_uppercase();
    let revoked = meta.revoked.iter().any(|entry| entry.serial == wanted);

    Ok(CrlCheckResult {
        status: if revoked {
            CrlCheckStatus::Revoked
        } else {
            CrlCheckStatus::NotRevoked
        },
        message: if revoked {
            "certificate serial listed in CRL".to_string()
        } else if message.is_empty() {
            "certificate not revoked".to_string()
        } else {
            message
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_decode_passes_raw_der_through() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x01];
        assert_eq!(decode_bytea_relaxed(&der), der);
    }

    #[test]
    fn relaxed_decode_handles_plain_hex() {
        let der = vec![0x02, 0x01, 0x05];
        let hexed = hex::encode(&der).into_bytes();
        assert_eq!(decode_bytea_relaxed(&hexed), der);
    }

    #[test]
    fn relaxed_decode_handles_backslash_x_prefix() {
        let der = vec![0x30, 0x00];
        let mut raw = b"\\x".to_vec();
        raw.extend(hex::encode(&der).into_bytes());
        assert_eq!(decode_bytea_relaxed(&raw), der);
    }

    #[test]
    fn relaxed_decode_handles_double_encoding() {
        let der = vec![0x30, 0x00];
        let mut inner = b"\\x".to_vec();
        inner.extend(hex::encode(&der).into_bytes());
        let mut outer = b"\\x".to_vec();
        outer.extend(hex::encode(&inner).into_bytes());
        assert_eq!(decode_bytea_relaxed(&outer), der);
    }

    #[test]
    fn parse_crl_rejects_garbage() {
        assert!(parse_crl(b"definitely not a CRL").is_err());
    }
}
