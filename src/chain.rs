// Copyright (c) 2025 - Cowboy AI, LLC.

//! Trust-chain building and verification
//!
//! Builds verifier-key-matched chains from a leaf certificate up to a
//! self-signed CSCA. The difficult case is key rollover: multiple CSCAs
//! share one subject DN, and only the candidate whose public key actually
//! verifies the current signature may continue the chain. Expiration is
//! informational per the ICAO Doc 9303 hybrid chain rule; signature
//! validity and a not-yet-valid leaf are hard requirements.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let result = build_chain(&dsc_der, "DSC", &store.certificates, Utc::now()).await?;
//!
//! match result.status {
//!     ValidationStatus::Valid => println!("chain: {}", result.path),
//!     ValidationStatus::Pending => println!("CSCA not yet on file"),
//!     _ => println!("rejected: {}", result.message),
//! }
//! ```

use crate::error::Result;
use crate::types::ValidationStatus;
use crate::x509::dn;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

/// Maximum chain length from leaf to root
pub const MAX_DEPTH: usize = 5;

/// A CSCA candidate as persisted in the store
#[derive(Debug, Clone)]
pub struct StoredCsca {
    /// SHA-256 fingerprint, lowercase hex
    pub fingerprint_sha256: String,
    /// Subject DN as stored
    pub subject_dn: String,
    /// DER certificate bytes
    pub der: Vec<u8>,
}

/// Source of CSCA candidates for chain building.
///
/// `find_by_subject_dn` must return **every** certificate whose subject DN
/// matches (case-insensitive, normalized). Deduplicating by DN here would
/// break key-rollover disambiguation.
#[async_trait]
pub trait CscaProvider: Send + Sync {
    /// All stored CSCAs (including link certificates) with this subject DN
    async fn find_by_subject_dn(&self, subject_dn: &str) -> Result<Vec<StoredCsca>>;
}

/// Outcome of a chain build + verification
#[derive(Debug, Clone)]
pub struct ChainResult {
    /// Mapped validation status per the hybrid rule
    pub status: ValidationStatus,
    /// Chain complete and every signature verified
    pub trust_chain_valid: bool,
    /// Every signature on the chain verified (equals trust_chain_valid today)
    pub signature_verified: bool,
    /// At least one DN-matching CSCA candidate existed
    pub csca_found: bool,
    /// Subject DN of the direct issuer (key-matched, or DN-only fallback)
    pub csca_subject_dn: Option<String>,
    /// Fingerprint of the direct issuer
    pub csca_fingerprint: Option<String>,
    /// Leaf is past notAfter
    pub leaf_expired: bool,
    /// Any chain element is past notAfter
    pub chain_expired: bool,
    /// Ordered shortened-CN path, e.g. `DSC → CN=CSCA-KR`
    pub path: String,
    /// Failure or informational message
    pub message: String,
    /// Fingerprints of every chain element, leaf first
    pub chain_fingerprints: Vec<String>,
}

impl ChainResult {
    fn invalid(message: String, path: String) -> Self {
        Self {
            status: ValidationStatus::Invalid,
            trust_chain_valid: false,
            signature_verified: false,
            csca_found: false,
            csca_subject_dn: None,
            csca_fingerprint: None,
            leaf_expired: false,
            chain_expired: false,
            path,
            message,
            chain_fingerprints: Vec::new(),
        }
    }
}

fn parse<'a>(der: &'a [u8]) -> Result<X509Certificate<'a>> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| crate::error::PkdError::Parse(format!("X.509 decode: {e}")))?;
    Ok(cert)
}

fn is_expired(cert: &X509Certificate<'_>, now: DateTime<Utc>) -> bool {
    cert.validity().not_after.timestamp() < now.timestamp()
}

fn verify_with(cert: &X509Certificate<'_>, issuer: &X509Certificate<'_>) -> bool {
    cert.verify_signature(Some(issuer.public_key())).is_ok()
}

fn verify_self(cert: &X509Certificate<'_>) -> bool {
    cert.verify_signature(None).is_ok()
}

/// Build and verify the trust chain for `leaf_der`.
///
/// `leaf_label` is the first element of the rendered path (`DSC`, `LC`, ...).
pub async fn build_chain(
    leaf_der: &[u8],
    leaf_label: &str,
    provider: &dyn CscaProvider,
    now: DateTime<Utc>,
) -> Result<ChainResult> {
    let leaf = parse(leaf_der)?;
    let leaf_expired = is_expired(&leaf, now);

    // Not-yet-valid is a hard failure; expiration is not.
    if leaf.validity().not_before.timestamp() > now.timestamp() {
        let mut r = ChainResult::invalid(
            "certificate is not yet valid".to_string(),
            leaf_label.to_string(),
        );
        r.leaf_expired = leaf_expired;
        return Ok(r);
    }

    let mut chain_ders: Vec<Vec<u8>> = vec![leaf_der.to_vec()];
    let mut path_parts: Vec<String> = vec![leaf_label.to_string()];
    let mut visited: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut chain_expired = false;
    let mut csca_found = false;
    let mut issuer_subject: Option<String> = None;
    let mut issuer_fingerprint: Option<String> = None;

    let mut depth = 0usize;
    loop {
        let cur_der = chain_ders
            .last()
            .cloned()
            .unwrap_or_default();
        let cur = parse(&cur_der)?;
        let cur_subject = cur.subject().to_string().replace(", ", ",");
        let cur_issuer = cur.issuer().to_string().replace(", ", ",");

        if depth > 0 && is_expired(&cur, now) {
            chain_expired = true;
        }

        // Self-signed terminus: verify the self-signature so a tampered
        // root with an intact DN cannot anchor a chain.
        if dn::equals(&cur_subject, &cur_issuer) {
            if !verify_self(&cur) {
                let mut r = ChainResult::invalid(
                    format!("root CSCA self-signature failed at depth {depth}"),
                    path_parts.join(" → "),
                );
                r.csca_found = csca_found || depth == 0;
                r.leaf_expired = leaf_expired;
                r.chain_expired = chain_expired;
                r.csca_subject_dn = issuer_subject;
                r.csca_fingerprint = issuer_fingerprint;
                return Ok(r);
            }
            if depth == 0 {
                // The leaf itself is a root CSCA
                csca_found = true;
                issuer_subject = Some(cur_subject.clone());
                issuer_fingerprint = Some(crate::x509::fingerprint_sha256(&cur_der));
            }
            let expired = leaf_expired || chain_expired;
            let status = if expired {
                ValidationStatus::ExpiredValid
            } else {
                ValidationStatus::Valid
            };
            return Ok(ChainResult {
                status,
                trust_chain_valid: true,
                signature_verified: true,
                csca_found: true,
                csca_subject_dn: issuer_subject.or(Some(cur_subject)),
                csca_fingerprint: issuer_fingerprint
                    .or_else(|| Some(crate::x509::fingerprint_sha256(&cur_der))),
                leaf_expired,
                chain_expired,
                path: path_parts.join(" → "),
                message: if expired {
                    "trust chain verified (expired, informational)".to_string()
                } else {
                    "trust chain verified".to_string()
                },
                chain_fingerprints: chain_ders
                    .iter()
                    .map(|d| crate::x509::fingerprint_sha256(d))
                    .collect(),
            });
        }

        depth += 1;
        if depth > MAX_DEPTH {
            let mut r = ChainResult::invalid(
                format!("max depth exceeded ({MAX_DEPTH})"),
                path_parts.join(" → "),
            );
            r.csca_found = csca_found;
            r.leaf_expired = leaf_expired;
            r.chain_expired = chain_expired;
            r.csca_subject_dn = issuer_subject;
            r.csca_fingerprint = issuer_fingerprint;
            return Ok(r);
        }

        // Cycle check on the issuer DN we are about to resolve
        let issuer_norm = dn::normalize(&cur_issuer);
        if !visited.insert(issuer_norm) {
            let mut r = ChainResult::invalid(
                format!("circular reference at depth {depth}"),
                path_parts.join(" → "),
            );
            r.csca_found = csca_found;
            r.leaf_expired = leaf_expired;
            r.chain_expired = chain_expired;
            return Ok(r);
        }

        // All candidates sharing the issuer's subject DN
        let candidates = provider.find_by_subject_dn(&cur_issuer).await?;
        if candidates.is_empty() {
            let mut r = ChainResult::invalid(String::new(), path_parts.join(" → "));
            r.status = ValidationStatus::Pending;
            r.message = format!("CSCA not found for issuer: {:.80}", cur_issuer);
            r.csca_found = false;
            r.leaf_expired = leaf_expired;
            r.chain_expired = chain_expired;
            return Ok(r);
        }
        csca_found = true;

        // Key-matched selection: the first candidate whose public key
        // verifies the current signature continues the chain. A DN-only
        // fallback is kept purely for error reporting.
        let mut selected: Option<&StoredCsca> = None;
        let mut dn_fallback: Option<&StoredCsca> = None;
        for candidate in &candidates {
            let Ok(cand_cert) = parse(&candidate.der) else {
                tracing::warn!(
                    "skipping unparseable CSCA candidate {}",
                    candidate.fingerprint_sha256
                );
                continue;
            };
            if verify_with(&cur, &cand_cert) {
                selected = Some(candidate);
                break;
            }
            tracing::debug!(
                "chain depth {depth}: DN match but signature failed for {}",
                candidate.fingerprint_sha256
            );
            if dn_fallback.is_none() {
                dn_fallback = Some(candidate);
            }
        }

        match selected {
            Some(candidate) => {
                issuer_subject.get_or_insert_with(|| candidate.subject_dn.clone());
                issuer_fingerprint
                    .get_or_insert_with(|| candidate.fingerprint_sha256.clone());
                path_parts.push(dn::short_cn(&candidate.subject_dn));
                chain_ders.push(candidate.der.clone());
            }
            None => {
                let fallback_dn = dn_fallback.map(|c| c.subject_dn.clone());
                let mut r = ChainResult::invalid(
                    format!(
                        "signature verification failed against {} candidate CSCA(s) at depth {depth}",
                        candidates.len()
                    ),
                    path_parts.join(" → "),
                );
                r.csca_found = true;
                r.csca_subject_dn = fallback_dn.or(Some(cur_issuer));
                r.csca_fingerprint = dn_fallback.map(|c| c.fingerprint_sha256.clone());
                r.leaf_expired = leaf_expired;
                r.chain_expired = chain_expired;
                return Ok(r);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory provider for unit tests
    pub struct MemoryProvider {
        cscas: Mutex<Vec<StoredCsca>>,
    }

    impl MemoryProvider {
        pub fn new() -> Self {
            Self {
                cscas: Mutex::new(Vec::new()),
            }
        }

        pub fn add(&self, subject_dn: &str, der: Vec<u8>) {
            self.cscas.lock().unwrap().push(StoredCsca {
                fingerprint_sha256: crate::x509::fingerprint_sha256(&der),
                subject_dn: subject_dn.to_string(),
                der,
            });
        }
    }

    #[async_trait]
    impl CscaProvider for MemoryProvider {
        async fn find_by_subject_dn(&self, subject_dn: &str) -> Result<Vec<StoredCsca>> {
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

    #[tokio::test]
    async fn unparseable_leaf_is_a_parse_error() {
        let provider = MemoryProvider::new();
        let result = build_chain(b"junk", "DSC", &provider, Utc::now()).await;
        assert!(result.is_err());
    }
}
