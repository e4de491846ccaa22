// Copyright (c) 2025 - Cowboy AI, LLC.

//! Certificate type classification
//!
//! Pure function of the extracted metadata plus the originating LDIF path.
//! MLSC is decided at the CMS layer (the signer of a Master List body), not
//! here: an MLSC seen as a bare X.509 classifies as DSC.

use crate::types::CertType;
use crate::x509::CertMetadata;

fn has_key_cert_sign(meta: &CertMetadata) -> bool {
    meta.key_usage.iter().any(|u| u == "keyCertSign")
}

/// Classify a certificate.
///
/// | condition                                         | result   |
/// |---------------------------------------------------|----------|
/// | self-signed AND CA AND keyCertSign                | CSCA     |
/// | not self-signed AND CA AND keyCertSign            | LinkCert |
/// | LDIF path contains `dc=nc-data` (case-insensitive)| DscNc    |
/// | otherwise                                         | Dsc      |
pub fn classify(meta: &CertMetadata, ldif_path: &str) -> CertType {
    if meta.is_ca && has_key_cert_sign(meta) {
        if meta.is_self_signed {
            return CertType::Csca;
        }
        return CertType::LinkCert;
    }
    if ldif_path.to_ascii_lowercase().contains("dc=nc-data") {
        return CertType::DscNc;
    }
    CertType::Dsc
}
