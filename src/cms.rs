// Copyright (c) 2025 - Cowboy AI, LLC.

//! CMS SignedData parsing for ICAO Master Lists and Deviation Lists
//!
//! Master Lists carry the CSCA set in the eContent (`CscaMasterList ::=
//! SEQUENCE { version INTEGER, certList SET OF Certificate }`) and the
//! signer (MLSC) certificates in the SignedData certificates field.
//! Verification against the configured trust anchor is store-only: a failed
//! or unverifiable signature is reported, never a parse error.

use crate::error::{PkdError, Result};
use crate::x509::{dn, fingerprint_sha256};
use cryptographic_message_syntax::SignedData;
use der::{Decode, Encode, Reader, SliceReader, Tag, Tagged};
use serde::{Deserialize, Serialize};

/// Parsed Master List
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMasterList {
    /// SHA-256 of the raw CMS blob, lowercase hex
    pub fingerprint_sha256: String,
    /// Subject DN of the signer certificate, when present
    pub signer_dn: Option<String>,
    /// Signature verified against the trust anchor (store-only policy)
    pub verified: bool,
    /// DER certificates from the SignedData certificates field (MLSC candidates)
    pub signer_certs: Vec<Vec<u8>>,
    /// DER certificates enumerated from the eContent cert list
    pub content_certs: Vec<Vec<u8>>,
}

/// Parsed Deviation List
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedDeviationList {
    /// SHA-256 of the raw CMS blob, lowercase hex
    pub fingerprint_sha256: String,
    /// List version from the eContent header
    pub version: Option<u64>,
    /// Subject DN of the signer certificate, when present
    pub signer_dn: Option<String>,
    /// Signature verified against the trust anchor
    pub verified: bool,
    /// Extracted deviation entries
    pub entries: Vec<crate::types::DeviationEntry>,
}

/// Unwrap optional PEM armor (`CMS` or `PKCS7` labels) around a CMS blob
pub fn unwrap_pem(bytes: &[u8]) -> Result<Vec<u8>> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if text.contains("-----BEGIN") {
            let block = pem::parse(text).map_err(|e| PkdError::Parse(format!("PEM: {e}")))?;
            return match block.tag() {
                "CMS" | "PKCS7" => Ok(block.contents().to_vec()),
                other => Err(PkdError::Parse(format!(
                    "unexpected PEM label '{other}' for CMS content"
                ))),
            };
        }
    }
    Ok(bytes.to_vec())
}

fn parse_signed_data(der_bytes: &[u8]) -> Result<SignedData> {
    SignedData::parse_ber(der_bytes)
        .map_err(|e| PkdError::Parse(format!("CMS SignedData decode failed: {e}")))
}

/// Verify every SignerInfo signature and check the signer chains into the
/// trust anchor (subject match or exact anchor certificate). Store-only:
/// the result is a bool, not an error.
fn verify_against_anchor(signed_data: &SignedData, anchor_der: Option<&[u8]>) -> bool {
    let mut any_signer = false;
    for signer in signed_data.signers() {
        any_signer = true;
        if signer.verify_signature_with_signed_data(signed_data).is_err() {
            tracing::warn!("CMS signer signature failed integrity verification");
            return false;
        }
    }
    if !any_signer {
        return false;
    }

    let Some(anchor_der) = anchor_der else {
        // No anchor configured: integrity-only verification
        return true;
    };
    let Ok(anchor_meta) = crate::x509::extract_metadata(anchor_der) else {
        tracing::warn!("trust anchor certificate is unreadable");
        return false;
    };
    let anchor_fp = fingerprint_sha256(anchor_der);

    for cert_der in embedded_certificates(signed_data) {
        if fingerprint_sha256(&cert_der) == anchor_fp {
            return true;
        }
        if let Ok(meta) = crate::x509::extract_metadata(&cert_der) {
            if dn::equals(&meta.issuer_dn, &anchor_meta.subject_dn)
                || dn::equals(&meta.subject_dn, &anchor_meta.subject_dn)
            {
                return true;
            }
        }
    }
    tracing::warn!("CMS signer does not link to the configured trust anchor");
    false
}

/// DER bytes of every certificate in the SignedData certificates field
fn embedded_certificates(signed_data: &SignedData) -> Vec<Vec<u8>> {
    signed_data
        .certificates()
        .map(|cert| cert.constructed_data().to_vec())
        .collect()
}

fn signer_dn_of(certs: &[Vec<u8>]) -> Option<String> {
    certs
        .first()
        .and_then(|der| crate::x509::extract_metadata(der).ok())
        .map(|meta| meta.subject_dn)
}

/// Walk the eContent `CscaMasterList` and return each certificate's DER
fn master_list_content_certs(econtent: &[u8]) -> Result<(Option<u64>, Vec<Vec<u8>>)> {
    let outer = der::asn1::AnyRef::from_der(econtent)
        .map_err(|e| PkdError::Parse(format!("eContent is not valid DER: {e}")))?;
    if outer.tag() != Tag::Sequence {
        return Err(PkdError::Parse("eContent is not a SEQUENCE".to_string()));
    }

    let mut reader = SliceReader::new(outer.value())
        .map_err(|e| PkdError::Parse(format!("eContent reader: {e}")))?;

    let mut version = None;
    let mut certs = Vec::new();

    while !reader.is_finished() {
        let any = der::asn1::AnyRef::decode(&mut reader)
            .map_err(|e| PkdError::Parse(format!("eContent TLV: {e}")))?;
        match any.tag() {
            Tag::Integer => {
                let raw = any.value();
                if raw.len() <= 8 {
                    let mut v: u64 = 0;
                    for b in raw {
                        v = (v << 8) | u64::from(*b);
                    }
                    version = Some(v);
                }
            }
            Tag::Set | Tag::Sequence => {
                let mut inner = SliceReader::new(any.value())
                    .map_err(|e| PkdError::Parse(format!("cert list reader: {e}")))?;
                while !inner.is_finished() {
                    let cert = der::asn1::AnyRef::decode(&mut inner)
                        .map_err(|e| PkdError::Parse(format!("cert list TLV: {e}")))?;
                    let cert_der = cert
                        .to_der()
                        .map_err(|e| PkdError::Parse(format!("cert re-encode: {e}")))?;
                    certs.push(cert_der);
                }
            }
            _ => {}
        }
    }

    Ok((version, certs))
}

/// Parse an ICAO Master List (DER or PEM-wrapped CMS; PKCS#7 label accepted)
pub fn parse_master_list(bytes: &[u8], anchor_der: Option<&[u8]>) -> Result<ParsedMasterList> {
    let der_bytes = unwrap_pem(bytes)?;
    let signed_data = parse_signed_data(&der_bytes)?;

    let signer_certs = embedded_certificates(&signed_data);
    let verified = verify_against_anchor(&signed_data, anchor_der);

    let (content_version, content_certs) = match signed_data.signed_content() {
        Some(econtent) => match master_list_content_certs(econtent) {
            Ok((v, certs)) => (v, certs),
            Err(e) => {
                tracing::warn!("Master List eContent walk failed: {e}");
                (None, Vec::new())
            }
        },
        None => (None, Vec::new()),
    };
    let _ = content_version;

    if signer_certs.is_empty() && content_certs.is_empty() {
        return Err(PkdError::Parse(
            "Master List carries no certificates".to_string(),
        ));
    }

    Ok(ParsedMasterList {
        fingerprint_sha256: fingerprint_sha256(&der_bytes),
        signer_dn: signer_dn_of(&signer_certs),
        verified,
        signer_certs,
        content_certs,
    })
}

// --- Deviation List ---

fn oid_to_string(any: &der::asn1::AnyRef<'_>) -> Option<String> {
    let der_bytes = any.to_der().ok()?;
    der::asn1::ObjectIdentifier::from_der(&der_bytes)
        .ok()
        .map(|oid| oid.to_string())
}

/// Render a nested RFC 5280 Name structure (SEQUENCE of SET of
/// SEQUENCE(OID, value)) as an RFC 2253 DN string, if the shape matches.
fn try_render_name(any: &der::asn1::AnyRef<'_>) -> Option<String> {
    if any.tag() != Tag::Sequence {
        return None;
    }
    let mut rdns = Vec::new();
    let mut reader = SliceReader::new(any.value()).ok()?;
    while !reader.is_finished() {
        let set = der::asn1::AnyRef::decode(&mut reader).ok()?;
        if set.tag() != Tag::Set {
            return None;
        }
        let mut set_reader = SliceReader::new(set.value()).ok()?;
        while !set_reader.is_finished() {
            let atv = der::asn1::AnyRef::decode(&mut set_reader).ok()?;
            if atv.tag() != Tag::Sequence {
                return None;
            }
            let mut atv_reader = SliceReader::new(atv.value()).ok()?;
            let oid = der::asn1::AnyRef::decode(&mut atv_reader).ok()?;
            let value = der::asn1::AnyRef::decode(&mut atv_reader).ok()?;
            let attr = match oid_to_string(&oid)?.as_str() {
                "2.5.4.3" => "CN",
                "2.5.4.6" => "C",
                "2.5.4.7" => "L",
                "2.5.4.8" => "ST",
                "2.5.4.10" => "O",
                "2.5.4.11" => "OU",
                "2.5.4.5" => "serialNumber",
                _ => continue,
            };
            let text = std::str::from_utf8(value.value()).ok()?;
            rdns.push(format!("{attr}={text}"));
        }
    }
    if rdns.is_empty() {
        None
    } else {
        rdns.reverse(); // DER Name order is root-first; render leaf-first
        Some(rdns.join(","))
    }
}

/// Recursive scan of the Deviation List eContent: a deviation node is a
/// SEQUENCE carrying an OID under the ICAO defect arc (2.23.136), an
/// optional description string, a serial INTEGER and an issuer Name.
fn scan_deviations(bytes: &[u8], out: &mut Vec<crate::types::DeviationEntry>) {
    let Ok(mut reader) = SliceReader::new(bytes) else {
        return;
    };
    while !reader.is_finished() {
        let Ok(any) = der::asn1::AnyRef::decode(&mut reader) else {
            return;
        };
        if any.tag() != Tag::Sequence && any.tag() != Tag::Set {
            continue;
        }

        if any.tag() == Tag::Sequence {
            if let Some(entry) = try_parse_deviation(&any) {
                out.push(entry);
                continue;
            }
        }
        scan_deviations(any.value(), out);
    }
}

fn try_parse_deviation(any: &der::asn1::AnyRef<'_>) -> Option<crate::types::DeviationEntry> {
    let mut defect_oid = None;
    let mut description = None;
    let mut serial = None;
    let mut issuer_dn = None;

    let mut reader = SliceReader::new(any.value()).ok()?;
    while !reader.is_finished() {
        let field = der::asn1::AnyRef::decode(&mut reader).ok()?;
        match field.tag() {
            Tag::ObjectIdentifier => {
                let oid = oid_to_string(&field)?;
                if oid.starts_with("2.23.136") {
                    defect_oid = Some(oid);
                }
            }
            Tag::PrintableString | Tag::Utf8String | Tag::Ia5String => {
                if description.is_none() {
                    description = std::str::from_utf8(field.value()).ok().map(str::to_string);
                }
            }
            Tag::Integer => {
                if serial.is_none() {
                    serial = Some(crate::x509::serial_hex(field.value()));
                }
            }
            Tag::Sequence => {
                if issuer_dn.is_none() {
                    issuer_dn = try_render_name(&field);
                }
            }
            _ => {}
        }
    }

    let defect_oid = defect_oid?;
    Some(crate::types::DeviationEntry {
        cert_issuer_dn: issuer_dn.unwrap_or_default(),
        cert_serial: serial.unwrap_or_default(),
        defect_oid,
        defect_description: description.unwrap_or_default(),
    })
}

/// Parse an ICAO Deviation List (DER or PEM-wrapped CMS)
pub fn parse_deviation_list(bytes: &[u8], anchor_der: Option<&[u8]>) -> Result<ParsedDeviationList> {
    let der_bytes = unwrap_pem(bytes)?;
    let signed_data = parse_signed_data(&der_bytes)?;

    let signer_certs = embedded_certificates(&signed_data);
    let verified = verify_against_anchor(&signed_data, anchor_der);

    let mut entries = Vec::new();
    let mut version = None;
    if let Some(econtent) = signed_data.signed_content() {
        if let Ok(outer) = der::asn1::AnyRef::from_der(econtent) {
            if outer.tag() == Tag::Sequence {
                // Leading INTEGER is the list version
                if let Ok(mut r) = SliceReader::new(outer.value()) {
                    if let Ok(first) = der::asn1::AnyRef::decode(&mut r) {
                        if first.tag() == Tag::Integer && first.value().len() <= 8 {
                            let mut v: u64 = 0;
                            for b in first.value() {
                                v = (v << 8) | u64::from(*b);
                            }
                            version = Some(v);
                        }
                    }
                }
                scan_deviations(outer.value(), &mut entries);
            }
        }
    }

    Ok(ParsedDeviationList {
        fingerprint_sha256: fingerprint_sha256(&der_bytes),
        version,
        signer_dn: signer_dn_of(&signer_certs),
        verified,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_pem_passes_der_through() {
        let der = vec![0x30, 0x03, 0x02, 0x01, 0x01];
        assert_eq!(unwrap_pem(&der).unwrap(), der);
    }

    #[test]
    fn unwrap_pem_rejects_wrong_label() {
        let block = pem::Pem::new("CERTIFICATE", vec![1, 2, 3]);
        let text = pem::encode(&block);
        assert!(unwrap_pem(text.as_bytes()).is_err());
    }

    #[test]
    fn unwrap_pem_accepts_cms_label() {
        let block = pem::Pem::new("CMS", vec![1, 2, 3]);
        let text = pem::encode(&block);
        assert_eq!(unwrap_pem(text.as_bytes()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn master_list_content_walk() {
        // SEQUENCE { INTEGER 0, SET { SEQUENCE {} } }
        let econtent: &[u8] = &[0x30, 0x07, 0x02, 0x01, 0x00, 0x31, 0x02, 0x30, 0x00];
        let (version, certs) = master_list_content_certs(econtent).unwrap();
        assert_eq!(version, Some(0));
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0], vec![0x30, 0x00]);
    }

    #[test]
    fn deviation_scan_finds_defect_sequences() {
        // SEQUENCE { OID 2.23.136.1.1.1, PrintableString "bad", INTEGER 0x1234 }
        let node: &[u8] = &[
            0x30, 0x11, //
            0x06, 0x06, 0x67, 0x81, 0x08, 0x01, 0x01, 0x01, // 2.23.136.1.1.1
            0x13, 0x03, 0x62, 0x61, 0x64, // "bad"
            0x02, 0x02, 0x12, 0x34, // 0x1234
        ];
        let mut out = Vec::new();
        scan_deviations(node, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].defect_oid, "2.23.136.1.1.1");
        assert_eq!(out[0].defect_description, "bad");
        assert_eq!(out[0].cert_serial, "1234");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_master_list(b"garbage bytes", None).is_err());
    }
}
