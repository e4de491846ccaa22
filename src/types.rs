// Copyright (c) 2025 - Cowboy AI, LLC.

//! Common types used throughout the icao-pkd crate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(pub Uuid);

impl UploadId {
    /// Create a new random upload ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Certificate categories handled by the PKD
///
/// Link certificates classify as `LinkCert` but persist under the DB type
/// `CSCA` and the LDAP OU `lc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertType {
    /// Country Signing CA: self-signed root of a country's ePassport PKI
    Csca,
    /// Link certificate: a CSCA cross-signed by an older CSCA
    LinkCert,
    /// Document Signer Certificate
    Dsc,
    /// Non-conformant DSC (carried in the nc-data sub-tree)
    DscNc,
    /// Master List Signer Certificate
    Mlsc,
}

impl CertType {
    /// The cert_type value stored in the relational store
    pub fn db_type(&self) -> &'static str {
        match self {
            CertType::Csca | CertType::LinkCert => "CSCA",
            CertType::Dsc => "DSC",
            CertType::DscNc => "DSC_NC",
            CertType::Mlsc => "MLSC",
        }
    }

    /// The organizational unit this type lives under in the directory
    pub fn ldap_ou(&self) -> &'static str {
        match self {
            CertType::Csca => "csca",
            CertType::LinkCert => "lc",
            CertType::Dsc | CertType::DscNc => "dsc",
            CertType::Mlsc => "mlsc",
        }
    }

    /// True for types persisted in the nc-data container
    pub fn is_nc(&self) -> bool {
        matches!(self, CertType::DscNc)
    }
}

impl fmt::Display for CertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CertType::Csca => "CSCA",
            CertType::LinkCert => "LC",
            CertType::Dsc => "DSC",
            CertType::DscNc => "DSC_NC",
            CertType::Mlsc => "MLSC",
        };
        write!(f, "{s}")
    }
}

/// Validation outcome for a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// Chain verified, nothing expired
    Valid,
    /// Chain verified, at least one element past notAfter (ICAO hybrid rule)
    ExpiredValid,
    /// Signature failure, not-yet-valid leaf, cycle, or depth exceeded
    Invalid,
    /// No CSCA candidate yet; the revalidator retries later
    Pending,
    /// Processing error unrelated to trust
    Error,
}

impl ValidationStatus {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Valid => "VALID",
            ValidationStatus::ExpiredValid => "EXPIRED_VALID",
            ValidationStatus::Invalid => "INVALID",
            ValidationStatus::Pending => "PENDING",
            ValidationStatus::Error => "ERROR",
        }
    }

    /// Parse the store representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALID" => Some(Self::Valid),
            "EXPIRED_VALID" => Some(Self::ExpiredValid),
            "INVALID" => Some(Self::Invalid),
            "PENDING" => Some(Self::Pending),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upload lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadStatus {
    /// Bytes received and recorded
    Uploaded,
    /// Parsing in progress
    Parsing,
    /// MANUAL mode: parsed and staged, awaiting explicit validation
    Pending,
    /// Validation and persistence in progress
    Validating,
    /// All entries processed
    Completed,
    /// Upload-level failure; error_message is set
    Failed,
    /// Soft-deleted; retry re-creates
    Deleted,
}

impl UploadStatus {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploaded => "UPLOADED",
            UploadStatus::Parsing => "PARSING",
            UploadStatus::Pending => "PENDING",
            UploadStatus::Validating => "VALIDATING",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
            UploadStatus::Deleted => "DELETED",
        }
    }

    /// Parse the store representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOADED" => Some(Self::Uploaded),
            "PARSING" => Some(Self::Parsing),
            "PENDING" => Some(Self::Pending),
            "VALIDATING" => Some(Self::Validating),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Legal transitions of the upload state machine
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Uploaded, Parsing) | (Uploaded, Failed) => true,
            (Parsing, Pending) | (Parsing, Validating) | (Parsing, Failed) => true,
            (Pending, Validating) | (Pending, Failed) => true,
            (Validating, Completed) | (Validating, Failed) => true,
            (Failed, Validating) | (Failed, Parsing) => true, // retry
            (_, Deleted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recognized upload file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileFormat {
    /// RFC 2849 LDIF bundle
    Ldif,
    /// ICAO CMS Master List (.ml)
    MasterList,
    /// ICAO CMS Deviation List
    DeviationList,
    /// Single raw certificate (PEM or DER)
    Cert,
    /// Certificate revocation list (PEM or DER)
    Crl,
}

impl FileFormat {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Ldif => "LDIF",
            FileFormat::MasterList => "ML",
            FileFormat::DeviationList => "DL",
            FileFormat::Cert => "CERT",
            FileFormat::Crl => "CRL",
        }
    }

    /// Parse the store representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LDIF" => Some(Self::Ldif),
            "ML" => Some(Self::MasterList),
            "DL" => Some(Self::DeviationList),
            "CERT" => Some(Self::Cert),
            "CRL" => Some(Self::Crl),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upload processing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingMode {
    /// Parse, validate, persist, and sync in one background task
    Auto,
    /// Two-phase: parse and stage, then validate on explicit trigger
    Manual,
}

impl ProcessingMode {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Auto => "AUTO",
            ProcessingMode::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// ICAO Doc 9303 compliance level (informational, never a failure gate)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplianceLevel {
    /// No violations
    Conformant,
    /// Violations that do not prevent interoperation
    Warning,
    /// Violations of MUST-level profile requirements
    NonConformant,
}

impl ComplianceLevel {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceLevel::Conformant => "CONFORMANT",
            ComplianceLevel::Warning => "WARNING",
            ComplianceLevel::NonConformant => "NON_CONFORMANT",
        }
    }
}

impl fmt::Display for ComplianceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of the per-certificate CRL membership test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrlCheckStatus {
    /// No CRL available or check skipped
    NotChecked,
    /// Serial not present in the country's CRL
    NotRevoked,
    /// Serial listed as revoked
    Revoked,
    /// CRL present but undecodable
    Error,
}

impl CrlCheckStatus {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CrlCheckStatus::NotChecked => "NOT_CHECKED",
            CrlCheckStatus::NotRevoked => "NOT_REVOKED",
            CrlCheckStatus::Revoked => "REVOKED",
            CrlCheckStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CrlCheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reconciliation operation recorded per object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOp {
    /// Store row pushed to the directory
    SyncToLdap,
    /// Directory entry with no backing store row removed
    DeleteFromLdap,
    /// Dry-run placeholder; no directory call was made
    Skip,
}

impl ReconcileOp {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOp::SyncToLdap => "SYNC_TO_LDAP",
            ReconcileOp::DeleteFromLdap => "DELETE_FROM_LDAP",
            ReconcileOp::Skip => "SKIP",
        }
    }
}

impl fmt::Display for ReconcileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final status of a reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileStatus {
    /// Run started, not finished
    InProgress,
    /// Every operation succeeded
    Completed,
    /// Some operations failed, others succeeded
    Partial,
    /// The run aborted
    Failed,
}

impl ReconcileStatus {
    /// Store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::InProgress => "IN_PROGRESS",
            ReconcileStatus::Completed => "COMPLETED",
            ReconcileStatus::Partial => "PARTIAL",
            ReconcileStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A revoked-serial row extracted from a CRL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokedEntry {
    /// Serial number, uppercase hex
    pub serial: String,
    /// Revocation timestamp
    pub revocation_date: Option<DateTime<Utc>>,
    /// RFC 5280 reason code, if present
    pub reason: Option<String>,
}

/// A deviation-list defect row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviationEntry {
    /// Issuer DN of the defective certificate
    pub cert_issuer_dn: String,
    /// Serial of the defective certificate, uppercase hex
    pub cert_serial: String,
    /// ICAO defect type OID
    pub defect_oid: String,
    /// Human-readable defect description
    pub defect_description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_type_db_and_ou_mapping() {
        assert_eq!(CertType::LinkCert.db_type(), "CSCA");
        assert_eq!(CertType::LinkCert.ldap_ou(), "lc");
        assert_eq!(CertType::DscNc.db_type(), "DSC_NC");
        assert_eq!(CertType::DscNc.ldap_ou(), "dsc");
        assert!(CertType::DscNc.is_nc());
        assert!(!CertType::Dsc.is_nc());
    }

    #[test]
    fn upload_status_round_trip() {
        for s in [
            UploadStatus::Uploaded,
            UploadStatus::Parsing,
            UploadStatus::Pending,
            UploadStatus::Validating,
            UploadStatus::Completed,
            UploadStatus::Failed,
            UploadStatus::Deleted,
        ] {
            assert_eq!(UploadStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn upload_state_machine_edges() {
        use UploadStatus::*;
        assert!(Uploaded.can_transition_to(Parsing));
        assert!(Parsing.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Validating));
        assert!(Completed.can_transition_to(Deleted));
        assert!(!Completed.can_transition_to(Parsing));
        assert!(!Uploaded.can_transition_to(Completed));
    }

    #[test]
    fn validation_status_round_trip() {
        for s in [
            ValidationStatus::Valid,
            ValidationStatus::ExpiredValid,
            ValidationStatus::Invalid,
            ValidationStatus::Pending,
            ValidationStatus::Error,
        ] {
            assert_eq!(ValidationStatus::parse(s.as_str()), Some(s));
        }
    }
}
