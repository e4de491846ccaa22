// Copyright (c) 2025 - Cowboy AI, LLC.

//! Upload orchestration
//!
//! Drives the per-upload state machine:
//!
//! ```text
//! UPLOADED -> PARSING -> PENDING -> VALIDATING -> COMPLETED
//!                 |                    ^              |
//!                 v                    |              v
//!              FAILED  ----------------+----------> DELETED
//! ```
//!
//! AUTO mode runs parse, validate, persist and directory sync in one task.
//! MANUAL mode parses and stages in phase 1, then validates on an explicit
//! resume call. A process-wide in-flight set guards against duplicate
//! dispatch; per-entry failures are contained and never abort the upload.

pub mod progress;
pub mod staging;

use crate::chain;
use crate::classify::classify;
use crate::cms;
use crate::config::AppConfig;
use crate::crl;
use crate::error::{PkdError, Result};
use crate::ldap::{CertificateEntry, Directory};
use crate::ldif::{self, LdifEntry};
use crate::store::{
    NewCertificate, NewCrl, NewUpload, NewValidationResult, Store, UploadCounters,
};
use crate::types::{
    CertType, CrlCheckStatus, FileFormat, ProcessingMode, UploadId, UploadStatus, ValidationStatus,
};
use crate::x509::compliance::{self, CompliancePolicy};
use crate::x509::{dn, CertMetadata};
use chrono::Utc;
use progress::{CertLogRow, ProcessingStage, ProgressManager};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Upload processing pipeline
pub struct Pipeline {
    store: Store,
    directory: Option<Arc<dyn Directory>>,
    progress: Arc<ProgressManager>,
    temp_dir: PathBuf,
    trust_anchor: Option<Vec<u8>>,
    policy: CompliancePolicy,
    max_body_bytes: usize,
    in_flight: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

/// Running totals while an upload is processed
#[derive(Default)]
struct ProcessState {
    counters: UploadCounters,
    processed_entries: i32,
    total_entries: i32,
}

struct InFlightGuard<'a> {
    pipeline: &'a Pipeline,
    upload_id: Uuid,
    cancel: Arc<AtomicBool>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.pipeline
            .in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.upload_id);
    }
}

impl Pipeline {
    /// Assemble the pipeline. `directory: None` runs DB-only; the
    /// reconciler syncs the directory later.
    pub fn new(
        store: Store,
        directory: Option<Arc<dyn Directory>>,
        progress: Arc<ProgressManager>,
        config: &AppConfig,
        trust_anchor: Option<Vec<u8>>,
    ) -> Self {
        Self {
            store,
            directory,
            progress,
            temp_dir: config.temp_dir.clone(),
            trust_anchor,
            policy: CompliancePolicy::default(),
            max_body_bytes: config.max_body_size_mb as usize * 1024 * 1024,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The progress registry
    pub fn progress(&self) -> &Arc<ProgressManager> {
        &self.progress
    }

    fn begin(&self, upload_id: Uuid) -> Result<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().expect("in-flight set poisoned");
        if set.contains_key(&upload_id) {
            return Err(PkdError::InvalidState(format!(
                "upload {upload_id} is already being processed"
            )));
        }
        let cancel = Arc::new(AtomicBool::new(false));
        set.insert(upload_id, cancel.clone());
        Ok(InFlightGuard {
            pipeline: self,
            upload_id,
            cancel,
        })
    }

    /// Detect the file format from content (extension only as a tiebreak)
    pub fn detect_format(file_name: &str, bytes: &[u8]) -> Result<FileFormat> {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".ldif") {
            return Ok(FileFormat::Ldif);
        }
        if let Ok(text) = std::str::from_utf8(bytes) {
            let mut lines = text.lines().filter(|l| !l.is_empty() && !l.starts_with('#'));
            if let Some(first) = lines.next() {
                if first.starts_with("dn:") || first.to_ascii_lowercase().starts_with("version:") {
                    return Ok(FileFormat::Ldif);
                }
            }
        }
        match crate::x509::parse_auto(bytes)? {
            crate::x509::DetectedFormat::Certificate(_) => Ok(FileFormat::Cert),
            crate::x509::DetectedFormat::Crl(_) => Ok(FileFormat::Crl),
            crate::x509::DetectedFormat::Cms(_) => {
                if lower.ends_with(".dl") || lower.contains("deviation") {
                    Ok(FileFormat::DeviationList)
                } else {
                    Ok(FileFormat::MasterList)
                }
            }
        }
    }

    /// Ingest one file. Creates the upload row (identical bytes are
    /// rejected as duplicates), then processes per mode: AUTO straight
    /// through, MANUAL to the staged PENDING state.
    pub async fn ingest(
        &self,
        file_name: &str,
        bytes: &[u8],
        mode: ProcessingMode,
        format_hint: Option<FileFormat>,
    ) -> Result<Uuid> {
        if bytes.len() > self.max_body_bytes {
            return Err(PkdError::InvalidState(format!(
                "upload of {} bytes exceeds the {} MB cap",
                bytes.len(),
                self.max_body_bytes / (1024 * 1024)
            )));
        }

        let format = match format_hint {
            Some(f) => f,
            None => Self::detect_format(file_name, bytes)?,
        };
        let hash = hex::encode(Sha256::digest(bytes));

        let upload_id = self
            .store
            .uploads
            .create(&NewUpload {
                file_name: file_name.to_string(),
                file_hash_sha256: hash,
                file_format: format,
                file_size: bytes.len() as i64,
                processing_mode: mode,
            })
            .await?;

        staging::save_raw(&self.temp_dir, upload_id, bytes).await?;
        tracing::info!("upload {upload_id}: {file_name} ({} bytes, {format}, {mode})", bytes.len());

        let result = match (mode, format) {
            (ProcessingMode::Manual, FileFormat::Ldif | FileFormat::MasterList) => {
                self.manual_phase1(upload_id, bytes, format).await
            }
            _ => self.process_to_completion(upload_id, bytes, format).await,
        };

        if let Err(e) = &result {
            tracing::error!("upload {upload_id} failed: {e}");
            let _ = self
                .store
                .uploads
                .update_status(upload_id, UploadStatus::Failed, Some(&e.to_string()))
                .await;
            self.progress.report(
                UploadId::from_uuid(upload_id),
                ProcessingStage::Failed,
                0,
                0,
                e.to_string(),
            );
        }
        result.map(|_| upload_id)
    }

    /// MANUAL phase 2: pick up the staged artifact and validate
    pub async fn resume(&self, upload_id: Uuid) -> Result<()> {
        let row = self
            .store
            .uploads
            .find_by_id(upload_id)
            .await?
            .ok_or_else(|| PkdError::NotFound(format!("upload {upload_id}")))?;
        if row.status != UploadStatus::Pending.as_str() {
            return Err(PkdError::InvalidState(format!(
                "upload {upload_id} is {} (expected PENDING)",
                row.status
            )));
        }
        let format = FileFormat::parse(&row.file_format)
            .ok_or_else(|| PkdError::InvalidState(format!("unknown format {}", row.file_format)))?;

        let guard = self.begin(upload_id)?;

        let result = match format {
            FileFormat::Ldif => {
                let entries = staging::load_ldif_entries(&self.temp_dir, upload_id).await?;
                self.run_entries(upload_id, entries, &guard).await
            }
            FileFormat::MasterList => {
                self.store
                    .uploads
                    .update_status(upload_id, UploadStatus::Validating, None)
                    .await?;
                let bytes = staging::load_ml_bytes(&self.temp_dir, upload_id).await?;
                let mut state = ProcessState::default();
                state.total_entries = 1;
                self.process_master_list_bytes(upload_id, &bytes, &mut state)
                    .await?;
                state.processed_entries = 1;
                self.finalize(upload_id, state).await
            }
            _ => Err(PkdError::InvalidState(
                "only LDIF and Master List uploads stage for manual validation".to_string(),
            )),
        };

        if let Err(e) = &result {
            let _ = self
                .store
                .uploads
                .update_status(upload_id, UploadStatus::Failed, Some(&e.to_string()))
                .await;
        }
        result
    }

    /// Retry a FAILED upload: partial child rows are removed and the
    /// preserved original bytes are re-processed.
    pub async fn retry(&self, upload_id: Uuid) -> Result<()> {
        let row = self
            .store
            .uploads
            .find_by_id(upload_id)
            .await?
            .ok_or_else(|| PkdError::NotFound(format!("upload {upload_id}")))?;
        if row.status != UploadStatus::Failed.as_str() {
            return Err(PkdError::InvalidState(format!(
                "upload {upload_id} is {} (only FAILED uploads retry)",
                row.status
            )));
        }
        let format = FileFormat::parse(&row.file_format)
            .ok_or_else(|| PkdError::InvalidState(format!("unknown format {}", row.file_format)))?;

        self.store.validations.delete_by_upload(upload_id).await?;
        self.store.certificates.delete_by_upload(upload_id).await?;
        self.store.crls.delete_by_upload(upload_id).await?;

        let bytes = staging::load_raw(&self.temp_dir, upload_id).await?;
        let result = self.process_to_completion(upload_id, &bytes, format).await;
        if let Err(e) = &result {
            let _ = self
                .store
                .uploads
                .update_status(upload_id, UploadStatus::Failed, Some(&e.to_string()))
                .await;
        }
        result
    }

    /// Delete an upload in any state. Idempotent; a running upload is
    /// cancelled at its next suspension point and rolls itself back.
    pub async fn delete_upload(&self, upload_id: Uuid) -> Result<()> {
        {
            let set = self.in_flight.lock().expect("in-flight set poisoned");
            if let Some(flag) = set.get(&upload_id) {
                flag.store(true, Ordering::SeqCst);
                tracing::info!("upload {upload_id}: cancellation requested");
                return Ok(());
            }
        }

        let Some(row) = self.store.uploads.find_by_id(upload_id).await? else {
            return Ok(());
        };
        if row.status == UploadStatus::Deleted.as_str() {
            return Ok(());
        }

        self.store.validations.delete_by_upload(upload_id).await?;
        self.store.certificates.delete_by_upload(upload_id).await?;
        self.store.crls.delete_by_upload(upload_id).await?;
        staging::cleanup(&self.temp_dir, upload_id).await;
        self.store.uploads.mark_deleted(upload_id).await?;
        self.progress.remove(UploadId::from_uuid(upload_id));
        tracing::info!("upload {upload_id}: deleted");
        Ok(())
    }

    // --- internal drivers ---

    async fn manual_phase1(
        &self,
        upload_id: Uuid,
        bytes: &[u8],
        format: FileFormat,
    ) -> Result<()> {
        let _guard = self.begin(upload_id)?;
        let pid = UploadId::from_uuid(upload_id);
        self.store
            .uploads
            .update_status(upload_id, UploadStatus::Parsing, None)
            .await?;
        self.progress
            .report(pid, ProcessingStage::Parsing, 0, 0, "parsing");

        match format {
            FileFormat::Ldif => {
                let entries = ldif::parse_bytes(bytes)?;
                let total = entries.len() as i32;
                staging::save_ldif_entries(&self.temp_dir, upload_id, &entries).await?;
                self.store.uploads.update_progress(upload_id, total, 0).await?;
                tracing::info!("upload {upload_id}: staged {total} LDIF entries");
            }
            FileFormat::MasterList => {
                staging::save_ml_bytes(&self.temp_dir, upload_id, bytes).await?;
                self.store.uploads.update_progress(upload_id, 1, 0).await?;
                tracing::info!("upload {upload_id}: staged master list bytes");
            }
            _ => unreachable!("manual_phase1 only dispatches LDIF and ML"),
        }

        self.store
            .uploads
            .update_status(upload_id, UploadStatus::Pending, None)
            .await?;
        self.progress
            .report(pid, ProcessingStage::Parsing, 0, 0, "staged, awaiting validation");
        Ok(())
    }

    async fn process_to_completion(
        &self,
        upload_id: Uuid,
        bytes: &[u8],
        format: FileFormat,
    ) -> Result<()> {
        let guard = self.begin(upload_id)?;
        let pid = UploadId::from_uuid(upload_id);

        self.store
            .uploads
            .update_status(upload_id, UploadStatus::Parsing, None)
            .await?;
        self.progress
            .report(pid, ProcessingStage::Parsing, 0, 0, "parsing");

        match format {
            FileFormat::Ldif => {
                let entries = ldif::parse_bytes(bytes)?;
                self.run_entries(upload_id, entries, &guard).await
            }
            FileFormat::MasterList => {
                self.store
                    .uploads
                    .update_status(upload_id, UploadStatus::Validating, None)
                    .await?;
                let mut state = ProcessState::default();
                state.total_entries = 1;
                self.process_master_list_bytes(upload_id, bytes, &mut state)
                    .await?;
                state.processed_entries = 1;
                self.finalize(upload_id, state).await
            }
            FileFormat::DeviationList => {
                self.store
                    .uploads
                    .update_status(upload_id, UploadStatus::Validating, None)
                    .await?;
                let mut state = ProcessState::default();
                state.total_entries = 1;
                self.process_deviation_list_bytes(upload_id, bytes, &mut state)
                    .await?;
                state.processed_entries = 1;
                self.finalize(upload_id, state).await
            }
            FileFormat::Cert => {
                self.store
                    .uploads
                    .update_status(upload_id, UploadStatus::Validating, None)
                    .await?;
                let der = match crate::x509::parse_auto(bytes)? {
                    crate::x509::DetectedFormat::Certificate(der) => der,
                    _ => return Err(PkdError::Parse("expected a certificate".to_string())),
                };
                let mut state = ProcessState::default();
                state.total_entries = 1;
                self.process_certificate(upload_id, "", &der, &mut state).await;
                state.processed_entries = 1;
                self.finalize(upload_id, state).await
            }
            FileFormat::Crl => {
                self.store
                    .uploads
                    .update_status(upload_id, UploadStatus::Validating, None)
                    .await?;
                let der = match crate::x509::parse_auto(bytes)? {
                    crate::x509::DetectedFormat::Crl(der) => der,
                    _ => return Err(PkdError::Parse("expected a CRL".to_string())),
                };
                let mut state = ProcessState::default();
                state.total_entries = 1;
                self.process_crl_bytes(upload_id, &der, &mut state).await;
                state.processed_entries = 1;
                self.finalize(upload_id, state).await
            }
        }
    }

    async fn run_entries(
        &self,
        upload_id: Uuid,
        entries: Vec<LdifEntry>,
        guard: &InFlightGuard<'_>,
    ) -> Result<()> {
        let pid = UploadId::from_uuid(upload_id);
        let total = entries.len() as i32;
        let mut state = ProcessState {
            total_entries: total,
            ..Default::default()
        };

        self.store
            .uploads
            .update_status(upload_id, UploadStatus::Validating, None)
            .await?;
        self.store.uploads.update_progress(upload_id, total, 0).await?;

        let mut consecutive_db_errors = 0u32;
        for entry in entries {
            if guard.cancel.load(Ordering::SeqCst) {
                return self.rollback_cancelled(upload_id).await;
            }

            match self.process_entry(upload_id, &entry, &mut state).await {
                Ok(()) => consecutive_db_errors = 0,
                // Per-entry containment: one malformed entry or one failed
                // statement never aborts the upload. A store that keeps
                // failing is process-level and does.
                Err(PkdError::Db(e)) => {
                    consecutive_db_errors += 1;
                    if consecutive_db_errors > 5 {
                        return Err(PkdError::Db(e));
                    }
                    tracing::warn!("upload {upload_id}: entry {} hit a DB error: {e}", entry.dn);
                    state.counters.error += 1;
                    self.progress.update(pid, |p| p.stats.error += 1);
                }
                Err(other) => {
                    consecutive_db_errors = 0;
                    tracing::warn!("upload {upload_id}: entry {} failed: {other}", entry.dn);
                    state.counters.error += 1;
                    self.progress.update(pid, |p| p.stats.error += 1);
                }
            }

            state.processed_entries += 1;
            if state.processed_entries % 50 == 0 || state.processed_entries == total {
                self.progress.report(
                    pid,
                    ProcessingStage::ValidationInProgress,
                    state.processed_entries as u32,
                    total as u32,
                    format!(
                        "CSCA {}, DSC {}, DSC_NC {}, CRL {}, ML {}",
                        state.counters.csca,
                        state.counters.dsc,
                        state.counters.dsc_nc,
                        state.counters.crl,
                        state.counters.ml
                    ),
                );
            }
            if state.processed_entries % 500 == 0 || state.processed_entries == total {
                self.store
                    .uploads
                    .update_progress(upload_id, total, state.processed_entries)
                    .await?;
                self.store
                    .uploads
                    .update_counters(upload_id, &state.counters)
                    .await?;
            }
        }

        self.progress.report(
            pid,
            ProcessingStage::ValidationCompleted,
            total as u32,
            total as u32,
            "validation completed",
        );
        self.finalize(upload_id, state).await
    }

    async fn rollback_cancelled(&self, upload_id: Uuid) -> Result<()> {
        tracing::info!("upload {upload_id}: cancelled, rolling back");
        self.store.validations.delete_by_upload(upload_id).await?;
        self.store.certificates.delete_by_upload(upload_id).await?;
        self.store.crls.delete_by_upload(upload_id).await?;
        staging::cleanup(&self.temp_dir, upload_id).await;
        self.store.uploads.mark_deleted(upload_id).await?;
        self.progress.remove(UploadId::from_uuid(upload_id));
        Ok(())
    }

    async fn finalize(&self, upload_id: Uuid, state: ProcessState) -> Result<()> {
        let pid = UploadId::from_uuid(upload_id);
        self.store
            .uploads
            .update_progress(upload_id, state.total_entries, state.processed_entries)
            .await?;
        self.store
            .uploads
            .update_counters(upload_id, &state.counters)
            .await?;
        self.store
            .uploads
            .update_status(upload_id, UploadStatus::Completed, None)
            .await?;
        staging::cleanup(&self.temp_dir, upload_id).await;
        self.progress.report(
            pid,
            ProcessingStage::Completed,
            state.processed_entries as u32,
            state.total_entries as u32,
            "completed",
        );
        tracing::info!(
            "upload {upload_id}: completed (CSCA {}, DSC {}, DSC_NC {}, MLSC {}, CRL {}, ML {}, dup {})",
            state.counters.csca,
            state.counters.dsc,
            state.counters.dsc_nc,
            state.counters.mlsc,
            state.counters.crl,
            state.counters.ml,
            state.counters.duplicate
        );
        Ok(())
    }

    async fn process_entry(
        &self,
        upload_id: Uuid,
        entry: &LdifEntry,
        state: &mut ProcessState,
    ) -> Result<()> {
        if let Some(decoded) = entry.first_binary("userCertificate") {
            self.process_certificate(upload_id, &entry.dn, &decoded?, state)
                .await;
        } else if let Some(decoded) = entry.first_binary("cACertificate") {
            self.process_certificate(upload_id, &entry.dn, &decoded?, state)
                .await;
        }

        if let Some(decoded) = entry.first_binary("certificateRevocationList") {
            self.process_crl_bytes(upload_id, &decoded?, state).await;
        }

        if entry.has("pkdMasterListContent") {
            if let Some(decoded) = entry.first_binary("pkdMasterListContent") {
                self.process_master_list_bytes(upload_id, &decoded?, state)
                    .await?;
            }
        }
        Ok(())
    }

    /// Validate and persist one certificate; errors are contained and
    /// counted, never propagated.
    async fn process_certificate(
        &self,
        upload_id: Uuid,
        entry_dn: &str,
        der: &[u8],
        state: &mut ProcessState,
    ) {
        if let Err(e) = self
            .process_certificate_inner(upload_id, entry_dn, der, state)
            .await
        {
            tracing::warn!("upload {upload_id}: certificate in {entry_dn:.60} failed: {e}");
            state.counters.error += 1;
            self.progress
                .update(UploadId::from_uuid(upload_id), |p| p.stats.error += 1);
        }
    }

    async fn process_certificate_inner(
        &self,
        upload_id: Uuid,
        entry_dn: &str,
        der: &[u8],
        state: &mut ProcessState,
    ) -> Result<()> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let pid = UploadId::from_uuid(upload_id);

        let meta = crate::x509::extract_metadata(der)?;
        let cert_type = classify(&meta, entry_dn);
        let label = match cert_type {
            CertType::Csca => "CSCA",
            CertType::LinkCert => "LC",
            CertType::Mlsc => "MLSC",
            _ => "DSC",
        };

        let chain_result =
            chain::build_chain(der, label, &self.store.certificates, now).await?;

        let mut status = chain_result.status;
        let mut error_message = if chain_result.trust_chain_valid {
            None
        } else {
            Some(chain_result.message.clone())
        };
        let error_code = match status {
            ValidationStatus::Pending => Some("CSCA_NOT_FOUND".to_string()),
            ValidationStatus::Invalid if chain_result.csca_found => {
                if chain_result.message.contains("signature verification failed") {
                    Some("SIGNATURE_KEY_MISMATCH".to_string())
                } else if chain_result.message.contains("not yet valid") {
                    Some("NOT_YET_VALID".to_string())
                } else {
                    Some("CHAIN_INVALID".to_string())
                }
            }
            ValidationStatus::Invalid => Some("CHAIN_INVALID".to_string()),
            _ => None,
        };

        // CRL membership (trusted chains only, leaf DSC types)
        let mut crl_status = CrlCheckStatus::NotChecked;
        let mut crl_revoked = false;
        if chain_result.trust_chain_valid
            && matches!(cert_type, CertType::Dsc | CertType::DscNc)
        {
            let country = dn::country_code(&meta.issuer_dn);
            let check =
                crl::check_revocation(&meta.serial_number, &country, &self.store.crls, now)
                    .await?;
            crl_status = check.status;
            crl_revoked = check.status == CrlCheckStatus::Revoked;
            if crl_revoked {
                status = ValidationStatus::Invalid;
                error_message = Some("certificate is revoked per CRL".to_string());
            }
        }

        let report = compliance::check(&meta, cert_type, &self.policy);

        let (cert_id, was_duplicate) = self
            .store
            .certificates
            .save_with_duplicate_check(&NewCertificate {
                upload_id,
                cert_type,
                country_code: meta.country_code(),
                subject_dn: meta.subject_dn.clone(),
                issuer_dn: meta.issuer_dn.clone(),
                serial_number: meta.serial_number.clone(),
                fingerprint_sha256: meta.fingerprint_sha256.clone(),
                not_before: meta.not_before,
                not_after: meta.not_after,
                der_bytes: der.to_vec(),
                validation_status: status,
            })
            .await?;

        self.store
            .certificates
            .track_duplicate_source(
                cert_id,
                upload_id,
                "LDIF",
                &meta.country_code(),
                entry_dn,
                "",
            )
            .await?;

        self.store
            .validations
            .insert(&NewValidationResult {
                certificate_id: cert_id,
                upload_id,
                validation_status: status,
                trust_chain_valid: chain_result.trust_chain_valid,
                trust_chain_path: Some(chain_result.path.clone()),
                csca_found: chain_result.csca_found,
                csca_subject_dn: chain_result.csca_subject_dn.clone(),
                signature_verified: chain_result.signature_verified,
                is_expired: chain_result.leaf_expired,
                crl_checked: crl_status != CrlCheckStatus::NotChecked,
                crl_revoked,
                crl_status,
                icao_compliance_level: Some(report.level),
                icao_violations: Some(serde_json::to_string(&report.violations)?),
                error_code,
                error_message: error_message.clone(),
                validation_duration_ms: started.elapsed().as_millis() as i64,
            })
            .await?;

        if !was_duplicate {
            self.store
                .certificates
                .update_validation_status(cert_id, status)
                .await?;
            if let Some(directory) = &self.directory {
                self.progress.update(pid, |p| p.stage = ProcessingStage::LdapSaving);
                match directory
                    .store_certificate(&CertificateEntry {
                        cert_type,
                        country_code: meta.country_code(),
                        subject_dn: meta.subject_dn.clone(),
                        serial_number: meta.serial_number.clone(),
                        fingerprint_sha256: meta.fingerprint_sha256.clone(),
                        der_bytes: der.to_vec(),
                        conformance_code: None,
                        conformance_text: None,
                        pkd_version: None,
                        use_legacy_dn: false,
                    })
                    .await
                {
                    Ok(ldap_dn) => {
                        self.store
                            .certificates
                            .mark_stored_in_ldap(cert_id, &ldap_dn)
                            .await?;
                    }
                    Err(PkdError::LdapPermanent(e)) => {
                        tracing::error!("directory rejected {}: {e}", meta.fingerprint_sha256);
                    }
                    Err(e) => {
                        // Transient: row stays unsynced, reconciler retries
                        tracing::warn!(
                            "directory write deferred for {}: {e}",
                            meta.fingerprint_sha256
                        );
                    }
                }
            }
        }

        self.account_certificate(
            pid,
            &meta,
            cert_type,
            status,
            was_duplicate,
            error_message.as_deref().unwrap_or(&chain_result.path),
            state,
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn account_certificate(
        &self,
        pid: UploadId,
        meta: &CertMetadata,
        cert_type: CertType,
        status: ValidationStatus,
        was_duplicate: bool,
        message: &str,
        state: &mut ProcessState,
    ) {
        match cert_type {
            CertType::Csca | CertType::LinkCert => state.counters.csca += 1,
            CertType::Dsc => state.counters.dsc += 1,
            CertType::DscNc => state.counters.dsc_nc += 1,
            CertType::Mlsc => state.counters.mlsc += 1,
        }
        match status {
            ValidationStatus::Valid => state.counters.valid += 1,
            ValidationStatus::ExpiredValid => state.counters.expired_valid += 1,
            ValidationStatus::Invalid => state.counters.invalid += 1,
            ValidationStatus::Pending => state.counters.pending += 1,
            ValidationStatus::Error => state.counters.error += 1,
        }
        if was_duplicate {
            state.counters.duplicate += 1;
        }

        let sig_alg = meta.signature_algorithm.clone();
        let key = format!("{}/{}", meta.public_key_algorithm, meta.public_key_size);
        let row = CertLogRow {
            fingerprint: meta.fingerprint_sha256.chars().take(16).collect(),
            cert_type: cert_type.to_string(),
            country_code: meta.country_code(),
            status: status.as_str().to_string(),
            message: message.to_string(),
        };
        self.progress.update(pid, move |p| {
            p.stats.processed += 1;
            match status {
                ValidationStatus::Valid => p.stats.valid += 1,
                ValidationStatus::ExpiredValid => p.stats.expired_valid += 1,
                ValidationStatus::Invalid => p.stats.invalid += 1,
                ValidationStatus::Pending => p.stats.pending += 1,
                ValidationStatus::Error => p.stats.error += 1,
            }
            if was_duplicate {
                p.stats.duplicates += 1;
            }
            *p.stats.by_signature_algorithm.entry(sig_alg).or_insert(0) += 1;
            *p.stats.by_key_size.entry(key).or_insert(0) += 1;
            p.stats.push_recent(row);
        });
    }

    async fn process_crl_bytes(&self, upload_id: Uuid, der: &[u8], state: &mut ProcessState) {
        if let Err(e) = self.process_crl_inner(upload_id, der, state).await {
            tracing::warn!("upload {upload_id}: CRL entry failed: {e}");
            state.counters.error += 1;
        }
    }

    async fn process_crl_inner(
        &self,
        upload_id: Uuid,
        raw: &[u8],
        state: &mut ProcessState,
    ) -> Result<()> {
        let der = crl::decode_bytea_relaxed(raw);
        let meta = crl::parse_crl(&der)?;
        let country = dn::country_code(&meta.issuer_dn);

        let (crl_id, was_duplicate) = self
            .store
            .crls
            .save_with_duplicate_check(&NewCrl {
                upload_id,
                country_code: country.clone(),
                issuer_dn: meta.issuer_dn.clone(),
                this_update: meta.this_update,
                next_update: meta.next_update,
                crl_number: meta.crl_number.clone(),
                fingerprint_sha256: meta.fingerprint_sha256.clone(),
                der_bytes: der.clone(),
                revoked: meta.revoked.clone(),
            })
            .await?;

        state.counters.crl += 1;
        if was_duplicate {
            state.counters.duplicate += 1;
            return Ok(());
        }

        if let Some(directory) = &self.directory {
            match directory
                .store_crl(&country, &meta.fingerprint_sha256, &der)
                .await
            {
                Ok(ldap_dn) => {
                    self.store.crls.mark_stored_in_ldap(crl_id, &ldap_dn).await?;
                }
                Err(e) => {
                    tracing::warn!("directory write deferred for CRL {country}: {e}");
                }
            }
        }
        Ok(())
    }

    async fn process_master_list_bytes(
        &self,
        upload_id: Uuid,
        raw: &[u8],
        state: &mut ProcessState,
    ) -> Result<()> {
        let parsed = cms::parse_master_list(raw, self.trust_anchor.as_deref())?;
        tracing::info!(
            "upload {upload_id}: master list with {} signer cert(s), {} content cert(s), verified={}",
            parsed.signer_certs.len(),
            parsed.content_certs.len(),
            parsed.verified
        );

        // Signer certificates become MLSC candidates
        for der in &parsed.signer_certs {
            self.process_master_list_member(upload_id, der, true, state)
                .await;
        }
        // Content certificates split into CSCAs and link certs
        for der in &parsed.content_certs {
            self.process_master_list_member(upload_id, der, false, state)
                .await;
        }

        let country = parsed
            .signer_dn
            .as_deref()
            .map(dn::country_code)
            .unwrap_or_else(|| "UN".to_string());

        let (ml_id, was_duplicate) = self
            .store
            .master_lists
            .save_with_duplicate_check(
                upload_id,
                &country,
                parsed.signer_dn.as_deref(),
                &parsed.fingerprint_sha256,
                parsed.content_certs.len() as i32,
                raw,
            )
            .await?;
        state.counters.ml += 1;
        if was_duplicate {
            state.counters.duplicate += 1;
        } else if let Some(directory) = &self.directory {
            match directory
                .store_master_list(&country, &parsed.fingerprint_sha256, raw)
                .await
            {
                Ok(ldap_dn) => {
                    self.store
                        .master_lists
                        .mark_stored_in_ldap(ml_id, &ldap_dn)
                        .await?;
                }
                Err(e) => {
                    tracing::warn!("directory write deferred for master list {country}: {e}");
                }
            }
        }
        Ok(())
    }

    /// One certificate out of a master list: signers force MLSC, content
    /// members split CSCA vs link cert by self-signedness.
    async fn process_master_list_member(
        &self,
        upload_id: Uuid,
        der: &[u8],
        is_signer: bool,
        state: &mut ProcessState,
    ) {
        let path_hint = if is_signer { "o=mlsc" } else { "" };
        if is_signer {
            // MLSC: persist under its own type without chain enforcement
            if let Err(e) = self
                .process_mlsc(upload_id, der, state)
                .await
            {
                tracing::warn!("upload {upload_id}: MLSC failed: {e}");
                state.counters.error += 1;
            }
        } else {
            self.process_certificate(upload_id, path_hint, der, state).await;
        }
    }

    async fn process_mlsc(
        &self,
        upload_id: Uuid,
        der: &[u8],
        state: &mut ProcessState,
    ) -> Result<()> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let pid = UploadId::from_uuid(upload_id);
        let meta = crate::x509::extract_metadata(der)?;

        let chain_result = chain::build_chain(der, "MLSC", &self.store.certificates, now).await?;
        let status = chain_result.status;
        let report = compliance::check(&meta, CertType::Mlsc, &self.policy);

        let (cert_id, was_duplicate) = self
            .store
            .certificates
            .save_with_duplicate_check(&NewCertificate {
                upload_id,
                cert_type: CertType::Mlsc,
                country_code: meta.country_code(),
                subject_dn: meta.subject_dn.clone(),
                issuer_dn: meta.issuer_dn.clone(),
                serial_number: meta.serial_number.clone(),
                fingerprint_sha256: meta.fingerprint_sha256.clone(),
                not_before: meta.not_before,
                not_after: meta.not_after,
                der_bytes: der.to_vec(),
                validation_status: status,
            })
            .await?;

        self.store
            .validations
            .insert(&NewValidationResult {
                certificate_id: cert_id,
                upload_id,
                validation_status: status,
                trust_chain_valid: chain_result.trust_chain_valid,
                trust_chain_path: Some(chain_result.path.clone()),
                csca_found: chain_result.csca_found,
                csca_subject_dn: chain_result.csca_subject_dn.clone(),
                signature_verified: chain_result.signature_verified,
                is_expired: chain_result.leaf_expired,
                crl_checked: false,
                crl_revoked: false,
                crl_status: CrlCheckStatus::NotChecked,
                icao_compliance_level: Some(report.level),
                icao_violations: Some(serde_json::to_string(&report.violations)?),
                error_code: None,
                error_message: None,
                validation_duration_ms: started.elapsed().as_millis() as i64,
            })
            .await?;

        if !was_duplicate {
            if let Some(directory) = &self.directory {
                match directory
                    .store_certificate(&CertificateEntry {
                        cert_type: CertType::Mlsc,
                        country_code: meta.country_code(),
                        subject_dn: meta.subject_dn.clone(),
                        serial_number: meta.serial_number.clone(),
                        fingerprint_sha256: meta.fingerprint_sha256.clone(),
                        der_bytes: der.to_vec(),
                        conformance_code: None,
                        conformance_text: None,
                        pkd_version: None,
                        use_legacy_dn: false,
                    })
                    .await
                {
                    Ok(ldap_dn) => {
                        self.store
                            .certificates
                            .mark_stored_in_ldap(cert_id, &ldap_dn)
                            .await?;
                    }
                    Err(e) => {
                        tracing::warn!("directory write deferred for MLSC: {e}");
                    }
                }
            }
        }

        self.account_certificate(
            pid,
            &meta,
            CertType::Mlsc,
            status,
            was_duplicate,
            &chain_result.path,
            state,
        );
        Ok(())
    }

    async fn process_deviation_list_bytes(
        &self,
        upload_id: Uuid,
        raw: &[u8],
        state: &mut ProcessState,
    ) -> Result<()> {
        let parsed = cms::parse_deviation_list(raw, self.trust_anchor.as_deref())?;
        let country = parsed
            .signer_dn
            .as_deref()
            .map(dn::country_code)
            .unwrap_or_else(|| "XX".to_string());

        tracing::info!(
            "upload {upload_id}: deviation list v{:?} for {country} with {} entries (verified={})",
            parsed.version,
            parsed.entries.len(),
            parsed.verified
        );

        self.store
            .deviation_lists
            .save(
                upload_id,
                &country,
                parsed.version.map(|v| v as i64),
                None,
                parsed.signer_dn.as_deref(),
                parsed.verified,
                &parsed.fingerprint_sha256,
                raw,
                &parsed.entries,
            )
            .await?;
        state.counters.ml += 1;
        Ok(())
    }
}
