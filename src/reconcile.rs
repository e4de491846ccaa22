// Copyright (c) 2025 - Cowboy AI, LLC.

//! DB <-> directory reconciliation
//!
//! A periodic control loop (plus an explicit trigger with a dry-run flag)
//! that diffs the relational store against the directory per certificate
//! type, stages additions and deletions, and records every per-object
//! operation. The store is authoritative: directory entries whose
//! fingerprint has no backing row are deleted, which is also how the loop
//! heals out-of-band directory edits.

use crate::error::{PkdError, Result};
use crate::ldap::{CertificateEntry, Directory};
use crate::store::{CertificateRow, Store, SummaryCounters};
use crate::types::{CertType, ReconcileOp, ReconcileStatus};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-run batch cap per certificate type
const BATCH_LIMIT: i64 = 10_000;

/// Parallel directory operations in flight per type
pub const DEFAULT_CONCURRENCY: usize = 4;

/// The five reconciled type buckets
const RECONCILED_TYPES: [CertType; 4] =
    [CertType::Csca, CertType::Dsc, CertType::DscNc, CertType::Mlsc];

/// Short-form error text for per-object log rows
fn short_error(e: &PkdError) -> String {
    let mut s = e.to_string();
    s.truncate(200);
    s
}

/// The reconciler engine
pub struct Reconciler {
    store: Store,
    directory: Arc<dyn Directory>,
    concurrency: usize,
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Summary row id
    pub summary_id: Uuid,
    /// Final status
    pub status: ReconcileStatus,
    /// Per-type counters
    pub counters: SummaryCounters,
    /// Run duration
    pub duration_ms: i64,
}

/// One planned directory operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOp {
    /// Push a store row into the directory
    Add {
        /// Fingerprint of the row
        fingerprint: String,
    },
    /// Remove a directory entry with no backing row
    Delete {
        /// Fingerprint of the entry
        fingerprint: String,
    },
}

/// Pure diff for one type bucket. ADDs are the rows flagged unsynced plus
/// every store fingerprint missing from the directory (healing out-of-band
/// deletions of rows still marked synced); DELETEs are directory
/// fingerprints with no backing store row.
pub fn plan_operations(
    unsynced_fingerprints: &[String],
    store_fingerprints: &HashSet<String>,
    ldap_fingerprints: &HashSet<String>,
) -> Vec<PlannedOp> {
    let mut ops = Vec::new();
    let mut queued: HashSet<&String> = HashSet::new();
    for fp in unsynced_fingerprints {
        if queued.insert(fp) {
            ops.push(PlannedOp::Add {
                fingerprint: fp.clone(),
            });
        }
    }

    let mut healed: Vec<&String> = store_fingerprints
        .iter()
        .filter(|fp| !ldap_fingerprints.contains(*fp) && !queued.contains(*fp))
        .collect();
    healed.sort();
    for fp in healed {
        ops.push(PlannedOp::Add {
            fingerprint: fp.clone(),
        });
    }

    let mut deletes: Vec<&String> = ldap_fingerprints.difference(store_fingerprints).collect();
    deletes.sort();
    for fp in deletes {
        ops.push(PlannedOp::Delete {
            fingerprint: fp.clone(),
        });
    }
    ops
}

/// DB vs directory counts for one type
#[derive(Debug, Clone, serde::Serialize)]
pub struct TypeDiscrepancy {
    /// Type bucket (CSCA, DSC, DSC_NC, MLSC, CRL)
    pub cert_type: String,
    /// Store row count
    pub db_count: i64,
    /// Directory entry count
    pub ldap_count: i64,
    /// Absolute difference
    pub discrepancy: i64,
}

/// Result of a sync-status check
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncStatus {
    /// Per-type counts and differences
    pub types: Vec<TypeDiscrepancy>,
    /// Sum of per-type discrepancies
    pub total_discrepancy: i64,
    /// `SYNC_REQUIRED` when any discrepancy is non-zero, else `OK`
    pub status: String,
}

impl Reconciler {
    /// Assemble the engine
    pub fn new(store: Store, directory: Arc<dyn Directory>, concurrency: usize) -> Self {
        Self {
            store,
            directory,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one reconciliation. `dry_run` stages and logs every operation
    /// as SKIP without touching the directory.
    pub async fn run(
        &self,
        triggered_by: &str,
        dry_run: bool,
        shutdown: Option<&tokio::sync::watch::Receiver<bool>>,
    ) -> Result<ReconcileOutcome> {
        let started = std::time::Instant::now();
        let summary_id = self.store.reconciliation.create_summary(triggered_by, dry_run).await?;
        tracing::info!(
            "reconciliation {summary_id} started (triggered by {triggered_by}, dry_run={dry_run})"
        );

        let mut counters = SummaryCounters::default();
        let mut aborted = false;

        for cert_type in RECONCILED_TYPES {
            if shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
                tracing::warn!("reconciliation {summary_id}: shutdown between types");
                aborted = true;
                break;
            }
            if let Err(e) = self
                .reconcile_certificates(summary_id, cert_type, dry_run, &mut counters)
                .await
            {
                tracing::error!("reconciliation {summary_id}: {cert_type} bucket failed: {e}");
                counters.failed += 1;
            }
        }

        if !aborted && !shutdown.map(|rx| *rx.borrow()).unwrap_or(false) {
            if let Err(e) = self
                .reconcile_crls(summary_id, dry_run, &mut counters)
                .await
            {
                tracing::error!("reconciliation {summary_id}: CRL bucket failed: {e}");
                counters.failed += 1;
            }
        }

        let duration_ms = started.elapsed().as_millis() as i64;
        let status = if aborted {
            ReconcileStatus::Partial
        } else if counters.failed == 0 {
            ReconcileStatus::Completed
        } else if counters.success > 0 {
            ReconcileStatus::Partial
        } else {
            ReconcileStatus::Failed
        };

        self.store
            .reconciliation
            .complete_summary(summary_id, status, &counters, duration_ms, None)
            .await?;
        tracing::info!(
            "reconciliation {summary_id} {status}: +{} certs, {} deletes, {} ok, {} failed, {duration_ms}ms",
            counters.csca_added + counters.dsc_added + counters.dsc_nc_added + counters.mlsc_added
                + counters.crl_added,
            counters.csca_deleted + counters.dsc_deleted + counters.dsc_nc_deleted
                + counters.mlsc_deleted + counters.crl_deleted,
            counters.success,
            counters.failed
        );

        Ok(ReconcileOutcome {
            summary_id,
            status,
            counters,
            duration_ms,
        })
    }

    fn bump(counters: &mut SummaryCounters, cert_type: CertType, added: bool) {
        let slot = match (cert_type, added) {
            (CertType::Csca | CertType::LinkCert, true) => &mut counters.csca_added,
            (CertType::Csca | CertType::LinkCert, false) => &mut counters.csca_deleted,
            (CertType::Dsc, true) => &mut counters.dsc_added,
            (CertType::Dsc, false) => &mut counters.dsc_deleted,
            (CertType::DscNc, true) => &mut counters.dsc_nc_added,
            (CertType::DscNc, false) => &mut counters.dsc_nc_deleted,
            (CertType::Mlsc, true) => &mut counters.mlsc_added,
            (CertType::Mlsc, false) => &mut counters.mlsc_deleted,
        };
        *slot += 1;
    }

    /// Stored DB rows say CSCA for both roots and link certs; the DER
    /// decides which OU the directory entry belongs to.
    fn effective_type(row: &CertificateRow) -> CertType {
        match row.cert_type.as_str() {
            "CSCA" => {
                if crate::x509::dn::equals(&row.subject_dn, &row.issuer_dn) {
                    CertType::Csca
                } else {
                    CertType::LinkCert
                }
            }
            "DSC_NC" => CertType::DscNc,
            "MLSC" => CertType::Mlsc,
            _ => CertType::Dsc,
        }
    }

    async fn reconcile_certificates(
        &self,
        summary_id: Uuid,
        cert_type: CertType,
        dry_run: bool,
        counters: &mut SummaryCounters,
    ) -> Result<()> {
        let db_type = cert_type.db_type();

        let unsynced = self.store.certificates.find_unsynced(db_type, BATCH_LIMIT).await?;
        let store_fps: HashSet<String> = self
            .store
            .certificates
            .fingerprints_by_type(db_type)
            .await?
            .into_iter()
            .collect();
        let mut ldap_entries = self.directory.list_fingerprints(cert_type).await?;
        if cert_type == CertType::Csca {
            // Link certs share the CSCA bucket in the store
            ldap_entries.extend(self.directory.list_fingerprints(CertType::LinkCert).await?);
        }
        let ldap_fps: HashSet<String> = ldap_entries.keys().cloned().collect();

        let unsynced_fps: Vec<String> = unsynced
            .iter()
            .map(|row| row.fingerprint_sha256.clone())
            .collect();
        let ops = plan_operations(&unsynced_fps, &store_fps, &ldap_fps);
        tracing::info!(
            "reconcile {db_type}: {} operation(s) planned ({} store fp(s), {} directory fp(s))",
            ops.len(),
            store_fps.len(),
            ldap_fps.len()
        );

        // Resolve planned ADDs to rows (healed ones come back by lookup)
        // and planned DELETEs to entry DNs.
        let mut rows_by_fp: std::collections::HashMap<String, CertificateRow> = unsynced
            .into_iter()
            .map(|row| (row.fingerprint_sha256.clone(), row))
            .collect();
        let mut add_rows = Vec::new();
        let mut delete_targets: Vec<(String, String)> = Vec::new();
        for op in ops {
            match op {
                PlannedOp::Add { fingerprint } => match rows_by_fp.remove(&fingerprint) {
                    Some(row) => add_rows.push(row),
                    None => {
                        if let Some(row) =
                            self.store.certificates.find_by_fingerprint(&fingerprint).await?
                        {
                            tracing::info!(
                                "reconcile {db_type}: {fingerprint} missing from directory, re-adding"
                            );
                            add_rows.push(row);
                        }
                    }
                },
                PlannedOp::Delete { fingerprint } => {
                    if let Some(entry_dn) = ldap_entries.get(&fingerprint) {
                        delete_targets.push((fingerprint, entry_dn.clone()));
                    }
                }
            }
        }

        // ADD phase, bounded concurrency per type
        let results: Vec<(CertificateRow, Result<String>)> = stream::iter(add_rows)
            .map(|row| {
                let directory = self.directory.clone();
                async move {
                    if dry_run {
                        return (row, Err(PkdError::Other("dry-run".to_string())));
                    }
                    let entry_type = Self::effective_type(&row);
                    let result = directory
                        .store_certificate(&CertificateEntry {
                            cert_type: entry_type,
                            country_code: row.country_code.clone(),
                            subject_dn: row.subject_dn.clone(),
                            serial_number: row.serial_number.clone(),
                            fingerprint_sha256: row.fingerprint_sha256.clone(),
                            der_bytes: crate::crl::decode_bytea_relaxed(&row.der_bytes),
                            conformance_code: None,
                            conformance_text: None,
                            pkd_version: None,
                            use_legacy_dn: false,
                        })
                        .await;
                    (row, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (row, result) in results {
            let entry_type = Self::effective_type(&row);
            if dry_run {
                self.store
                    .reconciliation
                    .log_operation(
                        summary_id,
                        &row.fingerprint_sha256,
                        db_type,
                        &row.country_code,
                        ReconcileOp::Skip,
                        true,
                        None,
                    )
                    .await?;
                continue;
            }
            match result {
                Ok(ldap_dn) => {
                    self.store
                        .certificates
                        .mark_stored_in_ldap(row.id, &ldap_dn)
                        .await?;
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            &row.fingerprint_sha256,
                            db_type,
                            &row.country_code,
                            ReconcileOp::SyncToLdap,
                            true,
                            None,
                        )
                        .await?;
                    Self::bump(counters, entry_type, true);
                    counters.success += 1;
                }
                Err(e) => {
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            &row.fingerprint_sha256,
                            db_type,
                            &row.country_code,
                            ReconcileOp::SyncToLdap,
                            false,
                            Some(&short_error(&e)),
                        )
                        .await?;
                    counters.failed += 1;
                }
            }
        }

        // DELETE phase: directory entries with no backing store row
        for (fp, entry_dn) in &delete_targets {
            if dry_run {
                self.store
                    .reconciliation
                    .log_operation(
                        summary_id,
                        fp,
                        db_type,
                        "",
                        ReconcileOp::Skip,
                        true,
                        None,
                    )
                    .await?;
                continue;
            }
            match self.directory.delete_entry(entry_dn).await {
                Ok(()) => {
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            fp,
                            db_type,
                            "",
                            ReconcileOp::DeleteFromLdap,
                            true,
                            None,
                        )
                        .await?;
                    Self::bump(counters, cert_type, false);
                    counters.success += 1;
                }
                Err(e) => {
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            fp,
                            db_type,
                            "",
                            ReconcileOp::DeleteFromLdap,
                            false,
                            Some(&short_error(&e)),
                        )
                        .await?;
                    counters.failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn reconcile_crls(
        &self,
        summary_id: Uuid,
        dry_run: bool,
        counters: &mut SummaryCounters,
    ) -> Result<()> {
        let unsynced = self.store.crls.find_unsynced(BATCH_LIMIT).await?;
        let store_fps: HashSet<String> = self.store.crls.fingerprints().await?.into_iter().collect();
        let ldap_entries = self.directory.list_crl_fingerprints().await?;
        let ldap_fps: HashSet<String> = ldap_entries.keys().cloned().collect();

        let unsynced_fps: Vec<String> = unsynced
            .iter()
            .map(|row| row.fingerprint_sha256.clone())
            .collect();
        let ops = plan_operations(&unsynced_fps, &store_fps, &ldap_fps);
        tracing::info!(
            "reconcile CRL: {} operation(s) planned ({} store fp(s), {} directory fp(s))",
            ops.len(),
            store_fps.len(),
            ldap_fps.len()
        );

        let mut rows_by_fp: std::collections::HashMap<String, crate::store::CrlRow> = unsynced
            .into_iter()
            .map(|row| (row.fingerprint_sha256.clone(), row))
            .collect();
        let mut add_rows = Vec::new();
        let mut delete_targets: Vec<(String, String)> = Vec::new();
        for op in ops {
            match op {
                PlannedOp::Add { fingerprint } => match rows_by_fp.remove(&fingerprint) {
                    Some(row) => add_rows.push(row),
                    None => {
                        if let Some(row) = self.store.crls.find_by_fingerprint(&fingerprint).await?
                        {
                            tracing::info!(
                                "reconcile CRL: {fingerprint} missing from directory, re-adding"
                            );
                            add_rows.push(row);
                        }
                    }
                },
                PlannedOp::Delete { fingerprint } => {
                    if let Some(entry_dn) = ldap_entries.get(&fingerprint) {
                        delete_targets.push((fingerprint, entry_dn.clone()));
                    }
                }
            }
        }

        for row in add_rows {
            if dry_run {
                self.store
                    .reconciliation
                    .log_operation(
                        summary_id,
                        &row.fingerprint_sha256,
                        "CRL",
                        &row.country_code,
                        ReconcileOp::Skip,
                        true,
                        None,
                    )
                    .await?;
                continue;
            }
            let der = crate::crl::decode_bytea_relaxed(&row.der_bytes);
            match self
                .directory
                .store_crl(&row.country_code, &row.fingerprint_sha256, &der)
                .await
            {
                Ok(ldap_dn) => {
                    self.store.crls.mark_stored_in_ldap(row.id, &ldap_dn).await?;
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            &row.fingerprint_sha256,
                            "CRL",
                            &row.country_code,
                            ReconcileOp::SyncToLdap,
                            true,
                            None,
                        )
                        .await?;
                    counters.crl_added += 1;
                    counters.success += 1;
                }
                Err(e) => {
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            &row.fingerprint_sha256,
                            "CRL",
                            &row.country_code,
                            ReconcileOp::SyncToLdap,
                            false,
                            Some(&short_error(&e)),
                        )
                        .await?;
                    counters.failed += 1;
                }
            }
        }

        for (fp, entry_dn) in &delete_targets {
            if dry_run {
                self.store
                    .reconciliation
                    .log_operation(summary_id, fp, "CRL", "", ReconcileOp::Skip, true, None)
                    .await?;
                continue;
            }
            match self.directory.delete_entry(entry_dn).await {
                Ok(()) => {
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            fp,
                            "CRL",
                            "",
                            ReconcileOp::DeleteFromLdap,
                            true,
                            None,
                        )
                        .await?;
                    counters.crl_deleted += 1;
                    counters.success += 1;
                }
                Err(e) => {
                    self.store
                        .reconciliation
                        .log_operation(
                            summary_id,
                            fp,
                            "CRL",
                            "",
                            ReconcileOp::DeleteFromLdap,
                            false,
                            Some(&short_error(&e)),
                        )
                        .await?;
                    counters.failed += 1;
                }
            }
        }

        Ok(())
    }

    /// DB vs directory counts per type, without mutating anything
    pub async fn sync_status(&self) -> Result<SyncStatus> {
        let db_counts: HashMap<String, i64> =
            self.store.certificates.counts_by_type().await?.into_iter().collect();
        let ldap_counts = self.directory.counts_by_type().await?;
        let crl_db = self.store.crls.count().await?;

        let mut types = Vec::new();
        let mut total = 0i64;
        for key in ["CSCA", "DSC", "DSC_NC", "MLSC"] {
            let db = *db_counts.get(key).unwrap_or(&0);
            let ldap = *ldap_counts.get(key).unwrap_or(&0);
            let diff = (db - ldap).abs();
            total += diff;
            types.push(TypeDiscrepancy {
                cert_type: key.to_string(),
                db_count: db,
                ldap_count: ldap,
                discrepancy: diff,
            });
        }
        let crl_ldap = *ldap_counts.get("CRL").unwrap_or(&0);
        let crl_diff = (crl_db - crl_ldap).abs();
        total += crl_diff;
        types.push(TypeDiscrepancy {
            cert_type: "CRL".to_string(),
            db_count: crl_db,
            ldap_count: crl_ldap,
            discrepancy: crl_diff,
        });

        Ok(SyncStatus {
            types,
            total_discrepancy: total,
            status: if total > 0 {
                "SYNC_REQUIRED".to_string()
            } else {
                "OK".to_string()
            },
        })
    }

    /// Periodic driver: one run every `interval`, until `shutdown` flips
    pub async fn run_periodic(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run("scheduler", false, Some(&shutdown)).await {
                        tracing::error!("periodic reconciliation failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("reconciler shutting down");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_add_and_delete_sets() {
        let unsynced = vec!["aa".to_string(), "bb".to_string()];
        let store: HashSet<String> = ["aa", "bb", "cc"].iter().map(|s| s.to_string()).collect();
        let ldap: HashSet<String> = ["cc", "dd"].iter().map(|s| s.to_string()).collect();

        let ops = plan_operations(&unsynced, &store, &ldap);
        assert!(ops.contains(&PlannedOp::Add { fingerprint: "aa".into() }));
        assert!(ops.contains(&PlannedOp::Add { fingerprint: "bb".into() }));
        assert!(ops.contains(&PlannedOp::Delete { fingerprint: "dd".into() }));
        assert!(!ops.iter().any(|op| matches!(op, PlannedOp::Delete { fingerprint } if fingerprint == "cc")));
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn plan_heals_synced_row_missing_from_directory() {
        // "bb" is marked synced in the store but its entry vanished
        let store: HashSet<String> = ["aa", "bb"].iter().map(|s| s.to_string()).collect();
        let ldap: HashSet<String> = ["aa"].iter().map(|s| s.to_string()).collect();

        let ops = plan_operations(&[], &store, &ldap);
        assert_eq!(ops, vec![PlannedOp::Add { fingerprint: "bb".into() }]);
    }

    #[test]
    fn plan_does_not_queue_an_unsynced_row_twice() {
        // "aa" is both flagged unsynced and absent from the directory
        let unsynced = vec!["aa".to_string()];
        let store: HashSet<String> = ["aa"].iter().map(|s| s.to_string()).collect();
        let ldap: HashSet<String> = HashSet::new();

        let ops = plan_operations(&unsynced, &store, &ldap);
        assert_eq!(ops, vec![PlannedOp::Add { fingerprint: "aa".into() }]);
    }

    #[test]
    fn plan_is_empty_on_synced_state() {
        let store: HashSet<String> = ["aa"].iter().map(|s| s.to_string()).collect();
        let ldap = store.clone();
        assert!(plan_operations(&[], &store, &ldap).is_empty());
    }
}
