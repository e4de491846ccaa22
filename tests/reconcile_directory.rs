// Copyright (c) 2025 - Cowboy AI, LLC.

//! Reconciler control-loop logic against an in-memory directory fake:
//! the same planner the engine runs (`plan_operations`) drives ADD, heal,
//! and DELETE decisions, and applying a plan converges the directory on
//! the store.

mod common;

use common::*;
use icao_pkd::ldap::{CertificateEntry, Directory};
use icao_pkd::reconcile::{plan_operations, PlannedOp};
use icao_pkd::types::CertType;
use std::collections::HashSet;

fn fp(n: u8) -> String {
    format!("{:064x}", n)
}

fn entry(fingerprint: &str) -> CertificateEntry {
    CertificateEntry {
        cert_type: CertType::Dsc,
        country_code: "KR".to_string(),
        subject_dn: format!("CN=DS {fingerprint},C=KR"),
        serial_number: "01".to_string(),
        fingerprint_sha256: fingerprint.to_string(),
        der_bytes: vec![0x30, 0x00],
        conformance_code: None,
        conformance_text: None,
        pkd_version: None,
        use_legacy_dn: false,
    }
}

/// One planner round against the fake: execute ADDs and DELETEs, return
/// how many of each ran.
async fn apply_plan(
    directory: &MemoryDirectory,
    unsynced: &[String],
    store_fps: &HashSet<String>,
) -> (usize, usize) {
    let ldap = directory.list_fingerprints(CertType::Dsc).await.unwrap();
    let ldap_fps: HashSet<String> = ldap.keys().cloned().collect();
    let ops = plan_operations(unsynced, store_fps, &ldap_fps);

    let mut added = 0;
    let mut deleted = 0;
    for op in ops {
        match op {
            PlannedOp::Add { fingerprint } => {
                directory.store_certificate(&entry(&fingerprint)).await.unwrap();
                added += 1;
            }
            PlannedOp::Delete { fingerprint } => {
                let dn = ldap.get(&fingerprint).expect("planned delete has an entry");
                directory.delete_entry(dn).await.unwrap();
                deleted += 1;
            }
        }
    }
    (added, deleted)
}

#[tokio::test]
async fn adds_converge_and_second_run_is_a_noop() {
    let directory = MemoryDirectory::new();
    let store_fps: HashSet<String> = [fp(1), fp(2), fp(3)].into_iter().collect();
    let unsynced: Vec<String> = store_fps.iter().cloned().collect();

    let (added, deleted) = apply_plan(&directory, &unsynced, &store_fps).await;
    assert_eq!(added, 3);
    assert_eq!(deleted, 0);
    for f in &store_fps {
        assert!(directory.contains_fingerprint(f));
    }

    // Back-to-back run on the already-synced state plans nothing
    let (added, deleted) = apply_plan(&directory, &[], &store_fps).await;
    assert_eq!((added, deleted), (0, 0));
    assert_eq!(directory.len(), 3);
}

#[tokio::test]
async fn heals_an_out_of_band_directory_deletion() {
    let directory = MemoryDirectory::new();
    let store_fps: HashSet<String> = [fp(1), fp(2)].into_iter().collect();
    let unsynced: Vec<String> = store_fps.iter().cloned().collect();
    apply_plan(&directory, &unsynced, &store_fps).await;

    // An admin deletes one DSC entry behind the system's back; the store
    // still says stored_in_ldap for it, so the unsynced list is empty.
    assert!(directory.remove_by_fingerprint(&fp(1)));
    assert!(!directory.contains_fingerprint(&fp(1)));

    let (added, deleted) = apply_plan(&directory, &[], &store_fps).await;
    assert_eq!(added, 1);
    assert_eq!(deleted, 0);
    assert!(directory.contains_fingerprint(&fp(1)));

    // Converged again
    let (added, deleted) = apply_plan(&directory, &[], &store_fps).await;
    assert_eq!((added, deleted), (0, 0));
}

#[tokio::test]
async fn orphan_directory_entries_are_deleted() {
    let directory = MemoryDirectory::new();
    let store_fps: HashSet<String> = [fp(1)].into_iter().collect();
    apply_plan(&directory, &[fp(1)], &store_fps).await;

    // An entry whose store row was removed: fingerprint unknown to the store
    directory.store_certificate(&entry(&fp(9))).await.unwrap();
    assert_eq!(directory.len(), 2);

    let (added, deleted) = apply_plan(&directory, &[], &store_fps).await;
    assert_eq!(added, 0);
    assert_eq!(deleted, 1);
    assert!(!directory.contains_fingerprint(&fp(9)));
    assert!(directory.contains_fingerprint(&fp(1)));
}

#[tokio::test]
async fn planning_alone_leaves_the_directory_untouched() {
    // Dry-run shape: compute the plan, apply nothing
    let directory = MemoryDirectory::new();
    directory.store_certificate(&entry(&fp(9))).await.unwrap();

    let store_fps: HashSet<String> = [fp(1)].into_iter().collect();
    let ldap = directory.list_fingerprints(CertType::Dsc).await.unwrap();
    let ldap_fps: HashSet<String> = ldap.keys().cloned().collect();

    let ops = plan_operations(&[fp(1)], &store_fps, &ldap_fps);
    assert_eq!(ops.len(), 2); // one ADD, one DELETE
    assert!(ops.contains(&PlannedOp::Add { fingerprint: fp(1) }));
    assert!(ops.contains(&PlannedOp::Delete { fingerprint: fp(9) }));

    // Nothing was applied
    assert_eq!(directory.len(), 1);
    assert!(directory.contains_fingerprint(&fp(9)));
    assert!(!directory.contains_fingerprint(&fp(1)));
}

#[tokio::test]
async fn fake_directory_buckets_types_and_crls_separately() {
    let directory = MemoryDirectory::new();
    let mut csca = entry(&fp(1));
    csca.cert_type = CertType::Csca;
    directory.store_certificate(&csca).await.unwrap();
    directory.store_certificate(&entry(&fp(2))).await.unwrap();
    directory.store_crl("KR", &fp(3), &[0x30, 0x00]).await.unwrap();

    let dscs = directory.list_fingerprints(CertType::Dsc).await.unwrap();
    assert_eq!(dscs.len(), 1);
    assert!(dscs.contains_key(&fp(2)));

    let crls = directory.list_crl_fingerprints().await.unwrap();
    assert_eq!(crls.len(), 1);
    assert!(crls.contains_key(&fp(3)));

    let counts = directory.counts_by_type().await.unwrap();
    assert_eq!(counts.get("CSCA"), Some(&1));
    assert_eq!(counts.get("DSC"), Some(&1));
    assert_eq!(counts.get("CRL"), Some(&1));
}
