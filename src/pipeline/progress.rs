// Copyright (c) 2025 - Cowboy AI, LLC.

//! Per-upload progress tracking and fan-out
//!
//! Process-wide, keyed by upload id. Subscribers attach to a watch channel:
//! they see the current snapshot immediately and every update thereafter,
//! with newest-wins coalescing: a slow subscriber never queues more than
//! one pending snapshot.

use crate::types::UploadId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::watch;

/// Bounded length of the recent per-certificate log ring
const RECENT_RING: usize = 50;

/// Pipeline stage reported to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingStage {
    /// Bytes received
    Uploaded,
    /// Parsing the bundle
    Parsing,
    /// Per-entry validation running
    ValidationInProgress,
    /// Validation finished
    ValidationCompleted,
    /// Persisting to the relational store
    DbSaving,
    /// Writing directory entries
    LdapSaving,
    /// Upload fully processed
    Completed,
    /// Upload failed
    Failed,
}

/// One row of the recent-certificate log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertLogRow {
    /// SHA-256 fingerprint prefix
    pub fingerprint: String,
    /// Certificate type
    pub cert_type: String,
    /// Country
    pub country_code: String,
    /// Validation outcome
    pub status: String,
    /// Short message
    pub message: String,
}

/// Accumulated statistics for one upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationStatistics {
    /// Certificates processed
    pub processed: u32,
    /// VALID outcomes
    pub valid: u32,
    /// EXPIRED_VALID outcomes
    pub expired_valid: u32,
    /// INVALID outcomes
    pub invalid: u32,
    /// PENDING outcomes
    pub pending: u32,
    /// ERROR outcomes
    pub error: u32,
    /// Duplicate sightings
    pub duplicates: u32,
    /// Histogram by signature algorithm
    pub by_signature_algorithm: BTreeMap<String, u32>,
    /// Histogram by key size (algorithm/bits)
    pub by_key_size: BTreeMap<String, u32>,
    /// CONFORMANT count
    pub conformant: u32,
    /// WARNING count
    pub warning: u32,
    /// NON_CONFORMANT count
    pub non_conformant: u32,
    /// Bounded ring of recent per-certificate rows
    pub recent: VecDeque<CertLogRow>,
}

impl ValidationStatistics {
    /// Append a per-certificate row, keeping the ring bounded
    pub fn push_recent(&mut self, row: CertLogRow) {
        if self.recent.len() == RECENT_RING {
            self.recent.pop_front();
        }
        self.recent.push_back(row);
    }
}

/// Snapshot delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgress {
    /// Upload this snapshot belongs to
    pub upload_id: UploadId,
    /// Current stage
    pub stage: ProcessingStage,
    /// Entries processed
    pub current: u32,
    /// Total entries (0 while unknown)
    pub total: u32,
    /// Last human-readable message
    pub message: String,
    /// Accumulated statistics
    pub stats: ValidationStatistics,
}

impl UploadProgress {
    fn new(upload_id: UploadId) -> Self {
        Self {
            upload_id,
            stage: ProcessingStage::Uploaded,
            current: 0,
            total: 0,
            message: String::new(),
            stats: ValidationStatistics::default(),
        }
    }
}

/// Process-wide progress registry
#[derive(Default)]
pub struct ProgressManager {
    slots: Mutex<HashMap<UploadId, watch::Sender<UploadProgress>>>,
}

impl ProgressManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, upload_id: UploadId) -> watch::Sender<UploadProgress> {
        let mut slots = self.slots.lock().expect("progress registry poisoned");
        slots
            .entry(upload_id)
            .or_insert_with(|| watch::channel(UploadProgress::new(upload_id)).0)
            .clone()
    }

    /// Mutate the snapshot for an upload and fan out to subscribers
    pub fn update(&self, upload_id: UploadId, mutate: impl FnOnce(&mut UploadProgress)) {
        self.sender(upload_id).send_modify(mutate);
    }

    /// Convenience: set stage, counts, and message in one update
    pub fn report(
        &self,
        upload_id: UploadId,
        stage: ProcessingStage,
        current: u32,
        total: u32,
        message: impl Into<String>,
    ) {
        let message = message.into();
        self.update(upload_id, move |p| {
            p.stage = stage;
            p.current = current;
            p.total = total;
            p.message = message;
        });
    }

    /// Subscribe; the receiver sees the current snapshot immediately
    pub fn subscribe(&self, upload_id: UploadId) -> watch::Receiver<UploadProgress> {
        self.sender(upload_id).subscribe()
    }

    /// Current snapshot without subscribing
    pub fn snapshot(&self, upload_id: UploadId) -> Option<UploadProgress> {
        let slots = self.slots.lock().expect("progress registry poisoned");
        slots.get(&upload_id).map(|tx| tx.borrow().clone())
    }

    /// Drop the slot once the upload reaches a terminal state
    pub fn remove(&self, upload_id: UploadId) {
        let mut slots = self.slots.lock().expect("progress registry poisoned");
        slots.remove(&upload_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_current_snapshot_on_attach() {
        let manager = ProgressManager::new();
        let id = UploadId::new();
        manager.report(id, ProcessingStage::Parsing, 3, 10, "parsing");

        let rx = manager.subscribe(id);
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.stage, ProcessingStage::Parsing);
        assert_eq!(snapshot.current, 3);
        assert_eq!(snapshot.total, 10);
    }

    #[tokio::test]
    async fn slow_subscriber_coalesces_to_newest() {
        let manager = ProgressManager::new();
        let id = UploadId::new();
        let mut rx = manager.subscribe(id);

        for i in 1..=100u32 {
            manager.report(id, ProcessingStage::ValidationInProgress, i, 100, "");
        }

        rx.changed().await.expect("sender alive");
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.current, 100);
    }

    #[tokio::test]
    async fn updates_are_monotonic_per_upload() {
        let manager = ProgressManager::new();
        let id = UploadId::new();
        let mut last = 0;
        for i in [1u32, 5, 9, 42] {
            manager.report(id, ProcessingStage::ValidationInProgress, i, 50, "");
            let snap = manager.snapshot(id).expect("slot exists");
            assert!(snap.current >= last);
            last = snap.current;
        }
    }

    #[test]
    fn recent_ring_is_bounded() {
        let mut stats = ValidationStatistics::default();
        for i in 0..200 {
            stats.push_recent(CertLogRow {
                fingerprint: format!("{i}"),
                cert_type: "DSC".into(),
                country_code: "KR".into(),
                status: "VALID".into(),
                message: String::new(),
            });
        }
        assert_eq!(stats.recent.len(), RECENT_RING);
        assert_eq!(stats.recent.front().map(|r| r.fingerprint.as_str()), Some("150"));
    }
}
