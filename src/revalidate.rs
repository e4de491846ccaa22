// Copyright (c) 2025 - Cowboy AI, LLC.

//! Re-validation of persisted certificates
//!
//! When a later upload supplies a previously missing CSCA, chains that
//! ended PENDING (or INVALID on a key mismatch) can now complete. The
//! revalidator rebuilds those chains on a periodic tick and after every
//! successful bulk ingest. Transitions are deliberately narrow:
//! PENDING -> {VALID, EXPIRED_VALID, INVALID} and INVALID -> VALID.
//! A separate sweep refreshes the expiry flag on stored results whose
//! notAfter has passed since the last scan.

use crate::chain;
use crate::error::Result;
use crate::store::Store;
use crate::types::ValidationStatus;
use chrono::Utc;
use std::time::Duration;

/// Upper bound on certificates examined per pass
const REVALIDATION_BATCH: i64 = 50_000;

/// Outcome of one revalidation pass
#[derive(Debug, Clone, Default)]
pub struct RevalidationOutcome {
    /// Certificates examined
    pub total_processed: u32,
    /// Now VALID
    pub valid: u32,
    /// Now EXPIRED_VALID
    pub expired_valid: u32,
    /// Now INVALID
    pub invalid: u32,
    /// Still PENDING
    pub pending: u32,
    /// Errors during rebuild
    pub error: u32,
    /// Rows touched by the expiry sweep
    pub expiry_swept: u64,
    /// Pass duration
    pub duration_ms: i64,
}

/// The revalidator engine
pub struct Revalidator {
    store: Store,
}

impl Revalidator {
    /// Assemble over the store
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Whether the recorded transition is one the revalidator may make.
    /// INVALID promotes only to VALID (a recovered key match); an expired
    /// chain does not resurrect an INVALID verdict.
    fn transition_allowed(from: ValidationStatus, to: ValidationStatus) -> bool {
        matches!(
            (from, to),
            (ValidationStatus::Pending, ValidationStatus::Valid)
                | (ValidationStatus::Pending, ValidationStatus::ExpiredValid)
                | (ValidationStatus::Pending, ValidationStatus::Invalid)
                | (ValidationStatus::Invalid, ValidationStatus::Valid)
        )
    }

    /// One full pass: rebuild unresolved chains, then sweep expiry flags
    pub async fn run(&self) -> Result<RevalidationOutcome> {
        let started = std::time::Instant::now();
        let now = Utc::now();
        let mut outcome = RevalidationOutcome::default();

        let candidates = self
            .store
            .certificates
            .find_for_revalidation(REVALIDATION_BATCH)
            .await?;
        tracing::info!("revalidation: {} candidate certificate(s)", candidates.len());

        for row in candidates {
            outcome.total_processed += 1;
            let Some(previous) = ValidationStatus::parse(&row.validation_status) else {
                outcome.error += 1;
                continue;
            };

            let der = crate::crl::decode_bytea_relaxed(&row.der_bytes);
            let label = "DSC";
            let result = match chain::build_chain(&der, label, &self.store.certificates, now).await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("revalidation: {} unparseable: {e}", row.fingerprint_sha256);
                    outcome.error += 1;
                    continue;
                }
            };

            match result.status {
                ValidationStatus::Valid => outcome.valid += 1,
                ValidationStatus::ExpiredValid => outcome.expired_valid += 1,
                ValidationStatus::Invalid => outcome.invalid += 1,
                ValidationStatus::Pending => outcome.pending += 1,
                ValidationStatus::Error => outcome.error += 1,
            }

            if result.status == previous || !Self::transition_allowed(previous, result.status) {
                continue;
            }

            let error_code = match result.status {
                ValidationStatus::Pending => Some("CSCA_NOT_FOUND"),
                ValidationStatus::Invalid => Some("SIGNATURE_KEY_MISMATCH"),
                _ => None,
            };
            self.store
                .validations
                .update_revalidation(
                    row.id,
                    result.status,
                    result.trust_chain_valid,
                    result.csca_found,
                    result.signature_verified,
                    Some(result.path.as_str()),
                    result.csca_subject_dn.as_deref(),
                    error_code,
                )
                .await?;
            self.store
                .certificates
                .update_validation_status(row.id, result.status)
                .await?;
            tracing::info!(
                "revalidation: {} {} -> {}",
                row.fingerprint_sha256,
                previous,
                result.status
            );
        }

        outcome.expiry_swept = self.store.validations.sweep_expired(now).await?;
        outcome.duration_ms = started.elapsed().as_millis() as i64;

        tracing::info!(
            "revalidation complete: processed={}, valid={}, expired_valid={}, invalid={}, pending={}, error={}, swept={} ({}ms)",
            outcome.total_processed,
            outcome.valid,
            outcome.expired_valid,
            outcome.invalid,
            outcome.pending,
            outcome.error,
            outcome.expiry_swept,
            outcome.duration_ms
        );
        Ok(outcome)
    }

    /// Periodic driver: one pass every `interval`, until `shutdown` flips
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
                    if let Err(e) = self.run().await {
                        tracing::error!("periodic revalidation failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("revalidator shutting down");
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
    fn transition_rules_are_narrow() {
        use ValidationStatus::*;
        assert!(Revalidator::transition_allowed(Pending, Valid));
        assert!(Revalidator::transition_allowed(Pending, ExpiredValid));
        assert!(Revalidator::transition_allowed(Pending, Invalid));
        assert!(Revalidator::transition_allowed(Invalid, Valid));
        // Exactly the four legal transitions; everything else stays put
        assert!(!Revalidator::transition_allowed(Invalid, ExpiredValid));
        assert!(!Revalidator::transition_allowed(Invalid, Pending));
        assert!(!Revalidator::transition_allowed(Valid, Invalid));
        assert!(!Revalidator::transition_allowed(Valid, Pending));
        assert!(!Revalidator::transition_allowed(ExpiredValid, Valid));
        assert!(!Revalidator::transition_allowed(ExpiredValid, Invalid));
    }
}
