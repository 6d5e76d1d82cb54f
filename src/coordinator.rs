//! Two-phase registration coordinator.
//!
//! Orchestrates issuer, asset store, metadata store, and registry into one
//! registration call:
//!
//! ```text
//! Init -> AssetStaged (optional) -> MetadataStaged
//!      -> RegistryCommitAttempted -> Finalized | Abandoned
//! ```
//!
//! The provisional metadata write always precedes the registry commit, so a
//! crash before the commit leaves a reconcilable Pending record and a crash
//! before the provisional write loses nothing that was committed.  Failure
//! policy is fail closed: a rejected or timed-out commit marks the record
//! Failed and permanently discards the attempt's tokens — their fate on the
//! ledger is unknown, and reuse could strand or double-claim them.  The
//! resolver's registry-authority rule keeps this conservatism safe on the
//! read path.

use std::collections::BTreeMap;

use tracing::{error, info, warn};

use crate::assets::AssetStore;
use crate::error::{Result, VeritagError};
use crate::issuer::TokenIssuer;
use crate::registry::{AuthenticityRegistry, BatchInput, CommitReceipt};
use crate::store::{MetadataStore, ProvisionalBatch};
use crate::util;

/// Default bound on duplicate-token retries (fresh tokens each attempt).
pub const DEFAULT_MAX_DUPLICATE_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Intake shape for one registration (the upload/form collaborator's input).
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub name: String,
    pub quantity: usize,
    pub metadata: BTreeMap<String, String>,
    pub asset_bytes: Option<Vec<u8>>,
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub product_id: String,
    pub token_ids: Vec<String>,
    pub receipt: CommitReceipt,
    pub asset_ref: Option<String>,
}

/// Coordinator state machine phases, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPhase {
    Init,
    AssetStaged,
    MetadataStaged,
    RegistryCommitAttempted,
    Finalized,
    Abandoned,
}

/// Outcome of a crash-recovery sweep over Pending metadata records.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Products whose batch the registry holds in full: re-finalized.
    pub finalized: Vec<String>,
    /// Products with no trace in the registry: marked Failed.
    pub failed: Vec<String>,
    /// Products whose registry state contradicts batch atomicity.  Left
    /// Pending for manual inspection.
    pub inconsistent: Vec<String>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator<I, A, M, R> {
    issuer: I,
    assets: A,
    store: M,
    registry: R,
    manufacturer: String,
    max_duplicate_retries: u32,
}

impl<I, A, M, R> Coordinator<I, A, M, R>
where
    I: TokenIssuer,
    A: AssetStore,
    M: MetadataStore,
    R: AuthenticityRegistry,
{
    pub fn new(issuer: I, assets: A, store: M, registry: R, manufacturer: &str) -> Self {
        Self {
            issuer,
            assets,
            store,
            registry,
            manufacturer: manufacturer.to_string(),
            max_duplicate_retries: DEFAULT_MAX_DUPLICATE_RETRIES,
        }
    }

    pub fn with_max_duplicate_retries(mut self, retries: u32) -> Self {
        self.max_duplicate_retries = retries;
        self
    }

    /// Run one two-phase registration to a terminal state.
    pub fn register(&mut self, request: &RegistrationRequest) -> Result<RegistrationOutcome> {
        // Reject bad input before any side effect.
        util::validate_product_name(&request.name)?;
        if request.quantity == 0 {
            return Err(VeritagError::Validation(
                "quantity must be at least 1".into(),
            ));
        }

        let mut phase = RegistrationPhase::Init;

        // Asset staging is content-addressed, hence idempotent and safe to
        // retry before anything durable exists.
        let asset_ref = match &request.asset_bytes {
            Some(bytes) => {
                let hash = self.assets.put(bytes)?;
                phase = RegistrationPhase::AssetStaged;
                tracing::debug!(?phase, hash = %hash, "asset staged");
                Some(hash)
            }
            None => None,
        };

        let product_id = self.issuer.new_product_id();
        let mut attempt = 0u32;

        loop {
            let token_ids = self.issuer.issue(request.quantity)?;

            // Durable provisional record before the irreversible ledger call.
            // If this write fails, registration fails closed with nothing
            // committed anywhere.
            self.store.upsert_provisional(&ProvisionalBatch {
                product_id: product_id.clone(),
                name: request.name.clone(),
                manufacturer: self.manufacturer.clone(),
                metadata: request.metadata.clone(),
                asset_ref: asset_ref.clone(),
                token_ids: token_ids.clone(),
            })?;
            phase = RegistrationPhase::MetadataStaged;
            tracing::debug!(?phase, product_id = %product_id, "provisional record durable");

            let batch = BatchInput {
                product_id: product_id.clone(),
                token_ids: token_ids.clone(),
                name: request.name.clone(),
                compact_metadata: request.metadata.clone(),
                manufacturer: self.manufacturer.clone(),
            };
            phase = RegistrationPhase::RegistryCommitAttempted;
            tracing::debug!(?phase, product_id = %product_id, attempt, "submitting batch");

            match self.registry.register_batch(&batch) {
                Ok(receipt) => {
                    // The batch is authentic from this point on.  A failed
                    // finalize leaves a Pending record that the recovery
                    // sweep re-finalizes idempotently; the store may lag but
                    // the registry already answers truthfully.
                    if let Err(e) = self.store.finalize(&product_id, &receipt) {
                        warn!(
                            product_id = %product_id,
                            error = %e,
                            "commit succeeded but finalize failed; record stays pending until recovery"
                        );
                    }
                    phase = RegistrationPhase::Finalized;
                    info!(
                        product_id = %product_id,
                        seq = receipt.seq,
                        tokens = token_ids.len(),
                        phase = ?phase,
                        "registration finalized"
                    );
                    return Ok(RegistrationOutcome {
                        product_id,
                        token_ids,
                        receipt,
                        asset_ref,
                    });
                }

                Err(VeritagError::DuplicateToken(t)) => {
                    // Issuer collision or a replayed batch.  The colliding
                    // attempt's tokens are discarded; fresh ones are issued.
                    attempt += 1;
                    warn!(
                        product_id = %product_id,
                        token = %t,
                        attempt,
                        "duplicate token rejected by registry"
                    );
                    if attempt > self.max_duplicate_retries {
                        self.abandon(&product_id, RegistrationPhase::Abandoned);
                        return Err(VeritagError::RegistrationFailed(format!(
                            "duplicate tokens after {attempt} attempts"
                        )));
                    }
                }

                Err(e) => {
                    // Timeout, rejection, connectivity loss: fail closed.
                    // These tokens are never reused; their ledger fate is
                    // unknown.
                    self.abandon(&product_id, RegistrationPhase::Abandoned);
                    return Err(VeritagError::RegistrationFailed(format!(
                        "registry commit: {e}"
                    )));
                }
            }
        }
    }

    fn abandon(&mut self, product_id: &str, phase: RegistrationPhase) {
        match self.store.mark_failed(product_id) {
            Ok(()) => info!(product_id = %product_id, phase = ?phase, "registration abandoned"),
            Err(e) => error!(
                product_id = %product_id,
                error = %e,
                "could not mark record failed; recovery sweep will reconcile"
            ),
        }
    }

    /// Reconcile Pending metadata records against the registry after a crash.
    ///
    /// A batch the registry holds in full is re-finalized with a receipt
    /// reconstructed from the commit chain (idempotent).  A batch with no
    /// trace was never committed and is marked Failed.  Anything in between
    /// contradicts batch atomicity and is reported, not guessed at.
    pub fn recover(&mut self) -> Result<RecoveryReport> {
        let pending = self.store.find_pending()?;
        let mut report = RecoveryReport::default();

        for record in pending {
            if record.token_ids.is_empty() {
                warn!(product_id = %record.product_id, "pending record has no tokens; marking failed");
                self.store.mark_failed(&record.product_id)?;
                report.failed.push(record.product_id);
                continue;
            }

            let mut committed = 0usize;
            let mut receipt: Option<CommitReceipt> = None;
            for token in &record.token_ids {
                if let Some(found) = self.registry.lookup(token)? {
                    if found.product_id == record.product_id {
                        committed += 1;
                        receipt.get_or_insert(CommitReceipt {
                            seq: found.commit_seq,
                            commit_hash_hex: found.commit_hash_hex,
                            committed_at_utc: found.created_at_utc,
                        });
                    }
                }
            }

            if committed == record.token_ids.len() {
                let receipt = receipt.expect("committed batch has a receipt");
                self.store.finalize(&record.product_id, &receipt)?;
                info!(product_id = %record.product_id, seq = receipt.seq, "pending record re-finalized");
                report.finalized.push(record.product_id);
            } else if committed == 0 {
                self.store.mark_failed(&record.product_id)?;
                info!(product_id = %record.product_id, "pending record marked failed");
                report.failed.push(record.product_id);
            } else {
                error!(
                    product_id = %record.product_id,
                    committed,
                    total = record.token_ids.len(),
                    "partial batch in registry contradicts atomicity; leaving pending"
                );
                report.inconsistent.push(record.product_id);
            }
        }

        Ok(report)
    }

    /// The metadata store, for read-side collaborators (listing, resolver).
    pub fn store(&self) -> &M {
        &self.store
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
