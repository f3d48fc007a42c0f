// src/services/issuer.rs
//! Issuance orchestrator.
//!
//! Sequences one credential issuance across three independently-failing
//! external systems: the content store, the ledger, and the submission
//! record store. The commit protocol is:
//!
//! 1. load the submission, return the existing anchor record if issuance
//!    already completed (idempotency)
//! 2. win the approval lease (`pending -> approving`, a compare-and-set)
//! 3. build and canonicalize the credential document
//! 4. publish to the content store
//! 5. fingerprint the canonical bytes and anchor them on the ledger
//! 6. commit locally (`approving -> approved`)
//!
//! Failures before the ledger anchor abort back to `pending` (an orphaned
//! publish is accepted: content-addressed storage tolerates unreferenced
//! objects, and nothing points at it). A failure after the ledger accepted
//! the anchor cannot be rolled back; the submission is parked in
//! `approved-needs-reconciliation` for the operator path, never silently
//! retried as a fresh issuance.

use crate::blockchain::ledger_client::{AnchorError, AnchorOutcome, LedgerAnchor};
use crate::models::credential::AnchorRecord;
use crate::models::submission::SubmissionStatus;
use crate::services::document_builder::{build_credential_document, BuildError};
use crate::services::state_machine::{LeaseToken, SubmissionStateMachine, TransitionError};
use crate::storage::pinning_client::{ContentPublisher, PublishError};
use crate::storage::submission_store::{StoreError, SubmissionStore};
use crate::utils::crypto::{fingerprint, fingerprint_hex};
use crate::utils::serialization::to_canonical_json;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by `issue`, each naming the stage that failed so a
/// caller can tell "nothing happened" from "the ledger committed but the
/// local record did not".
#[derive(Debug, Error)]
pub enum IssueError {
    /// No submission exists for the requested id
    #[error("submission not found: {0}")]
    SubmissionNotFound(String),

    /// The submission is not awaiting a decision
    #[error("submission {id} is not pending (status: {status})")]
    SubmissionNotPending {
        id: String,
        status: SubmissionStatus,
    },

    /// Another issuance attempt holds the lease for this submission
    #[error("issuance already in progress for submission {0}")]
    ConcurrentIssuanceInProgress(String),

    /// The submission has an anchored credential awaiting reconciliation;
    /// re-running issuance would double-anchor
    #[error("submission {0} has an anchored credential awaiting reconciliation")]
    ReconciliationRequired(String),

    /// The credential document could not be built from the inputs
    #[error("credential build failed: {0}")]
    Build(#[from] BuildError),

    /// Canonical serialization of the document failed
    #[error("credential serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The content store publish failed; nothing was anchored
    #[error("content publish failed: {0}")]
    Publish(#[from] PublishError),

    /// The ledger anchor failed; the published content is left unreferenced
    #[error("ledger anchor failed: {0}")]
    Anchor(#[from] AnchorError),

    /// The ledger accepted the anchor but the local commit failed;
    /// resolved via the reconciliation path, not by re-issuing
    #[error(
        "local commit failed after ledger acceptance for submission {id}; \
         reconciliation required: {reason}"
    )]
    CommitFailedAfterAnchor { id: String, reason: String },

    /// The record store failed before any external effect
    #[error("record store error: {0}")]
    Store(StoreError),

    /// A state transition failed outside the cases above
    #[error("state transition failed: {0}")]
    Transition(TransitionError),
}

impl IssueError {
    /// Name of the pipeline stage the error belongs to.
    pub fn stage(&self) -> &'static str {
        match self {
            IssueError::SubmissionNotFound(_) | IssueError::SubmissionNotPending { .. } => "load",
            IssueError::ConcurrentIssuanceInProgress(_) | IssueError::Transition(_) => "admission",
            IssueError::ReconciliationRequired(_) => "reconciliation",
            IssueError::Build(_) | IssueError::Serialization(_) => "build",
            IssueError::Publish(_) => "publish",
            IssueError::Anchor(_) => "anchor",
            IssueError::CommitFailedAfterAnchor { .. } => "commit",
            IssueError::Store(_) => "store",
        }
    }
}

/// Orchestrates credential issuance end to end.
///
/// Holds one shared handle per collaborator; all handles are constructed
/// once at startup and injected.
pub struct IssuanceOrchestrator {
    store: Arc<dyn SubmissionStore>,
    publisher: Arc<dyn ContentPublisher>,
    ledger: Arc<dyn LedgerAnchor>,
    state: Arc<SubmissionStateMachine>,
    issuer_did: String,
}

impl IssuanceOrchestrator {
    /// Creates a new orchestrator over the given collaborators.
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        publisher: Arc<dyn ContentPublisher>,
        ledger: Arc<dyn LedgerAnchor>,
        state: Arc<SubmissionStateMachine>,
        issuer_did: String,
    ) -> Self {
        IssuanceOrchestrator {
            store,
            publisher,
            ledger,
            state,
            issuer_did,
        }
    }

    /// Issues a credential for `submission_id`.
    ///
    /// Returns the anchor record of this (or an earlier, completed)
    /// issuance. Safe to call repeatedly: a completed issuance is returned
    /// unchanged with no second publish or anchor, and concurrent calls for
    /// one submission admit exactly one attempt.
    pub async fn issue(
        &self,
        submission_id: &str,
        issuer_claims: &BTreeMap<String, serde_json::Value>,
    ) -> Result<AnchorRecord, IssueError> {
        log::info!("issuing credential for submission: {}", submission_id);

        let submission = self.store.get(submission_id).await.map_err(|e| match e {
            StoreError::NotFound(id) => IssueError::SubmissionNotFound(id),
            other => IssueError::Store(other),
        })?;

        // idempotency: one submission yields at most one anchor record
        if let Some(existing) = self.state.completed_record(submission_id) {
            log::info!(
                "submission {} already issued, returning existing anchor record",
                submission_id
            );
            return Ok(existing);
        }

        match submission.status {
            SubmissionStatus::Pending => {}
            SubmissionStatus::Approving => {
                return Err(IssueError::ConcurrentIssuanceInProgress(
                    submission_id.to_string(),
                ));
            }
            SubmissionStatus::ApprovedNeedsReconciliation => {
                return Err(IssueError::ReconciliationRequired(submission_id.to_string()));
            }
            status => {
                return Err(IssueError::SubmissionNotPending {
                    id: submission_id.to_string(),
                    status,
                });
            }
        }

        let token = match self.state.request_approval(submission_id).await {
            Ok(token) => token,
            Err(TransitionError::InvalidTransition {
                current: SubmissionStatus::Approving,
                ..
            }) => {
                return Err(IssueError::ConcurrentIssuanceInProgress(
                    submission_id.to_string(),
                ));
            }
            Err(TransitionError::InvalidTransition { current, .. }) => {
                return Err(IssueError::SubmissionNotPending {
                    id: submission_id.to_string(),
                    status: current,
                });
            }
            Err(TransitionError::Store(e)) => return Err(IssueError::Store(e)),
            Err(other) => return Err(IssueError::Transition(other)),
        };

        // build + canonicalize; pure, so a failure releases the lease cleanly
        let document = match build_credential_document(
            &submission,
            issuer_claims,
            &self.issuer_did,
            Utc::now(),
        ) {
            Ok(document) => document,
            Err(e) => {
                self.release_lease(submission_id, &token).await;
                return Err(e.into());
            }
        };
        let canonical = match to_canonical_json(&document) {
            Ok(canonical) => canonical,
            Err(e) => {
                self.release_lease(submission_id, &token).await;
                return Err(e.into());
            }
        };

        let pin_name = format!("pension-credential-{}.json", submission_id);
        let locator = match self.publisher.publish(&canonical, &pin_name).await {
            Ok(locator) => locator,
            Err(e) => {
                self.release_lease(submission_id, &token).await;
                return Err(e.into());
            }
        };

        let digest = fingerprint(canonical.as_bytes());
        let transaction_id = match self.ledger.anchor(digest).await {
            Ok(AnchorOutcome::Submitted(tx_hash)) => format!("0x{:x}", tx_hash),
            Ok(AnchorOutcome::AlreadyAnchored) => {
                // the original submitting transaction is unrecoverable; the
                // digest itself is the stable on-chain reference
                log::warn!(
                    "fingerprint for submission {} was already anchored, adopting digest reference",
                    submission_id
                );
                fingerprint_hex(&digest)
            }
            Err(e) => {
                // the published content stays behind, unreferenced; content
                // addressing makes that safe and it is never rolled back
                log::warn!(
                    "anchor failed for submission {}, published content {} left unreferenced",
                    submission_id,
                    locator
                );
                self.release_lease(submission_id, &token).await;
                return Err(e.into());
            }
        };

        let record = AnchorRecord {
            submission_id: submission_id.to_string(),
            content_locator: locator,
            fingerprint: fingerprint_hex(&digest),
            transaction_id,
            completed_at: Utc::now(),
        };

        match self
            .state
            .commit_approval(submission_id, &token, &record)
            .await
        {
            Ok(()) => {
                log::info!(
                    "credential for submission {} anchored in tx {} at {}",
                    submission_id,
                    record.transaction_id,
                    record.content_locator
                );
                Ok(record)
            }
            Err(commit_err) => {
                // the anchor is on the ledger and cannot be undone; park the
                // record for the operator instead of retrying from scratch
                log::error!(
                    "local commit failed after ledger acceptance for submission {}: {}",
                    submission_id,
                    commit_err
                );
                if let Err(park_err) = self
                    .state
                    .mark_needs_reconciliation(submission_id, &token, record)
                    .await
                {
                    log::error!(
                        "failed to record reconciliation state for submission {}: {}",
                        submission_id,
                        park_err
                    );
                }
                Err(IssueError::CommitFailedAfterAnchor {
                    id: submission_id.to_string(),
                    reason: commit_err.to_string(),
                })
            }
        }
    }

    /// Operator path: commits a previously-anchored credential whose local
    /// status update failed. Touches only the record store, never the ledger.
    pub async fn reconcile(&self, submission_id: &str) -> Result<AnchorRecord, IssueError> {
        log::info!("reconciling submission: {}", submission_id);
        self.state
            .resolve_reconciliation(submission_id)
            .await
            .map_err(|e| match e {
                TransitionError::Store(inner) => IssueError::Store(inner),
                other => IssueError::Transition(other),
            })
    }

    /// Lists anchor records awaiting reconciliation.
    pub fn pending_reconciliations(&self) -> Vec<AnchorRecord> {
        self.state.pending_reconciliations()
    }

    /// Returns the parked anchor record for `submission_id`, if any.
    pub fn pending_reconciliation(&self, submission_id: &str) -> Option<AnchorRecord> {
        self.state.pending_reconciliation(submission_id)
    }

    /// Declines a pending submission.
    pub async fn reject(&self, submission_id: &str) -> Result<(), IssueError> {
        log::info!("rejecting submission: {}", submission_id);
        self.state
            .reject(submission_id)
            .await
            .map_err(|e| match e {
                TransitionError::InvalidTransition { id, current, .. } => {
                    IssueError::SubmissionNotPending { id, status: current }
                }
                TransitionError::Store(StoreError::NotFound(id)) => {
                    IssueError::SubmissionNotFound(id)
                }
                TransitionError::Store(inner) => IssueError::Store(inner),
                other => IssueError::Transition(other),
            })
    }

    async fn release_lease(&self, submission_id: &str, token: &LeaseToken) {
        if let Err(e) = self.state.abort_approval(submission_id, token).await {
            log::error!(
                "failed to release issuance lease for submission {}: {}",
                submission_id,
                e
            );
        }
    }
}
