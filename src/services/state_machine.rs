// src/services/state_machine.rs
//! Submission state machine.
//!
//! Governs the allowed status transitions of a submission and enforces that
//! each is applied exactly once per issuance attempt. Admission control is
//! the record store's conditional update: moving `pending -> approving` is a
//! compare-and-set, so when multiple orchestrator instances race on one
//! submission exactly one of them wins the lease. The lease token issued to
//! the winner must accompany every later transition of that attempt.
//!
//! The machine also owns two registries keyed by submission id: completed
//! anchor records (the idempotency index) and records awaiting
//! reconciliation after the ledger accepted an anchor but the local commit
//! failed.

use crate::models::credential::AnchorRecord;
use crate::models::submission::SubmissionStatus;
use crate::storage::submission_store::{StoreError, SubmissionStore};
use ethers_core::utils::hex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Proof of exclusive possession of one in-flight approval.
///
/// Returned by `request_approval`; required by `commit_approval` and
/// `abort_approval`. The token value is never logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseToken(String);

fn mint_token() -> LeaseToken {
    let bytes: [u8; 16] = rand::random();
    LeaseToken(hex::encode(bytes))
}

/// Errors produced by disallowed or failed transitions.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The submission is not in a state the requested transition may leave
    #[error("invalid transition for submission {id}: {current} -> {requested}")]
    InvalidTransition {
        id: String,
        current: SubmissionStatus,
        requested: SubmissionStatus,
    },

    /// The presented lease token does not match the held lease
    #[error("lease token mismatch for submission {0}")]
    LeaseMismatch(String),

    /// No parked anchor record exists for the submission
    #[error("no reconciliation pending for submission {0}")]
    NoReconciliationPending(String),

    /// The record store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// State machine over the submission record store.
pub struct SubmissionStateMachine {
    store: Arc<dyn SubmissionStore>,
    /// Lease tokens for in-flight approvals, keyed by submission id
    leases: Mutex<HashMap<String, LeaseToken>>,
    /// Completed anchor records; the idempotency index
    completed: Mutex<HashMap<String, AnchorRecord>>,
    /// Anchor records whose local commit failed, awaiting an operator
    reconciliations: Mutex<HashMap<String, AnchorRecord>>,
}

impl SubmissionStateMachine {
    /// Creates a state machine over the given record store.
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        SubmissionStateMachine {
            store,
            leases: Mutex::new(HashMap::new()),
            completed: Mutex::new(HashMap::new()),
            reconciliations: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the completed anchor record for `id`, if issuance finished.
    pub fn completed_record(&self, id: &str) -> Option<AnchorRecord> {
        self.completed
            .lock()
            .expect("completed registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Returns the parked anchor record for `id`, if reconciliation is due.
    pub fn pending_reconciliation(&self, id: &str) -> Option<AnchorRecord> {
        self.reconciliations
            .lock()
            .expect("reconciliation registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Lists all anchor records awaiting reconciliation.
    pub fn pending_reconciliations(&self) -> Vec<AnchorRecord> {
        let mut records: Vec<AnchorRecord> = self
            .reconciliations
            .lock()
            .expect("reconciliation registry lock poisoned")
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.submission_id.cmp(&b.submission_id));
        records
    }

    fn check_lease(&self, id: &str, token: &LeaseToken) -> Result<(), TransitionError> {
        let leases = self.leases.lock().expect("lease registry lock poisoned");
        match leases.get(id) {
            Some(held) if held == token => Ok(()),
            _ => Err(TransitionError::LeaseMismatch(id.to_string())),
        }
    }

    fn drop_lease(&self, id: &str) {
        self.leases
            .lock()
            .expect("lease registry lock poisoned")
            .remove(id);
    }

    async fn compare_and_set(
        &self,
        id: &str,
        expected: SubmissionStatus,
        requested: SubmissionStatus,
    ) -> Result<(), TransitionError> {
        if self.store.set_status(id, expected, requested).await? {
            return Ok(());
        }
        let current = self.store.get(id).await?.status;
        Err(TransitionError::InvalidTransition {
            id: id.to_string(),
            current,
            requested,
        })
    }

    /// Admits one issuance attempt: `pending -> approving`.
    ///
    /// The underlying conditional update is what serializes concurrent
    /// attempts; when it loses, the error names the actual current status
    /// so the caller can distinguish an in-flight attempt from a terminal
    /// submission.
    pub async fn request_approval(&self, id: &str) -> Result<LeaseToken, TransitionError> {
        self.compare_and_set(id, SubmissionStatus::Pending, SubmissionStatus::Approving)
            .await?;
        let token = mint_token();
        self.leases
            .lock()
            .expect("lease registry lock poisoned")
            .insert(id.to_string(), token.clone());
        Ok(token)
    }

    /// Completes an approval: `approving -> approved`, recording the anchor.
    pub async fn commit_approval(
        &self,
        id: &str,
        token: &LeaseToken,
        record: &AnchorRecord,
    ) -> Result<(), TransitionError> {
        self.check_lease(id, token)?;
        self.compare_and_set(id, SubmissionStatus::Approving, SubmissionStatus::Approved)
            .await?;
        self.completed
            .lock()
            .expect("completed registry lock poisoned")
            .insert(id.to_string(), record.clone());
        self.drop_lease(id);
        Ok(())
    }

    /// Abandons an approval with no durable external effects:
    /// `approving -> pending`, so the attempt can be retried from scratch.
    pub async fn abort_approval(&self, id: &str, token: &LeaseToken) -> Result<(), TransitionError> {
        self.check_lease(id, token)?;
        self.compare_and_set(id, SubmissionStatus::Approving, SubmissionStatus::Pending)
            .await?;
        self.drop_lease(id);
        Ok(())
    }

    /// Records that the ledger anchor succeeded but the local commit did not:
    /// `approving -> approved-needs-reconciliation`.
    ///
    /// The anchor record is parked before the status write so the
    /// reconciliation query can return it even when the store is down.
    pub async fn mark_needs_reconciliation(
        &self,
        id: &str,
        token: &LeaseToken,
        record: AnchorRecord,
    ) -> Result<(), TransitionError> {
        self.check_lease(id, token)?;
        self.reconciliations
            .lock()
            .expect("reconciliation registry lock poisoned")
            .insert(id.to_string(), record);
        let result = self
            .compare_and_set(
                id,
                SubmissionStatus::Approving,
                SubmissionStatus::ApprovedNeedsReconciliation,
            )
            .await;
        self.drop_lease(id);
        result
    }

    /// Operator path: commits a parked anchor record,
    /// `approved-needs-reconciliation -> approved`. The ledger is not
    /// touched; the anchor already happened.
    pub async fn resolve_reconciliation(&self, id: &str) -> Result<AnchorRecord, TransitionError> {
        let record = self
            .pending_reconciliation(id)
            .ok_or_else(|| TransitionError::NoReconciliationPending(id.to_string()))?;
        self.compare_and_set(
            id,
            SubmissionStatus::ApprovedNeedsReconciliation,
            SubmissionStatus::Approved,
        )
        .await?;
        self.completed
            .lock()
            .expect("completed registry lock poisoned")
            .insert(id.to_string(), record.clone());
        self.reconciliations
            .lock()
            .expect("reconciliation registry lock poisoned")
            .remove(id);
        Ok(record)
    }

    /// Declines a submission: `pending -> rejected`.
    pub async fn reject(&self, id: &str) -> Result<(), TransitionError> {
        self.compare_and_set(id, SubmissionStatus::Pending, SubmissionStatus::Rejected)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::submission::Submission;
    use crate::storage::submission_store::MemorySubmissionStore;
    use chrono::Utc;

    fn machine_with(id: &str, status: SubmissionStatus) -> (SubmissionStateMachine, Arc<MemorySubmissionStore>) {
        let store = Arc::new(MemorySubmissionStore::new());
        store.insert(Submission {
            id: id.to_string(),
            full_name: "Jane Doe".to_string(),
            date_of_birth: "1975-05-15".to_string(),
            national_id: "A12345678".to_string(),
            created_at: Utc::now(),
            status,
        });
        (SubmissionStateMachine::new(store.clone()), store)
    }

    fn record(id: &str) -> AnchorRecord {
        AnchorRecord {
            submission_id: id.to_string(),
            content_locator: "QmTestCid123".to_string(),
            fingerprint: "0xabc".to_string(),
            transaction_id: "0xdef".to_string(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn approval_lease_goes_to_exactly_one_caller() {
        let (machine, _) = machine_with("u1", SubmissionStatus::Pending);

        let token = machine.request_approval("u1").await.unwrap();

        let second = machine.request_approval("u1").await.unwrap_err();
        match second {
            TransitionError::InvalidTransition { current, .. } => {
                assert_eq!(current, SubmissionStatus::Approving);
            }
            other => panic!("expected InvalidTransition, got {other}"),
        }

        machine.commit_approval("u1", &token, &record("u1")).await.unwrap();
    }

    #[tokio::test]
    async fn commit_requires_the_matching_lease() {
        let (machine, store) = machine_with("u1", SubmissionStatus::Pending);
        let _token = machine.request_approval("u1").await.unwrap();

        let forged = LeaseToken("deadbeef".to_string());
        let err = machine
            .commit_approval("u1", &forged, &record("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::LeaseMismatch(_)));
        // the submission is still mid-approval, untouched
        assert_eq!(
            store.get("u1").await.unwrap().status,
            SubmissionStatus::Approving
        );
    }

    #[tokio::test]
    async fn commit_records_the_anchor_and_approves() {
        let (machine, store) = machine_with("u1", SubmissionStatus::Pending);
        let token = machine.request_approval("u1").await.unwrap();
        let anchor = record("u1");

        machine.commit_approval("u1", &token, &anchor).await.unwrap();

        assert_eq!(
            store.get("u1").await.unwrap().status,
            SubmissionStatus::Approved
        );
        assert_eq!(machine.completed_record("u1"), Some(anchor));
    }

    #[tokio::test]
    async fn abort_restores_pending_and_releases_the_lease() {
        let (machine, store) = machine_with("u1", SubmissionStatus::Pending);
        let token = machine.request_approval("u1").await.unwrap();

        machine.abort_approval("u1", &token).await.unwrap();
        assert_eq!(
            store.get("u1").await.unwrap().status,
            SubmissionStatus::Pending
        );

        // the lease is gone; a fresh attempt can be admitted
        let retry = machine.request_approval("u1").await;
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn reconciliation_parks_the_record_until_resolved() {
        let (machine, store) = machine_with("u1", SubmissionStatus::Pending);
        let token = machine.request_approval("u1").await.unwrap();

        machine
            .mark_needs_reconciliation("u1", &token, record("u1"))
            .await
            .unwrap();
        assert_eq!(
            store.get("u1").await.unwrap().status,
            SubmissionStatus::ApprovedNeedsReconciliation
        );
        assert!(machine.pending_reconciliation("u1").is_some());
        assert_eq!(machine.pending_reconciliations().len(), 1);

        let resolved = machine.resolve_reconciliation("u1").await.unwrap();
        assert_eq!(resolved.submission_id, "u1");
        assert_eq!(
            store.get("u1").await.unwrap().status,
            SubmissionStatus::Approved
        );
        assert!(machine.pending_reconciliation("u1").is_none());
        assert!(machine.completed_record("u1").is_some());
    }

    #[tokio::test]
    async fn resolving_without_a_parked_record_fails() {
        let (machine, _) = machine_with("u1", SubmissionStatus::Pending);
        let err = machine.resolve_reconciliation("u1").await.unwrap_err();
        assert!(matches!(err, TransitionError::NoReconciliationPending(_)));
    }

    #[tokio::test]
    async fn reject_is_only_allowed_from_pending() {
        let (machine, store) = machine_with("u1", SubmissionStatus::Pending);
        machine.reject("u1").await.unwrap();
        assert_eq!(
            store.get("u1").await.unwrap().status,
            SubmissionStatus::Rejected
        );

        // terminal states stay terminal
        let err = machine.reject("u1").await.unwrap_err();
        match err {
            TransitionError::InvalidTransition { current, requested, .. } => {
                assert_eq!(current, SubmissionStatus::Rejected);
                assert_eq!(requested, SubmissionStatus::Rejected);
            }
            other => panic!("expected InvalidTransition, got {other}"),
        }
    }
}
