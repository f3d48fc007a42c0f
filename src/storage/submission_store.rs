// src/storage/submission_store.rs
//! Submission record store interface.
//!
//! The record store is an external collaborator: the pipeline reads
//! submissions from it and requests status transitions through a conditional
//! update. The conditional update (`set_status`) is the primitive the
//! submission state machine is built on — it must be atomic in the backing
//! store, since multiple orchestrator instances may race on the same
//! submission.

use crate::models::submission::{Submission, SubmissionStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors surfaced by a record store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No submission exists for the requested id
    #[error("submission not found: {0}")]
    NotFound(String),

    /// The backend could not be reached or timed out
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but refused or garbled the request
    #[error("record store error: {0}")]
    Backend(String),
}

/// Keyed access to submission records with a conditional status update.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Fetches one submission by id.
    async fn get(&self, id: &str) -> Result<Submission, StoreError>;

    /// Lists all submissions, newest first.
    async fn list(&self) -> Result<Vec<Submission>, StoreError>;

    /// Atomically updates the status of `id` from `expected` to `new`.
    ///
    /// Returns `false` (without writing) when the current status does not
    /// match `expected` — the compare-and-set lost. Returns an error only
    /// for backend failures, never for a lost race.
    async fn set_status(
        &self,
        id: &str,
        expected: SubmissionStatus,
        new: SubmissionStatus,
    ) -> Result<bool, StoreError>;
}

/// In-memory submission store.
///
/// Backs tests and local development. The mutex makes `set_status` a true
/// compare-and-set: the status check and the write happen under one lock.
#[derive(Default)]
pub struct MemorySubmissionStore {
    records: Mutex<HashMap<String, Submission>>,
}

#[allow(dead_code)]
impl MemorySubmissionStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a submission record.
    pub fn insert(&self, submission: Submission) {
        self.records
            .lock()
            .expect("submission store lock poisoned")
            .insert(submission.id.clone(), submission);
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn get(&self, id: &str) -> Result<Submission, StoreError> {
        self.records
            .lock()
            .expect("submission store lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Submission>, StoreError> {
        let mut all: Vec<Submission> = self
            .records
            .lock()
            .expect("submission store lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn set_status(
        &self,
        id: &str,
        expected: SubmissionStatus,
        new: SubmissionStatus,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("submission store lock poisoned");
        match records.get_mut(id) {
            Some(record) if record.status == expected => {
                record.status = new;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn submission(id: &str, status: SubmissionStatus) -> Submission {
        Submission {
            id: id.to_string(),
            full_name: "Jane Doe".to_string(),
            date_of_birth: "1975-05-15".to_string(),
            national_id: "A12345678".to_string(),
            created_at: Utc::now(),
            status,
        }
    }

    #[tokio::test]
    async fn set_status_succeeds_only_from_expected_state() {
        let store = MemorySubmissionStore::new();
        store.insert(submission("u1", SubmissionStatus::Pending));

        let moved = store
            .set_status("u1", SubmissionStatus::Pending, SubmissionStatus::Approving)
            .await
            .unwrap();
        assert!(moved);

        // a second identical compare-and-set must lose
        let moved_again = store
            .set_status("u1", SubmissionStatus::Pending, SubmissionStatus::Approving)
            .await
            .unwrap();
        assert!(!moved_again);

        assert_eq!(
            store.get("u1").await.unwrap().status,
            SubmissionStatus::Approving
        );
    }

    #[tokio::test]
    async fn missing_submission_is_an_error() {
        let store = MemorySubmissionStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store
                .set_status("nope", SubmissionStatus::Pending, SubmissionStatus::Rejected)
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let store = MemorySubmissionStore::new();
        let mut older = submission("old", SubmissionStatus::Pending);
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        store.insert(older);
        store.insert(submission("new", SubmissionStatus::Pending));

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "new");
    }
}
