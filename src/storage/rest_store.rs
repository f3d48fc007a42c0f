// src/storage/rest_store.rs
//! HTTP-backed submission record store.
//!
//! Talks to a PostgREST-style endpoint (the `kyc_submissions` table) with an
//! API key. The conditional status update is expressed as a filtered PATCH:
//! the row is matched on both `id` and the expected current `status`, so the
//! database applies the compare-and-set atomically and the response row count
//! tells us whether we won.

use crate::models::submission::{Submission, SubmissionStatus};
use crate::storage::submission_store::{StoreError, SubmissionStore};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

/// Table holding identity submissions.
const SUBMISSIONS_TABLE: &str = "kyc_submissions";

/// Request timeout for record store calls.
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct StatusPatch {
    status: SubmissionStatus,
}

/// Submission store backed by a PostgREST-style HTTP API.
pub struct RestSubmissionStore {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RestSubmissionStore {
    /// Creates a store client for the given endpoint and API key.
    ///
    /// The endpoint is the service base URL (no trailing slash); the REST
    /// path prefix is appended per request.
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(STORE_TIMEOUT).build()?;
        Ok(RestSubmissionStore {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.endpoint, SUBMISSIONS_TABLE)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn fetch_rows(&self, query: &[(&str, String)]) -> Result<Vec<Submission>, StoreError> {
        let response = self
            .authorize(self.http.get(self.table_url()))
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("{}: {}", status, body)));
        }

        response
            .json::<Vec<Submission>>()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl SubmissionStore for RestSubmissionStore {
    async fn get(&self, id: &str) -> Result<Submission, StoreError> {
        let rows = self
            .fetch_rows(&[("id", format!("eq.{}", id)), ("limit", "1".to_string())])
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Submission>, StoreError> {
        self.fetch_rows(&[("order", "createdAt.desc".to_string())])
            .await
    }

    async fn set_status(
        &self,
        id: &str,
        expected: SubmissionStatus,
        new: SubmissionStatus,
    ) -> Result<bool, StoreError> {
        log::info!("updating submission {} to status: {}", id, new);

        let response = self
            .authorize(self.http.patch(self.table_url()))
            .query(&[
                ("id", format!("eq.{}", id)),
                ("status", format!("eq.{}", expected)),
            ])
            // ask the backend to echo the updated rows so a lost
            // compare-and-set is distinguishable from a successful one
            .header("Prefer", "return=representation")
            .json(&StatusPatch { status: new })
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("{}: {}", status, body)));
        }

        let updated: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(!updated.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{mock, server_url};

    #[tokio::test]
    async fn get_parses_a_submission_row() {
        let body = r#"[{
            "id": "u1",
            "fullName": "Jane Doe",
            "dateOfBirth": "1975-05-15",
            "nationalId": "A12345678",
            "createdAt": "2026-01-01T00:00:00Z",
            "status": "pending"
        }]"#;
        let _m = mock("GET", "/rest/v1/kyc_submissions")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create();

        let store = RestSubmissionStore::new(&server_url(), "test-key").unwrap();
        let submission = store.get("u1").await.unwrap();
        assert_eq!(submission.full_name, "Jane Doe");
        assert_eq!(submission.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn empty_patch_response_means_lost_compare_and_set() {
        let _m = mock("PATCH", "/rest/v1/kyc_submissions")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create();

        let store = RestSubmissionStore::new(&server_url(), "test-key").unwrap();
        let moved = store
            .set_status("u1", SubmissionStatus::Pending, SubmissionStatus::Approving)
            .await
            .unwrap();
        assert!(!moved);
    }
}
