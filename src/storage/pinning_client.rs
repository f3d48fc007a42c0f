// src/storage/pinning_client.rs
//! Content-addressed publishing via a remote pinning API.
//!
//! Publishes canonical credential documents to an IPFS pinning service and
//! returns the resulting content identifier (CID). The payload is embedded
//! byte-exact in the pin request, so the bytes the network stores are the
//! same bytes the fingerprint function hashed.
//!
//! Transient failures (transport errors, timeouts, 5xx) are retried with
//! bounded exponential backoff. A 4xx response means the service rejected
//! the payload itself; that is permanent and is never retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::time::Duration;
use thiserror::Error;

/// Request timeout for pinning calls. Content uploads are small, so the
/// window is short compared to ledger submission.
const PIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Total attempts per publish (initial call plus retries).
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay, doubled on each retry: 200ms, 400ms.
const BASE_DELAY_MS: u64 = 200;

/// Errors surfaced by a content publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The service could not be reached or answered with a server error;
    /// retried with backoff before being surfaced
    #[error("content store unavailable: {0}")]
    Unavailable(String),

    /// The service rejected the payload; never retried
    #[error("content store rejected payload: {0}")]
    Rejected(String),
}

/// Publishes a canonical document and returns its durable locator.
#[async_trait]
pub trait ContentPublisher: Send + Sync {
    /// Publishes `canonical_json` under `name`, returning the CID.
    async fn publish(&self, canonical_json: &str, name: &str) -> Result<String, PublishError>;
}

#[derive(Serialize)]
struct PinRequest<'a> {
    #[serde(rename = "pinataContent")]
    content: &'a RawValue,
    #[serde(rename = "pinataMetadata")]
    metadata: PinMetadata<'a>,
}

#[derive(Serialize)]
struct PinMetadata<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Client for a Pinata-style JSON pinning API.
///
/// Configured with `{endpoint, api_key}`; constructed once at startup and
/// shared by reference.
pub struct PinningClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl PinningClient {
    /// Creates a pinning client for the given endpoint and API key.
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(PIN_TIMEOUT).build()?;
        Ok(PinningClient {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn try_publish(&self, body: &PinRequest<'_>) -> Result<String, PublishError> {
        let response = self
            .http
            .post(format!("{}/pinning/pinJSONToIPFS", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let parsed: PinResponse = response
                .json()
                .await
                .map_err(|e| PublishError::Unavailable(e.to_string()))?;
            return Ok(parsed.ipfs_hash);
        }

        let detail = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(PublishError::Rejected(format!("{}: {}", status, detail)))
        } else {
            Err(PublishError::Unavailable(format!("{}: {}", status, detail)))
        }
    }
}

#[async_trait]
impl ContentPublisher for PinningClient {
    async fn publish(&self, canonical_json: &str, name: &str) -> Result<String, PublishError> {
        log::info!("uploading {} to content store", name);

        // RawValue keeps the canonical bytes verbatim inside the request body
        let content = RawValue::from_string(canonical_json.to_string())
            .map_err(|e| PublishError::Rejected(format!("payload is not valid JSON: {}", e)))?;
        let body = PinRequest {
            content: content.as_ref(),
            metadata: PinMetadata { name },
        };

        let mut last_failure = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }
            match self.try_publish(&body).await {
                Ok(cid) => {
                    log::info!("successfully pinned {}. CID: {}", name, cid);
                    return Ok(cid);
                }
                Err(PublishError::Rejected(detail)) => {
                    return Err(PublishError::Rejected(detail));
                }
                Err(PublishError::Unavailable(detail)) => {
                    log::warn!(
                        "pin attempt {}/{} failed, will retry: {}",
                        attempt + 1,
                        MAX_ATTEMPTS,
                        detail
                    );
                    last_failure = detail;
                }
            }
        }
        Err(PublishError::Unavailable(last_failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{mock, server_url, Matcher};

    const CANONICAL: &str = r#"{"id":"http://example.gov/credentials/u1"}"#;

    /// Mocks one pin upload, matched on the pin name so parallel tests
    /// sharing the mock server cannot cross-match.
    fn pin_mock(name: &str, status: usize, body: &str) -> mockito::Mock {
        mock("POST", "/pinning/pinJSONToIPFS")
            .match_body(Matcher::PartialJsonString(format!(
                r#"{{"pinataMetadata":{{"name":"{}"}}}}"#,
                name
            )))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
    }

    #[tokio::test]
    async fn publish_returns_the_locator() {
        let m = pin_mock("credential-ok.json", 200, r#"{"IpfsHash":"QmTestCid123"}"#)
            .expect(1)
            .create();

        let client = PinningClient::new(&server_url(), "jwt").unwrap();
        let cid = client.publish(CANONICAL, "credential-ok.json").await.unwrap();
        assert_eq!(cid, "QmTestCid123");
        m.assert();
    }

    #[tokio::test]
    async fn rejected_payload_is_not_retried() {
        let m = pin_mock("credential-rejected.json", 400, "malformed pin request")
            .expect(1)
            .create();

        let client = PinningClient::new(&server_url(), "jwt").unwrap();
        let err = client
            .publish(CANONICAL, "credential-rejected.json")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Rejected(_)));
        m.assert();
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_surfaced() {
        let m = pin_mock("credential-retry.json", 503, "upstream overloaded")
            .expect(MAX_ATTEMPTS as usize)
            .create();

        let client = PinningClient::new(&server_url(), "jwt").unwrap();
        let err = client
            .publish(CANONICAL, "credential-retry.json")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Unavailable(_)));
        m.assert();
    }
}
