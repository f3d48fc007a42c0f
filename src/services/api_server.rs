// src/services/api_server.rs
//! API Server for the Credential Issuance Pipeline
//!
//! This module provides the issuer-facing REST interface: credential
//! issuance, submission rejection, submission lookup for the admin queue,
//! and the reconciliation query/commit pair for operators.
//!
//! The API is built using Axum. Every pipeline error maps to a structured
//! `{error, stage}` body so a caller can distinguish "nothing happened"
//! from "the ledger committed but the local record did not".

use crate::models::credential::AnchorRecord;
use crate::services::issuer::{IssuanceOrchestrator, IssueError};
use crate::storage::submission_store::{StoreError, SubmissionStore};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

// API request and response structures

/// Request payload for issuing a credential
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueCredentialRequest {
    submission_id: String,
    credential_claims: BTreeMap<String, serde_json::Value>,
}

/// Response for a completed issuance
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueCredentialResponse {
    message: String,
    transaction_hash: String,
    content_locator: String,
}

/// Request payload for rejecting a submission
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectSubmissionRequest {
    submission_id: String,
}

/// Response for a rejection
#[derive(Serialize, Deserialize)]
struct RejectSubmissionResponse {
    message: String,
}

/// Structured error body naming the failing pipeline stage
#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    stage: String,
}

fn error_response(error: IssueError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &error {
        IssueError::SubmissionNotFound(_) => StatusCode::NOT_FOUND,
        IssueError::SubmissionNotPending { .. }
        | IssueError::ConcurrentIssuanceInProgress(_)
        | IssueError::ReconciliationRequired(_) => StatusCode::CONFLICT,
        IssueError::Build(_) => StatusCode::BAD_REQUEST,
        IssueError::Publish(_) | IssueError::Anchor(_) => StatusCode::BAD_GATEWAY,
        IssueError::Serialization(_)
        | IssueError::CommitFailedAfterAnchor { .. }
        | IssueError::Store(_)
        | IssueError::Transition(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorResponse {
        error: error.to_string(),
        stage: error.stage().to_string(),
    };
    (status, Json(body))
}

/// API server state containing all service dependencies
#[derive(Clone)]
pub struct ApiServer {
    /// Orchestrator for issuance, rejection, and reconciliation
    orchestrator: Arc<IssuanceOrchestrator>,

    /// Record store, read directly for the admin queue endpoints
    store: Arc<dyn SubmissionStore>,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `orchestrator` - Issuance orchestrator
    /// * `store` - Submission record store
    pub fn new(orchestrator: Arc<IssuanceOrchestrator>, store: Arc<dyn SubmissionStore>) -> Self {
        ApiServer {
            orchestrator,
            store,
        }
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3001")
    pub async fn run(&self, addr: SocketAddr) -> anyhow::Result<()> {
        // Configure all API routes; the admin frontend is a browser app,
        // so CORS is enabled like the original deployment
        let app = Router::new()
            .route("/issue-credential", post(Self::issue_credential_handler))
            .route("/reject-submission", post(Self::reject_submission_handler))
            .route("/submissions", get(Self::list_submissions_handler))
            .route("/submission/:id", get(Self::get_submission_handler))
            .route("/reconciliations", get(Self::list_reconciliations_handler))
            .route("/reconcile/:id", post(Self::reconcile_handler))
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
            .with_state(Arc::new(self.clone()));

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    // =====================
    // Issuance Handlers
    // =====================

    /// Issues a credential for an approved submission
    ///
    /// # Endpoint
    /// POST /issue-credential
    ///
    /// # Responses
    /// - 200 OK: credential anchored; returns transaction hash and locator
    /// - 404 Not Found: unknown submission
    /// - 409 Conflict: not pending, concurrent attempt, or reconciliation due
    /// - 400 Bad Request: invalid submission fields or claim collision
    /// - 502 Bad Gateway: content store or ledger failure
    /// - 500 Internal Server Error: local commit failed after anchor
    async fn issue_credential_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<IssueCredentialRequest>,
    ) -> impl IntoResponse {
        match state
            .orchestrator
            .issue(&payload.submission_id, &payload.credential_claims)
            .await
        {
            Ok(record) => (
                StatusCode::OK,
                Json(IssueCredentialResponse {
                    message: "Credential successfully anchored and stored.".to_string(),
                    transaction_hash: record.transaction_id,
                    content_locator: record.content_locator,
                }),
            )
                .into_response(),
            Err(e) => error_response(e).into_response(),
        }
    }

    /// Rejects a pending submission
    ///
    /// # Endpoint
    /// POST /reject-submission
    ///
    /// # Responses
    /// - 200 OK: submission rejected
    /// - 404 Not Found: unknown submission
    /// - 409 Conflict: submission is not pending
    async fn reject_submission_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<RejectSubmissionRequest>,
    ) -> impl IntoResponse {
        match state.orchestrator.reject(&payload.submission_id).await {
            Ok(()) => (
                StatusCode::OK,
                Json(RejectSubmissionResponse {
                    message: "Submission rejected.".to_string(),
                }),
            )
                .into_response(),
            Err(e) => error_response(e).into_response(),
        }
    }

    // =====================
    // Admin Queue Handlers
    // =====================

    /// Lists all submissions, newest first
    ///
    /// # Endpoint
    /// GET /submissions
    async fn list_submissions_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        match state.store.list().await {
            Ok(submissions) => (StatusCode::OK, Json(submissions)).into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                    stage: "store".to_string(),
                }),
            )
                .into_response(),
        }
    }

    /// Fetches one submission by id
    ///
    /// # Endpoint
    /// GET /submission/:id
    async fn get_submission_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        match state.store.get(&id).await {
            Ok(submission) => (StatusCode::OK, Json(submission)).into_response(),
            Err(StoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("submission not found: {}", id),
                    stage: "load".to_string(),
                }),
            )
                .into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                    stage: "store".to_string(),
                }),
            )
                .into_response(),
        }
    }

    // =====================
    // Reconciliation Handlers
    // =====================

    /// Lists anchor records awaiting reconciliation
    ///
    /// # Endpoint
    /// GET /reconciliations
    async fn list_reconciliations_handler(
        State(state): State<Arc<ApiServer>>,
    ) -> (StatusCode, Json<Vec<AnchorRecord>>) {
        (
            StatusCode::OK,
            Json(state.orchestrator.pending_reconciliations()),
        )
    }

    /// Commits a parked anchor record after an out-of-band check
    ///
    /// # Endpoint
    /// POST /reconcile/:id
    ///
    /// # Responses
    /// - 200 OK: record committed; submission is now approved
    /// - 500 Internal Server Error: no parked record, or the store failed again
    async fn reconcile_handler(
        Path(id): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> impl IntoResponse {
        match state.orchestrator.reconcile(&id).await {
            Ok(record) => (StatusCode::OK, Json(record)).into_response(),
            Err(e) => error_response(e).into_response(),
        }
    }
}
