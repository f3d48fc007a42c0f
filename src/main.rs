// src/main.rs

//! # Credential Issuance Pipeline - Main Entry Point
//!
//! Initializes all pipeline components and starts the issuer-facing API.
//!
//! ## Architecture Overview
//! 1. **Blockchain Layer**: `LedgerClient` anchors credential fingerprints
//!    in the VCRegistry contract on zkSync
//! 2. **Storage Layer**: `PinningClient` publishes canonical credential
//!    documents to a content-addressed pinning service;
//!    `RestSubmissionStore` holds the identity submissions
//! 3. **Services Layer**: state machine, orchestrator, and API endpoints
//!
//! ## Configuration
//! Loaded from the environment (see `config.rs`); a local `.env` file is
//! honored. `RUST_LOG` controls log verbosity via env_logger.

use crate::blockchain::ledger_client::{LedgerAnchor, LedgerClient};
use crate::config::Settings;
use crate::services::api_server::ApiServer;
use crate::services::issuer::IssuanceOrchestrator;
use crate::services::state_machine::SubmissionStateMachine;
use crate::storage::pinning_client::{ContentPublisher, PinningClient};
use crate::storage::rest_store::RestSubmissionStore;
use crate::storage::submission_store::SubmissionStore;
use anyhow::Context;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;

// Module declarations (organized by functional domain)
mod blockchain; // ledger anchor client
mod config; // layered configuration
mod models; // data structures
mod services; // business logic and API
mod storage; // record store and pinning clients
mod utils; // canonicalization and hashing

/// Main application entry point
///
/// # Initialization Sequence
/// 1. Load environment configuration
/// 2. Connect to the ledger RPC endpoint
/// 3. Initialize storage clients and services
/// 4. Start the API server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    env_logger::init();

    let settings = Settings::load().context("failed to load configuration")?;

    // Ledger client first: it derives the issuer DID used in every document
    let ledger_client = LedgerClient::new(
        &settings.ledger.rpc_endpoint,
        &settings.ledger.signing_key,
        &settings.ledger.contract_address,
    )
    .await
    .context("failed to initialize ledger client - check RPC endpoint and signing key")?;
    let issuer_did = ledger_client.issuer_did();
    let ledger: Arc<dyn LedgerAnchor> = Arc::new(ledger_client);

    let publisher: Arc<dyn ContentPublisher> = Arc::new(
        PinningClient::new(&settings.pinning.endpoint, &settings.pinning.api_key)
            .context("failed to initialize pinning client")?,
    );

    let store: Arc<dyn SubmissionStore> = Arc::new(
        RestSubmissionStore::new(&settings.store.endpoint, &settings.store.api_key)
            .context("failed to initialize submission store client")?,
    );

    // Shared service components
    let state_machine = Arc::new(SubmissionStateMachine::new(store.clone()));
    let orchestrator = Arc::new(IssuanceOrchestrator::new(
        store.clone(),
        publisher,
        ledger,
        state_machine,
        issuer_did,
    ));

    let api_server = ApiServer::new(orchestrator, store);
    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .context("invalid listen address")?;
    log::info!("issuer API listening on http://{}", addr);
    api_server.run(addr).await
}
