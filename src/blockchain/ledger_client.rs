// src/blockchain/ledger_client.rs
//! zkSync ledger anchor client.
//!
//! Submits signed transactions that record credential fingerprints in the
//! VCRegistry contract. The completion criterion is network acceptance: the
//! transaction hash returned once the node takes the transaction, not full
//! confirmation.
//!
//! Anchoring is irreversible. A digest that is already recorded is reported
//! as [`AnchorOutcome::AlreadyAnchored`] rather than an error, so a retried
//! or raced anchor attempt converges on success instead of double-anchoring.

use anyhow::Context;
use async_trait::async_trait;
use ethers_contract::BaseContract;
use ethers_core::{
    abi::Abi,
    types::{Address, H256, U256},
    utils::hex,
};
use k256::{ecdsa::SigningKey, elliptic_curve::generic_array::GenericArray};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use zksync_web3_rs::{
    contract::Contract,
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::{Signer, Wallet},
    zks_wallet::ZKSWallet,
};

/// VCRegistry contract ABI (anchorVC / isAnchored).
const REGISTRY_ABI: &[u8] = include_bytes!("../abi/VCRegistry.json");

/// Fixed gas limit for anchor transactions.
const ANCHOR_GAS_LIMIT: u64 = 3_000_000;

/// Timeout for one ledger submission. Transaction propagation is slow
/// compared to the content store, so this window is long.
const LEDGER_TIMEOUT: Duration = Duration::from_secs(60);

/// Total submission attempts (initial call plus retries).
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay between submission attempts: 500ms, 1s.
const BASE_DELAY_MS: u64 = 500;

/// Errors surfaced by the ledger anchor client.
#[derive(Debug, Error)]
pub enum AnchorError {
    /// RPC or network failure; retried with backoff before being surfaced
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The registry contract reverted the anchor; permanent
    #[error("ledger rejected anchor: {0}")]
    Rejected(String),
}

/// Result of one anchor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorOutcome {
    /// The network accepted our anchor transaction
    Submitted(H256),
    /// The digest was already recorded on the registry; treated as success
    AlreadyAnchored,
}

/// Records credential fingerprints on an immutable ledger.
#[async_trait]
pub trait LedgerAnchor: Send + Sync {
    /// Anchors `digest` in the registry, returning once the network accepts
    /// the transaction or the digest is found to be already recorded.
    async fn anchor(&self, digest: [u8; 32]) -> Result<AnchorOutcome, AnchorError>;
}

/// Splits chain errors into permanent rejections and transient failures.
///
/// A revert means the contract itself refused the call; anything else
/// (connection failures, timeouts, nonce races at the RPC layer) is worth
/// retrying.
fn classify_chain_error(detail: String) -> AnchorError {
    let lowered = detail.to_lowercase();
    if lowered.contains("revert") {
        AnchorError::Rejected(detail)
    } else {
        AnchorError::Unavailable(detail)
    }
}

/// zkSync client holding the issuer wallet and the registry address.
///
/// Configuration (`rpc_endpoint`, `signing_key`, `contract_address`) is
/// injected at construction; the client is built once at startup and shared
/// by reference across the pipeline.
pub struct LedgerClient {
    /// zkSync RPC provider (read path)
    provider: Arc<Provider<Http>>,
    /// zkSync wallet with signing capabilities (write path)
    wallet: ZKSWallet<SignerMiddleware<Arc<Provider<Http>>, Wallet<SigningKey>>, SigningKey>,
    /// Address of the VCRegistry contract
    contract_address: Address,
    /// Parsed registry ABI, loaded once
    registry: BaseContract,
}

impl LedgerClient {
    /// Creates a new ledger client.
    ///
    /// # Arguments
    /// * `rpc_endpoint` - zkSync RPC endpoint URL
    /// * `signing_key` - Hex-encoded issuer private key (with or without 0x prefix)
    /// * `contract_address` - Hex string of the VCRegistry contract address
    ///
    /// # Errors
    /// Returns an error if the RPC connection fails, the signing key is
    /// invalid, the chain id cannot be retrieved, or the wallet cannot be
    /// initialized.
    pub async fn new(
        rpc_endpoint: &str,
        signing_key: &str,
        contract_address: &str,
    ) -> anyhow::Result<Self> {
        let provider = Arc::new(
            Provider::<Http>::try_from(rpc_endpoint).context("invalid ledger RPC endpoint")?,
        );
        let key_bytes = hex::decode(signing_key.trim_start_matches("0x"))
            .context("signing key is not valid hex")?;
        let signing_key = SigningKey::from_bytes(GenericArray::from_slice(&key_bytes))
            .context("signing key is not a valid secp256k1 key")?;

        // Create Ethereum wallet with chain ID
        let chain_id = provider
            .get_chainid()
            .await
            .context("failed to query chain id")?
            .as_u64();
        let l2_wallet = Wallet::from(signing_key.clone()).with_chain_id(chain_id);

        // Create middleware for signer
        let signer_middleware = SignerMiddleware::new(provider.clone(), l2_wallet.clone());

        // Create ZKSync wallet with signer middleware
        let wallet = ZKSWallet::new(
            l2_wallet,
            None,                            // L1 wallet
            Some(signer_middleware.clone()), // era provider
            None,                            // eth provider
        )?;

        let contract_address: Address = contract_address
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid registry contract address: {}", e))?;
        let registry =
            BaseContract::from(Abi::load(REGISTRY_ABI).context("failed to load registry ABI")?);

        let client = LedgerClient {
            provider,
            wallet,
            contract_address,
            registry,
        };
        log::info!(
            "ledger client connected to chain {} as issuer {}",
            chain_id,
            client.issuer_did()
        );
        Ok(client)
    }

    /// Gets the issuer wallet's L2 (zkSync) address.
    pub fn issuer_address(&self) -> Address {
        self.wallet.l2_address()
    }

    /// DID of the anchoring account, used as the credential issuer identifier.
    pub fn issuer_did(&self) -> String {
        format!("did:pension:0x{:x}", self.issuer_address())
    }

    /// Queries the registry for an existing anchor of `digest`.
    pub async fn is_anchored(&self, digest: [u8; 32]) -> Result<bool, AnchorError> {
        let contract = Contract::new(
            self.contract_address,
            self.registry.clone(),
            self.provider.clone(),
        );
        contract
            .method::<_, bool>("isAnchored", H256::from(digest))
            .map_err(|e| AnchorError::Rejected(format!("registry ABI error: {}", e)))?
            .call()
            .await
            .map_err(|e| classify_chain_error(e.to_string()))
    }

    /// Submits one anchor transaction, without retry or duplicate handling.
    async fn submit_anchor(&self, digest: [u8; 32]) -> Result<H256, AnchorError> {
        let era_provider = self
            .wallet
            .get_era_provider()
            .map_err(|e| AnchorError::Unavailable(e.to_string()))?
            .clone();
        let contract = Contract::new(self.contract_address, self.registry.clone(), era_provider);

        contract
            .method::<_, H256>("anchorVC", H256::from(digest))
            .map_err(|e| AnchorError::Rejected(format!("registry ABI error: {}", e)))?
            .gas(U256::from(ANCHOR_GAS_LIMIT))
            .send()
            .await
            .map(|tx| tx.tx_hash())
            .map_err(|e| classify_chain_error(e.to_string()))
    }
}

#[async_trait]
impl LedgerAnchor for LedgerClient {
    async fn anchor(&self, digest: [u8; 32]) -> Result<AnchorOutcome, AnchorError> {
        log::info!(
            "anchoring fingerprint 0x{} on registry 0x{:x}",
            hex::encode(digest),
            self.contract_address
        );

        // An already-recorded digest is success, not an error. This also
        // covers a prior attempt that crashed after submission.
        match self.is_anchored(digest).await {
            Ok(true) => {
                log::warn!("fingerprint already anchored, skipping submission");
                return Ok(AnchorOutcome::AlreadyAnchored);
            }
            Ok(false) => {}
            Err(e) => log::debug!("duplicate pre-check failed, proceeding to submit: {}", e),
        }

        let mut last_failure = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt - 1));
                tokio::time::sleep(delay).await;
            }
            match tokio::time::timeout(LEDGER_TIMEOUT, self.submit_anchor(digest)).await {
                Ok(Ok(tx_hash)) => {
                    log::info!("anchor transaction submitted with hash: 0x{:x}", tx_hash);
                    return Ok(AnchorOutcome::Submitted(tx_hash));
                }
                Ok(Err(AnchorError::Rejected(detail))) => {
                    // A revert can mean the digest was anchored between our
                    // pre-check and this submission (possibly by our own
                    // earlier, timed-out attempt). Re-check before failing.
                    if let Ok(true) = self.is_anchored(digest).await {
                        log::warn!("anchor revert explained by existing anchor, treating as success");
                        return Ok(AnchorOutcome::AlreadyAnchored);
                    }
                    return Err(AnchorError::Rejected(detail));
                }
                Ok(Err(AnchorError::Unavailable(detail))) => {
                    log::warn!(
                        "anchor attempt {}/{} failed, will retry: {}",
                        attempt + 1,
                        MAX_ATTEMPTS,
                        detail
                    );
                    last_failure = detail;
                }
                Err(_) => {
                    log::warn!(
                        "anchor attempt {}/{} timed out after {:?}",
                        attempt + 1,
                        MAX_ATTEMPTS,
                        LEDGER_TIMEOUT
                    );
                    last_failure = format!("submission timed out after {:?}", LEDGER_TIMEOUT);
                }
            }
        }
        Err(AnchorError::Unavailable(last_failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_messages_are_permanent_rejections() {
        let err = classify_chain_error("execution reverted: VC already anchored".to_string());
        assert!(matches!(err, AnchorError::Rejected(_)));

        let err = classify_chain_error("Contract call reverted".to_string());
        assert!(matches!(err, AnchorError::Rejected(_)));
    }

    #[test]
    fn transport_failures_are_transient() {
        let err = classify_chain_error("connection refused".to_string());
        assert!(matches!(err, AnchorError::Unavailable(_)));

        let err = classify_chain_error("request timed out".to_string());
        assert!(matches!(err, AnchorError::Unavailable(_)));
    }
}
