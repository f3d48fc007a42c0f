// src/config.rs
//! Layered configuration for the pipeline.
//!
//! Settings come from the process environment (a `.env` file is loaded
//! first in `main`). Variables use the `PIPELINE` prefix with `__` between
//! nesting levels, e.g.:
//!
//! - `PIPELINE_LEDGER__RPC_ENDPOINT`
//! - `PIPELINE_LEDGER__SIGNING_KEY`
//! - `PIPELINE_LEDGER__CONTRACT_ADDRESS`
//! - `PIPELINE_PINNING__ENDPOINT`
//! - `PIPELINE_PINNING__API_KEY`
//! - `PIPELINE_STORE__ENDPOINT`
//! - `PIPELINE_STORE__API_KEY`
//! - `PIPELINE_LISTEN_ADDR` (optional, default `127.0.0.1:3001`)

// leading :: disambiguates the config crate from this module
use ::config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Ledger anchor client configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LedgerSettings {
    /// zkSync RPC endpoint URL
    pub rpc_endpoint: String,
    /// Hex-encoded issuer signing key
    pub signing_key: String,
    /// VCRegistry contract address
    pub contract_address: String,
}

/// Pinning service configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct PinningSettings {
    /// Pinning API base URL
    pub endpoint: String,
    /// Pinning API key (JWT)
    pub api_key: String,
}

/// Submission record store configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    /// Record store base URL
    pub endpoint: String,
    /// Record store API key
    pub api_key: String,
}

/// Complete pipeline configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub ledger: LedgerSettings,
    pub pinning: PinningSettings,
    pub store: StoreSettings,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3001".to_string()
}

impl Settings {
    /// Loads settings from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("PIPELINE").separator("__"))
            .build()?
            .try_deserialize()
    }
}
