// src/models/credential.rs
//! Verifiable Credential data model implementation.
//!
//! Defines the canonical credential document published off-chain and the
//! anchor record describing one completed issuance, following the
//! [W3C Verifiable Credentials Data Model](https://www.w3.org/TR/vc-data-model/).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The canonical credential document.
///
/// This is the exact representation that is published to the content store
/// and whose serialization is fingerprinted for the on-chain anchor. The
/// struct field order below IS the canonical field order, and the subject
/// claims are a `BTreeMap` so their keys serialize sorted; see
/// `utils::serialization::to_canonical_json`.
///
/// A document is immutable once built. Changing any input (including the
/// issuance instant) requires building a new document, which yields a new
/// fingerprint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialDocument {
    /// Ordered schema context URIs
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// Credential identifier URI, derived from the submission id
    pub id: String,

    /// Ordered credential type tags, always including `VerifiableCredential`
    #[serde(rename = "type")]
    pub credential_type: Vec<String>,

    /// DID of the issuing account
    pub issuer: String,

    /// RFC 3339 instant, set once when the document is built
    #[serde(rename = "issuanceDate")]
    pub issuance_date: String,

    /// Subject claims: submission-derived and issuer-supplied fields,
    /// keyed by claim name, serialized in sorted key order
    #[serde(rename = "credentialSubject")]
    pub credential_subject: BTreeMap<String, serde_json::Value>,
}

/// The durable result of one completed issuance.
///
/// Created only after the content publish, the ledger anchor, and the local
/// status commit have all succeeded (or, for reconciliation, after the first
/// two have). At most one anchor record exists per submission; re-running
/// issuance for an already-issued submission returns the existing record
/// unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    /// Submission this credential was issued for
    pub submission_id: String,

    /// Content-addressed locator (CID) of the published document
    pub content_locator: String,

    /// Hex-encoded Keccak-256 digest of the canonical document
    pub fingerprint: String,

    /// Identifier of the ledger transaction that recorded the fingerprint
    pub transaction_id: String,

    /// When the issuance completed
    pub completed_at: DateTime<Utc>,
}
