// src/utils/crypto.rs
//! Cryptographic utilities optimized for blockchain compatibility.
//!
//! Uses Keccak-256 (Ethereum's standard hash function) so digests computed
//! here compare equal to what the registry contract sees on-chain.

use ethers::utils::keccak256;
use ethers_core::utils::hex;

/// Computes the Keccak-256 fingerprint of a canonical document serialization.
///
/// # Arguments
/// * `data` - Canonical bytes to hash (see `utils::serialization`)
///
/// # Returns
/// Fixed-size 32-byte array (`[u8; 32]`) containing the digest.
///
/// Any correct Keccak-256 implementation produces bit-identical output for
/// the same input, which is what allows the digest to be compared against
/// the value recorded on the ledger.
pub fn fingerprint(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Formats a fingerprint as a 0x-prefixed lowercase hex string.
pub fn fingerprint_hex(digest: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(digest))
}
