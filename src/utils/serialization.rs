// src/utils/serialization.rs
//! Canonical serialization for credential documents.
//!
//! The same byte sequence must be published to the content store and fed to
//! the fingerprint function; if the two paths ever disagree, the on-chain
//! digest no longer proves anything about the published content. All
//! serialization for publishing and hashing therefore goes through
//! [`to_canonical_json`], and the orchestrator serializes exactly once.

use crate::models::credential::CredentialDocument;

/// Serializes a credential document to its canonical JSON form.
///
/// Canonicalization rule:
/// - fields appear in `CredentialDocument` declaration order
///   (`@context`, `id`, `type`, `issuer`, `issuanceDate`, `credentialSubject`)
/// - subject claims serialize in sorted key order (`BTreeMap` iteration order)
/// - compact separators, no insignificant whitespace
/// - UTF-8 output
///
/// Two semantically identical documents always produce byte-identical output.
pub fn to_canonical_json(document: &CredentialDocument) -> Result<String, serde_json::Error> {
    serde_json::to_string(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample_document(claims: BTreeMap<String, serde_json::Value>) -> CredentialDocument {
        CredentialDocument {
            context: vec!["https://www.w3.org/2018/credentials/v1".to_string()],
            id: "http://example.gov/credentials/u1".to_string(),
            credential_type: vec![
                "VerifiableCredential".to_string(),
                "PensionerStatusCredential".to_string(),
            ],
            issuer: "did:pension:0x00".to_string(),
            issuance_date: "2026-01-01T00:00:00.000Z".to_string(),
            credential_subject: claims,
        }
    }

    #[test]
    fn canonical_form_is_compact_and_ordered() {
        let mut claims = BTreeMap::new();
        claims.insert("fullName".to_string(), serde_json::json!("Jane Doe"));
        let json = to_canonical_json(&sample_document(claims)).unwrap();

        assert!(json.starts_with("{\"@context\":["));
        assert!(!json.contains('\n'));
        assert!(!json.contains(": "));
        // field order is fixed by struct declaration order
        let id_pos = json.find("\"id\"").unwrap();
        let type_pos = json.find("\"type\"").unwrap();
        let issuer_pos = json.find("\"issuer\"").unwrap();
        assert!(id_pos < type_pos && type_pos < issuer_pos);
    }

    #[test]
    fn claim_insertion_order_does_not_change_canonical_bytes() {
        let mut forward = BTreeMap::new();
        forward.insert("alpha".to_string(), serde_json::json!(1));
        forward.insert("zeta".to_string(), serde_json::json!(2));

        let mut reverse = BTreeMap::new();
        reverse.insert("zeta".to_string(), serde_json::json!(2));
        reverse.insert("alpha".to_string(), serde_json::json!(1));

        let a = to_canonical_json(&sample_document(forward)).unwrap();
        let b = to_canonical_json(&sample_document(reverse)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_serialization_is_deterministic() {
        let mut claims = BTreeMap::new();
        claims.insert("kycLevel".to_string(), serde_json::json!("Full"));
        let document = sample_document(claims);

        let first = to_canonical_json(&document).unwrap();
        let second = to_canonical_json(&document).unwrap();
        assert_eq!(first, second);
    }
}
