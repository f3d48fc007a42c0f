// src/services/document_builder.rs
//! Credential document assembly.
//!
//! Builds the canonical credential document from an approved submission and
//! the issuer-supplied claims. Pure and deterministic: the issuance instant
//! is an argument, and no I/O happens here. Identical inputs always produce
//! an identical document (and therefore an identical fingerprint).

use crate::models::credential::CredentialDocument;
use crate::models::submission::Submission;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// Schema contexts carried by every issued credential.
const CONTEXTS: [&str; 2] = [
    "https://www.w3.org/2018/credentials/v1",
    "https://www.w3.org/2018/credentials/examples/v1",
];

/// Type tags carried by every issued credential.
const CREDENTIAL_TYPES: [&str; 2] = ["VerifiableCredential", "PensionerStatusCredential"];

/// Top-level credential fields an issuer-supplied claim must not shadow.
pub const RESERVED_CLAIM_KEYS: [&str; 4] = ["id", "type", "issuer", "issuanceDate"];

/// Errors produced while assembling a credential document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// A required submission field is missing or malformed
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    /// An issuer-supplied claim key shadows a reserved credential field
    #[error("claim key collides with reserved credential field: {0}")]
    ClaimKeyCollision(String),
}

fn validate(submission: &Submission) -> Result<(), BuildError> {
    if submission.full_name.trim().is_empty() {
        return Err(BuildError::InvalidSubmission(
            "full name must not be empty".to_string(),
        ));
    }
    if submission.national_id.trim().is_empty() {
        return Err(BuildError::InvalidSubmission(
            "national id must not be empty".to_string(),
        ));
    }
    // intake sends plain dates, older records carry full RFC 3339 instants
    let dob = &submission.date_of_birth;
    let parses = NaiveDate::parse_from_str(dob, "%Y-%m-%d").is_ok()
        || DateTime::parse_from_rfc3339(dob).is_ok();
    if !parses {
        return Err(BuildError::InvalidSubmission(format!(
            "date of birth is not a valid date: {}",
            dob
        )));
    }
    Ok(())
}

/// Assembles the canonical credential document for one issuance attempt.
///
/// # Arguments
/// * `submission` - The submission the credential attests to
/// * `issuer_claims` - Issuer-supplied claims merged into the subject
/// * `issuer_did` - DID of the anchoring account
/// * `issued_at` - Issuance instant, recorded once in the document
///
/// # Errors
/// `InvalidSubmission` when required submission fields are missing or the
/// date of birth does not parse; `ClaimKeyCollision` when a supplied claim
/// key shadows a reserved field.
pub fn build_credential_document(
    submission: &Submission,
    issuer_claims: &BTreeMap<String, serde_json::Value>,
    issuer_did: &str,
    issued_at: DateTime<Utc>,
) -> Result<CredentialDocument, BuildError> {
    validate(submission)?;

    for key in issuer_claims.keys() {
        if RESERVED_CLAIM_KEYS.contains(&key.as_str()) {
            return Err(BuildError::ClaimKeyCollision(key.clone()));
        }
    }

    let mut subject: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    subject.insert(
        "id".to_string(),
        serde_json::json!(format!("did:pension:user:{}", submission.id)),
    );
    subject.insert(
        "fullName".to_string(),
        serde_json::json!(submission.full_name),
    );
    subject.insert(
        "dateOfBirth".to_string(),
        serde_json::json!(submission.date_of_birth),
    );
    subject.insert(
        "nationalId".to_string(),
        serde_json::json!(submission.national_id),
    );
    for (key, value) in issuer_claims {
        subject.insert(key.clone(), value.clone());
    }

    Ok(CredentialDocument {
        context: CONTEXTS.iter().map(|c| c.to_string()).collect(),
        id: format!("http://example.gov/credentials/{}", submission.id),
        credential_type: CREDENTIAL_TYPES.iter().map(|t| t.to_string()).collect(),
        issuer: issuer_did.to_string(),
        issuance_date: issued_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        credential_subject: subject,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::submission::SubmissionStatus;
    use crate::utils::serialization::to_canonical_json;
    use chrono::TimeZone;

    fn pending_submission() -> Submission {
        Submission {
            id: "u1".to_string(),
            full_name: "Jane Doe".to_string(),
            date_of_birth: "1975-05-15".to_string(),
            national_id: "A12345678".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            status: SubmissionStatus::Pending,
        }
    }

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    fn claims() -> BTreeMap<String, serde_json::Value> {
        let mut claims = BTreeMap::new();
        claims.insert(
            "pensionerStatus".to_string(),
            serde_json::json!("Verified"),
        );
        claims.insert("kycLevel".to_string(), serde_json::json!("Full"));
        claims
    }

    #[test]
    fn builds_a_complete_document() {
        let document = build_credential_document(
            &pending_submission(),
            &claims(),
            "did:pension:0xabc",
            issued_at(),
        )
        .unwrap();

        assert_eq!(document.id, "http://example.gov/credentials/u1");
        assert_eq!(
            document.credential_type,
            vec!["VerifiableCredential", "PensionerStatusCredential"]
        );
        assert_eq!(document.issuer, "did:pension:0xabc");
        assert_eq!(document.issuance_date, "2026-02-01T12:00:00.000Z");

        let subject = &document.credential_subject;
        assert_eq!(subject["id"], "did:pension:user:u1");
        assert_eq!(subject["fullName"], "Jane Doe");
        assert_eq!(subject["pensionerStatus"], "Verified");
        assert_eq!(subject["kycLevel"], "Full");
    }

    #[test]
    fn empty_full_name_is_invalid() {
        let mut submission = pending_submission();
        submission.full_name = "   ".to_string();
        let err = build_credential_document(&submission, &claims(), "did:pension:0xabc", issued_at())
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidSubmission(_)));
    }

    #[test]
    fn unparseable_date_of_birth_is_invalid() {
        let mut submission = pending_submission();
        submission.date_of_birth = "15/05/1975".to_string();
        let err = build_credential_document(&submission, &claims(), "did:pension:0xabc", issued_at())
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidSubmission(_)));
    }

    #[test]
    fn rfc3339_date_of_birth_is_accepted() {
        let mut submission = pending_submission();
        submission.date_of_birth = "1975-05-15T00:00:00.000Z".to_string();
        assert!(
            build_credential_document(&submission, &claims(), "did:pension:0xabc", issued_at())
                .is_ok()
        );
    }

    #[test]
    fn reserved_claim_keys_are_refused() {
        for reserved in RESERVED_CLAIM_KEYS {
            let mut bad = claims();
            bad.insert(reserved.to_string(), serde_json::json!("shadowed"));
            let err = build_credential_document(
                &pending_submission(),
                &bad,
                "did:pension:0xabc",
                issued_at(),
            )
            .unwrap_err();
            assert_eq!(err, BuildError::ClaimKeyCollision(reserved.to_string()));
        }
    }

    #[test]
    fn identical_inputs_yield_identical_canonical_bytes() {
        let first = build_credential_document(
            &pending_submission(),
            &claims(),
            "did:pension:0xabc",
            issued_at(),
        )
        .unwrap();
        let second = build_credential_document(
            &pending_submission(),
            &claims(),
            "did:pension:0xabc",
            issued_at(),
        )
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            to_canonical_json(&first).unwrap(),
            to_canonical_json(&second).unwrap()
        );
    }
}
