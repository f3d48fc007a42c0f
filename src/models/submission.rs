// src/models/submission.rs
//! Identity submission data model.
//!
//! A submission is one identity-verification request owned by the external
//! record store. The pipeline reads submissions and requests status
//! transitions through the conditional-update primitive; it never mutates
//! submission fields directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an identity submission.
///
/// `Pending` is the only state issuance may start from. `Approving` is a
/// transient, orchestration-internal state held for the duration of one
/// issuance attempt. `Approved` and `Rejected` are terminal.
/// `ApprovedNeedsReconciliation` marks a submission whose credential was
/// anchored on the ledger but whose local status update failed; it is
/// resolved out-of-band, never by re-running issuance.
///
/// The status is a fixed enumeration validated at every read and write
/// boundary, so stored values are always one of the strings below.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionStatus {
    /// Awaiting an issuer decision
    Pending,
    /// An issuance attempt holds the lease for this submission
    Approving,
    /// Credential issued and anchored; terminal
    Approved,
    /// Declined by the issuer; terminal
    Rejected,
    /// Ledger anchor succeeded but the local commit did not
    ApprovedNeedsReconciliation,
}

impl SubmissionStatus {
    /// Returns true for states no further transition may leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Approved | SubmissionStatus::Rejected)
    }

    /// Canonical wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Approving => "approving",
            SubmissionStatus::Approved => "approved",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::ApprovedNeedsReconciliation => "approved-needs-reconciliation",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "approving" => Ok(SubmissionStatus::Approving),
            "approved" => Ok(SubmissionStatus::Approved),
            "rejected" => Ok(SubmissionStatus::Rejected),
            "approved-needs-reconciliation" => Ok(SubmissionStatus::ApprovedNeedsReconciliation),
            other => Err(format!("unknown submission status: {}", other)),
        }
    }
}

/// One identity-verification request as stored in the record store.
///
/// # Fields
/// - `id`: opaque unique identifier assigned at intake
/// - `full_name`: legal name of the subject
/// - `date_of_birth`: date string as received from intake (`YYYY-MM-DD`)
/// - `national_id`: government identity number
/// - `created_at`: intake timestamp
/// - `status`: current lifecycle status
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Opaque unique identifier for the submission
    pub id: String,

    /// Legal full name of the subject
    pub full_name: String,

    /// Date of birth as submitted (validated when a document is built)
    pub date_of_birth: String,

    /// National identity number
    pub national_id: String,

    /// When the submission was received
    pub created_at: DateTime<Utc>,

    /// Current lifecycle status
    pub status: SubmissionStatus,
}
