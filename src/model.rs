//! Domain entities produced and consumed by the workflow stages.
//!
//! These are the client's view of an extraction, independent of the wire
//! format in [`crate::api`]. Every type here is `Serialize` so callers can
//! dump a [`crate::workflow::WorkflowSnapshot`] as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field-name → value mapping used for extracted data and the draft.
///
/// `BTreeMap` keeps a stable key order in logs and JSON output.
pub type Fields = BTreeMap<String, String>;

/// Conventional fields of a travel-document extraction, in display order.
///
/// The field set is open: the service may return more, and the draft keeps
/// whatever arrives.
pub const KNOWN_FIELDS: [&str; 4] = ["name", "passport_number", "dob", "expiry_date"];

/// One document-to-structured-data request, identified by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionJob {
    /// Opaque identifier assigned by the service. Never empty.
    pub id: String,
    /// When the upload that created this job settled on the client.
    pub created_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Extraction status as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// OCR is still running; poll again.
    Processing,
    /// OCR finished.
    Done,
    /// OCR failed. Carries the service's detail when it sent one.
    Failed(Option<String>),
}

impl ExtractionStatus {
    /// Parse the service's status string.
    ///
    /// Besides the documented `processing`/`done`/`failed`, the service
    /// reports `completed` on success and `error: <detail>` on failure.
    /// Anything unrecognised is treated as a failure so polling always ends.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        match s.to_ascii_lowercase().as_str() {
            "processing" => ExtractionStatus::Processing,
            "done" | "completed" | "submitted" => ExtractionStatus::Done,
            "failed" | "error" => ExtractionStatus::Failed(None),
            lower if lower.starts_with("error:") => {
                let detail = s["error:".len()..].trim();
                ExtractionStatus::Failed((!detail.is_empty()).then(|| detail.to_string()))
            }
            _ => ExtractionStatus::Failed(Some(format!("unrecognised status '{s}'"))),
        }
    }

    /// `true` for any status after which polling stops permanently.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExtractionStatus::Processing)
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Processing => f.write_str("processing"),
            ExtractionStatus::Done => f.write_str("done"),
            ExtractionStatus::Failed(None) => f.write_str("failed"),
            ExtractionStatus::Failed(Some(d)) => write!(f, "failed ({d})"),
        }
    }
}

/// One poll response. Each newer result supersedes the previous one in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub status: ExtractionStatus,
    pub raw_text: Option<String>,
    pub data: Option<Fields>,
}

impl ExtractionResult {
    pub fn processing() -> Self {
        Self {
            status: ExtractionStatus::Processing,
            raw_text: None,
            data: None,
        }
    }

    /// `true` when the result carries at least one extracted field.
    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_empty())
    }
}

/// Outcome of one verify request. Transient: the workflow keeps only the
/// most recent one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub valid: bool,
    /// Field name → human-readable message. Empty when `valid`.
    pub errors: BTreeMap<String, String>,
}

/// Terminal status of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Submitted,
    /// The service answered 2xx with a status other than `submitted`.
    Rejected,
}

/// Result of submitting a draft for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    pub extraction_id: String,
}

impl SubmissionOutcome {
    pub fn is_submitted(&self) -> bool {
        self.status == SubmissionStatus::Submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_statuses() {
        assert_eq!(ExtractionStatus::parse("processing"), ExtractionStatus::Processing);
        assert_eq!(ExtractionStatus::parse("done"), ExtractionStatus::Done);
        assert_eq!(ExtractionStatus::parse("failed"), ExtractionStatus::Failed(None));
    }

    #[test]
    fn parses_service_variants() {
        assert_eq!(ExtractionStatus::parse("completed"), ExtractionStatus::Done);
        assert_eq!(ExtractionStatus::parse(" Processing "), ExtractionStatus::Processing);
        assert_eq!(
            ExtractionStatus::parse("error: Unable to read image"),
            ExtractionStatus::Failed(Some("Unable to read image".into()))
        );
        assert_eq!(ExtractionStatus::parse("error:"), ExtractionStatus::Failed(None));
    }

    #[test]
    fn unknown_status_is_terminal() {
        let s = ExtractionStatus::parse("exploded");
        assert!(s.is_terminal());
        assert!(s.to_string().contains("exploded"));
        // Only `processing` keeps a job alive.
        assert!(ExtractionStatus::parse("pending").is_terminal());
        assert!(ExtractionStatus::parse("queued").is_terminal());
    }

    #[test]
    fn only_processing_is_non_terminal() {
        assert!(!ExtractionStatus::Processing.is_terminal());
        assert!(ExtractionStatus::Done.is_terminal());
        assert!(ExtractionStatus::Failed(None).is_terminal());
    }

    #[test]
    fn has_data_requires_a_field() {
        let mut r = ExtractionResult::processing();
        assert!(!r.has_data());
        r.data = Some(Fields::new());
        assert!(!r.has_data());
        r.data = Some(Fields::from([("name".to_string(), "Ana".to_string())]));
        assert!(r.has_data());
    }
}
