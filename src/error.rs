//! Error types for the visai-client library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`TransportError`]: a single HTTP exchange failed. Either nothing came
//!   back (`Network`), the service answered with a non-2xx status (`Http`), or
//!   a 2xx body did not have the documented shape (`Decode`). The transport
//!   never retries; whoever invoked it decides what happens next.
//!
//! * [`WorkflowError`]: a workflow operation could not complete. Wraps
//!   [`TransportError`] unchanged and adds the preconditions the workflow
//!   itself enforces (busy stage, missing job or draft, superseded job).
//!
//! Validation failures are **not** errors: they come back as data in
//! [`crate::model::VerificationOutcome::errors`].

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of one request/response exchange with the extraction service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a response (DNS, refused connection, reset).
    #[error("{method} {path}: network error: {reason}")]
    Network {
        method: String,
        path: String,
        reason: String,
    },

    /// The service answered with a non-2xx status.
    #[error("{path}: HTTP {status}{}", body_suffix(.body))]
    Http {
        status: u16,
        path: String,
        body: String,
    },

    /// A 2xx response whose body is not the expected JSON document.
    #[error("{path}: malformed response body: {reason}")]
    Decode { path: String, reason: String },
}

fn body_suffix(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.chars().count() > 200 {
        format!(": {}…", trimmed.chars().take(200).collect::<String>())
    } else {
        format!(": {trimmed}")
    }
}

impl TransportError {
    /// HTTP status code, when the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// `true` when no response reached the client.
    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network { .. })
    }
}

/// Workflow stages guarded by a busy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Verify,
    Submit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Upload => "upload",
            Stage::Verify => "verify",
            Stage::Submit => "submit",
        })
    }
}

/// All errors returned by [`crate::workflow::Workflow`] operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    // ── Transport ─────────────────────────────────────────────────────────
    /// The underlying HTTP exchange failed; surfaced unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service answered 2xx but the content breaks a client invariant
    /// (e.g. an empty or reused extraction id).
    #[error("Invalid response from extraction service: {detail}")]
    InvalidResponse { detail: String },

    // ── Preconditions ─────────────────────────────────────────────────────
    /// The same stage already has a request in flight.
    #[error("A {stage} request is already in flight")]
    Busy { stage: Stage },

    /// No extraction job exists yet; upload a document first.
    #[error("No extraction job: upload a document first")]
    NoJob,

    /// No draft exists yet; wait for extraction data to arrive.
    #[error("No draft yet: extraction data has not arrived")]
    NoDraft,

    /// The job this request belonged to was replaced before the response
    /// arrived; the response was discarded.
    #[error("Response for job '{job_id}' discarded: job was superseded by a new upload")]
    Superseded { job_id: String },

    /// Resubmission is disabled and this job was already submitted.
    #[error("Job '{job_id}' was already submitted")]
    AlreadySubmitted { job_id: String },

    // ── Input file ────────────────────────────────────────────────────────
    /// Upload file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file failed for another reason.
    #[error("Failed to read '{path}': {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Strict file-type checking is on and the file is not an image or PDF.
    #[error("Unsupported file '{path}': {reason}\nAccepted types: .jpg, .jpeg, .png, .pdf")]
    UnsupportedFile { path: PathBuf, reason: String },

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl WorkflowError {
    /// The transport failure behind this error, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            WorkflowError::Transport(e) => Some(e),
            _ => None,
        }
    }
}
