//! Wire types for the extraction service's HTTP API.
//!
//! ```text
//! POST /api/upload               multipart `file`        → UploadResponse
//! GET  /api/result/{id}                                  → ResultResponse
//! POST /api/verify               VerifyRequest (JSON)    → VerifyResponse
//! POST /api/submit               SubmitRequest (JSON)    → SubmitResponse
//! GET  /health                                           → HealthResponse
//! ```
//!
//! Responses tolerate extra fields; the service echoes more than the client
//! needs (e.g. `status` on upload, `data` on verify).

use crate::model::{ExtractionResult, ExtractionStatus, Fields};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UPLOAD_PATH: &str = "/api/upload";
pub const VERIFY_PATH: &str = "/api/verify";
pub const SUBMIT_PATH: &str = "/api/submit";
pub const HEALTH_PATH: &str = "/health";

/// Multipart field name carrying the document.
pub const UPLOAD_FIELD: &str = "file";

/// Path of the status endpoint for one extraction.
pub fn result_path(extraction_id: &str) -> String {
    format!("/api/result/{extraction_id}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub extraction_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultResponse {
    pub status: String,
    #[serde(default)]
    pub raw_text: Option<String>,
    /// OCR leaves fields it could not find as `null`.
    #[serde(default)]
    pub data: Option<BTreeMap<String, Option<String>>>,
}

impl From<ResultResponse> for ExtractionResult {
    fn from(r: ResultResponse) -> Self {
        ExtractionResult {
            status: ExtractionStatus::parse(&r.status),
            raw_text: r.raw_text,
            data: r.data.map(|d| {
                d.into_iter()
                    .map(|(k, v)| (k, v.unwrap_or_default()))
                    .collect::<Fields>()
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest<'a> {
    pub data: &'a Fields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitRequest<'a> {
    pub extraction_id: &'a str,
    pub data: &'a Fields,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub extraction_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
