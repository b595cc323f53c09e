//! Submit stage: send the final draft bound to its extraction id.

use crate::api::{self, SubmitRequest, SubmitResponse};
use crate::error::WorkflowError;
use crate::model::{Fields, SubmissionOutcome, SubmissionStatus};
use crate::transport::{ApiRequest, Transport};
use tracing::{info, warn};

/// Submit `draft` for `job_id`.
///
/// A 2xx answer whose `status` is anything other than `submitted` comes back
/// as [`SubmissionStatus::Rejected`] rather than an error.
pub async fn submit(
    transport: &dyn Transport,
    job_id: &str,
    draft: &Fields,
) -> Result<SubmissionOutcome, WorkflowError> {
    info!("Submitting {} fields for {}", draft.len(), job_id);
    let request = ApiRequest::post_json(
        api::SUBMIT_PATH,
        &SubmitRequest {
            extraction_id: job_id,
            data: draft,
        },
    )?;
    let response = transport.send(request).await?;
    let body: SubmitResponse = response.json()?;

    let status = if body.status.trim().eq_ignore_ascii_case("submitted") {
        SubmissionStatus::Submitted
    } else {
        warn!("Submission for {} not accepted: status '{}'", job_id, body.status);
        SubmissionStatus::Rejected
    };

    // The service echoes the id; fall back to ours if it sends an empty one.
    let extraction_id = if body.extraction_id.trim().is_empty() {
        job_id.to_string()
    } else {
        body.extraction_id
    };

    Ok(SubmissionOutcome {
        status,
        extraction_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::{ApiResponse, RequestBody};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: serde_json::Value,
        seen: Mutex<Vec<ApiRequest>>,
    }

    impl Canned {
        fn new(reply: serde_json::Value) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            let path = request.path.clone();
            self.seen.lock().unwrap().push(request);
            Ok(ApiResponse::json_body(path, &self.reply))
        }
    }

    fn draft() -> Fields {
        Fields::from([("name".to_string(), "Anna".to_string())])
    }

    #[tokio::test]
    async fn submitted_status_is_accepted() {
        let t = Canned::new(serde_json::json!({"status": "submitted", "extraction_id": "ex-1"}));
        let outcome = submit(&t, "ex-1", &draft()).await.unwrap();
        assert!(outcome.is_submitted());
        assert_eq!(outcome.extraction_id, "ex-1");

        let seen = t.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "/api/submit");
        assert_eq!(
            seen[0].body,
            RequestBody::Json(serde_json::json!({"extraction_id": "ex-1", "data": {"name": "Anna"}}))
        );
    }

    #[tokio::test]
    async fn other_status_is_rejected() {
        let t = Canned::new(serde_json::json!({"status": "duplicate", "extraction_id": "ex-1"}));
        let outcome = submit(&t, "ex-1", &draft()).await.unwrap();
        assert_eq!(outcome.status, SubmissionStatus::Rejected);
    }

    #[tokio::test]
    async fn missing_id_in_response_is_a_decode_error() {
        let t = Canned::new(serde_json::json!({"status": "submitted"}));
        let err = submit(&t, "ex-1", &draft()).await.unwrap_err();
        assert!(matches!(
            err.transport(),
            Some(TransportError::Decode { .. })
        ));
    }
}
