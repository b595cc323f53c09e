//! Verify stage: ask the service to validate a point-in-time copy of the draft.
//!
//! Verification is advisory. A `valid: false` answer is data, not an error,
//! and never gates submission.

use crate::api::{self, VerifyRequest, VerifyResponse};
use crate::error::WorkflowError;
use crate::model::{Fields, VerificationOutcome};
use crate::transport::{ApiRequest, Transport};
use tracing::{debug, info};

/// Send `draft` for validation.
pub async fn verify(
    transport: &dyn Transport,
    draft: &Fields,
) -> Result<VerificationOutcome, WorkflowError> {
    debug!("Verifying draft with {} fields", draft.len());
    let request = ApiRequest::post_json(api::VERIFY_PATH, &VerifyRequest { data: draft })?;
    let response = transport.send(request).await?;
    let body: VerifyResponse = response.json()?;

    if body.valid {
        info!("Draft verified");
    } else {
        info!("Draft has {} validation error(s)", body.errors.len());
    }
    Ok(VerificationOutcome {
        valid: body.valid,
        errors: body.errors,
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
        reply: Result<serde_json::Value, TransportError>,
        seen: Mutex<Option<ApiRequest>>,
    }

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            let path = request.path.clone();
            *self.seen.lock().unwrap() = Some(request);
            self.reply.clone().map(|v| ApiResponse::json_body(path, &v))
        }
    }

    fn draft() -> Fields {
        Fields::from([
            ("name".to_string(), String::new()),
            ("passport_number".to_string(), "X1".to_string()),
        ])
    }

    #[tokio::test]
    async fn invalid_outcome_is_data() {
        let t = Canned {
            reply: Ok(serde_json::json!({"valid": false, "errors": {"name": "required"}})),
            seen: Mutex::new(None),
        };
        let d = draft();
        let outcome = verify(&t, &d).await.unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.errors["name"], "required");

        let sent = t.seen.lock().unwrap().take().unwrap();
        assert_eq!(sent.path, "/api/verify");
        assert_eq!(
            sent.body,
            RequestBody::Json(serde_json::json!({"data": {"name": "", "passport_number": "X1"}}))
        );
    }

    #[tokio::test]
    async fn valid_without_errors_key() {
        let t = Canned {
            reply: Ok(serde_json::json!({"valid": true})),
            seen: Mutex::new(None),
        };
        let outcome = verify(&t, &draft()).await.unwrap();
        assert!(outcome.valid);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_surfaces_unchanged() {
        let err = TransportError::Http {
            status: 503,
            path: "/api/verify".into(),
            body: String::new(),
        };
        let t = Canned {
            reply: Err(err.clone()),
            seen: Mutex::new(None),
        };
        let got = verify(&t, &draft()).await.unwrap_err();
        assert_eq!(got.transport(), Some(&err));
    }
}
