//! Observer trait for workflow events.
//!
//! Inject an [`Arc<dyn WorkflowObserver>`] via
//! [`crate::config::ClientConfigBuilder::observer`] to receive events as the
//! workflow uploads, polls, reconciles, verifies and submits.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a UI, a terminal spinner, a log sink or a channel
//! without the library knowing how the host application communicates.
//! Callers that prefer pulling state can use
//! [`crate::workflow::Workflow::subscribe`] instead.
//!
//! # Example
//!
//! ```rust
//! use visai_client::{ClientConfig, ExtractionResult, WorkflowObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct TickCounter {
//!     ticks: AtomicUsize,
//! }
//!
//! impl WorkflowObserver for TickCounter {
//!     fn on_poll_result(&self, job_id: &str, result: &ExtractionResult) {
//!         let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{job_id}: poll #{n} → {}", result.status);
//!     }
//! }
//!
//! let config = ClientConfig::builder()
//!     .observer(Arc::new(TickCounter { ticks: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::TransportError;
use crate::model::{
    ExtractionJob, ExtractionResult, Fields, SubmissionOutcome, VerificationOutcome,
};
use crate::stage::poll::PollState;
use std::sync::Arc;

/// Called by the workflow as stages progress.
///
/// Implementations must be `Send + Sync`: the poll loop runs on a spawned
/// task. All methods default to no-ops so callers only override what they
/// care about. Callbacks are never invoked while workflow state is locked,
/// so they may call back into the workflow.
///
/// Job and poll events are ordered with job replacement: once
/// [`on_job_created`](Self::on_job_created) fires for a new job, no poll
/// event for the job it replaced is delivered.
pub trait WorkflowObserver: Send + Sync {
    /// An upload request is about to be sent.
    fn on_upload_start(&self, file_name: &str) {
        let _ = file_name;
    }

    /// An upload settled successfully and polling is about to start.
    fn on_job_created(&self, job: &ExtractionJob) {
        let _ = job;
    }

    /// A poll for the current job returned a well-formed result.
    fn on_poll_result(&self, job_id: &str, result: &ExtractionResult) {
        let _ = (job_id, result);
    }

    /// A poll for the current job failed at the transport level.
    ///
    /// # Arguments
    /// * `consecutive`: failures in a row, including this one
    fn on_poll_error(&self, job_id: &str, error: &TransportError, consecutive: u32) {
        let _ = (job_id, error, consecutive);
    }

    /// The draft was created from the first result carrying data.
    fn on_draft_initialized(&self, job_id: &str, draft: &Fields) {
        let _ = (job_id, draft);
    }

    /// Polling for a job ended for good.
    fn on_poll_stopped(&self, job_id: &str, state: PollState) {
        let _ = (job_id, state);
    }

    /// A verify request settled and its outcome was recorded.
    fn on_verify_complete(&self, outcome: &VerificationOutcome) {
        let _ = outcome;
    }

    /// A submit request settled and its outcome was recorded.
    fn on_submit_complete(&self, outcome: &SubmissionOutcome) {
        let _ = outcome;
    }
}

/// A no-op observer; the default when none is configured.
pub struct NoopObserver;

impl WorkflowObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ClientConfig`].
pub type SharedObserver = Arc<dyn WorkflowObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        results: AtomicUsize,
        errors: AtomicUsize,
        stopped: AtomicUsize,
    }

    impl WorkflowObserver for Tracking {
        fn on_poll_result(&self, _job_id: &str, _result: &ExtractionResult) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }

        fn on_poll_error(&self, _job_id: &str, _error: &TransportError, _consecutive: u32) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_poll_stopped(&self, _job_id: &str, _state: PollState) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_upload_start("passport.png");
        o.on_job_created(&ExtractionJob::new("ex-1"));
        o.on_poll_result("ex-1", &ExtractionResult::processing());
        o.on_poll_stopped("ex-1", PollState::Done);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let t = Tracking::default();
        t.on_poll_result("ex-1", &ExtractionResult::processing());
        t.on_poll_result("ex-1", &ExtractionResult::processing());
        t.on_poll_error(
            "ex-1",
            &TransportError::Http {
                status: 502,
                path: "/api/result/ex-1".into(),
                body: String::new(),
            },
            1,
        );
        t.on_poll_stopped("ex-1", PollState::Done);
        assert_eq!(t.results.load(Ordering::SeqCst), 2);
        assert_eq!(t.errors.load(Ordering::SeqCst), 1);
        assert_eq!(t.stopped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observer_is_send_sync_behind_arc() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedObserver>();
    }
}
