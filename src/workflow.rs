//! The workflow instance: one job, one draft, the latest outcome of each stage.
//!
//! ## Data flow
//!
//! ```text
//! upload_file ──▶ ExtractionJob ──spawn──▶ poll loop ──▶ ExtractionResult
//!                                                           │
//!                                              EditableDraft::reconcile (once)
//!                                                           │
//!                       set_field ──▶ EditableDraft ──┬──▶ verify ──▶ VerificationOutcome
//!                                                     └──▶ submit ──▶ SubmissionOutcome
//! ```
//!
//! All state lives behind one lock in [`Workflow`] and is published as a
//! [`WorkflowSnapshot`] after every change. The lock is never held across a
//! network call or an observer callback. Job and poll events go through a
//! second, event-only lock so a replaced job's poll events never follow the
//! new job's `on_job_created`.
//!
//! ## Job replacement
//!
//! A successful upload invalidates the previous job's [`JobToken`], which
//! stops its poll loop before the next request. Verify and submit requests
//! are not cancelled; each remembers the job generation it started under
//! and, if the job was replaced meanwhile, returns
//! [`WorkflowError::Superseded`] instead of recording its outcome. The draft
//! is kept across replacement; call [`Workflow::reset_draft`] to re-seed it.

use crate::api::{self, HealthResponse};
use crate::config::ClientConfig;
use crate::error::{Stage, TransportError, WorkflowError};
use crate::model::{
    ExtractionJob, ExtractionResult, Fields, SubmissionOutcome, VerificationOutcome,
};
use crate::observer::{NoopObserver, WorkflowObserver};
use crate::stage::poll::{self, JobToken, JobTokenSource, PollExit, PollState, PollStep};
use crate::stage::reconcile::{EditableDraft, ReconcileOutcome};
use crate::stage::upload::{self, UploadFile};
use crate::stage::{submit, verify};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

static NOOP: NoopObserver = NoopObserver;

/// Which stages currently have a request in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InFlight {
    pub upload: bool,
    pub verify: bool,
    pub submit: bool,
}

impl InFlight {
    fn slot(&mut self, stage: Stage) -> &mut bool {
        match stage {
            Stage::Upload => &mut self.upload,
            Stage::Verify => &mut self.verify,
            Stage::Submit => &mut self.submit,
        }
    }

    pub fn any(&self) -> bool {
        self.upload || self.verify || self.submit
    }
}

/// Point-in-time copy of everything the workflow knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowSnapshot {
    pub job: Option<ExtractionJob>,
    pub poll_state: PollState,
    /// Most recent well-formed poll result for the current job.
    pub latest: Option<ExtractionResult>,
    /// `None` until the draft is initialised.
    pub draft: Option<Fields>,
    pub verification: Option<VerificationOutcome>,
    pub submission: Option<SubmissionOutcome>,
    pub last_poll_error: Option<String>,
    pub consecutive_poll_failures: u32,
    pub in_flight: InFlight,
}

#[derive(Debug, Default)]
struct Session {
    /// Generation of the token issued to the current job; 0 before any job.
    generation: u64,
    job: Option<ExtractionJob>,
    issued_ids: HashSet<String>,
    latest: Option<ExtractionResult>,
    poll_state: PollState,
    poll_failures: u32,
    last_poll_error: Option<TransportError>,
    draft: EditableDraft,
    verification: Option<VerificationOutcome>,
    submission: Option<SubmissionOutcome>,
    in_flight: InFlight,
}

impl Session {
    fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            job: self.job.clone(),
            poll_state: self.poll_state,
            latest: self.latest.clone(),
            draft: self.draft.fields().cloned(),
            verification: self.verification.clone(),
            submission: self.submission.clone(),
            last_poll_error: self.last_poll_error.as_ref().map(|e| e.to_string()),
            consecutive_poll_failures: self.poll_failures,
            in_flight: self.in_flight,
        }
    }

    fn job_id(&self) -> String {
        self.job.as_ref().map(|j| j.id.clone()).unwrap_or_default()
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    tokens: JobTokenSource,
    session: Mutex<Session>,
    /// Serialises job and poll events with job replacement.
    events: Mutex<()>,
    snapshots: watch::Sender<WorkflowSnapshot>,
}

/// Clears a busy flag when the stage's request settles.
struct InFlightGuard<'a> {
    inner: &'a Inner,
    stage: Stage,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut s = self.inner.lock();
        *s.in_flight.slot(self.stage) = false;
        self.inner.publish(&s);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, session: &Session) {
        self.snapshots.send_replace(session.snapshot());
    }

    fn observer(&self) -> &dyn WorkflowObserver {
        match self.config.observer.as_deref() {
            Some(o) => o,
            None => &NOOP,
        }
    }

    fn events(&self) -> MutexGuard<'_, ()> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event for the job issued under `generation`, unless a new
    /// upload has replaced it since.
    fn notify_job(&self, generation: u64, notify: impl FnOnce(&dyn WorkflowObserver)) {
        let _order = self.events();
        if self.lock().generation == generation {
            notify(self.observer());
        }
    }

    fn begin(&self, stage: Stage) -> Result<InFlightGuard<'_>, WorkflowError> {
        let mut s = self.lock();
        let slot = s.in_flight.slot(stage);
        if *slot {
            return Err(WorkflowError::Busy { stage });
        }
        *slot = true;
        self.publish(&s);
        Ok(InFlightGuard { inner: self, stage })
    }

    async fn run_poll(self: Arc<Self>, job_id: String, token: JobToken) {
        let generation = token.generation();
        let exit = poll::poll_until_settled(self.transport.as_ref(), &job_id, token, |outcome| {
            self.apply_poll(generation, &job_id, outcome)
        })
        .await;

        if let PollExit::Settled(state) = exit {
            self.notify_job(generation, |o| o.on_poll_stopped(&job_id, state));
        }
    }

    /// Record one settled poll and decide what the loop does next.
    fn apply_poll(
        &self,
        generation: u64,
        job_id: &str,
        outcome: Result<ExtractionResult, TransportError>,
    ) -> PollStep {
        let interval = self.config.poll_interval;

        match outcome {
            Ok(result) => {
                let (step, seeded) = {
                    let mut s = self.lock();
                    if s.generation != generation {
                        // Replaced between the response and the lock. The
                        // loop sees its dead token before sleeping.
                        debug!("Dropping poll result for superseded job {}", job_id);
                        return PollStep::Again(interval);
                    }
                    s.poll_failures = 0;
                    s.last_poll_error = None;
                    let seeded = match s.draft.reconcile(job_id, &result) {
                        ReconcileOutcome::Initialized => s.draft.fields().cloned(),
                        ReconcileOutcome::AlreadyInitialized | ReconcileOutcome::NoData => None,
                    };
                    let step = poll::step_for_result(&result, interval);
                    s.poll_state = match step {
                        PollStep::Stop(state) => state,
                        PollStep::Again(_) => PollState::Processing,
                    };
                    s.latest = Some(result.clone());
                    self.publish(&s);
                    (step, seeded)
                };

                debug!("Poll for {}: {}", job_id, result.status);
                if let Some(fields) = &seeded {
                    info!("Draft initialised from {} ({} fields)", job_id, fields.len());
                }
                self.notify_job(generation, |o| {
                    o.on_poll_result(job_id, &result);
                    if let Some(fields) = &seeded {
                        o.on_draft_initialized(job_id, fields);
                    }
                });
                step
            }
            Err(err) => {
                let policy = self.config.poll_failure_policy;
                let (step, consecutive) = {
                    let mut s = self.lock();
                    if s.generation != generation {
                        return PollStep::Again(interval);
                    }
                    s.poll_failures += 1;
                    let n = s.poll_failures;
                    s.last_poll_error = Some(err.clone());
                    let step = if policy.gives_up(n) {
                        s.poll_state = PollState::Failed;
                        PollStep::Stop(PollState::Failed)
                    } else {
                        PollStep::Again(interval)
                    };
                    self.publish(&s);
                    (step, n)
                };

                match step {
                    PollStep::Stop(_) => warn!(
                        "Giving up on {} after {} consecutive poll failures: {}",
                        job_id, consecutive, err
                    ),
                    PollStep::Again(_) => warn!(
                        "Poll for {} failed ({} in a row), retrying: {}",
                        job_id, consecutive, err
                    ),
                }
                self.notify_job(generation, |o| o.on_poll_error(job_id, &err, consecutive));
                step
            }
        }
    }
}

/// A single extraction session with an injected [`Transport`].
///
/// Operations take `&self`, so one workflow can be shared (e.g. behind an
/// `Arc`) between a UI task and background work. Independent workflows share
/// nothing.
///
/// Polling runs on a spawned tokio task, so uploads must happen inside a
/// tokio runtime. Dropping the workflow stops its poll loop.
pub struct Workflow {
    inner: Arc<Inner>,
}

impl Workflow {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (snapshots, _rx) = watch::channel(WorkflowSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                tokens: JobTokenSource::new(),
                session: Mutex::new(Session::default()),
                events: Mutex::new(()),
                snapshots,
            }),
        }
    }

    /// Workflow talking HTTP to `config.api_base`.
    pub fn from_config(config: ClientConfig) -> Result<Self, WorkflowError> {
        let transport = HttpTransport::new(config.api_base.clone())?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Upload ───────────────────────────────────────────────────────────

    /// Read `path` and upload it. See [`Workflow::upload_file`].
    pub async fn upload_path(&self, path: impl AsRef<Path>) -> Result<ExtractionJob, WorkflowError> {
        let file = UploadFile::from_path(path).await?;
        self.upload_file(file).await
    }

    /// Upload a document, adopt the new job and start polling it.
    ///
    /// On any failure no job is created and the previous job, its poll loop
    /// and the draft are left as they were.
    ///
    /// # Errors
    /// - [`WorkflowError::Busy`] if another upload is in flight
    /// - [`WorkflowError::UnsupportedFile`] with strict file types on
    /// - [`WorkflowError::InvalidResponse`] if the service returns an empty
    ///   id or one it already issued in this session
    /// - [`WorkflowError::Transport`] unchanged from the transport
    pub async fn upload_file(&self, file: UploadFile) -> Result<ExtractionJob, WorkflowError> {
        let inner = &self.inner;
        let _busy = inner.begin(Stage::Upload)?;
        file.check_type(inner.config.strict_file_types)?;

        inner.observer().on_upload_start(&file.file_name);
        let job = upload::upload(inner.transport.as_ref(), &file).await?;

        let token = {
            let _order = inner.events();
            let mut s = inner.lock();
            if s.issued_ids.contains(&job.id) {
                return Err(WorkflowError::InvalidResponse {
                    detail: format!("extraction id '{}' was already issued", job.id),
                });
            }
            let token = inner.tokens.issue();
            if let Some(previous) = &s.job {
                info!("Job {} superseded by {}", previous.id, job.id);
            }
            s.issued_ids.insert(job.id.clone());
            s.generation = token.generation();
            s.job = Some(job.clone());
            s.latest = None;
            s.poll_state = PollState::Processing;
            s.poll_failures = 0;
            s.last_poll_error = None;
            inner.publish(&s);
            drop(s);
            inner.observer().on_job_created(&job);
            token
        };

        tokio::spawn(Arc::clone(inner).run_poll(job.id.clone(), token));
        Ok(job)
    }

    // ── Draft ────────────────────────────────────────────────────────────

    /// Replace one draft field.
    ///
    /// # Errors
    /// [`WorkflowError::NoDraft`] until extraction data has arrived.
    pub fn set_field(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        let mut s = self.inner.lock();
        s.draft.set_field(name, value)?;
        self.inner.publish(&s);
        Ok(())
    }

    pub fn draft(&self) -> Option<Fields> {
        self.inner.lock().draft.fields().cloned()
    }

    /// Discard the draft and re-seed it from the current job's latest result.
    ///
    /// Returns `true` if the latest result carried data and a new draft was
    /// created; otherwise the next poll result with data seeds it.
    pub fn reset_draft(&self) -> bool {
        let seeded = {
            let mut s = self.inner.lock();
            s.draft.clear();
            let job_id = s.job_id();
            let seeded = match s.latest.clone() {
                Some(latest) => match s.draft.reconcile(&job_id, &latest) {
                    ReconcileOutcome::Initialized => s.draft.fields().cloned().map(|f| (job_id, f)),
                    ReconcileOutcome::AlreadyInitialized | ReconcileOutcome::NoData => None,
                },
                None => None,
            };
            self.inner.publish(&s);
            seeded
        };

        match seeded {
            Some((job_id, fields)) => {
                info!("Draft reset and re-seeded from {}", job_id);
                self.inner.observer().on_draft_initialized(&job_id, &fields);
                true
            }
            None => {
                info!("Draft reset");
                false
            }
        }
    }

    // ── Verify / submit ──────────────────────────────────────────────────

    /// Validate a copy of the current draft. Never changes the draft.
    ///
    /// On failure the previous outcome stays recorded.
    pub async fn verify(&self) -> Result<VerificationOutcome, WorkflowError> {
        let inner = &self.inner;
        let (draft, generation, job_id) = {
            let s = inner.lock();
            (s.draft.snapshot()?, s.generation, s.job_id())
        };
        let _busy = inner.begin(Stage::Verify)?;

        let outcome = verify::verify(inner.transport.as_ref(), &draft).await?;

        {
            let mut s = inner.lock();
            if s.generation != generation {
                warn!("Discarding verify response for superseded job {}", job_id);
                return Err(WorkflowError::Superseded { job_id });
            }
            s.verification = Some(outcome.clone());
            inner.publish(&s);
        }
        inner.observer().on_verify_complete(&outcome);
        Ok(outcome)
    }

    /// Submit a copy of the current draft for the current job.
    ///
    /// The last verification outcome is not consulted.
    ///
    /// # Errors
    /// - [`WorkflowError::NoJob`] / [`WorkflowError::NoDraft`] before both exist
    /// - [`WorkflowError::AlreadySubmitted`] when resubmission is disabled
    /// - [`WorkflowError::Busy`] if a submit is in flight
    /// - [`WorkflowError::Superseded`] if a new upload replaced the job meanwhile
    pub async fn submit(&self) -> Result<SubmissionOutcome, WorkflowError> {
        let inner = &self.inner;
        let (job_id, draft, generation) = {
            let s = inner.lock();
            let job = s.job.as_ref().ok_or(WorkflowError::NoJob)?;
            let draft = s.draft.snapshot()?;
            let resubmit = s
                .submission
                .as_ref()
                .is_some_and(|prev| prev.is_submitted() && prev.extraction_id == job.id);
            if resubmit {
                if !inner.config.allow_resubmission {
                    return Err(WorkflowError::AlreadySubmitted {
                        job_id: job.id.clone(),
                    });
                }
                warn!("Job {} was already submitted; submitting again", job.id);
            }
            (job.id.clone(), draft, s.generation)
        };
        let _busy = inner.begin(Stage::Submit)?;

        let outcome = submit::submit(inner.transport.as_ref(), &job_id, &draft).await?;

        {
            let mut s = inner.lock();
            if s.generation != generation {
                warn!("Discarding submit response for superseded job {}", job_id);
                return Err(WorkflowError::Superseded { job_id });
            }
            s.submission = Some(outcome.clone());
            inner.publish(&s);
        }
        inner.observer().on_submit_complete(&outcome);
        Ok(outcome)
    }

    /// Probe `GET /health` and return the reported status (`"ok"` when up).
    pub async fn health(&self) -> Result<String, WorkflowError> {
        let response = self
            .inner
            .transport
            .send(ApiRequest::get(api::HEALTH_PATH))
            .await?;
        let body: HealthResponse = response.json()?;
        Ok(body.status)
    }

    // ── State ────────────────────────────────────────────────────────────

    pub fn job(&self) -> Option<ExtractionJob> {
        self.inner.lock().job.clone()
    }

    pub fn latest_result(&self) -> Option<ExtractionResult> {
        self.inner.lock().latest.clone()
    }

    pub fn poll_state(&self) -> PollState {
        self.inner.lock().poll_state
    }

    pub fn in_flight(&self) -> InFlight {
        self.inner.lock().in_flight
    }

    pub fn verification(&self) -> Option<VerificationOutcome> {
        self.inner.lock().verification.clone()
    }

    pub fn submission(&self) -> Option<SubmissionOutcome> {
        self.inner.lock().submission.clone()
    }

    /// Submit is reachable only with both a job and a draft.
    pub fn can_submit(&self) -> bool {
        let s = self.inner.lock();
        s.job.is_some() && s.draft.is_initialized()
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.inner.lock().snapshot()
    }

    /// Receiver that sees a new [`WorkflowSnapshot`] after every change.
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Same as [`Workflow::subscribe`], as a `Stream`. Yields the current
    /// snapshot first.
    pub fn snapshot_stream(&self) -> WatchStream<WorkflowSnapshot> {
        WatchStream::new(self.subscribe())
    }

    /// Wait until the draft exists.
    ///
    /// # Errors
    /// [`WorkflowError::NoDraft`] if there is no job, or polling for the
    /// current job stopped without ever producing data.
    pub async fn wait_for_draft(&self) -> Result<Fields, WorkflowError> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|s| s.draft.is_some() || s.poll_state != PollState::Processing)
            .await
            .map_err(|_| WorkflowError::NoDraft)?;
        snapshot.draft.clone().ok_or(WorkflowError::NoDraft)
    }

    /// Wait until polling for the current job stops, and return the state
    /// at that moment. Returns at once if no job is polling.
    ///
    /// With [`crate::config::PollFailurePolicy::Continue`] and a service that
    /// keeps failing this never returns; wrap it in a timeout if that matters.
    pub async fn wait_until_settled(&self) -> WorkflowSnapshot {
        let mut rx = self.subscribe();
        if let Ok(settled) = rx.wait_for(|s| s.poll_state != PollState::Processing).await {
            return settled.clone();
        }
        self.snapshot()
    }
}

impl Drop for Workflow {
    fn drop(&mut self) {
        self.inner.tokens.cancel_all();
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("config", &self.inner.config)
            .field("state", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ApiResponse;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Answers every route with a fixed body.
    struct Fixed;

    #[async_trait]
    impl Transport for Fixed {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            let body = match request.path.as_str() {
                "/api/upload" => serde_json::json!({"extraction_id": "ex-1"}),
                "/health" => serde_json::json!({"status": "ok"}),
                "/api/verify" => serde_json::json!({"valid": true, "errors": {}}),
                "/api/submit" => serde_json::json!({"status": "submitted", "extraction_id": "ex-1"}),
                _ => serde_json::json!({"status": "done", "data": {"name": "Ana"}}),
            };
            Ok(ApiResponse::json_body(request.path, &body))
        }
    }

    fn workflow() -> Workflow {
        let config = ClientConfig::builder()
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        Workflow::new(Arc::new(Fixed), config)
    }

    #[test]
    fn job_events_are_dropped_once_the_job_is_replaced() {
        let wf = workflow();
        wf.inner.lock().generation = 2;

        let mut delivered = Vec::new();
        wf.inner.notify_job(1, |_| delivered.push(1));
        wf.inner.notify_job(2, |_| delivered.push(2));
        assert_eq!(delivered, vec![2]);
    }

    #[test]
    fn fresh_workflow_is_idle() {
        let wf = workflow();
        let snap = wf.snapshot();
        assert_eq!(snap.poll_state, PollState::Idle);
        assert!(snap.job.is_none());
        assert!(!snap.in_flight.any());
        assert!(!wf.can_submit());
    }

    #[tokio::test]
    async fn verify_and_submit_need_preconditions() {
        let wf = workflow();
        assert!(matches!(wf.verify().await, Err(WorkflowError::NoDraft)));
        assert!(matches!(wf.submit().await, Err(WorkflowError::NoJob)));
        assert!(matches!(wf.set_field("name", "x"), Err(WorkflowError::NoDraft)));
    }

    #[tokio::test]
    async fn wait_for_draft_without_job_is_no_draft() {
        let wf = workflow();
        assert!(matches!(wf.wait_for_draft().await, Err(WorkflowError::NoDraft)));
    }

    #[tokio::test]
    async fn happy_path_end_to_end() {
        let wf = workflow();
        let job = wf
            .upload_file(UploadFile::from_bytes("p.png", b"\x89PNG....".to_vec()))
            .await
            .unwrap();
        assert_eq!(job.id, "ex-1");

        let draft = wf.wait_for_draft().await.unwrap();
        assert_eq!(draft["name"], "Ana");
        assert_eq!(wf.wait_until_settled().await.poll_state, PollState::Done);
        assert!(wf.can_submit());

        assert!(wf.verify().await.unwrap().valid);
        assert!(wf.submit().await.unwrap().is_submitted());
        assert!(!wf.in_flight().any());
    }

    #[tokio::test]
    async fn health_reports_status() {
        assert_eq!(workflow().health().await.unwrap(), "ok");
    }

    #[test]
    fn snapshot_serialises() {
        let json = serde_json::to_value(workflow().snapshot()).unwrap();
        assert_eq!(json["poll_state"], "idle");
        assert_eq!(json["in_flight"]["upload"], false);
    }
}
