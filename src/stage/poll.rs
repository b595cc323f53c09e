//! Poll stage: query extraction status until the job settles.
//!
//! ## State machine
//!
//! ```text
//! Idle ──upload──▶ Processing ──status=processing──▶ Processing (after interval)
//!                      │
//!                      └──status=done|failed──▶ Done | Failed   (polling stops)
//! ```
//!
//! The first poll is issued as soon as the job exists. Each later poll is
//! issued only after the previous one settles, so two polls for one job are
//! never in flight together and responses arrive in request order.
//!
//! ## Cancellation
//!
//! Every job gets a [`JobToken`] from a shared [`JobTokenSource`]. Issuing a
//! token for a new job invalidates all earlier tokens. The loop checks its
//! token before each request, after each response (a response for a
//! superseded job is dropped), and while waiting out the interval.

use crate::api::{self, ResultResponse};
use crate::error::TransportError;
use crate::model::{ExtractionResult, ExtractionStatus};
use crate::transport::{ApiRequest, Transport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Where polling stands for the current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// No job yet.
    #[default]
    Idle,
    Processing,
    Done,
    Failed,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PollState::Done | PollState::Failed)
    }
}

impl From<&ExtractionStatus> for PollState {
    fn from(s: &ExtractionStatus) -> Self {
        match s {
            ExtractionStatus::Processing => PollState::Processing,
            ExtractionStatus::Done => PollState::Done,
            ExtractionStatus::Failed(_) => PollState::Failed,
        }
    }
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PollState::Idle => "idle",
            PollState::Processing => "processing",
            PollState::Done => "done",
            PollState::Failed => "failed",
        })
    }
}

/// What the loop does after a poll settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Poll again after the delay.
    Again(Duration),
    /// Stop polling this job for good.
    Stop(PollState),
}

/// Decide the next step from a well-formed result.
pub fn step_for_result(result: &ExtractionResult, interval: Duration) -> PollStep {
    if result.status.is_terminal() {
        PollStep::Stop(PollState::from(&result.status))
    } else {
        PollStep::Again(interval)
    }
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// The job reached a terminal state.
    Settled(PollState),
    /// The job was superseded; nothing was recorded after that point.
    Cancelled,
}

// ── Cancellation tokens ──────────────────────────────────────────────────

/// Issues [`JobToken`]s. Issuing a new token invalidates every earlier one.
#[derive(Debug)]
pub struct JobTokenSource {
    tx: watch::Sender<u64>,
}

impl Default for JobTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTokenSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Invalidate all outstanding tokens and return one for the next job.
    pub fn issue(&self) -> JobToken {
        self.tx.send_modify(|g| *g += 1);
        let rx = self.tx.subscribe();
        let generation = *rx.borrow();
        JobToken { generation, rx }
    }

    /// Invalidate all outstanding tokens without issuing a new one.
    pub fn cancel_all(&self) {
        self.tx.send_modify(|g| *g += 1);
    }

    /// Generation of the most recently issued token.
    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }
}

/// Handle proving a loop still works for the current job.
#[derive(Debug, Clone)]
pub struct JobToken {
    generation: u64,
    rx: watch::Receiver<u64>,
}

impl JobToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `false` once a newer job has been issued a token.
    pub fn is_live(&self) -> bool {
        *self.rx.borrow() == self.generation
    }

    /// Resolve once this token is invalidated (or its source is dropped).
    pub async fn cancelled(&mut self) {
        loop {
            if !self.is_live() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────────────

/// Fetch the current status of one extraction.
pub async fn fetch_result(
    transport: &dyn Transport,
    job_id: &str,
) -> Result<ExtractionResult, TransportError> {
    let response = transport.send(ApiRequest::get(api::result_path(job_id))).await?;
    let body: ResultResponse = response.json()?;
    Ok(body.into())
}

/// Poll `job_id` until `on_settled` says stop or `token` is invalidated.
///
/// `on_settled` sees every response that arrives while the token is still
/// live, in order, and decides the next step. It runs synchronously between
/// polls, so it can update shared state without racing the next request.
/// Implementations should re-check the token's generation under their own
/// lock before recording anything.
pub async fn poll_until_settled<F>(
    transport: &dyn Transport,
    job_id: &str,
    mut token: JobToken,
    mut on_settled: F,
) -> PollExit
where
    F: FnMut(Result<ExtractionResult, TransportError>) -> PollStep,
{
    let mut attempt: u32 = 0;
    loop {
        if !token.is_live() {
            debug!("Polling for {} cancelled before request", job_id);
            return PollExit::Cancelled;
        }

        attempt += 1;
        debug!("Poll #{} for {}", attempt, job_id);
        let outcome = fetch_result(transport, job_id).await;

        if !token.is_live() {
            debug!("Discarding stale poll response for {}", job_id);
            return PollExit::Cancelled;
        }

        match on_settled(outcome) {
            PollStep::Stop(state) => {
                info!("Polling for {} stopped after {} requests: {}", job_id, attempt, state);
                return PollExit::Settled(state);
            }
            PollStep::Again(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {
                        debug!("Polling for {} cancelled while waiting", job_id);
                        return PollExit::Cancelled;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ApiResponse;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned result bodies and counts requests.
    struct Replay {
        bodies: Mutex<VecDeque<Result<serde_json::Value, TransportError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl Replay {
        fn new(items: Vec<Result<serde_json::Value, TransportError>>) -> Self {
            Self {
                bodies: Mutex::new(items.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for Replay {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.requests.lock().unwrap().push(request.path.clone());
            let next = self
                .bodies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(serde_json::json!({"status": "processing"})));
            next.map(|v| ApiResponse::json_body(request.path, &v))
        }
    }

    const TICK: Duration = Duration::from_millis(5);

    #[test]
    fn step_reschedules_only_while_processing() {
        assert_eq!(
            step_for_result(&ExtractionResult::processing(), TICK),
            PollStep::Again(TICK)
        );
        let mut done = ExtractionResult::processing();
        done.status = ExtractionStatus::Done;
        assert_eq!(step_for_result(&done, TICK), PollStep::Stop(PollState::Done));
        done.status = ExtractionStatus::Failed(None);
        assert_eq!(step_for_result(&done, TICK), PollStep::Stop(PollState::Failed));
    }

    #[test]
    fn issuing_a_token_invalidates_older_ones() {
        let source = JobTokenSource::new();
        let a = source.issue();
        assert!(a.is_live());
        let b = source.issue();
        assert!(!a.is_live());
        assert!(b.is_live());
        assert_eq!(source.current(), b.generation());
        source.cancel_all();
        assert!(!b.is_live());
    }

    #[tokio::test]
    async fn cancelled_resolves_on_new_issue() {
        let source = JobTokenSource::new();
        let mut a = source.issue();
        let waiter = tokio::spawn(async move { a.cancelled().await });
        tokio::task::yield_now().await;
        let _b = source.issue();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn stops_on_terminal_status() {
        let t = Replay::new(vec![
            Ok(serde_json::json!({"status": "processing"})),
            Ok(serde_json::json!({"status": "done", "data": {"name": "Ana"}})),
        ]);
        let source = JobTokenSource::new();
        let mut seen = Vec::new();
        let exit = poll_until_settled(&t, "ex-1", source.issue(), |r| {
            let r = r.unwrap();
            let step = step_for_result(&r, TICK);
            seen.push(r);
            step
        })
        .await;
        assert_eq!(exit, PollExit::Settled(PollState::Done));
        assert_eq!(t.count(), 2);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].data.as_ref().unwrap()["name"], "Ana");
    }

    #[tokio::test]
    async fn never_polls_after_failed() {
        let t = Replay::new(vec![Ok(serde_json::json!({"status": "error: bad image"}))]);
        let source = JobTokenSource::new();
        let exit = poll_until_settled(&t, "ex-1", source.issue(), |r| step_for_result(&r.unwrap(), TICK)).await;
        assert_eq!(exit, PollExit::Settled(PollState::Failed));
        tokio::time::sleep(TICK * 4).await;
        assert_eq!(t.count(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_request() {
        let t = Replay::new(vec![]);
        let source = JobTokenSource::new();
        let token = source.issue();
        source.cancel_all();
        let exit = poll_until_settled(&t, "ex-1", token, |_| PollStep::Again(TICK)).await;
        assert_eq!(exit, PollExit::Cancelled);
        assert_eq!(t.count(), 0);
    }

    #[tokio::test]
    async fn transport_errors_go_to_the_callback() {
        let t = Replay::new(vec![
            Err(TransportError::Http {
                status: 502,
                path: "/api/result/ex-1".into(),
                body: String::new(),
            }),
            Ok(serde_json::json!({"status": "completed"})),
        ]);
        let source = JobTokenSource::new();
        let mut errors = 0;
        let exit = poll_until_settled(&t, "ex-1", source.issue(), |r| match r {
            Err(_) => {
                errors += 1;
                PollStep::Again(TICK)
            }
            Ok(r) => step_for_result(&r, TICK),
        })
        .await;
        assert_eq!(exit, PollExit::Settled(PollState::Done));
        assert_eq!(errors, 1);
        assert_eq!(t.count(), 2);
    }
}
