//! Shared helpers for integration tests: a scripted in-memory transport and
//! small timing utilities.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use visai_client::{
    ApiRequest, ApiResponse, ClientConfig, PollFailurePolicy, Transport, TransportError,
    UploadFile, Workflow,
};

/// Poll interval used by tests. Short enough to keep tests fast, long enough
/// that request counts are stable between assertions.
pub const TICK: Duration = Duration::from_millis(10);

#[derive(Clone)]
struct Reply {
    result: Result<Value, TransportError>,
    delay: Duration,
}

/// Transport that answers each path from a queue of scripted replies.
///
/// When a path's queue is empty the sticky reply for that path is used;
/// with neither, the request fails with HTTP 404. Every request is logged.
#[derive(Default)]
pub struct ScriptedTransport {
    queues: Mutex<HashMap<String, VecDeque<Reply>>>,
    sticky: Mutex<HashMap<String, Reply>>,
    log: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enqueue(&self, path: &str, reply: Reply) -> &Self {
        self.queues
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a JSON reply.
    pub fn push(&self, path: &str, body: Value) -> &Self {
        self.push_delayed(path, Duration::ZERO, body)
    }

    /// Queue a JSON reply that settles after `delay`.
    pub fn push_delayed(&self, path: &str, delay: Duration, body: Value) -> &Self {
        self.enqueue(
            path,
            Reply {
                result: Ok(body),
                delay,
            },
        )
    }

    /// Queue a non-2xx failure.
    pub fn push_http_error(&self, path: &str, status: u16) -> &Self {
        self.enqueue(
            path,
            Reply {
                result: Err(TransportError::Http {
                    status,
                    path: path.to_string(),
                    body: format!("status {status}"),
                }),
                delay: Duration::ZERO,
            },
        )
    }

    /// Queue a failure where no response arrives.
    pub fn push_network_error(&self, path: &str) -> &Self {
        self.enqueue(
            path,
            Reply {
                result: Err(TransportError::Network {
                    method: "GET".into(),
                    path: path.to_string(),
                    reason: "connection refused".into(),
                }),
                delay: Duration::ZERO,
            },
        )
    }

    /// Reply used for `path` once its queue is exhausted.
    pub fn sticky(&self, path: &str, body: Value) -> &Self {
        self.sticky_delayed(path, Duration::ZERO, body)
    }

    pub fn sticky_delayed(&self, path: &str, delay: Duration, body: Value) -> &Self {
        self.sticky.lock().unwrap().insert(
            path.to_string(),
            Reply {
                result: Ok(body),
                delay,
            },
        );
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests sent to `path`.
    pub fn count(&self, path: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.log.lock().unwrap().push(request.clone());
        let path = request.path;

        let queued = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(|q| q.pop_front());
        let reply = queued.or_else(|| self.sticky.lock().unwrap().get(&path).cloned());

        let Some(reply) = reply else {
            return Err(TransportError::Http {
                status: 404,
                path,
                body: "no scripted reply".into(),
            });
        };

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.result.map(|body| ApiResponse::json_body(path, &body))
    }
}

pub fn result_path(id: &str) -> String {
    format!("/api/result/{id}")
}

pub fn config() -> ClientConfig {
    ClientConfig::builder()
        .poll_interval(TICK)
        .build()
        .unwrap()
}

pub fn config_with_policy(policy: PollFailurePolicy) -> ClientConfig {
    ClientConfig::builder()
        .poll_interval(TICK)
        .poll_failure_policy(policy)
        .build()
        .unwrap()
}

pub fn workflow(transport: &Arc<ScriptedTransport>) -> Workflow {
    Workflow::new(transport.clone(), config())
}

/// A tiny file with a PNG signature.
pub fn png() -> UploadFile {
    UploadFile::from_bytes(
        "passport.png",
        vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0],
    )
}

/// Wait (up to two seconds) for `cond` to hold.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
