//! Configuration for the extraction workflow client.
//!
//! All client behaviour is controlled through [`ClientConfig`], built via its
//! [`ClientConfigBuilder`] or loaded with [`ClientConfig::from_env`]. The
//! only setting a deployment normally needs is `API_BASE`; everything else
//! has a default that matches the service's expected client behaviour.

use crate::error::WorkflowError;
use crate::observer::SharedObserver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Endpoint used when `API_BASE` is not set.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Delay between a settled `processing` poll and the next poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Configuration for a [`crate::workflow::Workflow`].
///
/// # Example
/// ```rust
/// use visai_client::{ClientConfig, PollFailurePolicy};
/// use std::time::Duration;
///
/// let config = ClientConfig::builder()
///     .api_base("https://extract.example.com")
///     .poll_interval(Duration::from_secs(2))
///     .poll_failure_policy(PollFailurePolicy::GiveUpAfter(5))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the extraction service, without trailing slash.
    /// Default: `http://localhost:8000`. Env: `API_BASE`.
    pub api_base: String,

    /// Delay between polls while the job is `processing`. Default: 1.5 s.
    /// Env: `VISAI_POLL_INTERVAL_MS`.
    ///
    /// The first poll is issued immediately after upload; each later poll is
    /// issued only after the previous one settles, so polls never overlap.
    pub poll_interval: Duration,

    /// What a transport failure during polling does. Default: [`PollFailurePolicy::Continue`].
    /// Env: `VISAI_MAX_POLL_FAILURES` (sets `GiveUpAfter(n)`).
    pub poll_failure_policy: PollFailurePolicy,

    /// Allow submitting the same job more than once. Default: true.
    /// Env: `VISAI_ALLOW_RESUBMIT`.
    ///
    /// The service does not enforce idempotency; with this off the client
    /// refuses a second submit for a job that already reports `submitted`.
    pub allow_resubmission: bool,

    /// Reject files that are not `.jpg`/`.jpeg`/`.png`/`.pdf` instead of
    /// only warning. Default: false (the service is the authority).
    pub strict_file_types: bool,

    /// Receives workflow events. Default: none.
    pub observer: Option<SharedObserver>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_failure_policy: PollFailurePolicy::default(),
            allow_resubmission: true,
            strict_file_types: false,
            observer: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base", &self.api_base)
            .field("poll_interval", &self.poll_interval)
            .field("poll_failure_policy", &self.poll_failure_policy)
            .field("allow_resubmission", &self.allow_resubmission)
            .field("strict_file_types", &self.strict_file_types)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn WorkflowObserver>"))
            .finish()
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by environment variables, validated.
    pub fn from_env() -> Result<Self, WorkflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, WorkflowError> {
        let mut builder = Self::builder();

        if let Some(base) = lookup("API_BASE").filter(|v| !v.trim().is_empty()) {
            builder = builder.api_base(base.trim());
        }
        if let Some(raw) = lookup("VISAI_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env("VISAI_POLL_INTERVAL_MS", &raw)?;
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(raw) = lookup("VISAI_MAX_POLL_FAILURES") {
            let n: u32 = parse_env("VISAI_MAX_POLL_FAILURES", &raw)?;
            builder = builder.poll_failure_policy(PollFailurePolicy::GiveUpAfter(n));
        }
        if let Some(raw) = lookup("VISAI_ALLOW_RESUBMIT") {
            let v: bool = parse_env("VISAI_ALLOW_RESUBMIT", &raw)?;
            builder = builder.allow_resubmission(v);
        }

        builder.build()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, WorkflowError> {
    raw.trim().parse().map_err(|_| {
        WorkflowError::InvalidConfig(format!(
            "{name}='{raw}' is not a valid {}",
            std::any::type_name::<T>()
        ))
    })
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn poll_failure_policy(mut self, policy: PollFailurePolicy) -> Self {
        self.config.poll_failure_policy = policy;
        self
    }

    pub fn allow_resubmission(mut self, v: bool) -> Self {
        self.config.allow_resubmission = v;
        self
    }

    pub fn strict_file_types(mut self, v: bool) -> Self {
        self.config.strict_file_types = v;
        self
    }

    pub fn observer(mut self, observer: SharedObserver) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, WorkflowError> {
        let c = &self.config;
        match reqwest::Url::parse(&c.api_base) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(WorkflowError::InvalidConfig(format!(
                    "API base must be http or https, got scheme '{}'",
                    url.scheme()
                )))
            }
            Err(e) => {
                return Err(WorkflowError::InvalidConfig(format!(
                    "API base '{}' is not a URL: {e}",
                    c.api_base
                )))
            }
        }
        if c.poll_interval.is_zero() {
            return Err(WorkflowError::InvalidConfig(
                "Poll interval must be > 0".into(),
            ));
        }
        if c.poll_failure_policy == PollFailurePolicy::GiveUpAfter(0) {
            return Err(WorkflowError::InvalidConfig(
                "GiveUpAfter needs at least 1 failure".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the poll loop treats a transport failure (network error or non-2xx).
///
/// Only a well-formed terminal status stops polling on its own; this policy
/// decides whether failures can too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollFailurePolicy {
    /// Log, notify the observer, and poll again after the usual interval. (default)
    #[default]
    Continue,
    /// Stop and mark the job `Failed` after this many consecutive failures.
    /// A successful poll resets the count.
    GiveUpAfter(u32),
}

impl PollFailurePolicy {
    /// Whether polling should stop after `consecutive` failures in a row.
    pub fn gives_up(&self, consecutive: u32) -> bool {
        match self {
            PollFailurePolicy::Continue => false,
            PollFailurePolicy::GiveUpAfter(n) => consecutive >= *n,
        }
    }
}
