//! # visai-client
//!
//! Client-side workflow for a document-extraction service: upload a scanned
//! passport or ID, poll while OCR runs, edit the extracted fields, verify them
//! and submit the result.
//!
//! ## Why this crate?
//!
//! The service's HTTP API is simple, but driving it correctly is not. Polls
//! must not overlap or outlive their job, a late poll tick must not undo the
//! user's corrections, and a response for a replaced job must not be
//! recorded. [`Workflow`] owns those rules so callers only deal with one
//! object and a handful of async methods.
//!
//! ## Workflow Overview
//!
//! ```text
//! document
//!  │
//!  ├─ 1. Upload     POST /api/upload (multipart)       → extraction id
//!  ├─ 2. Poll       GET  /api/result/{id} every 1.5 s  → processing | done | failed
//!  ├─ 3. Reconcile  first result with data seeds the editable draft, once
//!  ├─ 4. Verify     POST /api/verify  (advisory)       → valid + field errors
//!  └─ 5. Submit     POST /api/submit                   → submitted | rejected
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use visai_client::{ClientConfig, Workflow};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // API_BASE overrides the default http://localhost:8000
//!     let workflow = Workflow::from_config(ClientConfig::from_env()?)?;
//!
//!     workflow.upload_path("passport.jpg").await?;
//!     let draft = workflow.wait_for_draft().await?;
//!     println!("extracted: {draft:?}");
//!
//!     workflow.set_field("name", "Anna")?;
//!     let check = workflow.verify().await?;
//!     if !check.valid {
//!         eprintln!("validation errors: {:?}", check.errors);
//!     }
//!     let outcome = workflow.submit().await?;
//!     println!("{:?}", outcome.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `visai` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! visai-client = { version = "0.1", default-features = false }
//! ```
//!
//! ## Custom transports
//!
//! [`Workflow::new`] takes any [`Transport`]. Tests use an in-memory fake;
//! production code can wrap a reqwest client with its own middleware via
//! [`HttpTransport::with_client`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod observer;
pub mod stage;
pub mod transport;
pub mod workflow;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ClientConfig, ClientConfigBuilder, PollFailurePolicy};
pub use error::{Stage, TransportError, WorkflowError};
pub use model::{
    ExtractionJob, ExtractionResult, ExtractionStatus, Fields, SubmissionOutcome,
    SubmissionStatus, VerificationOutcome, KNOWN_FIELDS,
};
pub use observer::{NoopObserver, SharedObserver, WorkflowObserver};
pub use stage::poll::PollState;
pub use stage::reconcile::EditableDraft;
pub use stage::upload::{DocumentKind, UploadFile};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, RequestBody, Transport};
pub use workflow::{InFlight, Workflow, WorkflowSnapshot};
