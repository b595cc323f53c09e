//! Workflow stages for document extraction.
//!
//! Each submodule implements exactly one step of the workflow and talks to
//! the service only through [`crate::transport::Transport`]. Keeping stages
//! separate makes each independently testable; sequencing, busy tracking and
//! stale-response detection live in [`crate::workflow`].
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ poll ──▶ reconcile ──▶ verify
//! (file)    (status)   (draft)   └─▶ submit
//! ```
//!
//! 1. [`upload`]   : send the document, receive an extraction id
//! 2. [`poll`]     : fetch status on an interval until a terminal state;
//!    owns the per-job cancellation token
//! 3. [`reconcile`]: seed the editable draft once from extracted data and
//!    apply user edits
//! 4. [`verify`]   : advisory validation of the current draft
//! 5. [`submit`]   : final submission of the draft for a job

pub mod poll;
pub mod reconcile;
pub mod submit;
pub mod upload;
pub mod verify;
