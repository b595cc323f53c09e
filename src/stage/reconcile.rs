//! Editable-data reconciler: seed the draft once, then let the user own it.
//!
//! Poll results keep arriving after extracted data first shows up, often
//! carrying the same fields again. If every tick overwrote the draft, a user
//! correcting `name` from "Ana" to "Anna" would watch the correction vanish
//! on the next tick. So the draft is initialised from the first result with
//! non-empty data and every later result's data is ignored entirely; from
//! then on only [`EditableDraft::set_field`] changes it.
//!
//! Initialisation is tracked with an explicit flag rather than by checking
//! whether the field map is empty, so "already seeded" survives even when
//! the seeded map is later edited down to nothing.

use crate::error::WorkflowError;
use crate::model::{ExtractionResult, Fields};
use serde::Serialize;
use tracing::debug;

/// The locally editable copy of the extracted fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EditableDraft {
    fields: Fields,
    initialized: bool,
    /// Job whose result seeded the draft.
    seeded_from: Option<String>,
}

/// What [`EditableDraft::reconcile`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The draft was created from this result.
    Initialized,
    /// The draft already existed; the result's data was ignored.
    AlreadyInitialized,
    /// No draft yet and the result carries no data.
    NoData,
}

impl EditableDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The current fields, or `None` before initialisation.
    pub fn fields(&self) -> Option<&Fields> {
        self.initialized.then_some(&self.fields)
    }

    /// Job id of the result that seeded the draft.
    pub fn seeded_from(&self) -> Option<&str> {
        self.seeded_from.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields().and_then(|f| f.get(name)).map(String::as_str)
    }

    /// Merge a freshly arrived result, at most once.
    pub fn reconcile(&mut self, job_id: &str, result: &ExtractionResult) -> ReconcileOutcome {
        if self.initialized {
            if result.has_data() {
                debug!("Draft already initialised; ignoring data from poll for {}", job_id);
            }
            return ReconcileOutcome::AlreadyInitialized;
        }
        match &result.data {
            Some(data) if !data.is_empty() => {
                self.fields = data.clone();
                self.initialized = true;
                self.seeded_from = Some(job_id.to_string());
                debug!("Draft initialised with {} fields from {}", self.fields.len(), job_id);
                ReconcileOutcome::Initialized
            }
            _ => ReconcileOutcome::NoData,
        }
    }

    /// Replace exactly one field. Other keys are left untouched.
    pub fn set_field(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        if !self.initialized {
            return Err(WorkflowError::NoDraft);
        }
        self.fields.insert(name.into(), value.into());
        Ok(())
    }

    /// Point-in-time copy of the fields, for verify and submit.
    pub fn snapshot(&self) -> Result<Fields, WorkflowError> {
        self.fields().cloned().ok_or(WorkflowError::NoDraft)
    }

    /// Forget the draft so the next result with data seeds it again.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
