//! Marking a document complete.
//!
//! Completion is the one transition that must not race the autosave path:
//! if a draft save could land after the completion save, the server would
//! regress the document to draft.
//!
//! The order of operations in [`EvidenceEditor::complete`]:
//!
//! 1. Refuse while any upload is pending or uploading (no request is sent).
//! 2. Disable autosave, synchronously. Any debounce that fires from here on,
//!    and any save still queued behind the save lock, finds the flag set
//!    when it takes its snapshot and drops out.
//! 3. Flip the local status to `completed`.
//! 4. Queue the completion save behind the save lock. A draft save already
//!    in flight finishes first, so the completion save is always last.
//!
//! On failure all three flags are rolled back and the document is a draft
//! again. On success autosave stays disabled for the rest of the session.

use tracing::{info, warn};

use evidence_types::DocumentStatus;

use crate::editor::{EvidenceEditor, SaveKind};
use crate::error::EditorError;
use crate::status::EditorEvent;
use crate::store::FollowOnEffect;

/// What the store reported for a successful completion.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionOutcome {
    /// Points credited by the store, if it awards any.
    pub points_awarded: Option<u32>,
    /// Secondary effects (badges, quests) for the caller to present.
    pub follow_on_effects: Vec<FollowOnEffect>,
    /// Server timestamp of the completion save (Unix ms).
    pub completed_at: u64,
}

impl EvidenceEditor {
    /// Mark the document completed.
    ///
    /// Fails with [`EditorError::UploadsPending`] while uploads are still in
    /// flight, and with [`EditorError::AlreadyCompleted`] on a second call.
    pub async fn complete(&self) -> Result<CompletionOutcome, EditorError> {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            if state.completing {
                return Err(EditorError::CompletionInProgress);
            }
            if state.doc.status.is_completed() {
                return Err(EditorError::AlreadyCompleted);
            }
            let pending = state.in_flight_uploads();
            if pending > 0 {
                warn!(task = %shared.task_id, pending, "completion refused: uploads in progress");
                return Err(EditorError::UploadsPending { count: pending });
            }
            state.autosave_disabled = true;
            state.completing = true;
            state.doc.status = DocumentStatus::Completed;
        }
        info!(task = %shared.task_id, "completing document");

        match shared.persist(SaveKind::Completion).await {
            Ok(saved) => {
                shared.state.lock().completing = false;
                let receipt = saved.receipt;
                let outcome = CompletionOutcome {
                    points_awarded: receipt.points_awarded,
                    follow_on_effects: receipt.follow_on_effects,
                    completed_at: receipt.updated_at,
                };
                info!(
                    task = %shared.task_id,
                    points = ?outcome.points_awarded,
                    effects = outcome.follow_on_effects.len(),
                    "document completed"
                );
                shared.emit(EditorEvent::Completed(outcome.clone()));
                Ok(outcome)
            }
            Err(e) => {
                let dirty = {
                    let mut state = shared.state.lock();
                    state.doc.status = DocumentStatus::Draft;
                    state.autosave_disabled = false;
                    state.completing = false;
                    state.is_dirty()
                };
                warn!(task = %shared.task_id, "completion failed, back to draft: {e}");
                shared.emit(EditorEvent::CompletionFailed {
                    message: e.to_string(),
                });
                if dirty {
                    shared.schedule_autosave();
                }
                Err(e)
            }
        }
    }
}
