//! Observable editor state: save status and the event stream.
//!
//! Presentation layers subscribe instead of being pushed into: the save
//! indicator watches [`SaveState`], and everything asynchronous that finishes
//! (saves, uploads, completion) is published as an [`EditorEvent`].

use evidence_types::BlockId;

use crate::completion::CompletionOutcome;

/// User-facing save indicator. Has no effect on correctness.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Saved,
    Saving,
    Unsaved,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::Saved => "saved",
            SaveStatus::Saving => "saving",
            SaveStatus::Unsaved => "unsaved",
        }
    }
}

impl std::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current save indicator plus the last save time and last save error.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SaveState {
    pub status: SaveStatus,
    /// Server timestamp (Unix ms) of the last successful save.
    pub last_saved_at: Option<u64>,
    /// Set while the most recent save attempt failed.
    pub error: Option<String>,
}

/// Events published by the editor.
///
/// Subscribe via [`EvidenceEditor::subscribe_events()`](crate::EvidenceEditor::subscribe_events).
/// Asynchronous errors and terminal results are published here. Delivery is
/// best-effort: a lagging receiver drops events, so failures are mirrored in
/// [`SaveState::error`] and on the upload task.
#[derive(Clone, Debug)]
pub enum EditorEvent {
    /// A save landed.
    Saved { updated_at: u64 },
    /// A save failed; local edits are intact.
    SaveFailed { message: String },
    /// A temporary (or stale) block id was replaced by the server's.
    BlockRenamed { from: BlockId, to: BlockId },
    /// Background upload began for a block.
    UploadStarted { block_id: BlockId },
    /// The staged reference was replaced by a permanent URL.
    UploadCompleted { block_id: BlockId, url: String },
    /// Upload failed; the file is retained for retry.
    UploadFailed { block_id: BlockId, message: String },
    /// Upload was cancelled by the caller.
    UploadCancelled { block_id: BlockId },
    /// The document reached `completed`.
    Completed(CompletionOutcome),
    /// Completion failed and was rolled back to draft.
    CompletionFailed { message: String },
}
