//! Migration of single-text legacy evidence.
//!
//! Tasks created before block documents existed carry their evidence as one
//! free-text field. When such a task has no stored document, the text becomes
//! the first block of a draft. [`EvidenceEditor::open`](crate::EvidenceEditor::open)
//! returns right away and the draft is saved once by a spawned task.

use tracing::{info, warn};

use evidence_types::{Block, BlockContent, EvidenceDocument, TaskId};

use crate::editor::{SaveKind, Shared};

/// Build a draft holding `legacy_text` as one text block.
///
/// Returns `None` for blank text: there is nothing to migrate.
pub fn migrate(task_id: TaskId, legacy_text: &str) -> Option<EvidenceDocument> {
    if legacy_text.trim().is_empty() {
        return None;
    }
    let mut doc = EvidenceDocument::empty(task_id);
    doc.blocks
        .insert(None, Block::with_content(BlockContent::text(legacy_text)));
    info!(task = %task_id, chars = legacy_text.chars().count(), "migrating legacy evidence");
    Some(doc)
}

/// Save the migrated draft once. Failures are logged only; the edit stays
/// pending and the next autosave picks it up.
pub(crate) async fn materialize(shared: &Shared) {
    match shared.persist(SaveKind::Legacy).await {
        Ok(saved) => info!(
            task = %shared.task_id,
            blocks = saved.receipt.blocks.len(),
            "legacy evidence saved"
        ),
        Err(e) => warn!(task = %shared.task_id, "legacy evidence left unsaved: {e}"),
    }
}
