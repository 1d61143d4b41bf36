//! Attaching files to image and document blocks.
//!
//! ```text
//!   attach_file ──▶ validate ──▶ stage blob: preview ──▶ push staged item
//!                                                        │
//!                  background task ◀─────────────────────┘
//!                  ├─ persist (block needs a server id)     progress 25
//!                  ├─ upload_block_file(server id, file)
//!                  └─ swap staged item for permanent url    progress 100
//!                     release preview, schedule autosave
//! ```
//!
//! A task is identified by its staged `local_url`, not by block id: block ids
//! change on reconcile, and a cancel or re-attach replaces the task. A
//! background upload that finishes for a task that is no longer tracked is
//! dropped without touching the document.

use std::sync::Arc;

use tracing::{debug, info, warn};

use evidence_types::{BlockId, Item};

use crate::editor::{EvidenceEditor, SaveKind, SaveOutcome, Shared};
use crate::error::EditorError;
use crate::status::EditorEvent;
use crate::store::UploadReceipt;
use crate::upload::{UploadFile, UploadStatus, UploadTask, progress, validate_with_limit};

impl EvidenceEditor {
    /// Attach `file` to an image or document block and start uploading it.
    ///
    /// Returns the staged local reference, which is displayed until the
    /// permanent URL replaces it. Validation failures change nothing.
    pub fn attach_file(&self, block_id: BlockId, file: UploadFile) -> Result<String, EditorError> {
        let shared = &self.shared;
        let (target, local_url, replaced) = {
            let mut guard = shared.state.lock();
            let state = &mut *guard;
            if state.autosave_disabled {
                return Err(EditorError::AutosaveDisabled);
            }
            let target = state.resolve(block_id);
            let block = state
                .doc
                .blocks
                .get_mut(&target)
                .ok_or(EditorError::BlockNotFound(block_id))?;
            validate_with_limit(&file, block.kind(), shared.config.max_upload_bytes)?;

            let existing = state.uploads.get(&target).map(|t| t.status);
            if existing.is_some_and(|s| s.is_in_flight()) {
                return Err(EditorError::UploadInProgress(target));
            }
            // A failed attempt on this block is superseded.
            let replaced = state.uploads.remove(&target);

            let local_url = shared.previews.stage(&file);
            if let Some(items) = block.content.items_mut() {
                if let Some(old) = &replaced {
                    items.retain(|item| item.url != old.local_url);
                }
                items.push(Item::staged(local_url.clone(), file.name.clone()));
            }

            state
                .uploads
                .insert(target, UploadTask::new(target, file, local_url.clone()));
            (target, local_url, replaced)
        };

        if let Some(old) = replaced {
            shared.previews.release(&old.local_url);
        }
        info!(block = %target, url = %local_url, "file attached, uploading");
        shared.upload_in_background(target, &local_url, true);
        Ok(local_url)
    }

    /// Retry a failed upload with the retained file.
    ///
    /// Returns `Ok(false)` if no upload is tracked for the block.
    pub fn retry_upload(&self, block_id: BlockId) -> Result<bool, EditorError> {
        let (target, local_url) = {
            let mut state = self.shared.state.lock();
            if state.autosave_disabled {
                return Err(EditorError::AutosaveDisabled);
            }
            let target = state.resolve(block_id);
            let Some(task) = state.uploads.get_mut(&target) else {
                return Ok(false);
            };
            if task.status.is_in_flight() {
                return Err(EditorError::UploadInProgress(target));
            }
            requeue(task);
            (target, task.local_url.clone())
        };
        info!(block = %target, "retrying upload");
        self.shared.upload_in_background(target, &local_url, false);
        Ok(true)
    }

    /// Stop tracking a block's upload and drop its staged item.
    ///
    /// A transfer already under way is not interrupted; its result is
    /// discarded when it arrives. Returns false if nothing was tracked.
    pub fn cancel_upload(&self, block_id: BlockId) -> bool {
        let task = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let target = state.resolve(block_id);
            let Some(task) = state.uploads.remove(&target) else {
                return false;
            };
            if let Some(block) = state.doc.blocks.get_mut(&target)
                && let Some(items) = block.content.items_mut()
            {
                items.retain(|item| item.url != task.local_url);
            }
            task
        };
        self.shared.previews.release(&task.local_url);
        info!(block = %task.block_id, "upload cancelled");
        self.shared.emit(EditorEvent::UploadCancelled {
            block_id: task.block_id,
        });
        true
    }
}

/// Put a failed task back in the queue with its error cleared.
fn requeue(task: &mut UploadTask) {
    task.status = UploadStatus::Pending;
    task.progress = progress::STAGED;
    task.error = None;
}

impl Shared {
    /// Spawn the save-then-upload sequence for a pending task.
    ///
    /// With `save_first` the block list is always saved before the transfer;
    /// otherwise only when the block has no server id yet.
    pub(crate) fn upload_in_background(self: &Arc<Self>, block_id: BlockId, local_url: &str, save_first: bool) {
        self.emit(EditorEvent::UploadStarted { block_id });
        let shared = Arc::clone(self);
        let local_url = local_url.to_string();
        tokio::spawn(async move {
            if let Err(e) = shared.run_upload(block_id, &local_url, save_first).await {
                shared.fail_upload(block_id, &local_url, e);
            }
        });
    }

    async fn run_upload(&self, block_id: BlockId, local_url: &str, save_first: bool) -> Result<(), EditorError> {
        let known = {
            let mut state = self.state.lock();
            let target = state.resolve(block_id);
            match state.uploads.get_mut(&target) {
                Some(task) if task.local_url == local_url => task.status = UploadStatus::Uploading,
                _ => return Err(EditorError::UploadCancelled(block_id)),
            }
            target.server_id()
        };
        let server_id = match known {
            Some(id) if !save_first => id,
            _ => {
                let saved = self.persist(SaveKind::Upload).await?;
                self.server_id_in(&saved, block_id)?
            }
        };

        let file = {
            let mut state = self.state.lock();
            let target = state.resolve(block_id);
            match state.uploads.get_mut(&target) {
                Some(task) if task.local_url == local_url => {
                    task.progress = progress::BLOCK_SAVED;
                    task.file.clone()
                }
                _ => return Err(EditorError::UploadCancelled(block_id)),
            }
        };

        debug!(block = %block_id, %server_id, file = %file.name, size = file.size(), "uploading file");
        let timeout = self.config.upload_timeout();
        let receipt = match tokio::time::timeout(timeout, self.store.upload_block_file(server_id, &file)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EditorError::Timeout {
                    operation: "upload",
                    after: timeout,
                });
            }
        };
        self.finish_upload(block_id, local_url, receipt);
        Ok(())
    }

    /// Find the server id for `block_id` by its position in the save.
    fn server_id_in(&self, saved: &SaveOutcome, block_id: BlockId) -> Result<uuid::Uuid, EditorError> {
        let state = self.state.lock();
        let target = state.resolve(block_id);
        let index = saved
            .submitted
            .iter()
            .position(|id| state.resolve(*id) == target)
            .ok_or(EditorError::BlockNotFound(block_id))?;
        saved
            .receipt
            .blocks
            .iter()
            .find(|b| b.order == index)
            .map(|b| b.id)
            .ok_or(EditorError::MissingServerBlock { index })
    }

    fn finish_upload(&self, block_id: BlockId, local_url: &str, receipt: UploadReceipt) {
        let (target, replaced) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let target = state.resolve(block_id);
            let current = state
                .uploads
                .get(&target)
                .is_some_and(|t| t.local_url == local_url);
            if !current {
                debug!(block = %target, "upload finished after cancel, result dropped");
                return;
            }
            state.uploads.remove(&target);

            let mut replaced = false;
            if let Some(block) = state.doc.blocks.get_mut(&target)
                && let Some(items) = block.content.items_mut()
                && let Some(item) = items.iter_mut().find(|item| item.url == local_url)
            {
                item.url = receipt.url.clone();
                item.filename = Some(receipt.filename.clone());
                item.upload_pending = false;
                replaced = true;
            }
            if replaced {
                state.touch();
            }
            (target, replaced)
        };

        self.previews.release(local_url);
        if !replaced {
            warn!(block = %target, url = %receipt.url, "uploaded file has no staged item to replace");
            return;
        }
        info!(block = %target, url = %receipt.url, progress = progress::DONE, "upload complete");
        self.emit(EditorEvent::UploadCompleted {
            block_id: target,
            url: receipt.url,
        });
        self.schedule_autosave();
    }

    fn fail_upload(&self, block_id: BlockId, local_url: &str, error: EditorError) {
        let target = {
            let mut state = self.state.lock();
            let target = state.resolve(block_id);
            match state.uploads.get_mut(&target) {
                Some(task) if task.local_url == local_url => {
                    task.status = UploadStatus::Failed;
                    task.error = Some(error.to_string());
                }
                _ => {
                    debug!(block = %target, "abandoned upload ended: {error}");
                    return;
                }
            }
            target
        };
        warn!(block = %target, "upload failed: {error}");
        self.emit(EditorEvent::UploadFailed {
            block_id: target,
            message: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use evidence_types::{BlockContent, BlockKind, TaskId};

    use crate::config::EditorConfig;
    use crate::editor::BlockPatch;
    use crate::memory::MemoryStore;
    use crate::store::StoreError;

    use super::*;

    fn png() -> UploadFile {
        UploadFile::new("photo.png", "image/png", vec![7u8; 64])
    }

    async fn editor(store: &Arc<MemoryStore>) -> EvidenceEditor {
        EvidenceEditor::open(store.clone(), TaskId::new(), None, EditorConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_stages_item_and_task() {
        let store = Arc::new(MemoryStore::new());
        store.set_upload_delay(Duration::from_secs(10));
        let editor = editor(&store).await;
        let block = editor.add_block(BlockKind::Image, None);

        let local_url = editor.attach_file(block, png()).unwrap();
        let items = editor.block(block).unwrap().content.items().unwrap().to_vec();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, local_url);
        assert!(items[0].is_staged());

        let task = editor.upload_task(block).unwrap();
        assert_eq!(task.status, UploadStatus::Pending);
        assert_eq!(task.filename, "photo.png");
        assert_eq!(editor.staged_preview_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(editor.upload_task(block).unwrap().status, UploadStatus::Uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_patch_dropping_staged_item_ends_upload() {
        let store = Arc::new(MemoryStore::new());
        store.set_upload_delay(Duration::from_secs(5));
        let editor = editor(&store).await;
        let mut events = editor.subscribe_events();
        let block = editor.add_block(BlockKind::Image, None);
        editor.attach_file(block, png()).unwrap();

        editor
            .update_block(block, BlockPatch::items(vec![Item::new("https://cdn/other.png")]))
            .unwrap();
        assert!(editor.upload_task(block).is_none());
        assert_eq!(editor.staged_preview_count(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        let urls: Vec<String> = editor
            .block(block)
            .unwrap()
            .content
            .items()
            .unwrap()
            .iter()
            .map(|item| item.url.clone())
            .collect();
        assert_eq!(urls, vec!["https://cdn/other.png".to_string()]);
        assert!(editor.upload_tasks().is_empty());

        let mut cancelled = false;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, EditorEvent::UploadCompleted { .. }));
            cancelled |= matches!(event, EditorEvent::UploadCancelled { .. });
        }
        assert!(cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_requeues_as_pending() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_upload(StoreError::Network("bucket offline".into()));
        store.set_upload_delay(Duration::from_secs(2));
        let editor = editor(&store).await;
        let block = editor.add_block(BlockKind::Image, None);
        editor.attach_file(block, png()).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let task = editor.upload_task(block).unwrap();
        assert_eq!(task.status, UploadStatus::Failed);
        assert!(task.error.is_some());

        assert_eq!(editor.retry_upload(block), Ok(true));
        let task = editor.upload_task(block).unwrap();
        assert_eq!(task.status, UploadStatus::Pending);
        assert!(task.error.is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(editor.upload_task(block).unwrap().status, UploadStatus::Uploading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reaches_block_saved() {
        let store = Arc::new(MemoryStore::new());
        store.set_upload_delay(Duration::from_secs(10));
        let editor = editor(&store).await;
        let block = editor.add_block(BlockKind::Image, None);
        editor.attach_file(block, png()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let task = editor.upload_task(block).unwrap();
        assert_eq!(task.progress, progress::BLOCK_SAVED);
        assert!(!task.block_id.is_temporary());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_to_text_block_rejected() {
        let store = Arc::new(MemoryStore::new());
        let editor = editor(&store).await;
        let block = editor.add_block_with(BlockContent::text("hi"), None);

        let err = editor.attach_file(block, png()).unwrap_err();
        assert!(matches!(err, EditorError::Validation(_)));
        assert!(editor.upload_task(block).is_none());
        assert_eq!(editor.staged_preview_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_without_task_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let editor = editor(&store).await;
        let block = editor.add_block(BlockKind::Image, None);
        assert_eq!(editor.retry_upload(block), Ok(false));
        assert!(!editor.cancel_upload(block));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_block_drops_its_upload() {
        let store = Arc::new(MemoryStore::new());
        store.set_upload_delay(Duration::from_secs(10));
        let editor = editor(&store).await;
        let block = editor.add_block(BlockKind::Document, None);
        let pdf = UploadFile::new("essay.pdf", "application/pdf", vec![1u8; 8]);
        editor.attach_file(block, pdf).unwrap();

        editor.delete_block(block).unwrap();
        assert!(editor.upload_tasks().is_empty());
        assert_eq!(editor.staged_preview_count(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(editor.blocks().is_empty());
    }
}
