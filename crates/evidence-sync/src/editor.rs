//! Document synchronization engine.
//!
//! [`EvidenceEditor`] owns the in-memory block list and status for one editing
//! session. Local mutations are synchronous and never touch the network; each
//! one bumps a revision counter and pokes the autosave driver.
//!
//! ```text
//!   EvidenceEditor (sync mutations)      mpsc        autosave driver (task)
//!   ┌──────────────────────────────┐  ─────────▶  ┌───────────────────────────┐
//!   │ .add_block() .update_block() │   signal     │ debounce quiet period     │
//!   │ .delete_block() .reorder()   │              │ persist(Autosave)         │
//!   └──────────────┬───────────────┘              └─────────────┬─────────────┘
//!                  │                                            │
//!                  ▼                                            ▼
//!        Mutex<EditorState>  ◀──────── reconcile ───────  save_lock (one save
//!        (blocks, status, revision,                        in flight, ever)
//!         aliases, uploads)
//! ```
//!
//! # Save protocol
//!
//! - Every save goes through `save_lock`, so at most one is in flight.
//! - The snapshot is taken *after* acquiring `save_lock`, under the state
//!   lock, and only if autosave is still enabled. Completion disables autosave
//!   before it queues for the lock, so no draft snapshot can be taken once
//!   completion has begun.
//! - Responses are reconciled by position at snapshot time: the block that was
//!   submitted at index `i` takes the server id for index `i`. Content is never
//!   copied back from the response, so edits made during the flight survive.
//! - Revisions: `saved_revision` catches up to the snapshot's revision on
//!   success. If the document moved on during the flight, the indicator stays
//!   `unsaved` and the queued signal produces exactly one follow-up save.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use evidence_types::{
    Block, BlockContent, BlockId, BlockKind, BlockList, DocumentStatus, EvidenceDocument, Item,
    TaskId, WireBlock,
};

use crate::config::EditorConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::EditorError;
use crate::legacy;
use crate::status::{EditorEvent, SaveState, SaveStatus};
use crate::store::{SaveReceipt, SavedBlock, SharedStore, StoredDocument};
use crate::upload::{PreviewRegistry, UploadTask, UploadTaskInfo};

// ============================================================================
// Patches
// ============================================================================

/// Partial update for one block. Unset fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockPatch {
    /// New text (text blocks only).
    pub text: Option<String>,
    /// Replacement item list (non-text blocks only).
    pub items: Option<Vec<Item>>,
    pub is_private: Option<bool>,
}

impl BlockPatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn items(items: Vec<Item>) -> Self {
        Self {
            items: Some(items),
            ..Default::default()
        }
    }

    pub fn private(is_private: bool) -> Self {
        Self {
            is_private: Some(is_private),
            ..Default::default()
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Why a save is being sent. Decides gating and error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SaveKind {
    /// Debounced, skipped when nothing changed.
    Autosave,
    /// Caller-requested.
    Flush,
    /// Step one of an upload: the block needs a server id.
    Upload,
    /// First save of migrated legacy evidence. Failures stay quiet.
    Legacy,
    /// The one save allowed to carry `completed`.
    Completion,
}

impl SaveKind {
    fn as_str(&self) -> &'static str {
        match self {
            SaveKind::Autosave => "autosave",
            SaveKind::Flush => "flush",
            SaveKind::Upload => "upload",
            SaveKind::Legacy => "legacy",
            SaveKind::Completion => "completion",
        }
    }
}

/// What was sent, kept for reconciliation.
struct SaveSnapshot {
    revision: u64,
    submitted: Vec<BlockId>,
    blocks: Vec<WireBlock>,
    status: DocumentStatus,
}

/// Result of a save: the ids in submitted order plus the store's receipt.
pub(crate) struct SaveOutcome {
    pub submitted: Vec<BlockId>,
    pub receipt: SaveReceipt,
}

/// Everything the editor mutates, behind one lock.
pub(crate) struct EditorState {
    pub doc: EvidenceDocument,
    /// Set by completion before the status flip; checked by every save
    /// except the completion save itself.
    pub autosave_disabled: bool,
    /// Completion save in flight.
    pub completing: bool,
    pub revision: u64,
    pub saved_revision: u64,
    /// Retired id -> the id that replaced it.
    aliases: HashMap<BlockId, BlockId>,
    /// At most one tracked upload per block, keyed by current id.
    pub uploads: HashMap<BlockId, UploadTask>,
}

impl EditorState {
    fn new(doc: EvidenceDocument, dirty: bool) -> Self {
        let autosave_disabled = doc.status.is_completed();
        Self {
            doc,
            autosave_disabled,
            completing: false,
            revision: u64::from(dirty),
            saved_revision: 0,
            aliases: HashMap::new(),
            uploads: HashMap::new(),
        }
    }

    /// Follow renames to the block's current id.
    pub fn resolve(&self, id: BlockId) -> BlockId {
        let mut current = id;
        // Bounded in case a store ever hands an old id back.
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(&current) {
                Some(next) => current = *next,
                None => break,
            }
        }
        current
    }

    pub fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }

    pub fn in_flight_uploads(&self) -> usize {
        self.uploads
            .values()
            .filter(|t| t.status.is_in_flight())
            .count()
    }

    /// Refuse every save except completion once autosave is disabled.
    fn check_writable(&self, kind: SaveKind) -> Result<(), EditorError> {
        if kind == SaveKind::Completion {
            return Ok(());
        }
        if self.autosave_disabled || self.doc.status.is_completed() {
            return Err(EditorError::AutosaveDisabled);
        }
        Ok(())
    }

    fn snapshot(&self) -> SaveSnapshot {
        SaveSnapshot {
            revision: self.revision,
            submitted: self.doc.blocks.ids(),
            blocks: self.doc.blocks.iter().map(WireBlock::sanitized).collect(),
            status: self.doc.status,
        }
    }

    /// Rename submitted blocks to the ids the store assigned by position.
    fn reconcile(&mut self, submitted: &[BlockId], saved: &[SavedBlock]) -> Vec<(BlockId, BlockId)> {
        let mut renames = Vec::new();
        for entry in saved {
            let Some(&sent) = submitted.get(entry.order) else {
                warn!(
                    "save response has block at position {} but only {} were sent",
                    entry.order,
                    submitted.len()
                );
                continue;
            };
            let server = BlockId::persisted(entry.id);
            let current = self.resolve(sent);
            if current == server {
                continue;
            }
            if !self.doc.blocks.rename(&current, server) {
                trace!("block {current} deleted during save, nothing to rename");
                continue;
            }
            // Aliases point straight at live ids. Besides the block's
            // temporary handle only its latest previous id is kept.
            self.aliases
                .retain(|from, to| *to != current || from.is_temporary());
            for to in self.aliases.values_mut() {
                if *to == current {
                    *to = server;
                }
            }
            self.aliases.remove(&server);
            self.aliases.insert(current, server);
            if let Some(mut task) = self.uploads.remove(&current) {
                task.block_id = server;
                self.uploads.insert(server, task);
            }
            renames.push((current, server));
        }
        let blocks = &self.doc.blocks;
        self.aliases.retain(|_, to| blocks.get(to).is_some());
        renames
    }
}

// ============================================================================
// Shared core
// ============================================================================

/// State shared between the editor handle, the autosave driver, and
/// background uploads.
pub(crate) struct Shared {
    pub task_id: TaskId,
    pub store: SharedStore,
    pub config: EditorConfig,
    pub state: Mutex<EditorState>,
    pub previews: PreviewRegistry,
    save_lock: tokio::sync::Mutex<()>,
    save_state: watch::Sender<SaveState>,
    events: broadcast::Sender<EditorEvent>,
    autosave_tx: mpsc::UnboundedSender<()>,
}

impl Shared {
    pub fn emit(&self, event: EditorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_save_state(&self, f: impl FnOnce(&mut SaveState)) {
        self.save_state.send_modify(f);
    }

    /// Mark unsaved and wake the autosave driver, unless autosave is disabled.
    pub fn schedule_autosave(&self) -> bool {
        if self.state.lock().autosave_disabled {
            trace!(task = %self.task_id, "autosave not scheduled: disabled");
            return false;
        }
        self.set_save_state(|s| s.status = SaveStatus::Unsaved);
        if self.autosave_tx.send(()).is_err() {
            debug!(task = %self.task_id, "autosave driver stopped; edit stays local");
        }
        true
    }

    /// Debounced save: skipped when nothing changed since the last save.
    async fn autosave(&self) -> Result<(), EditorError> {
        let _guard = self.save_lock.lock().await;
        let snapshot = {
            let state = self.state.lock();
            state.check_writable(SaveKind::Autosave)?;
            if !state.is_dirty() {
                trace!(task = %self.task_id, "autosave skipped: nothing changed");
                return Ok(());
            }
            state.snapshot()
        };
        self.send(SaveKind::Autosave, snapshot).await.map(|_| ())
    }

    /// Save now, regardless of whether anything changed.
    pub async fn persist(&self, kind: SaveKind) -> Result<SaveOutcome, EditorError> {
        let _guard = self.save_lock.lock().await;
        let snapshot = {
            let state = self.state.lock();
            state.check_writable(kind)?;
            state.snapshot()
        };
        self.send(kind, snapshot).await
    }

    /// Send a snapshot and fold the response back in. Caller holds `save_lock`.
    async fn send(&self, kind: SaveKind, snapshot: SaveSnapshot) -> Result<SaveOutcome, EditorError> {
        let SaveSnapshot {
            revision,
            submitted,
            blocks,
            status,
        } = snapshot;

        self.set_save_state(|s| s.status = SaveStatus::Saving);
        debug!(
            task = %self.task_id,
            kind = kind.as_str(),
            blocks = blocks.len(),
            %status,
            revision,
            "saving document"
        );

        let timeout = self.config.save_timeout();
        let result = match tokio::time::timeout(
            timeout,
            self.store.save_document(self.task_id, blocks, status),
        )
        .await
        {
            Ok(result) => result.map_err(EditorError::from),
            Err(_) => Err(EditorError::Timeout {
                operation: "save",
                after: timeout,
            }),
        };

        match result {
            Ok(receipt) => {
                let (renames, dirty) = {
                    let mut state = self.state.lock();
                    let renames = if kind == SaveKind::Completion {
                        Vec::new()
                    } else {
                        state.reconcile(&submitted, &receipt.blocks)
                    };
                    state.saved_revision = state.saved_revision.max(revision);
                    state.doc.updated_at = Some(receipt.updated_at);
                    (renames, state.is_dirty())
                };

                for (from, to) in &renames {
                    debug!(task = %self.task_id, "block {from} is now {to}");
                    self.emit(EditorEvent::BlockRenamed {
                        from: *from,
                        to: *to,
                    });
                }
                info!(
                    task = %self.task_id,
                    kind = kind.as_str(),
                    renamed = renames.len(),
                    updated_at = receipt.updated_at,
                    "document saved"
                );

                let updated_at = receipt.updated_at;
                self.set_save_state(|s| {
                    s.status = if dirty {
                        SaveStatus::Unsaved
                    } else {
                        SaveStatus::Saved
                    };
                    s.last_saved_at = Some(updated_at);
                    s.error = None;
                });
                self.emit(EditorEvent::Saved { updated_at });
                Ok(SaveOutcome { submitted, receipt })
            }
            Err(e) => {
                if kind == SaveKind::Legacy {
                    warn!(task = %self.task_id, "legacy evidence save failed, next autosave retries: {e}");
                    self.set_save_state(|s| s.status = SaveStatus::Unsaved);
                } else {
                    warn!(task = %self.task_id, kind = kind.as_str(), "save failed: {e}");
                    let message = e.to_string();
                    self.set_save_state(|s| {
                        s.status = SaveStatus::Unsaved;
                        s.error = Some(message.clone());
                    });
                    self.emit(EditorEvent::SaveFailed { message });
                }
                Err(e)
            }
        }
    }
}

/// Autosave driver: collapse bursts of edits, then save once.
///
/// Signals that arrive while a save is in flight wait in the channel and
/// produce one follow-up save after it resolves.
async fn autosave_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<()>) {
    let debounce = shared.config.autosave_debounce();
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        match shared.autosave().await {
            Ok(()) => {}
            Err(EditorError::AutosaveDisabled) => {
                trace!(task = %shared.task_id, "queued autosave dropped: document completed");
            }
            Err(e) => debug!(task = %shared.task_id, "autosave failed, waiting for next edit: {e}"),
        }
    }
    debug!(task = %shared.task_id, "autosave driver shutting down: channel closed");
}

fn document_from_stored(stored: StoredDocument) -> EvidenceDocument {
    let blocks = stored
        .blocks
        .into_iter()
        .map(WireBlock::into_block)
        .collect();
    EvidenceDocument {
        task_id: stored.task_id,
        status: stored.status,
        blocks: BlockList::from_blocks(blocks),
        updated_at: stored.updated_at,
    }
}

// ============================================================================
// EvidenceEditor (public API)
// ============================================================================

/// Editing session for one task's evidence document.
///
/// Must be created inside a tokio runtime: opening spawns the autosave
/// driver, and uploads run as background tasks. Dropping the editor stops
/// the driver; call [`close`](Self::close) first to flush pending edits.
pub struct EvidenceEditor {
    pub(crate) shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl EvidenceEditor {
    /// Load the task's document and start an editing session.
    ///
    /// When the store has no document and `legacy_text` is non-blank, the
    /// legacy evidence is migrated into a single text block and saved once in
    /// the background. Opening does not wait for that save; a failure leaves
    /// the edit pending for the next autosave.
    pub async fn open(
        store: SharedStore,
        task_id: TaskId,
        legacy_text: Option<&str>,
        config: EditorConfig,
    ) -> Result<Self, EditorError> {
        let timeout = config.save_timeout();
        let stored = match tokio::time::timeout(timeout, store.get_document(task_id)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(EditorError::Timeout {
                    operation: "load",
                    after: timeout,
                });
            }
        };

        let (doc, migrated) = match stored {
            Some(stored) => {
                let doc = document_from_stored(stored);
                info!(
                    task = %task_id,
                    blocks = doc.blocks.len(),
                    status = %doc.status,
                    "loaded evidence document"
                );
                (doc, false)
            }
            None => match legacy_text.and_then(|text| legacy::migrate(task_id, text)) {
                Some(doc) => (doc, true),
                None => {
                    debug!(task = %task_id, "no evidence document yet, starting empty");
                    (EvidenceDocument::empty(task_id), false)
                }
            },
        };

        let editor = Self::start(store, doc, migrated, config);
        if migrated {
            let shared = Arc::clone(&editor.shared);
            tokio::spawn(async move { legacy::materialize(&shared).await });
        }
        Ok(editor)
    }

    fn start(store: SharedStore, doc: EvidenceDocument, dirty: bool, config: EditorConfig) -> Self {
        let (autosave_tx, autosave_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (save_state, _) = watch::channel(SaveState {
            status: if dirty {
                SaveStatus::Unsaved
            } else {
                SaveStatus::Saved
            },
            last_saved_at: doc.updated_at,
            error: None,
        });

        let shared = Arc::new(Shared {
            task_id: doc.task_id,
            store,
            config,
            state: Mutex::new(EditorState::new(doc, dirty)),
            previews: PreviewRegistry::new(),
            save_lock: tokio::sync::Mutex::new(()),
            save_state,
            events,
            autosave_tx,
        });
        let driver = tokio::spawn(autosave_loop(Arc::clone(&shared), autosave_rx));
        Self { shared, driver }
    }

    // ── Mutations ────────────────────────────────────────────────────────

    /// Add an empty block of `kind` at `position` (`None` appends).
    pub fn add_block(&self, kind: BlockKind, position: Option<usize>) -> BlockId {
        self.insert_block(Block::new(kind), position)
    }

    /// Add a block with initial content.
    pub fn add_block_with(&self, content: BlockContent, position: Option<usize>) -> BlockId {
        self.insert_block(Block::with_content(content), position)
    }

    fn insert_block(&self, block: Block, position: Option<usize>) -> BlockId {
        let id = block.id();
        {
            let mut state = self.shared.state.lock();
            let index = state.doc.blocks.insert(position, block);
            state.touch();
            debug!(block = %id, index, "block added");
        }
        self.shared.schedule_autosave();
        id
    }

    /// Apply a partial update. Fails without changing anything if the patch
    /// doesn't fit the block's kind.
    pub fn update_block(&self, id: BlockId, patch: BlockPatch) -> Result<(), EditorError> {
        let dropped = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let target = state.resolve(id);
            let block = state
                .doc
                .blocks
                .get_mut(&target)
                .ok_or(EditorError::BlockNotFound(id))?;
            let kind = block.kind();
            if (patch.text.is_some() && kind != BlockKind::Text)
                || (patch.items.is_some() && !kind.has_items())
            {
                return Err(EditorError::KindMismatch {
                    block_id: target,
                    kind,
                });
            }
            if let Some(text) = patch.text {
                block.content = BlockContent::text(text);
            }
            let mut dropped = None;
            if let Some(items) = patch.items {
                // An upload whose staged item was patched away has nowhere to land.
                let keeps_staged = state
                    .uploads
                    .get(&target)
                    .is_none_or(|t| items.iter().any(|item| item.url == t.local_url));
                block.content = BlockContent::with_items(kind, items);
                if !keeps_staged {
                    dropped = state.uploads.remove(&target);
                }
            }
            if let Some(is_private) = patch.is_private {
                block.is_private = is_private;
            }
            state.touch();
            dropped
        };
        if let Some(task) = dropped {
            debug!(block = %task.block_id, "staged item replaced, upload dropped");
            self.shared.previews.release(&task.local_url);
            self.shared.emit(EditorEvent::UploadCancelled {
                block_id: task.block_id,
            });
        }
        self.shared.schedule_autosave();
        Ok(())
    }

    /// Delete a block, dropping any upload tracked for it.
    pub fn delete_block(&self, id: BlockId) -> Result<(), EditorError> {
        let dropped = {
            let mut state = self.shared.state.lock();
            let target = state.resolve(id);
            state
                .doc
                .blocks
                .remove(&target)
                .ok_or(EditorError::BlockNotFound(id))?;
            state.touch();
            debug!(block = %target, "block deleted");
            state.uploads.remove(&target)
        };
        if let Some(task) = dropped {
            self.shared.previews.release(&task.local_url);
            self.shared.emit(EditorEvent::UploadCancelled {
                block_id: task.block_id,
            });
        }
        self.shared.schedule_autosave();
        Ok(())
    }

    /// Move the block at index `from` to index `to`.
    pub fn reorder(&self, from: usize, to: usize) -> Result<(), EditorError> {
        {
            let mut state = self.shared.state.lock();
            state.doc.blocks.move_block(from, to)?;
            if from == to {
                return Ok(());
            }
            state.touch();
            debug!(from, to, "block moved");
        }
        self.shared.schedule_autosave();
        Ok(())
    }

    /// Remove one item from a media/link block. Removing the last item
    /// deletes the block.
    pub fn remove_item(&self, id: BlockId, index: usize) -> Result<(), EditorError> {
        let dropped = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let target = state.resolve(id);
            let block = state
                .doc
                .blocks
                .get_mut(&target)
                .ok_or(EditorError::BlockNotFound(id))?;
            let kind = block.kind();
            let items = block
                .content
                .items_mut()
                .ok_or(EditorError::KindMismatch {
                    block_id: target,
                    kind,
                })?;
            if index >= items.len() {
                return Err(EditorError::ItemNotFound {
                    block_id: target,
                    index,
                });
            }
            let removed = items.remove(index);
            let now_empty = items.is_empty();
            if now_empty {
                state.doc.blocks.remove(&target);
                debug!(block = %target, "last item removed, block deleted");
            }
            state.touch();

            let owns_task = state
                .uploads
                .get(&target)
                .is_some_and(|t| now_empty || t.local_url == removed.url);
            if owns_task {
                state.uploads.remove(&target)
            } else {
                None
            }
        };
        if let Some(task) = dropped {
            self.shared.previews.release(&task.local_url);
            self.shared.emit(EditorEvent::UploadCancelled {
                block_id: task.block_id,
            });
        }
        self.shared.schedule_autosave();
        Ok(())
    }

    /// Request a debounced save. Called after every mutation; a no-op while
    /// autosave is disabled. Returns whether a save was scheduled.
    pub fn schedule_autosave(&self) -> bool {
        self.shared.schedule_autosave()
    }

    /// Save immediately. The retry affordance after a failed autosave.
    pub async fn flush(&self) -> Result<(), EditorError> {
        self.shared.persist(SaveKind::Flush).await.map(|_| ())
    }

    /// Flush unsaved edits (unless autosave is disabled) and stop the
    /// autosave driver. On error the session stays usable for a retry.
    pub async fn close(&self) -> Result<(), EditorError> {
        let pending = {
            let state = self.shared.state.lock();
            state.is_dirty() && !state.autosave_disabled
        };
        if pending {
            self.flush().await?;
        }
        self.driver.abort();
        debug!(task = %self.shared.task_id, "editor closed");
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn task_id(&self) -> TaskId {
        self.shared.task_id
    }

    pub fn status(&self) -> DocumentStatus {
        self.shared.state.lock().doc.status
    }

    /// Snapshot of the whole document.
    pub fn document(&self) -> EvidenceDocument {
        self.shared.state.lock().doc.clone()
    }

    /// Blocks in order.
    pub fn blocks(&self) -> Vec<Block> {
        self.shared.state.lock().doc.blocks.as_slice().to_vec()
    }

    /// Look up a block by current or retired id.
    pub fn block(&self, id: BlockId) -> Option<Block> {
        let state = self.shared.state.lock();
        let target = state.resolve(id);
        state.doc.blocks.get(&target).cloned()
    }

    /// The block's current id (follows renames).
    pub fn resolve_id(&self, id: BlockId) -> BlockId {
        self.shared.state.lock().resolve(id)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.shared.state.lock().is_dirty()
    }

    pub fn is_autosave_disabled(&self) -> bool {
        self.shared.state.lock().autosave_disabled
    }

    pub fn save_state(&self) -> SaveState {
        self.shared.save_state.borrow().clone()
    }

    /// Watch the save indicator.
    pub fn subscribe_save_state(&self) -> watch::Receiver<SaveState> {
        self.shared.save_state.subscribe()
    }

    /// Subscribe to saves, upload results, completion, and errors.
    ///
    /// The channel is bounded by [`EVENT_CHANNEL_CAPACITY`]; a slow receiver
    /// skips ahead and misses events. The latest save or completion failure
    /// stays readable from [`save_state`](Self::save_state) and an upload
    /// failure from [`upload_task`](Self::upload_task).
    pub fn subscribe_events(&self) -> broadcast::Receiver<EditorEvent> {
        self.shared.events.subscribe()
    }

    pub fn upload_task(&self, id: BlockId) -> Option<UploadTaskInfo> {
        let state = self.shared.state.lock();
        let target = state.resolve(id);
        state.uploads.get(&target).map(UploadTask::info)
    }

    pub fn upload_tasks(&self) -> Vec<UploadTaskInfo> {
        self.shared
            .state
            .lock()
            .uploads
            .values()
            .map(UploadTask::info)
            .collect()
    }

    /// Number of staged local references still held.
    pub fn staged_preview_count(&self) -> usize {
        self.shared.previews.len()
    }
}

impl Drop for EvidenceEditor {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::memory::MemoryStore;
    use crate::store::StoreError;

    const DEBOUNCE: Duration = Duration::from_millis(1000);

    async fn open_empty(store: &Arc<MemoryStore>) -> EvidenceEditor {
        EvidenceEditor::open(store.clone(), TaskId::new(), None, EditorConfig::default())
            .await
            .unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<EditorEvent>) -> Vec<EditorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn orders(editor: &EvidenceEditor) -> Vec<usize> {
        editor.blocks().iter().map(|b| b.order()).collect()
    }

    #[test]
    fn test_reissued_ids_keep_aliases_bounded() {
        let mut state = EditorState::new(EvidenceDocument::empty(TaskId::new()), false);
        let block = Block::with_content(BlockContent::text("x"));
        let handle = block.id();
        state.doc.blocks.insert(None, block);

        let mut previous = handle;
        let mut latest = handle;
        for _ in 0..10 {
            let submitted = state.doc.blocks.ids();
            let id = uuid::Uuid::now_v7();
            let renames = state.reconcile(&submitted, &[SavedBlock { id, order: 0 }]);
            previous = latest;
            latest = BlockId::persisted(id);
            assert_eq!(renames, vec![(previous, latest)]);
            assert!(state.aliases.len() <= 2);
        }
        assert_eq!(state.resolve(handle), latest);
        assert_eq!(state.resolve(previous), latest);

        state.doc.blocks.remove(&latest);
        state.reconcile(&[], &[]);
        assert!(state.aliases.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_keep_order_contiguous() {
        let store = Arc::new(MemoryStore::new());
        let editor = open_empty(&store).await;

        let a = editor.add_block(BlockKind::Text, None);
        let b = editor.add_block(BlockKind::Image, Some(0));
        let c = editor.add_block(BlockKind::Link, Some(1));
        assert_eq!(orders(&editor), vec![0, 1, 2]);
        let ids: Vec<BlockId> = editor.blocks().iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec![b, c, a]);

        editor.reorder(0, 2).unwrap();
        editor.delete_block(c).unwrap();
        assert_eq!(orders(&editor), vec![0, 1]);
        let ids: Vec<BlockId> = editor.blocks().iter().map(|b| b.id()).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_kind_mismatch_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let editor = open_empty(&store).await;
        let image = editor.add_block(BlockKind::Image, None);

        let err = editor
            .update_block(
                image,
                BlockPatch {
                    text: Some("nope".into()),
                    is_private: Some(true),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EditorError::KindMismatch { kind: BlockKind::Image, .. }));
        assert!(!editor.block(image).unwrap().is_private);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_block_and_bad_index() {
        let store = Arc::new(MemoryStore::new());
        let editor = open_empty(&store).await;
        let ghost = BlockId::temporary();

        assert_eq!(
            editor.update_block(ghost, BlockPatch::text("x")),
            Err(EditorError::BlockNotFound(ghost))
        );
        assert_eq!(editor.delete_block(ghost), Err(EditorError::BlockNotFound(ghost)));
        assert!(matches!(editor.reorder(0, 1), Err(EditorError::Model(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_collapse_into_one_save() {
        let store = Arc::new(MemoryStore::new());
        let editor = open_empty(&store).await;

        let id = editor.add_block(BlockKind::Text, None);
        for i in 0..5 {
            editor.update_block(id, BlockPatch::text(format!("draft {i}"))).unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(store.save_count(), 0, "still inside the quiet period");

        tokio::time::sleep(DEBOUNCE * 2).await;
        let saves = store.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].blocks[0].content, serde_json::json!({"text": "draft 4"}));
        assert_eq!(editor.save_state().status, SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_status_transitions() {
        let store = Arc::new(MemoryStore::new());
        store.set_save_delay(Duration::from_millis(500));
        let editor = open_empty(&store).await;
        let mut watch = editor.subscribe_save_state();
        assert_eq!(editor.save_state().status, SaveStatus::Saved);

        editor.add_block(BlockKind::Text, None);
        assert_eq!(editor.save_state().status, SaveStatus::Unsaved);

        tokio::time::sleep(DEBOUNCE + Duration::from_millis(100)).await;
        assert_eq!(editor.save_state().status, SaveStatus::Saving);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let state = editor.save_state();
        assert_eq!(state.status, SaveStatus::Saved);
        assert!(state.last_saved_at.is_some());
        assert!(watch.has_changed().unwrap());
        assert_eq!(watch.borrow_and_update().status, SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_flight_triggers_exactly_one_follow_up() {
        let store = Arc::new(MemoryStore::new());
        store.set_save_delay(Duration::from_millis(500));
        let editor = open_empty(&store).await;

        let id = editor.add_block(BlockKind::Text, None);
        editor.update_block(id, BlockPatch::text("a")).unwrap();
        // First save goes out at 1000ms and lands at 1500ms.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(store.save_count(), 1);
        for text in ["b", "bc", "bcd"] {
            editor.update_block(id, BlockPatch::text(text)).unwrap();
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        let saves = store.saves();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1].blocks[0].content, serde_json::json!({"text": "bcd"}));
        // The follow-up already carries the server id from the first save.
        assert!(saves[1].blocks[0].id.is_some());
        assert_eq!(editor.save_state().status, SaveStatus::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_renames_in_place_and_keeps_in_flight_edits() {
        let store = Arc::new(MemoryStore::new());
        store.set_save_delay(Duration::from_millis(500));
        let editor = open_empty(&store).await;
        let mut events = editor.subscribe_events();

        let temp = editor.add_block_with(BlockContent::text("a"), None);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        editor.update_block(temp, BlockPatch::text("edited mid-flight")).unwrap();

        // Let the first save land, but not the follow-up.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let block = editor.block(temp).expect("old id still resolves");
        assert!(!block.id().is_temporary());
        assert_eq!(block.content.as_text(), Some("edited mid-flight"));
        assert_eq!(editor.resolve_id(temp), block.id());
        assert_eq!(editor.save_state().status, SaveStatus::Unsaved);

        let stored = store.document(editor.task_id()).unwrap();
        assert_eq!(stored.blocks[0].id, block.id().server_id());

        let renamed = drain(&mut events).into_iter().any(|e| {
            matches!(e, EditorEvent::BlockRenamed { from, to } if from == temp && to == block.id())
        });
        assert!(renamed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_survives_reorder_during_flight() {
        let store = Arc::new(MemoryStore::new());
        store.set_save_delay(Duration::from_millis(500));
        let editor = open_empty(&store).await;

        let first = editor.add_block_with(BlockContent::text("first"), None);
        let second = editor.add_block_with(BlockContent::text("second"), None);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        editor.reorder(1, 0).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let stored = store.document(editor.task_id()).unwrap();
        let first_server = editor.resolve_id(first).server_id();
        let second_server = editor.resolve_id(second).server_id();
        assert_eq!(stored.blocks[0].id, first_server);
        assert_eq!(stored.blocks[1].id, second_server);
        assert_eq!(editor.block(first).unwrap().content.as_text(), Some("first"));
        assert_eq!(editor.block(first).unwrap().order(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_deleted_during_flight_is_not_resurrected() {
        let store = Arc::new(MemoryStore::new());
        store.set_save_delay(Duration::from_millis(500));
        let editor = open_empty(&store).await;

        let keep = editor.add_block(BlockKind::Text, None);
        let gone = editor.add_block(BlockKind::Text, None);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        editor.delete_block(gone).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(editor.blocks().len(), 1);
        assert!(!editor.resolve_id(keep).is_temporary());
        let stored = store.document(editor.task_id()).unwrap();
        assert_eq!(stored.blocks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_autosave_keeps_edits_and_recovers() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_save(StoreError::Network("offline".into()));
        let editor = open_empty(&store).await;
        let mut events = editor.subscribe_events();

        let id = editor.add_block_with(BlockContent::text("precious"), None);
        tokio::time::sleep(DEBOUNCE * 2).await;

        let state = editor.save_state();
        assert_eq!(state.status, SaveStatus::Unsaved);
        assert!(state.error.as_deref().unwrap().contains("offline"));
        assert_eq!(editor.block(id).unwrap().content.as_text(), Some("precious"));
        assert!(editor.has_unsaved_changes());
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, EditorEvent::SaveFailed { .. })));

        editor.update_block(id, BlockPatch::private(true)).unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;
        let state = editor.save_state();
        assert_eq!(state.status, SaveStatus::Saved);
        assert_eq!(state.error, None);
        let stored = store.document(editor.task_id()).unwrap();
        assert_eq!(stored.blocks[0].content, serde_json::json!({"text": "precious"}));
        assert!(stored.blocks[0].is_private);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_timeout_is_a_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_save_delay(Duration::from_secs(60));
        let config = EditorConfig {
            save_timeout_ms: 2000,
            ..Default::default()
        };
        let editor = EvidenceEditor::open(store.clone(), TaskId::new(), None, config)
            .await
            .unwrap();

        editor.add_block(BlockKind::Text, None);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let state = editor.save_state();
        assert_eq!(state.status, SaveStatus::Unsaved);
        assert!(state.error.unwrap().contains("timed out"));
        assert!(store.document(editor.task_id()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let store = Arc::new(MemoryStore::new());
        let editor = open_empty(&store).await;
        editor.add_block(BlockKind::Text, None);

        editor.flush().await.unwrap();
        assert_eq!(store.save_count(), 1);
        assert!(!editor.has_unsaved_changes());

        // The queued autosave finds nothing new.
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_flushes_pending_edits() {
        let store = Arc::new(MemoryStore::new());
        let editor = open_empty(&store).await;
        editor.add_block_with(BlockContent::text("last words"), None);

        editor.close().await.unwrap();
        let stored = store.document(editor.task_id()).unwrap();
        assert_eq!(stored.blocks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_last_item_deletes_block() {
        let store = Arc::new(MemoryStore::new());
        let editor = open_empty(&store).await;
        let items = vec![Item::new("https://a"), Item::new("https://b")];
        let id = editor.add_block_with(BlockContent::with_items(BlockKind::Link, items), None);

        editor.remove_item(id, 0).unwrap();
        let block = editor.block(id).unwrap();
        assert_eq!(block.content.items().unwrap(), &[Item::new("https://b")]);

        assert!(matches!(
            editor.remove_item(id, 5),
            Err(EditorError::ItemNotFound { index: 5, .. })
        ));

        editor.remove_item(id, 0).unwrap();
        assert!(editor.block(id).is_none());
        assert!(editor.blocks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loaded_document_normalizes_legacy_content() {
        let store = Arc::new(MemoryStore::new());
        let task_id = TaskId::new();
        store.insert_document(StoredDocument {
            task_id,
            status: DocumentStatus::Draft,
            blocks: vec![
                WireBlock {
                    id: Some(uuid::Uuid::now_v7()),
                    kind: BlockKind::Image,
                    order: 5,
                    is_private: false,
                    content: serde_json::json!({"url": "https://cdn/a.png", "caption": "old"}),
                },
                WireBlock {
                    id: Some(uuid::Uuid::now_v7()),
                    kind: BlockKind::Text,
                    order: 1,
                    is_private: false,
                    content: serde_json::json!("legacy text"),
                },
            ],
            updated_at: Some(42),
        });

        let editor = EvidenceEditor::open(store.clone(), task_id, None, EditorConfig::default())
            .await
            .unwrap();
        let blocks = editor.blocks();
        assert_eq!(blocks[0].content.as_text(), Some("legacy text"));
        assert_eq!(
            blocks[1].content.items().unwrap(),
            &[Item::new("https://cdn/a.png").with_caption("old")]
        );
        assert_eq!(orders(&editor), vec![0, 1]);
        assert_eq!(editor.save_state().last_saved_at, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_load(StoreError::Network("down".into()));
        let result =
            EvidenceEditor::open(store.clone(), TaskId::new(), None, EditorConfig::default()).await;
        assert!(matches!(result, Err(EditorError::Store(StoreError::Network(_)))));
    }
}
