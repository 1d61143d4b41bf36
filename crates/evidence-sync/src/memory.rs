//! In-memory [`DocumentStore`] with failure and latency injection.
//!
//! Used by the tests and handy for demos. Every call is recorded on entry, so
//! a test can assert on what was *sent* even when the call then fails or is
//! timed out.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

use evidence_types::{DocumentStatus, TaskId, WireBlock, now_millis};

use crate::store::{
    DocumentStore, FollowOnEffect, SaveReceipt, SavedBlock, StoreError, StoredDocument,
    UploadReceipt,
};
use crate::upload::UploadFile;

/// One `save_document` call as received.
#[derive(Clone, Debug, PartialEq)]
pub struct SaveRecord {
    pub task_id: TaskId,
    pub status: DocumentStatus,
    pub blocks: Vec<WireBlock>,
}

/// One `upload_block_file` call as received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRecord {
    pub block_id: Uuid,
    pub filename: String,
    pub size: u64,
}

#[derive(Default)]
struct Inner {
    documents: HashMap<TaskId, StoredDocument>,
    saves: Vec<SaveRecord>,
    uploads: Vec<UploadRecord>,
    load_failures: VecDeque<StoreError>,
    save_failures: VecDeque<StoreError>,
    upload_failures: VecDeque<StoreError>,
    save_delay: Duration,
    upload_delay: Duration,
    completion_points: Option<u32>,
    completion_effects: Vec<FollowOnEffect>,
    clock: u64,
}

/// Document store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one document.
    pub fn with_document(doc: StoredDocument) -> Self {
        let store = Self::new();
        store.insert_document(doc);
        store
    }

    pub fn insert_document(&self, doc: StoredDocument) {
        self.inner.lock().documents.insert(doc.task_id, doc);
    }

    pub fn document(&self, task_id: TaskId) -> Option<StoredDocument> {
        self.inner.lock().documents.get(&task_id).cloned()
    }

    /// Every save received, oldest first.
    pub fn saves(&self) -> Vec<SaveRecord> {
        self.inner.lock().saves.clone()
    }

    pub fn save_count(&self) -> usize {
        self.inner.lock().saves.len()
    }

    /// Every upload received, oldest first.
    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.inner.lock().uploads.clone()
    }

    /// Fail the next `get_document` with `error`.
    pub fn fail_next_load(&self, error: StoreError) {
        self.inner.lock().load_failures.push_back(error);
    }

    /// Fail the next `save_document` with `error`. Queues.
    pub fn fail_next_save(&self, error: StoreError) {
        self.inner.lock().save_failures.push_back(error);
    }

    /// Fail the next `upload_block_file` with `error`. Queues.
    pub fn fail_next_upload(&self, error: StoreError) {
        self.inner.lock().upload_failures.push_back(error);
    }

    /// Latency applied to every save.
    pub fn set_save_delay(&self, delay: Duration) {
        self.inner.lock().save_delay = delay;
    }

    /// Latency applied to every upload.
    pub fn set_upload_delay(&self, delay: Duration) {
        self.inner.lock().upload_delay = delay;
    }

    /// What a draft -> completed save reports back.
    pub fn set_completion_reward(&self, points: Option<u32>, effects: Vec<FollowOnEffect>) {
        let mut inner = self.inner.lock();
        inner.completion_points = points;
        inner.completion_effects = effects;
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_document(&self, task_id: TaskId) -> Result<Option<StoredDocument>, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.load_failures.pop_front() {
            return Err(err);
        }
        Ok(inner.documents.get(&task_id).cloned())
    }

    async fn save_document(
        &self,
        task_id: TaskId,
        blocks: Vec<WireBlock>,
        status: DocumentStatus,
    ) -> Result<SaveReceipt, StoreError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.saves.push(SaveRecord {
                task_id,
                status,
                blocks: blocks.clone(),
            });
            inner.save_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if let Some(err) = inner.save_failures.pop_front() {
            trace!(task = %task_id, "injected save failure: {err}");
            return Err(err);
        }

        let mut saved = Vec::with_capacity(blocks.len());
        let mut stored = Vec::with_capacity(blocks.len());
        for (order, mut block) in blocks.into_iter().enumerate() {
            let id = block.id.unwrap_or_else(Uuid::now_v7);
            block.id = Some(id);
            block.order = order;
            saved.push(SavedBlock { id, order });
            stored.push(block);
        }

        let updated_at = now_millis().max(inner.clock + 1);
        inner.clock = updated_at;

        let was_completed = inner
            .documents
            .get(&task_id)
            .is_some_and(|d| d.status.is_completed());
        let (points_awarded, follow_on_effects) = if status.is_completed() && !was_completed {
            (inner.completion_points, inner.completion_effects.clone())
        } else {
            (None, Vec::new())
        };

        inner.documents.insert(
            task_id,
            StoredDocument {
                task_id,
                status,
                blocks: stored,
                updated_at: Some(updated_at),
            },
        );
        Ok(SaveReceipt {
            blocks: saved,
            updated_at,
            points_awarded,
            follow_on_effects,
        })
    }

    async fn upload_block_file(
        &self,
        block_id: Uuid,
        file: &UploadFile,
    ) -> Result<UploadReceipt, StoreError> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.uploads.push(UploadRecord {
                block_id,
                filename: file.name.clone(),
                size: file.size(),
            });
            inner.upload_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if let Some(err) = inner.upload_failures.pop_front() {
            trace!(%block_id, "injected upload failure: {err}");
            return Err(err);
        }
        let known = inner
            .documents
            .values()
            .any(|doc| doc.blocks.iter().any(|b| b.id == Some(block_id)));
        if !known {
            return Err(StoreError::UnknownBlock(block_id));
        }
        Ok(UploadReceipt {
            url: format!("memory://files/{block_id}/{}", file.name),
            filename: file.name.clone(),
        })
    }
}
