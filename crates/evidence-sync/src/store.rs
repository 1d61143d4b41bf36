//! The document store boundary.
//!
//! Persistence of documents, blocks and files belongs to a collaborator; the
//! editor only talks to it through [`DocumentStore`]. Saves are full
//! replacements of a task's block list (last writer wins per document) and must
//! echo back the server ids aligned by order index.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use evidence_types::{DocumentStatus, TaskId, WireBlock};

use crate::upload::UploadFile;

/// Errors reported by a [`DocumentStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Transport failure; the request may be retried.
    #[error("network error: {0}")]
    Network(String),

    /// The store understood the request and refused it.
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// Referenced block doesn't exist server-side.
    #[error("unknown block {0}")]
    UnknownBlock(uuid::Uuid),
}

/// A document as held by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub task_id: TaskId,
    pub status: DocumentStatus,
    pub blocks: Vec<WireBlock>,
    #[serde(default)]
    pub updated_at: Option<u64>,
}

/// Server id assigned to the block submitted at `order`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBlock {
    pub id: uuid::Uuid,
    pub order: usize,
}

/// Secondary effect of completing a document (badge progress, quest
/// completion, ...). Opaque to the editor; passed through to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FollowOnEffect {
    pub kind: String,
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Successful save response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub blocks: Vec<SavedBlock>,
    pub updated_at: u64,
    #[serde(default)]
    pub points_awarded: Option<u32>,
    #[serde(default)]
    pub follow_on_effects: Vec<FollowOnEffect>,
}

/// Successful upload response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub url: String,
    pub filename: String,
}

/// Persistence collaborator for evidence documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the current document, if one exists.
    async fn get_document(&self, task_id: TaskId) -> Result<Option<StoredDocument>, StoreError>;

    /// Replace the task's block list and status.
    async fn save_document(
        &self,
        task_id: TaskId,
        blocks: Vec<WireBlock>,
        status: DocumentStatus,
    ) -> Result<SaveReceipt, StoreError>;

    /// Attach a file to a persisted block.
    async fn upload_block_file(
        &self,
        block_id: uuid::Uuid,
        file: &UploadFile,
    ) -> Result<UploadReceipt, StoreError>;
}

/// Shared handle to a store implementation.
pub type SharedStore = Arc<dyn DocumentStore>;
