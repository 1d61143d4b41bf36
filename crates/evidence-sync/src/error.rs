//! Editor error type.
//!
//! One enum covers the whole editor surface. The taxonomy maps onto variants:
//! validation ([`EditorError::Validation`]), upload and save failures
//! ([`EditorError::Store`], [`EditorError::Timeout`]), completion
//! preconditions ([`EditorError::UploadsPending`]) and local misuse
//! ([`EditorError::BlockNotFound`] and friends).

use std::time::Duration;

use evidence_types::{BlockId, BlockKind, ModelError};

use crate::store::StoreError;
use crate::upload::ValidationError;

/// Errors from the evidence editor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditorError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("{kind} block {block_id} doesn't support this edit")]
    KindMismatch { block_id: BlockId, kind: BlockKind },

    #[error("block {block_id} has no item at index {index}")]
    ItemNotFound { block_id: BlockId, index: usize },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("block {0} already has an upload in progress")]
    UploadInProgress(BlockId),

    #[error("upload for block {0} was cancelled")]
    UploadCancelled(BlockId),

    #[error("{count} upload(s) still in progress; wait for them to finish before submitting")]
    UploadsPending { count: usize },

    #[error("document is already completed")]
    AlreadyCompleted,

    #[error("document is being completed")]
    CompletionInProgress,

    #[error("document is completed; further saves are disabled")]
    AutosaveDisabled,

    #[error("save response has no block at position {index}")]
    MissingServerBlock { index: usize },

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl EditorError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EditorError::Store(StoreError::Network(_)) | EditorError::Timeout { .. }
        )
    }
}
