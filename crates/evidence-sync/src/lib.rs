//! Evidence editor: local-first block editing with debounced autosave,
//! background uploads, legacy migration, and race-free completion.
//!
//! The editor keeps the document in memory and persists it through a
//! [`DocumentStore`]. Mutations return immediately; saves happen after a
//! quiet period, one at a time, and never lose an edit made while a save is
//! in flight.
//!
//! ```ignore
//! use std::sync::Arc;
//! use evidence_sync::{EditorConfig, EvidenceEditor, MemoryStore};
//! use evidence_types::{BlockKind, TaskId};
//!
//! let store = Arc::new(MemoryStore::new());
//! let editor = EvidenceEditor::open(store, TaskId::new(), None, EditorConfig::default()).await?;
//! let block = editor.add_block(BlockKind::Text, None);
//! editor.update_block(block, BlockPatch::text("hello"))?;
//! // ... one second later the autosave lands
//! editor.complete().await?;
//! ```

pub mod attachments;
pub mod completion;
pub mod config;
pub mod constants;
pub mod editor;
pub mod error;
pub mod legacy;
pub mod memory;
pub mod status;
pub mod store;
pub mod upload;

pub use completion::CompletionOutcome;
pub use config::{ConfigError, EditorConfig};
pub use editor::{BlockPatch, EvidenceEditor};
pub use error::EditorError;
pub use memory::{MemoryStore, SaveRecord, UploadRecord};
pub use status::{EditorEvent, SaveState, SaveStatus};
pub use store::{
    DocumentStore, FollowOnEffect, SaveReceipt, SavedBlock, SharedStore, StoreError,
    StoredDocument, UploadReceipt,
};
pub use upload::{
    PreviewRegistry, UploadFile, UploadStatus, UploadTaskInfo, ValidationError, validate,
    validate_with_limit,
};
