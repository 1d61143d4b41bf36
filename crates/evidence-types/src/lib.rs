//! Shared block and document types for evidence editing.
//!
//! This crate is the data foundation: typed ids, the block tagged union, the
//! ordered block list, and the wire shape exchanged with the document store.
//! It has **no async or I/O dependencies**: a pure leaf crate that the sync
//! engine builds on.
//!
//! # Key Types
//!
//! |--------------------|---------------------------------------------------|
//! | Type               | Purpose                                           |
//! |--------------------|---------------------------------------------------|
//! | [`TaskId`]         | Which task owns the document                      |
//! | [`BlockId`]        | Temporary (client) or persisted (server) block id |
//! | [`BlockKind`]      | text, image, video, link, document                |
//! | [`BlockContent`]   | Typed content, one variant per kind               |
//! | [`Item`]           | One media/link entry of a block                   |
//! | [`BlockList`]      | Ordered blocks with contiguous `order`            |
//! | [`WireBlock`]      | Block as exchanged with the store                 |
//! | [`EvidenceDocument`] | Status + blocks + last save time                |
//! |--------------------|---------------------------------------------------|

pub mod block;
pub mod document;
pub mod error;
pub mod ids;

pub use block::{
    Block, BlockContent, BlockKind, Item, LOCAL_URL_SCHEME, normalize_items, normalize_text,
};
pub use document::{BlockList, DocumentStatus, EvidenceDocument, WireBlock};
pub use error::ModelError;
pub use ids::{BlockId, TaskId};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
