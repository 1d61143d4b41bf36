//! Error types for block model operations.

use thiserror::Error;

/// Errors from structural operations on a [`BlockList`](crate::BlockList).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Position outside the current list.
    #[error("index {index} out of range for {len} blocks")]
    IndexOutOfRange { index: usize, len: usize },
}
