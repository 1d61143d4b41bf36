//! Upload pipeline building blocks: files, validation, staged previews, and
//! per-block upload tracking.
//!
//! The editor-facing flow (attach, background upload, retry, cancel) lives in
//! [`attachments`](crate::attachments); this module holds the pieces it is
//! built from.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use evidence_types::{BlockId, BlockKind};

use crate::constants::{
    CONVERTIBLE_DOCUMENT_EXTENSIONS, CONVERTIBLE_IMAGE_EXTENSIONS, DOCUMENT_EXTENSIONS,
    DOCUMENT_MIME_TYPES, IMAGE_EXTENSIONS, IMAGE_MIME_TYPES, MAX_UPLOAD_BYTES, PREVIEW_URL_PREFIX,
};

// ============================================================================
// Files
// ============================================================================

/// A file picked by the user. Cloning shares the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime: String,
    data: Arc<[u8]>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data: Vec<u8> = data.into();
        Self {
            name: name.into(),
            mime: mime.into(),
            data: Arc::from(data),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Lowercased extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("size", &self.data.len())
            .finish()
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Why a file can't be attached. Messages are shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{0} blocks don't take files; add an image or document block instead")]
    UnsupportedBlock(BlockKind),

    #[error("\"{name}\" is empty")]
    EmptyFile { name: String },

    #[error(
        "\"{name}\" is {size_mb:.1} MB, over the {max_mb:.0} MB limit. \
         Compress it, or share it from another service and add it as a link block"
    )]
    TooLarge {
        name: String,
        size_mb: f64,
        max_mb: f64,
    },

    #[error("\"{name}\" can't be added to a {kind} block. {hint}")]
    UnsupportedFormat {
        name: String,
        kind: BlockKind,
        hint: String,
    },
}

fn format_hint(kind: BlockKind, extension: Option<&str>) -> String {
    match (kind, extension) {
        (BlockKind::Image, Some(ext)) if CONVERTIBLE_IMAGE_EXTENSIONS.contains(&ext) => format!(
            "{} images aren't supported; convert it to JPG or PNG and try again",
            ext.to_ascii_uppercase()
        ),
        (BlockKind::Document, Some(ext)) if CONVERTIBLE_DOCUMENT_EXTENSIONS.contains(&ext) => {
            format!("Export the .{ext} file as a PDF and try again")
        }
        (BlockKind::Image, _) => format!("Supported images: {}", IMAGE_EXTENSIONS.join(", ")),
        _ => format!("Supported documents: {}", DOCUMENT_EXTENSIONS.join(", ")),
    }
}

/// Validate `file` for a block of `kind` against the default 10 MB cap.
pub fn validate(file: &UploadFile, kind: BlockKind) -> Result<(), ValidationError> {
    validate_with_limit(file, kind, MAX_UPLOAD_BYTES)
}

/// Validate `file` for a block of `kind` against `max_bytes`.
///
/// A file passes the format check when either its extension or its MIME type
/// is on the allow-list for the block kind.
pub fn validate_with_limit(
    file: &UploadFile,
    kind: BlockKind,
    max_bytes: u64,
) -> Result<(), ValidationError> {
    let (extensions, mime_types) = match kind {
        BlockKind::Image => (IMAGE_EXTENSIONS, IMAGE_MIME_TYPES),
        BlockKind::Document => (DOCUMENT_EXTENSIONS, DOCUMENT_MIME_TYPES),
        other => return Err(ValidationError::UnsupportedBlock(other)),
    };

    let extension = file.extension();
    let ext_ok = extension
        .as_deref()
        .is_some_and(|ext| extensions.contains(&ext));
    let mime = file.mime.to_ascii_lowercase();
    let mime_ok = mime_types.contains(&mime.as_str());
    if !ext_ok && !mime_ok {
        return Err(ValidationError::UnsupportedFormat {
            name: file.name.clone(),
            kind,
            hint: format_hint(kind, extension.as_deref()),
        });
    }

    if file.size() == 0 {
        return Err(ValidationError::EmptyFile {
            name: file.name.clone(),
        });
    }
    if file.size() > max_bytes {
        const MB: f64 = 1024.0 * 1024.0;
        return Err(ValidationError::TooLarge {
            name: file.name.clone(),
            size_mb: file.size() as f64 / MB,
            max_mb: max_bytes as f64 / MB,
        });
    }
    Ok(())
}

// ============================================================================
// Staged previews
// ============================================================================

/// Session-local references for immediate display before an upload lands.
///
/// A staged reference is a `blob:` URL; it is stripped from every save and
/// released once the permanent URL replaces it or the upload is cancelled.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    staged: Mutex<HashMap<String, UploadFile>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `file` and return its local reference.
    pub fn stage(&self, file: &UploadFile) -> String {
        let url = format!("{PREVIEW_URL_PREFIX}{}", uuid::Uuid::new_v4().as_simple());
        self.staged.lock().insert(url.clone(), file.clone());
        trace!("staged preview {url} for {}", file.name);
        url
    }

    /// Resolve a staged reference to its file.
    pub fn get(&self, url: &str) -> Option<UploadFile> {
        self.staged.lock().get(url).cloned()
    }

    /// Release a staged reference. Returns false if it wasn't staged.
    pub fn release(&self, url: &str) -> bool {
        let released = self.staged.lock().remove(url).is_some();
        if released {
            trace!("released preview {url}");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.staged.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.lock().is_empty()
    }
}

// ============================================================================
// Upload tracking
// ============================================================================

/// Lifecycle of one block's upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    /// File selected or retry requested; background work not started yet.
    Pending,
    /// Save and/or file transfer in progress.
    Uploading,
    /// Last attempt failed; the file is retained for retry.
    Failed,
}

impl UploadStatus {
    /// Pending or uploading: completion must wait for these.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploading)
    }
}

/// Upload progress milestones.
pub(crate) mod progress {
    pub const STAGED: u8 = 0;
    pub const BLOCK_SAVED: u8 = 25;
    pub const DONE: u8 = 100;
}

/// Tracked upload for one block. The file is held here until the task is
/// dropped (success or cancel); a successful task leaves tracking entirely.
#[derive(Debug, Clone)]
pub(crate) struct UploadTask {
    pub block_id: BlockId,
    pub file: UploadFile,
    /// Staged reference; also identifies this attempt across renames.
    pub local_url: String,
    pub status: UploadStatus,
    pub progress: u8,
    pub error: Option<String>,
}

impl UploadTask {
    pub fn new(block_id: BlockId, file: UploadFile, local_url: String) -> Self {
        Self {
            block_id,
            file,
            local_url,
            status: UploadStatus::Pending,
            progress: progress::STAGED,
            error: None,
        }
    }

    pub fn info(&self) -> UploadTaskInfo {
        UploadTaskInfo {
            block_id: self.block_id,
            filename: self.file.name.clone(),
            local_url: self.local_url.clone(),
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

/// Read-only view of a tracked upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTaskInfo {
    pub block_id: BlockId,
    pub filename: String,
    pub local_url: String,
    pub status: UploadStatus,
    pub progress: u8,
    pub error: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
