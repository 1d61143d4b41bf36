//! Editor configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.
//! Everything here except the allow-lists can be overridden through
//! [`EditorConfig`](crate::EditorConfig).

use std::time::Duration;

/// Quiet period after the last edit before an autosave is sent.
pub const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Timeout for a single document save.
pub const SAVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single file upload. Generous because files go up to the cap
/// over school Wi-Fi.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum attachment size (10 MB).
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Capacity of the editor event broadcast channel. A subscriber that falls
/// further behind than this gets `RecvError::Lagged` and loses the oldest
/// events; failures are also kept in `SaveState::error` and on the upload
/// task, so nothing is lost for a subscriber that re-reads those.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Prefix for staged local preview references.
pub const PREVIEW_URL_PREFIX: &str = "blob:evidence/";

/// Image extensions accepted by image blocks.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Image MIME types accepted by image blocks.
pub const IMAGE_MIME_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Image formats we recognize but can't display; the user should convert them.
pub const CONVERTIBLE_IMAGE_EXTENSIONS: &[&str] = &["heic", "heif", "tif", "tiff", "bmp", "svg"];

/// Document extensions accepted by document blocks.
pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "ppt", "pptx", "xls", "xlsx", "txt", "rtf", "odt",
];

/// Document MIME types accepted by document blocks.
pub const DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
    "application/rtf",
    "application/vnd.oasis.opendocument.text",
];

/// Document formats that need exporting to PDF first.
pub const CONVERTIBLE_DOCUMENT_EXTENSIONS: &[&str] = &["pages", "key", "numbers"];
