//! Block model: kinds, items, typed content, and normalization.
//!
//! ## Design: one normalization pass at the read boundary
//!
//! Content arrives from the store as loose JSON. Older evidence stored a single
//! flat item (`{"url": ..., "caption": ...}`) or, for text, a bare string;
//! newer evidence stores `{"items": [...]}` / `{"text": ...}`. Everything is
//! funneled through [`normalize_items`] / [`normalize_text`] exactly once, in
//! [`BlockContent::from_raw`]. Downstream code only ever sees the typed
//! [`BlockContent`] union and never re-checks shapes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::EnumString;

use crate::ids::BlockId;

/// URL scheme for session-local staged references. Never persisted.
pub const LOCAL_URL_SCHEME: &str = "blob:";

/// What a block is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum BlockKind {
    Text,
    Image,
    Video,
    Link,
    Document,
}

impl BlockKind {
    pub const ALL: [BlockKind; 5] = [
        BlockKind::Text,
        BlockKind::Image,
        BlockKind::Video,
        BlockKind::Link,
        BlockKind::Document,
    ];

    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Text => "text",
            BlockKind::Image => "image",
            BlockKind::Video => "video",
            BlockKind::Link => "link",
            BlockKind::Document => "document",
        }
    }

    /// Whether content is an `items` array (everything except text).
    pub fn has_items(&self) -> bool {
        !matches!(self, BlockKind::Text)
    }

    /// Whether files can be attached (image and document blocks).
    pub fn accepts_files(&self) -> bool {
        matches!(self, BlockKind::Image | BlockKind::Document)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One entry of an image/video/link/document block.
///
/// Image and document items use `filename`/`caption`/`description`; video and
/// link items use `title`/`description`. All fields are kept regardless of
/// kind so normalization never drops data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "fileName")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Set while the item points at a staged local reference.
    #[serde(default, skip_serializing_if = "is_false", alias = "upload_pending")]
    pub upload_pending: bool,
}

impl Item {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Item pointing at a staged local reference, awaiting upload.
    pub fn staged(local_url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: local_url.into(),
            filename: Some(filename.into()),
            upload_pending: true,
            ..Default::default()
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// True for items that must not reach the store: upload markers and
    /// session-local references.
    pub fn is_staged(&self) -> bool {
        self.upload_pending || self.url.starts_with(LOCAL_URL_SCHEME)
    }
}

/// Parse one element of an `items` array (or a legacy flat object).
///
/// Anything that isn't an object with a non-empty string `url` is dropped.
fn item_from_value(value: &Value) -> Option<Item> {
    let obj = value.as_object()?;
    match obj.get("url") {
        Some(Value::String(url)) if !url.is_empty() => {}
        _ => return None,
    }
    Item::deserialize(value).ok()
}

/// Normalize block content into the canonical item array.
///
/// Accepts:
/// - canonical `{"items": [...]}`
/// - legacy single flat item `{"url": ..., "caption": ...}`
/// - legacy bare URL string
///
/// Returns an empty vector for text blocks and for anything unrecognized.
/// Idempotent: feeding the output back as `{"items": output}` yields the same
/// output.
pub fn normalize_items(content: &Value, kind: BlockKind) -> Vec<Item> {
    if !kind.has_items() {
        return Vec::new();
    }
    match content {
        Value::Object(obj) => {
            if let Some(items) = obj.get("items") {
                return items
                    .as_array()
                    .map(|arr| arr.iter().filter_map(item_from_value).collect())
                    .unwrap_or_default();
            }
            item_from_value(content).into_iter().collect()
        }
        Value::String(url) if !url.is_empty() => vec![Item::new(url.clone())],
        _ => Vec::new(),
    }
}

/// Normalize text content: `{"text": ...}` or a legacy bare string.
pub fn normalize_text(content: &Value) -> String {
    match content {
        Value::Object(obj) => obj
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

/// Typed block content, one variant per kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockContent {
    Text { text: String },
    Image { items: Vec<Item> },
    Video { items: Vec<Item> },
    Link { items: Vec<Item> },
    Document { items: Vec<Item> },
}

impl BlockContent {
    /// Empty content for a freshly added block.
    pub fn empty(kind: BlockKind) -> Self {
        Self::with_items(kind, Vec::new())
    }

    /// Text content.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Content of `kind` holding `items`. Items are ignored for text.
    pub fn with_items(kind: BlockKind, items: Vec<Item>) -> Self {
        match kind {
            BlockKind::Text => Self::Text {
                text: String::new(),
            },
            BlockKind::Image => Self::Image { items },
            BlockKind::Video => Self::Video { items },
            BlockKind::Link => Self::Link { items },
            BlockKind::Document => Self::Document { items },
        }
    }

    /// Build typed content from raw store JSON. The single normalization point.
    pub fn from_raw(kind: BlockKind, raw: &Value) -> Self {
        match kind {
            BlockKind::Text => Self::Text {
                text: normalize_text(raw),
            },
            _ => Self::with_items(kind, normalize_items(raw, kind)),
        }
    }

    /// Canonical JSON form: `{"text": ...}` or `{"items": [...]}`.
    pub fn to_raw(&self) -> Value {
        let mut obj = Map::new();
        match self {
            Self::Text { text } => {
                obj.insert("text".into(), Value::String(text.clone()));
            }
            _ => {
                let items = self.items().unwrap_or_default();
                obj.insert(
                    "items".into(),
                    serde_json::to_value(items).unwrap_or_else(|_| Value::Array(Vec::new())),
                );
            }
        }
        Value::Object(obj)
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Text { .. } => BlockKind::Text,
            Self::Image { .. } => BlockKind::Image,
            Self::Video { .. } => BlockKind::Video,
            Self::Link { .. } => BlockKind::Link,
            Self::Document { .. } => BlockKind::Document,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[Item]> {
        match self {
            Self::Text { .. } => None,
            Self::Image { items }
            | Self::Video { items }
            | Self::Link { items }
            | Self::Document { items } => Some(items),
        }
    }

    pub fn items_mut(&mut self) -> Option<&mut Vec<Item>> {
        match self {
            Self::Text { .. } => None,
            Self::Image { items }
            | Self::Video { items }
            | Self::Link { items }
            | Self::Document { items } => Some(items),
        }
    }

    /// Copy of this content with staged items removed.
    pub fn sanitized(&self) -> Self {
        match self.items() {
            Some(items) => Self::with_items(
                self.kind(),
                items.iter().filter(|i| !i.is_staged()).cloned().collect(),
            ),
            None => self.clone(),
        }
    }
}

/// One unit of evidence content.
///
/// `order` is owned by [`BlockList`](crate::BlockList), which renumbers it
/// after every structural change; it is read-only from outside this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) order: usize,
    pub is_private: bool,
    pub content: BlockContent,
}

impl Block {
    /// A new, empty block with a temporary id.
    pub fn new(kind: BlockKind) -> Self {
        Self::with_content(BlockContent::empty(kind))
    }

    /// A new block with a temporary id and the given content.
    pub fn with_content(content: BlockContent) -> Self {
        Self {
            id: BlockId::temporary(),
            order: 0,
            is_private: false,
            content,
        }
    }

    /// Rebuild a block loaded from the store. `order` is re-derived by the
    /// owning list.
    pub fn restore(id: BlockId, order: usize, is_private: bool, content: BlockContent) -> Self {
        Self {
            id,
            order,
            is_private,
            content,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn kind(&self) -> BlockKind {
        self.content.kind()
    }
}

// ============================================================================
// Tests
// ============================================================================
