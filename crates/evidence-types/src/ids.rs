//! Typed identifiers for tasks and blocks.
//!
//! `TaskId` wraps a UUIDv7 and is owned by the surrounding application; this
//! crate only carries it around. `BlockId` has two lifetimes: a client-minted
//! temporary id that exists until the first successful save, and the
//! server-assigned id that replaces it afterwards. The replacement is a rename
//! of the same block, never a new entity.
//!
//! Temporary ids display as `tmp-{hex}`; server ids display as a standard
//! hyphenated UUID. Both forms round-trip through [`BlockId::parse`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix marking a client-minted block id on the wire and in logs.
pub const TEMPORARY_PREFIX: &str = "tmp-";

/// Identifier of the task that owns an evidence document.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    /// Create a new time-ordered ID (UUIDv7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// First 8 hex characters, for human display only (not lookup).
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<uuid::Uuid> for TaskId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.short())
    }
}

/// Block identifier: client-temporary until reconciled, server-owned after.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum BlockId {
    /// Minted locally; the store has never seen this block.
    Temporary(uuid::Uuid),
    /// Assigned by the document store on a successful save.
    Persisted(uuid::Uuid),
}

impl BlockId {
    /// Mint a fresh client-temporary id.
    pub fn temporary() -> Self {
        Self::Temporary(uuid::Uuid::now_v7())
    }

    /// Wrap a server-assigned UUID.
    pub fn persisted(id: uuid::Uuid) -> Self {
        Self::Persisted(id)
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// The server UUID, if this id has been reconciled.
    pub fn server_id(&self) -> Option<uuid::Uuid> {
        match self {
            Self::Persisted(id) => Some(*id),
            Self::Temporary(_) => None,
        }
    }

    /// First 8 hex characters for log lines.
    pub fn short(&self) -> String {
        let (Self::Temporary(id) | Self::Persisted(id)) = self;
        id.as_simple().to_string()[..8].to_string()
    }

    /// Parse `tmp-{uuid}` as temporary, anything else as a server UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        match s.strip_prefix(TEMPORARY_PREFIX) {
            Some(rest) => uuid::Uuid::parse_str(rest).map(Self::Temporary),
            None => uuid::Uuid::parse_str(s).map(Self::Persisted),
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(id) => write!(f, "{TEMPORARY_PREFIX}{}", id.as_simple()),
            Self::Persisted(id) => write!(f, "{id}"),
        }
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(_) => write!(f, "BlockId(tmp:{})", self.short()),
            Self::Persisted(_) => write!(f, "BlockId({})", self.short()),
        }
    }
}

impl FromStr for BlockId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_task_id_parse_display() {
        let id = TaskId::new();
        assert_eq!(TaskId::parse(&id.to_string()).unwrap(), id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_temporary_display_has_prefix() {
        let id = BlockId::temporary();
        assert!(id.is_temporary());
        assert!(id.to_string().starts_with(TEMPORARY_PREFIX));
        assert_eq!(id.server_id(), None);
    }

    #[test]
    fn test_block_id_parse_both_forms() {
        let tmp = BlockId::temporary();
        assert_eq!(BlockId::parse(&tmp.to_string()).unwrap(), tmp);

        let server = BlockId::persisted(uuid::Uuid::now_v7());
        let parsed: BlockId = server.to_string().parse().unwrap();
        assert_eq!(parsed, server);
        assert!(!parsed.is_temporary());
    }

    #[test]
    fn test_block_id_serde_as_string() {
        let server = BlockId::persisted(uuid::Uuid::now_v7());
        let json = serde_json::to_string(&server).unwrap();
        assert_eq!(json, format!("\"{server}\""));
        let back: BlockId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, server);
    }

    #[test]
    fn test_block_id_rejects_garbage() {
        assert!(BlockId::parse("tmp-not-a-uuid").is_err());
        assert!(BlockId::parse("").is_err());
    }
}
