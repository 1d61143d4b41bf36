//! Evidence documents: status, the ordered block list, and the wire shape.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::EnumString;

use crate::block::{Block, BlockContent, BlockKind};
use crate::error::ModelError;
use crate::ids::{BlockId, TaskId};

/// Document lifecycle status.
///
/// `Completed` is terminal for this crate's consumers: nothing here moves a
/// document back to `Draft`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum DocumentStatus {
    #[default]
    Draft,
    #[strum(serialize = "completed", serialize = "complete")]
    Completed,
}

impl DocumentStatus {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Completed => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DocumentStatus::Completed)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered blocks with a structurally contiguous `order` sequence.
///
/// Every structural change renumbers `order` to `0..n-1`, so callers never
/// have to maintain it by hand.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockList {
    blocks: Vec<Block>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from blocks in arbitrary order, sorted by their stored `order`.
    ///
    /// Ties keep their input order; gaps and duplicates are collapsed.
    pub fn from_blocks(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| b.order);
        let mut list = Self { blocks };
        list.renumber();
        list
    }

    fn renumber(&mut self) {
        for (i, block) in self.blocks.iter_mut().enumerate() {
            block.order = i;
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    pub fn as_slice(&self) -> &[Block] {
        &self.blocks
    }

    pub fn ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| b.id).collect()
    }

    pub fn position(&self, id: &BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == *id)
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == *id)
    }

    /// Mutable access to one block. `id` and `order` stay list-owned.
    pub fn get_mut(&mut self, id: &BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == *id)
    }

    /// Insert at `position` (clamped to the end; `None` appends).
    ///
    /// Returns the index the block landed at.
    pub fn insert(&mut self, position: Option<usize>, block: Block) -> usize {
        let index = position.unwrap_or(self.blocks.len()).min(self.blocks.len());
        self.blocks.insert(index, block);
        self.renumber();
        index
    }

    pub fn remove(&mut self, id: &BlockId) -> Option<Block> {
        let index = self.position(id)?;
        let block = self.blocks.remove(index);
        self.renumber();
        Some(block)
    }

    /// Move the block at `from` so it ends up at index `to`.
    pub fn move_block(&mut self, from: usize, to: usize) -> Result<(), ModelError> {
        let len = self.blocks.len();
        if from >= len {
            return Err(ModelError::IndexOutOfRange { index: from, len });
        }
        if to >= len {
            return Err(ModelError::IndexOutOfRange { index: to, len });
        }
        if from != to {
            let block = self.blocks.remove(from);
            self.blocks.insert(to, block);
            self.renumber();
        }
        Ok(())
    }

    /// Rename a block's id in place. Content and position are untouched.
    pub fn rename(&mut self, from: &BlockId, to: BlockId) -> bool {
        match self.get_mut(from) {
            Some(block) => {
                block.id = to;
                true
            }
            None => false,
        }
    }

    pub fn into_vec(self) -> Vec<Block> {
        self.blocks
    }
}

impl<'a> IntoIterator for &'a BlockList {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

/// Block as exchanged with the document store.
///
/// `id` is `None` for blocks the store has never seen. `content` is raw JSON
/// and may be in any legacy shape when coming from the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBlock {
    #[serde(default)]
    pub id: Option<uuid::Uuid>,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default)]
    pub order: usize,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub content: Value,
}

impl WireBlock {
    /// Convert into a typed block, normalizing legacy content.
    ///
    /// Blocks without a store id get a fresh temporary id.
    pub fn into_block(self) -> Block {
        let id = match self.id {
            Some(id) => BlockId::persisted(id),
            None => BlockId::temporary(),
        };
        Block::restore(
            id,
            self.order,
            self.is_private,
            BlockContent::from_raw(self.kind, &self.content),
        )
    }

    /// Wire form of a block with staged items stripped.
    pub fn sanitized(block: &Block) -> Self {
        Self {
            id: block.id().server_id(),
            kind: block.kind(),
            order: block.order(),
            is_private: block.is_private,
            content: block.content.sanitized().to_raw(),
        }
    }
}

/// The in-memory evidence document for one task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceDocument {
    pub task_id: TaskId,
    pub status: DocumentStatus,
    pub blocks: BlockList,
    /// Server-assigned Unix milliseconds of the last successful save.
    pub updated_at: Option<u64>,
}

impl EvidenceDocument {
    /// An empty draft for `task_id`.
    pub fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: DocumentStatus::Draft,
            blocks: BlockList::new(),
            updated_at: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Item;
    use rand::Rng;
    use serde_json::json;

    fn assert_contiguous(list: &BlockList) {
        let orders: Vec<usize> = list.iter().map(|b| b.order()).collect();
        let expected: Vec<usize> = (0..list.len()).collect();
        assert_eq!(orders, expected);
    }

    #[test]
    fn test_status_parse_aliases() {
        assert_eq!(DocumentStatus::from_str("Completed"), Some(DocumentStatus::Completed));
        assert_eq!(DocumentStatus::from_str("complete"), Some(DocumentStatus::Completed));
        assert_eq!(DocumentStatus::from_str("draft"), Some(DocumentStatus::Draft));
        assert_eq!(DocumentStatus::from_str("archived"), None);
    }

    #[test]
    fn test_insert_clamps_and_renumbers() {
        let mut list = BlockList::new();
        let a = Block::new(BlockKind::Text);
        let b = Block::new(BlockKind::Image);
        let c = Block::new(BlockKind::Link);
        let (a_id, b_id, c_id) = (a.id(), b.id(), c.id());

        list.insert(None, a);
        assert_eq!(list.insert(Some(0), b), 0);
        assert_eq!(list.insert(Some(99), c), 2);

        assert_eq!(list.ids(), vec![b_id, a_id, c_id]);
        assert_contiguous(&list);
    }

    #[test]
    fn test_move_block() {
        let mut list = BlockList::new();
        let ids: Vec<BlockId> = (0..4)
            .map(|_| {
                let b = Block::new(BlockKind::Text);
                let id = b.id();
                list.insert(None, b);
                id
            })
            .collect();

        list.move_block(0, 3).unwrap();
        assert_eq!(list.ids(), vec![ids[1], ids[2], ids[3], ids[0]]);
        assert_contiguous(&list);

        let err = list.move_block(4, 0).unwrap_err();
        assert!(matches!(err, ModelError::IndexOutOfRange { index: 4, len: 4 }));
    }

    #[test]
    fn test_rename_keeps_content_and_position() {
        let mut list = BlockList::new();
        let mut block = Block::new(BlockKind::Text);
        block.content = BlockContent::text("hello");
        let old = block.id();
        list.insert(None, Block::new(BlockKind::Image));
        list.insert(None, block);

        let new = BlockId::persisted(uuid::Uuid::now_v7());
        assert!(list.rename(&old, new));
        assert!(list.get(&old).is_none());
        let renamed = list.get(&new).unwrap();
        assert_eq!(renamed.order(), 1);
        assert_eq!(renamed.content.as_text(), Some("hello"));
    }

    #[test]
    fn test_from_blocks_collapses_gaps() {
        let blocks = vec![
            WireBlock {
                id: Some(uuid::Uuid::now_v7()),
                kind: BlockKind::Text,
                order: 7,
                is_private: false,
                content: json!({"text": "second"}),
            }
            .into_block(),
            WireBlock {
                id: Some(uuid::Uuid::now_v7()),
                kind: BlockKind::Text,
                order: 2,
                is_private: true,
                content: json!("first"),
            }
            .into_block(),
        ];
        let list = BlockList::from_blocks(blocks);
        assert_contiguous(&list);
        assert_eq!(list.as_slice()[0].content.as_text(), Some("first"));
        assert!(list.as_slice()[0].is_private);
    }

    #[test]
    fn test_random_mutations_keep_order_contiguous() {
        let mut rng = rand::thread_rng();
        let mut list = BlockList::new();
        for _ in 0..500 {
            match rng.gen_range(0..4) {
                0 => {
                    let pos = rng.gen_range(0..=list.len() + 1);
                    list.insert(Some(pos), Block::new(BlockKind::Text));
                }
                1 if !list.is_empty() => {
                    let id = list.ids()[rng.gen_range(0..list.len())];
                    list.remove(&id);
                }
                2 if !list.is_empty() => {
                    let from = rng.gen_range(0..list.len());
                    let to = rng.gen_range(0..list.len());
                    list.move_block(from, to).unwrap();
                }
                _ if !list.is_empty() => {
                    let id = list.ids()[rng.gen_range(0..list.len())];
                    list.get_mut(&id).unwrap().content = BlockContent::text("edit");
                }
                _ => {}
            }
            assert_contiguous(&list);
            let mut ids = list.ids();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), list.len());
        }
    }

    #[test]
    fn test_wire_block_sanitized() {
        let mut block = Block::new(BlockKind::Image);
        block.content = BlockContent::with_items(
            BlockKind::Image,
            vec![Item::new("https://cdn/a"), Item::staged("blob:x", "x.png")],
        );
        let wire = WireBlock::sanitized(&block);
        assert_eq!(wire.id, None);
        assert_eq!(wire.content, json!({"items": [{"url": "https://cdn/a"}]}));
    }

    #[test]
    fn test_wire_block_json_shape() {
        let wire: WireBlock = serde_json::from_value(json!({
            "id": null,
            "type": "video",
            "order": 0,
            "isPrivate": true,
            "content": {"url": "https://youtu.be/x"}
        }))
        .unwrap();
        let block = wire.into_block();
        assert!(block.id().is_temporary());
        assert!(block.is_private);
        assert_eq!(block.content.items().unwrap()[0].url, "https://youtu.be/x");
    }
}
