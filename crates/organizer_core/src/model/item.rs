//! Outline item tree model.
//!
//! # Invariants
//! - `id` is unique within one store and never reused.
//! - `parent == None` means a root-level item.
//! - `position` orders siblings under the same parent (ascending).

use uuid::Uuid;

/// Stable identifier for one outline item.
pub type ItemId = Uuid;

/// In-memory tree position of one item.
///
/// The item body and its rule list stay in storage; only the shape of the
/// tree is mirrored in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub parent: Option<ItemId>,
    pub position: i64,
}

impl Item {
    /// Creates a new item with a generated id.
    pub fn new(parent: Option<ItemId>, position: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent,
            position,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
