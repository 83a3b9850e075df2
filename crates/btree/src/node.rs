//! B+ tree node definitions.

use common::PageId;
use serde::{Deserialize, Serialize};
use types::Value;

/// Upper bound on entries in a leaf and keys in an internal node. A node
/// whose serialized form would overflow the page body splits earlier.
pub const MAX_LEAF_ENTRIES: usize = 64;
pub const MAX_INTERNAL_KEYS: usize = 64;

/// Minimum occupancy for non-root nodes.
pub const MIN_LEAF_ENTRIES: usize = MAX_LEAF_ENTRIES / 2;
pub const MIN_INTERNAL_KEYS: usize = MAX_INTERNAL_KEYS / 2;

/// A B+ tree node, one per index page.
///
/// Leaves hold the actual `(key, payload)` entries and chain left-to-right
/// through `next_leaf`; internal nodes hold separator keys with one more
/// child than keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Node {
    Internal {
        keys: Vec<Value>,
        children: Vec<PageId>,
    },
    Leaf {
        entries: Vec<(Value, Vec<u8>)>,
        next_leaf: Option<PageId>,
    },
}

impl Node {
    pub fn new_leaf() -> Self {
        Self::Leaf {
            entries: Vec::new(),
            next_leaf: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// Number of entries (leaf) or keys (internal).
    pub fn len(&self) -> usize {
        match self {
            Self::Internal { keys, .. } => keys.len(),
            Self::Leaf { entries, .. } => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_leaf_is_empty() {
        let leaf = Node::new_leaf();
        assert!(leaf.is_leaf());
        assert!(leaf.is_empty());
        assert_eq!(leaf.len(), 0);
    }

    #[test]
    fn internal_counts_keys() {
        let node = Node::Internal {
            keys: vec![Value::Int(5)],
            children: vec![PageId(1), PageId(2)],
        };
        assert!(!node.is_leaf());
        assert_eq!(node.len(), 1);
    }

    #[test]
    fn leaf_counts_entries() {
        let leaf = Node::Leaf {
            entries: vec![
                (Value::Int(1), b"a".to_vec()),
                (Value::Int(2), b"b".to_vec()),
            ],
            next_leaf: Some(PageId(9)),
        };
        assert_eq!(leaf.len(), 2);
        assert!(!leaf.is_empty());
    }
}
