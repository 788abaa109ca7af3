//! In-memory B-tree node

use crate::config::{BLOCK_HEADER_SIZE, CHILD_ID_SIZE, MAX_PAIRS_PER_NODE, PAIR_SIZE};
use crate::{BlockId, Pair};

/// In-memory counterpart of a block.
///
/// Pairs are ordered by key. A node is a leaf iff it has no children;
/// an internal node always has exactly one more child than it has pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Block this node is stored in
    pub id: BlockId,
    /// Pairs ordered by key
    pub pairs: Vec<Pair>,
    /// Child block ids, empty for leaves
    pub children: Vec<BlockId>,
}

impl Node {
    /// Create an empty leaf stored at `id`
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            pairs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Build a root holding a single promoted pair between two children
    pub fn with_single_pair(id: BlockId, pair: Pair, left: BlockId, right: BlockId) -> Self {
        Self {
            id,
            pairs: vec![pair],
            children: vec![left, right],
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Index of the pair whose key equals `key`
    pub fn find(&self, key: &str) -> Option<usize> {
        self.pairs.iter().position(|p| p.key == key)
    }

    /// Index of the child subtree that may hold `key`.
    ///
    /// This is the slot of the first pair strictly greater than `key`,
    /// or the last slot when no such pair exists.
    pub fn child_slot(&self, key: &str) -> usize {
        self.pairs
            .iter()
            .position(|p| key < p.key.as_str())
            .unwrap_or(self.pairs.len())
    }

    /// Insert before the first pair whose key is >= the new key.
    ///
    /// Existing pairs with the same key are not replaced.
    pub fn insert_sorted(&mut self, pair: Pair) -> usize {
        let index = self
            .pairs
            .iter()
            .position(|p| p.key >= pair.key)
            .unwrap_or(self.pairs.len());
        self.pairs.insert(index, pair);
        index
    }

    pub fn has_overflown(&self) -> bool {
        self.pairs.len() > MAX_PAIRS_PER_NODE
    }

    /// Split around the median pair.
    ///
    /// Returns the promoted pair plus the left and right halves. The halves
    /// carry id 0 until they are given blocks of their own.
    pub fn split(mut self) -> (Pair, Node, Node) {
        let mid = self.pairs.len() / 2;

        let right_pairs = self.pairs.split_off(mid + 1);
        // split_off(mid + 1) leaves the median as the last element
        let median = self.pairs.pop().unwrap_or_default();
        let right_children = if self.is_leaf() {
            Vec::new()
        } else {
            self.children.split_off(mid + 1)
        };

        let left = Node {
            id: 0,
            pairs: self.pairs,
            children: self.children,
        };
        let right = Node {
            id: 0,
            pairs: right_pairs,
            children: right_children,
        };
        (median, left, right)
    }

    /// Take in a pair promoted from the child at `slot`.
    ///
    /// The left half replaces the split child and the right half is wired
    /// into the following slot.
    pub fn adopt(&mut self, slot: usize, promoted: Pair, left: BlockId, right: BlockId) {
        let slot = slot.min(self.pairs.len());
        self.pairs.insert(slot, promoted);
        if slot < self.children.len() {
            self.children[slot] = left;
        } else {
            self.children.push(left);
        }
        self.children.insert(slot + 1, right);
    }

    /// Bytes this node occupies once encoded
    pub fn encoded_len(&self) -> usize {
        BLOCK_HEADER_SIZE + self.children.len() * CHILD_ID_SIZE + self.pairs.len() * PAIR_SIZE
    }

    /// Check key order and the child count invariant
    pub fn is_well_formed(&self) -> bool {
        let sorted = self.pairs.windows(2).all(|w| w[0].key < w[1].key);
        let shaped = self.is_leaf() || self.children.len() == self.pairs.len() + 1;
        sorted && shaped
    }
}
