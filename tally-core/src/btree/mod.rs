//! Disk-resident B-tree mapping query keys to counts
//!
//! Every node lives in its own block of a [`BlockStore`]. Nodes reference
//! their children by block id and are read back from disk on demand; only
//! the root stays resident. The root always occupies block 0.
//!
//! Inserts descend to a leaf and split overfull nodes bottom-up. A split
//! writes both halves to freshly allocated blocks and promotes the median
//! pair into the parent; the tree only grows taller when the root splits.
//!
//! The tree has a single writer. It is not synchronized and must not be
//! shared between threads without external coordination.

mod export;
mod node;

pub use export::{export_to_path, ExportOrder, TreeStats};
pub use node::Node;

use crate::block::{self, BlockStore};
use crate::{BlockId, Pair, Result, TallyError};
use std::path::Path;
use tracing::{debug, info};

/// Block id of the root node
pub const ROOT_BLOCK_ID: BlockId = 0;

/// B-tree over a block store
pub struct BTree {
    store: BlockStore,
    root: Node,
}

impl BTree {
    /// Open the tree stored at `path`, creating an empty one if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_store(BlockStore::open(path)?)
    }

    /// Load the root from an already opened store
    pub fn with_store(mut store: BlockStore) -> Result<Self> {
        let root = block::decode(&store.root_block()?)?;
        if root.id != ROOT_BLOCK_ID {
            return Err(TallyError::CorruptBlock(format!(
                "block 0 claims to be block {}",
                root.id
            )));
        }

        info!(
            "Loaded B-tree from {:?} ({} blocks)",
            store.path(),
            store.block_count()
        );
        Ok(Self { store, root })
    }

    /// The resident root node
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Path of the index file
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Number of blocks in the index file, reachable or not
    pub fn block_count(&self) -> u64 {
        self.store.block_count()
    }

    /// Look up the count stored for `key`
    pub fn get(&mut self, key: &str) -> Result<Option<u64>> {
        let mut current: Option<Node> = None;
        let mut depth = 0;
        loop {
            let node = current.as_ref().unwrap_or(&self.root);
            if let Some(i) = node.find(key) {
                return Ok(Some(node.pairs[i].value));
            }
            if node.is_leaf() {
                return Ok(None);
            }
            let child = child_at(node, node.child_slot(key))?;
            depth += 1;
            check_walk(&self.store, depth)?;
            current = Some(load_node(&mut self.store, child)?);
        }
    }

    /// Overwrite the count of an existing key.
    ///
    /// Returns false, without writing anything, when the key is absent.
    pub fn update(&mut self, key: &str, value: u64) -> Result<bool> {
        let mut current: Option<Node> = None;
        let mut depth = 0;
        loop {
            let node = current.as_ref().unwrap_or(&self.root);
            if let Some(i) = node.find(key) {
                // the resident root only changes once its block is written
                let mut node = current.take().unwrap_or_else(|| self.root.clone());
                node.pairs[i].value = value;
                self.persist(node)?;
                return Ok(true);
            }
            if node.is_leaf() {
                return Ok(false);
            }
            let child = child_at(node, node.child_slot(key))?;
            depth += 1;
            check_walk(&self.store, depth)?;
            current = Some(load_node(&mut self.store, child)?);
        }
    }

    /// Insert a pair.
    ///
    /// Does not check for an existing pair with the same key: inserting a
    /// key twice stores it twice. Callers look the key up first.
    pub fn insert(&mut self, pair: Pair) -> Result<()> {
        pair.validate()?;

        // Ancestors of the target leaf, with the child slot taken from each
        let mut path: Vec<(Node, usize)> = Vec::new();
        let mut node = self.root.clone();
        while !node.is_leaf() {
            let slot = node.child_slot(&pair.key);
            check_walk(&self.store, path.len() as u64 + 1)?;
            let child = load_node(&mut self.store, child_at(&node, slot)?)?;
            path.push((node, slot));
            node = child;
        }

        node.insert_sorted(pair);

        loop {
            if !node.has_overflown() {
                return self.persist(node);
            }

            let was_root = node.id == ROOT_BLOCK_ID;
            let (median, left, right) = self.split(node)?;

            match path.pop() {
                Some((mut parent, slot)) => {
                    parent.adopt(slot, median, left, right);
                    node = parent;
                }
                None => {
                    debug_assert!(was_root);
                    debug!(
                        "Root split around {:?}, new children {} and {}",
                        median.key, left, right
                    );
                    let root = Node::with_single_pair(ROOT_BLOCK_ID, median, left, right);
                    return self.persist(root);
                }
            }
        }
    }

    /// Flush written blocks to disk
    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()
    }

    /// Flush and close the index file
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }

    /// Close the index file and delete it
    pub fn destroy(self) -> Result<()> {
        let path = self.path().to_path_buf();
        drop(self);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed index file {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write both halves of an overfull node to new blocks.
    ///
    /// The node's old block is left behind unreferenced.
    fn split(&mut self, node: Node) -> Result<(Pair, BlockId, BlockId)> {
        let old_id = node.id;
        let (median, mut left, mut right) = node.split();

        left.id = self.store.allocate_block()?;
        store_node(&mut self.store, &left)?;
        right.id = self.store.allocate_block()?;
        store_node(&mut self.store, &right)?;

        debug!(
            "Split block {} into {} ({} pairs) and {} ({} pairs)",
            old_id,
            left.id,
            left.pairs.len(),
            right.id,
            right.pairs.len()
        );
        Ok((median, left.id, right.id))
    }

    fn persist(&mut self, node: Node) -> Result<()> {
        store_node(&mut self.store, &node)?;
        if node.id == ROOT_BLOCK_ID {
            self.root = node;
        }
        Ok(())
    }
}

pub(crate) fn load_node(store: &mut BlockStore, id: BlockId) -> Result<Node> {
    let node = block::decode(&store.read_block(id)?)?;
    if node.id != id {
        return Err(TallyError::CorruptBlock(format!(
            "block {} claims to be block {}",
            id, node.id
        )));
    }
    Ok(node)
}

/// Fail once a walk has loaded more nodes than the store has blocks.
///
/// A well-formed tree never reaches a block twice, so going past that bound
/// means some child id points back up the tree.
pub(crate) fn check_walk(store: &BlockStore, steps: u64) -> Result<()> {
    if steps > store.block_count() {
        return Err(TallyError::CorruptBlock(format!(
            "walk loaded {} nodes from a store of {} blocks, child ids form a cycle",
            steps,
            store.block_count()
        )));
    }
    Ok(())
}

fn store_node(store: &mut BlockStore, node: &Node) -> Result<()> {
    store.write_block(node.id, &block::encode(node)?)
}

fn child_at(node: &Node, slot: usize) -> Result<BlockId> {
    node.children.get(slot).copied().ok_or_else(|| {
        TallyError::CorruptBlock(format!(
            "block {} has no child at slot {}",
            node.id, slot
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MAX_KEY_LEN, MAX_PAIRS_PER_NODE};
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn key(i: usize) -> String {
        format!("query-{:06}", i)
    }

    /// Walk every reachable node, checking order and shape
    fn assert_well_formed(tree: &mut BTree) -> Vec<Node> {
        let mut nodes = Vec::new();
        let mut pending = vec![tree.root().clone()];
        while let Some(node) = pending.pop() {
            assert!(node.is_well_formed(), "block {} malformed", node.id);
            assert!(node.pairs.len() <= MAX_PAIRS_PER_NODE);
            for child in &node.children {
                pending.push(load_node(&mut tree.store, *child).unwrap());
            }
            nodes.push(node);
        }
        nodes
    }

    #[test]
    fn test_insert_get_update() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        tree.insert(Pair::new("x", 5)).unwrap();
        assert_eq!(tree.get("x").unwrap(), Some(5));

        assert!(tree.update("x", 9).unwrap());
        assert_eq!(tree.get("x").unwrap(), Some(9));

        assert_eq!(tree.get("y").unwrap(), None);
        assert!(!tree.update("y", 1).unwrap());
    }

    #[test]
    fn test_empty_tree() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        assert_eq!(tree.block_count(), 1);
        assert!(tree.root().is_leaf());
        assert_eq!(tree.get("anything").unwrap(), None);
    }

    #[test]
    fn test_insert_rejects_long_key() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        let err = tree
            .insert(Pair::new("k".repeat(MAX_KEY_LEN + 1), 1))
            .unwrap_err();
        assert!(matches!(err, TallyError::KeyTooLong { .. }));
        assert!(tree.root().pairs.is_empty());
    }

    #[test]
    fn test_first_split() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        for i in 0..MAX_PAIRS_PER_NODE {
            tree.insert(Pair::new(key(i), i as u64)).unwrap();
        }
        assert!(tree.root().is_leaf());
        assert_eq!(tree.block_count(), 1);

        tree.insert(Pair::new(key(MAX_PAIRS_PER_NODE), 60)).unwrap();

        let root = tree.root().clone();
        assert_eq!(root.id, ROOT_BLOCK_ID);
        assert_eq!(root.pairs, vec![Pair::new(key(30), 30)]);
        assert_eq!(root.children, vec![1, 2]);
        assert_eq!(tree.block_count(), 3);

        let left = load_node(&mut tree.store, 1).unwrap();
        let right = load_node(&mut tree.store, 2).unwrap();
        let left_keys: Vec<_> = left.pairs.iter().map(|p| p.key.clone()).collect();
        let right_keys: Vec<_> = right.pairs.iter().map(|p| p.key.clone()).collect();
        assert_eq!(left_keys, (0..30).map(key).collect::<Vec<_>>());
        assert_eq!(right_keys, (31..61).map(key).collect::<Vec<_>>());
    }

    #[test]
    fn test_many_inserts_shuffled() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        let mut keys: Vec<usize> = (0..5000).collect();
        keys.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));
        for i in &keys {
            tree.insert(Pair::new(key(*i), *i as u64 * 3)).unwrap();
        }

        for i in 0..5000 {
            assert_eq!(tree.get(&key(i)).unwrap(), Some(i as u64 * 3), "key {}", i);
        }
        assert_eq!(tree.get("missing").unwrap(), None);

        let nodes = assert_well_formed(&mut tree);
        let total: usize = nodes.iter().map(|n| n.pairs.len()).sum();
        assert_eq!(total, 5000);
        // enough keys to force internal splits
        assert!(tree.stats().unwrap().height >= 3);
    }

    #[test]
    fn test_sequential_inserts_grow_height() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        for i in 0..3000 {
            tree.insert(Pair::new(key(i), 1)).unwrap();
        }
        let stats = tree.stats().unwrap();
        assert_eq!(stats.pairs, 3000);
        assert!(stats.height >= 2);
        assert_well_formed(&mut tree);
    }

    #[test]
    fn test_update_after_splits() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        for i in 0..1000 {
            tree.insert(Pair::new(key(i), 1)).unwrap();
        }
        let mut expected = HashMap::new();
        for i in (0..1000).step_by(7) {
            assert!(tree.update(&key(i), i as u64 + 100).unwrap());
            expected.insert(i, i as u64 + 100);
        }

        for i in 0..1000 {
            let want = expected.get(&i).copied().unwrap_or(1);
            assert_eq!(tree.get(&key(i)).unwrap(), Some(want));
        }
    }

    #[test]
    fn test_duplicate_insert_is_not_deduplicated() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();

        tree.insert(Pair::new("dup", 1)).unwrap();
        tree.insert(Pair::new("dup", 2)).unwrap();

        assert_eq!(tree.root().pairs.len(), 2);
        // the later insert lands first and shadows the earlier one
        assert_eq!(tree.get("dup").unwrap(), Some(2));
    }

    #[test]
    fn test_reopen_preserves_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("idx");
        {
            let mut tree = BTree::open(&path).unwrap();
            for i in 0..500 {
                tree.insert(Pair::new(key(i), i as u64)).unwrap();
            }
            tree.close().unwrap();
        }

        let mut tree = BTree::open(&path).unwrap();
        for i in 0..500 {
            assert_eq!(tree.get(&key(i)).unwrap(), Some(i as u64));
        }
        tree.insert(Pair::new("late", 1)).unwrap();
        assert_eq!(tree.get("late").unwrap(), Some(1));
    }

    #[test]
    fn test_destroy_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("idx");
        let mut tree = BTree::open(&path).unwrap();
        tree.insert(Pair::new("a", 1)).unwrap();

        tree.destroy().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_corrupt_child_reference() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("idx");
        {
            let mut store = BlockStore::open(&path).unwrap();
            store.allocate_block().unwrap();
            let root = Node::with_single_pair(0, Pair::new("m", 1), 40, 41);
            store.write_block(0, &block::encode(&root).unwrap()).unwrap();
        }

        let mut tree = BTree::open(&path).unwrap();
        let err = tree.get("a").unwrap_err();
        assert!(matches!(err, TallyError::OutOfRange { block_id: 40, .. }));
    }

    /// Point the root's left child back at the root
    fn link_child_to_root(tree: &mut BTree) {
        let cycle = Node {
            id: 1,
            pairs: vec![Pair::new("zzz", 1)],
            children: vec![ROOT_BLOCK_ID, ROOT_BLOCK_ID],
        };
        tree.store.write_block(1, &block::encode(&cycle).unwrap()).unwrap();
    }

    #[test]
    fn test_child_cycle_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let mut tree = BTree::open(temp_dir.path().join("idx")).unwrap();
        for i in 0..=MAX_PAIRS_PER_NODE {
            tree.insert(Pair::new(key(i), 1)).unwrap();
        }
        assert_eq!(tree.root().children, vec![1, 2]);
        link_child_to_root(&mut tree);

        assert!(matches!(tree.get(&key(0)), Err(TallyError::CorruptBlock(_))));
        assert!(matches!(tree.update(&key(0), 5), Err(TallyError::CorruptBlock(_))));
        assert!(matches!(
            tree.insert(Pair::new("a", 1)),
            Err(TallyError::CorruptBlock(_))
        ));
    }

    #[test]
    fn test_failed_root_update_keeps_resident_root() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("idx");
        {
            let mut tree = BTree::open(&path).unwrap();
            tree.insert(Pair::new("x", 5)).unwrap();
            tree.close().unwrap();
        }

        let mut tree = BTree::with_store(BlockStore::open_read_only(&path).unwrap()).unwrap();
        assert!(matches!(tree.update("x", 9), Err(TallyError::Io(_))));

        assert_eq!(tree.root().pairs, vec![Pair::new("x", 5)]);
        assert_eq!(tree.get("x").unwrap(), Some(5));
    }
}
