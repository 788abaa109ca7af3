//! Tree traversal: text export and statistics

use super::{check_walk, load_node, BTree, Node};
use crate::block::BlockStore;
use crate::{Pair, Result};
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Order in which pairs are exported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportOrder {
    /// Breadth-first from the root. Keys are only sorted within each node.
    #[default]
    LevelOrder,
    /// In-order traversal; keys come out globally sorted
    Sorted,
}

/// Shape of the reachable tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, 1 for a lone root
    pub height: usize,
    /// Reachable nodes
    pub nodes: usize,
    /// Reachable pairs
    pub pairs: usize,
    /// Blocks in the file, including ones orphaned by splits
    pub blocks: u64,
}

impl BTree {
    /// Visit every pair breadth-first, starting with the root's own pairs
    pub fn for_each_level_order<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Pair) -> Result<()>,
    {
        for pair in &self.root.pairs {
            visit(pair)?;
        }

        let mut queue: VecDeque<_> = self.root.children.iter().copied().collect();
        let mut loaded = 0;
        while let Some(id) = queue.pop_front() {
            loaded += 1;
            check_walk(&self.store, loaded)?;
            let node = load_node(&mut self.store, id)?;
            for pair in &node.pairs {
                visit(pair)?;
            }
            queue.extend(node.children.iter().copied());
        }
        Ok(())
    }

    /// Visit every pair in key order
    pub fn for_each_sorted<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Pair) -> Result<()>,
    {
        walk_in_order(&mut self.store, &self.root, 0, &mut visit)
    }

    /// Write every pair as `key\tvalue\n` in level order.
    ///
    /// Returns the number of pairs written.
    pub fn export<W: Write>(&mut self, sink: &mut W) -> Result<u64> {
        self.export_ordered(sink, ExportOrder::LevelOrder)
    }

    /// Write every pair as `key\tvalue\n` in the given order
    pub fn export_ordered<W: Write>(&mut self, sink: &mut W, order: ExportOrder) -> Result<u64> {
        let mut written = 0u64;
        let mut write_pair = |pair: &Pair| -> Result<()> {
            writeln!(sink, "{}", pair)?;
            written += 1;
            Ok(())
        };

        match order {
            ExportOrder::LevelOrder => self.for_each_level_order(&mut write_pair)?,
            ExportOrder::Sorted => self.for_each_sorted(&mut write_pair)?,
        }
        Ok(written)
    }

    /// Compute tree statistics by walking every reachable node
    pub fn stats(&mut self) -> Result<TreeStats> {
        let mut stats = TreeStats {
            height: 1,
            nodes: 1,
            pairs: self.root.pairs.len(),
            blocks: self.store.block_count(),
        };

        let mut queue: VecDeque<_> = self.root.children.iter().map(|id| (*id, 2)).collect();
        let mut loaded = 0;
        while let Some((id, depth)) = queue.pop_front() {
            loaded += 1;
            check_walk(&self.store, loaded)?;
            let node = load_node(&mut self.store, id)?;
            stats.height = stats.height.max(depth);
            stats.nodes += 1;
            stats.pairs += node.pairs.len();
            queue.extend(node.children.iter().map(|child| (*child, depth + 1)));
        }
        Ok(stats)
    }
}

fn walk_in_order<F>(store: &mut BlockStore, node: &Node, depth: u64, visit: &mut F) -> Result<()>
where
    F: FnMut(&Pair) -> Result<()>,
{
    if node.is_leaf() {
        for pair in &node.pairs {
            visit(pair)?;
        }
        return Ok(());
    }

    check_walk(store, depth + 1)?;
    for (i, child_id) in node.children.iter().enumerate() {
        let child = load_node(store, *child_id)?;
        walk_in_order(store, &child, depth + 1, visit)?;
        if let Some(pair) = node.pairs.get(i) {
            visit(pair)?;
        }
    }
    Ok(())
}

/// Export the tree to a text file.
///
/// Output goes to a temporary sibling file that is renamed over `path` only
/// after every pair was written and synced, so a failed export never leaves
/// a file that looks complete.
pub fn export_to_path(
    tree: &mut BTree,
    path: impl AsRef<Path>,
    order: ExportOrder,
) -> Result<u64> {
    let path = path.as_ref();
    let tmp_path = temp_path(path);

    match write_export(tree, &tmp_path, order) {
        Ok(written) => {
            fs::rename(&tmp_path, path)?;
            info!("Exported {} pairs to {:?}", written, path);
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                warn!("Failed to remove partial export {:?}: {}", tmp_path, cleanup);
            }
            Err(e)
        }
    }
}

fn write_export(tree: &mut BTree, tmp_path: &Path, order: ExportOrder) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(tmp_path)?);
    let written = tree.export_ordered(&mut writer, order)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(written)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
