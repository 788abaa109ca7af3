//! Aggregator: the single writer that merges counts into the tree

use super::PipelineCounters;
use crate::btree::BTree;
use crate::cache::Evicted;
use crate::{Pair, Result};
use crossbeam_channel::Receiver;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Owns the tree for the lifetime of the pipeline
pub(crate) struct Aggregator {
    tree: BTree,
    counters: Arc<PipelineCounters>,
    rejected: BTreeMap<String, u64>,
}

/// What the aggregator hands back once its queue closes
pub(crate) struct AggregatorOutput {
    pub tree: BTree,
    pub rejected: Vec<Pair>,
}

impl Aggregator {
    pub fn new(tree: BTree, counters: Arc<PipelineCounters>) -> Self {
        Self {
            tree,
            counters,
            rejected: BTreeMap::new(),
        }
    }

    /// Merge every queued count until all senders hang up.
    ///
    /// A store error stops the loop immediately; the receiver is dropped
    /// so producers see the queue close instead of blocking forever.
    pub fn run(mut self, results: Receiver<Evicted>) -> Result<AggregatorOutput> {
        for evicted in results.iter() {
            if let Err(e) = self.merge(evicted) {
                error!("Aggregator stopping on store error: {}", e);
                return Err(e);
            }
        }

        debug!("Aggregator queue closed");
        Ok(AggregatorOutput {
            tree: self.tree,
            rejected: self
                .rejected
                .into_iter()
                .map(|(key, value)| Pair::new(key, value))
                .collect(),
        })
    }

    /// Read the current count, add the delta, write it back
    pub fn merge(&mut self, evicted: Evicted) -> Result<()> {
        let Evicted { key, count } = evicted;

        if let Some(current) = self.tree.get(&key)? {
            self.tree.update(&key, current.saturating_add(count))?;
            self.counters.updates.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        match self.tree.insert(Pair::new(key.clone(), count)) {
            Ok(()) => {
                self.counters.inserts.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) if !e.is_fatal() => {
                warn!("Rejected key with count {}: {}", count, e);
                let total = self.rejected.entry(key).or_insert(0);
                *total = total.saturating_add(count);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
