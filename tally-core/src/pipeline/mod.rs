//! Aggregation pipeline
//!
//! Raw keys flow through a bounded queue to a pool of counter threads.
//! Each counter increments the shared [`LruCache`]; whatever the cache
//! evicts goes onto a second bounded queue drained by one aggregator
//! thread, the only code that touches the [`BTree`].
//!
//! Shutdown is two-phase: [`QueryCounter::finish`] closes the input queue
//! and joins every counter, then pushes the cache's remaining entries
//! through the aggregator before stopping it.

mod aggregator;
mod worker;

use crate::btree::BTree;
use crate::cache::{Evicted, LruCache};
use crate::config::{DEFAULT_CACHE_CAPACITY, DEFAULT_WORKERS, QUEUE_CAPACITY};
use crate::{Pair, Result, TallyError};
use aggregator::{Aggregator, AggregatorOutput};
use crossbeam_channel::{bounded, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Keys held in the aggregation cache
    pub cache_capacity: usize,
    /// Number of counter threads
    pub workers: usize,
    /// Bound of the input and eviction queues
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            workers: DEFAULT_WORKERS,
            queue_capacity: QUEUE_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Reject parameters the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(TallyError::Config("cache capacity must be positive".into()));
        }
        if self.workers == 0 {
            return Err(TallyError::Config("worker pool must not be empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(TallyError::Config("queue capacity must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub keys_counted: AtomicU64,
    pub evictions: AtomicU64,
    pub inserts: AtomicU64,
    pub updates: AtomicU64,
}

/// Summary of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Keys taken off the input queue
    pub keys_counted: u64,
    /// Entries evicted from the cache while counting
    pub evictions: u64,
    /// Cache entries merged during the shutdown flush
    pub residual_flushed: u64,
    /// New keys written to the tree
    pub inserts: u64,
    /// Existing keys whose count was raised
    pub updates: u64,
    /// Keys too long to store, with the counts they accumulated
    pub rejected: Vec<Pair>,
}

/// Running pipeline: counters plus the aggregator that owns the tree
pub struct QueryCounter {
    input: Sender<String>,
    results: Sender<Evicted>,
    cache: Arc<LruCache>,
    counters: Arc<PipelineCounters>,
    workers: Vec<JoinHandle<()>>,
    aggregator: JoinHandle<Result<AggregatorOutput>>,
}

impl QueryCounter {
    /// Spawn the counter pool and the aggregator
    pub fn start(tree: BTree, config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(LruCache::new(config.cache_capacity)?);
        let counters = Arc::new(PipelineCounters::default());
        let (input_tx, input_rx) = bounded::<String>(config.queue_capacity);
        let (results_tx, results_rx) = bounded::<Evicted>(config.queue_capacity);

        let aggregator = {
            let aggregator = Aggregator::new(tree, Arc::clone(&counters));
            thread::Builder::new()
                .name("tally-aggregator".into())
                .spawn(move || aggregator.run(results_rx))?
        };

        let mut workers = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let cache = Arc::clone(&cache);
            let input = input_rx.clone();
            let results = results_tx.clone();
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("tally-counter-{}", worker_id))
                .spawn(move || worker::run_counter(worker_id, cache, input, results, counters))?;
            workers.push(handle);
        }

        info!(
            "Pipeline started: {} counters, cache capacity {}, queue capacity {}",
            config.workers, config.cache_capacity, config.queue_capacity
        );

        Ok(Self {
            input: input_tx,
            results: results_tx,
            cache,
            counters,
            workers,
            aggregator,
        })
    }

    /// Queue one key for counting.
    ///
    /// Blocks while the input queue is full. Fails with `PipelineClosed`
    /// once the aggregator has stopped; `finish` then reports the cause.
    pub fn send(&self, key: impl Into<String>) -> Result<()> {
        self.input
            .send(key.into())
            .map_err(|_| TallyError::PipelineClosed)
    }

    /// Close the input, flush the cache into the tree and stop.
    ///
    /// Returns the tree, synced to disk, with every counted occurrence
    /// merged in, or the first store error the aggregator hit.
    pub fn finish(self) -> Result<(BTree, PipelineReport)> {
        let QueryCounter {
            input,
            results,
            cache,
            counters,
            workers,
            aggregator,
        } = self;

        // Phase one: no more keys, wait for the counters to drain the queue
        drop(input);
        let mut worker_panicked = false;
        for handle in workers {
            if handle.join().is_err() {
                worker_panicked = true;
            }
        }

        // Phase two: whatever is still cached never triggered an eviction
        let mut residual_flushed = 0u64;
        if !worker_panicked {
            for entry in cache.residents() {
                if results.send(entry).is_err() {
                    break;
                }
                residual_flushed += 1;
            }
        }
        drop(results);

        let output = match aggregator.join() {
            Ok(output) => output?,
            Err(_) => return Err(TallyError::Internal("aggregator thread panicked".into())),
        };
        if worker_panicked {
            error!("A counter thread panicked; counts are incomplete");
            return Err(TallyError::Internal("counter thread panicked".into()));
        }

        let mut tree = output.tree;
        tree.sync()?;

        let report = PipelineReport {
            keys_counted: counters.keys_counted.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            residual_flushed,
            inserts: counters.inserts.load(Ordering::Relaxed),
            updates: counters.updates.load(Ordering::Relaxed),
            rejected: output.rejected,
        };
        info!(
            "Pipeline finished: {} keys, {} evictions, {} residual entries flushed",
            report.keys_counted, report.evictions, report.residual_flushed
        );
        Ok((tree, report))
    }
}
