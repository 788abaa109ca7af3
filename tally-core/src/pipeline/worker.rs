//! Counting workers

use super::PipelineCounters;
use crate::cache::{Evicted, LruCache};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Count keys from `input` into the cache, forwarding evictions.
///
/// Runs until the input queue is closed and empty, or until the aggregator
/// stops listening.
pub(crate) fn run_counter(
    worker_id: usize,
    cache: Arc<LruCache>,
    input: Receiver<String>,
    results: Sender<Evicted>,
    counters: Arc<PipelineCounters>,
) {
    let mut counted = 0u64;
    for key in input.iter() {
        counted += 1;
        let Some(evicted) = cache.push_or_increment(&key, 1) else {
            continue;
        };

        counters.evictions.fetch_add(1, Ordering::Relaxed);
        if results.send(evicted).is_err() {
            debug!("Counter {} stopping: aggregator is gone", worker_id);
            break;
        }
    }

    counters.keys_counted.fetch_add(counted, Ordering::Relaxed);
    debug!("Counter {} finished after {} keys", worker_id, counted);
}
