//! LRU aggregation cache
//!
//! A bounded map from key to running count that sits in front of the
//! B-tree. Repeated keys are counted in memory; a key only reaches the
//! tree when it is evicted or when the cache is flushed at shutdown.
//!
//! One mutex guards both the key index and the recency list, so every
//! operation is atomic with respect to concurrent callers.

mod list;

use crate::{Result, TallyError};
use list::RecencyList;
use parking_lot::Mutex;
use std::collections::HashMap;

/// An entry pushed out of the cache, with the count it accumulated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub key: String,
    pub count: u64,
}

/// Thread-safe LRU cache of key counts
pub struct LruCache {
    capacity: usize,
    inner: Mutex<LruInner>,
}

struct LruInner {
    index: HashMap<String, list::SlotId>,
    list: RecencyList,
}

impl LruCache {
    /// Create a cache holding at most `capacity` keys
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(TallyError::Config("cache capacity must be positive".into()));
        }

        Ok(Self {
            capacity,
            inner: Mutex::new(LruInner {
                index: HashMap::with_capacity(capacity + 1),
                list: RecencyList::with_capacity(capacity + 1),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident keys
    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().list.is_empty()
    }

    /// Add `amount` to the count of `key` and mark it most recently used.
    ///
    /// A new key starts at `amount`. If this pushes the cache over capacity,
    /// the least recently used entry is removed and returned.
    pub fn push_or_increment(&self, key: &str, amount: u64) -> Option<Evicted> {
        let mut inner = self.inner.lock();
        let LruInner { index, list } = &mut *inner;

        match index.get(key) {
            Some(&id) => {
                list.add(id, amount);
                list.promote(id);
            }
            None => {
                let id = list.push_front(key.to_string(), amount);
                index.insert(key.to_string(), id);
            }
        }

        if list.len() <= self.capacity {
            return None;
        }

        let (key, count) = list.pop_back()?;
        index.remove(&key);
        Some(Evicted { key, count })
    }

    /// Current count of `key`, marking it most recently used
    pub fn get(&self, key: &str) -> Option<u64> {
        let mut inner = self.inner.lock();
        let LruInner { index, list } = &mut *inner;

        let id = *index.get(key)?;
        list.promote(id);
        Some(list.count(id))
    }

    /// Visit every resident entry without removing it.
    ///
    /// Entries are visited from most to least recently used. The cache is
    /// locked for the duration, so `visit` must not call back into it.
    pub fn drain<F>(&self, mut visit: F)
    where
        F: FnMut(&str, u64),
    {
        let inner = self.inner.lock();
        for (key, count) in inner.list.iter() {
            visit(key, count);
        }
    }

    /// Copy out every resident entry, most recently used first
    pub fn residents(&self) -> Vec<Evicted> {
        let mut entries = Vec::with_capacity(self.len());
        self.drain(|key, count| {
            entries.push(Evicted {
                key: key.to_string(),
                count,
            })
        });
        entries
    }
}
