use std::num::NonZeroUsize;

use lru::LruCache;

use crate::types::{Hash, Tx};

/// Bounded LRU of recently seen tx hashes. Holds hashes of everything that
/// entered check-tx, including entries later rejected or committed, so
/// re-broadcasts are refused without touching the application.
pub struct TxCache {
    cache: LruCache<Hash, ()>,
}

impl TxCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { cache: LruCache::new(cap) }
    }

    /// Record the tx. Returns false if it was already present (refreshing
    /// its recency either way).
    pub fn push(&mut self, tx: &Tx) -> bool {
        let h = tx.hash();
        if self.cache.contains(&h) {
            self.cache.promote(&h);
            return false;
        }
        self.cache.put(h, ());
        true
    }

    pub fn contains(&self, tx: &Tx) -> bool {
        self.cache.contains(&tx.hash())
    }

    pub fn remove(&mut self, tx: &Tx) {
        self.cache.pop(&tx.hash());
    }

    pub fn reset(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
