//! Compiled-query cache
//!
//! Maps the literal query string to its compiled [`Criteria`] tree. Entries
//! expire after a fixed TTL and the cache holds at most `max_entries`
//! trees, evicting the least recently used. Only compilation is cached;
//! realized position sets depend on the bucket and are never stored here.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::index::Criteria;
use crate::query::compiler::compile_query;
use crate::query::error::QueryResult;

/// Default time a compiled query stays cached
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default cap on cached queries
pub const DEFAULT_CACHE_ENTRIES: usize = 1024;

struct CacheEntry {
    criteria: Arc<Criteria>,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Hit/miss counters and current size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Time- and size-bounded cache of compiled queries
pub struct CriteriaCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CriteriaCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // Entries are only swapped whole, so a poisoned lock still guards a
    // consistent map.
    fn entries(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached tree for `query`, compiling and caching on a miss
    ///
    /// Compilation errors are returned and not cached.
    pub fn get_or_compile(&self, query: &str) -> QueryResult<Arc<Criteria>> {
        if let Some(criteria) = self.get(query) {
            return Ok(criteria);
        }

        let criteria = Arc::new(compile_query(query)?);
        self.insert(query, Arc::clone(&criteria));
        Ok(criteria)
    }

    /// Look up a live entry, promoting it to most recently used
    ///
    /// An expired entry is removed and counts as a miss.
    pub fn get(&self, query: &str) -> Option<Arc<Criteria>> {
        let mut entries = self.entries();
        let lookup = entries
            .get(query)
            .map(|entry| (!entry.is_expired(self.ttl)).then(|| Arc::clone(&entry.criteria)));
        let found = match lookup {
            Some(Some(criteria)) => Some(criteria),
            Some(None) => {
                entries.pop(query);
                None
            }
            None => None,
        };

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a compiled tree, evicting the least recently used when full
    pub fn insert(&self, query: &str, criteria: Arc<Criteria>) {
        self.entries().put(
            query.to_string(),
            CacheEntry {
                criteria,
                created_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(self.ttl))
            .map(|(query, _)| query.clone())
            .collect();

        for query in &expired {
            entries.pop(query);
        }
        expired.len()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for CriteriaCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL, DEFAULT_CACHE_ENTRIES)
    }
}
