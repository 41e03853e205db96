//! TTL cache for read-heavy list queries.
//!
//! Memoizes query results (friend lists, pending requests) for a few
//! minutes and drops them explicitly when a write changes the result set.
//! A cache problem degrades to recomputing the query; it never surfaces
//! to the caller.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

/// Key → (cached-at, value) with a single TTL for all entries.
pub struct ListCache {
    entries: DashMap<String, (Instant, Value)>,
    ttl: Duration,
}

impl ListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a live entry. Expired entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (cached_at, value) = entry.value();
                if cached_at.elapsed() < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn put(&self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), (Instant::now(), value));
    }

    /// Drop one key after a write invalidates it.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every expired entry. Called from the periodic sweep task.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (cached_at, _)| cached_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
