//! Bounded, expiring cache of search responses.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use docrelay_shared::{Result, SearchResponse};

use crate::{SearchClient, SearchQuery};

/// Exact-match cache key: normalized query text, site filter, result count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    query: String,
    site: Option<String>,
    count: usize,
}

impl CacheKey {
    pub fn new(query: &SearchQuery) -> Self {
        Self {
            query: normalize_query(&query.query),
            site: query.site.as_ref().map(|s| s.trim().to_lowercase()),
            count: query.num_results,
        }
    }
}

/// Lowercase, trim, and collapse internal whitespace.
fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

struct Entry {
    stored_at: Instant,
    response: SearchResponse,
}

/// LRU cache with a per-entry time-to-live. Capacity 0 disables caching.
pub struct SearchCache {
    entries: Option<Mutex<LruCache<CacheKey, Entry>>>,
    ttl: Duration,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            ttl,
        }
    }

    /// Return a fresh entry for `key`, evicting it if it has expired.
    pub fn get(&self, key: &CacheKey) -> Option<SearchResponse> {
        let mut entries = self.entries.as_ref()?.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: CacheKey, response: SearchResponse) {
        if let Some(entries) = &self.entries {
            entries.lock().put(
                key,
                Entry {
                    stored_at: Instant::now(),
                    response,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |e| e.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`SearchClient`] that answers repeated queries from a [`SearchCache`].
///
/// Only successful responses are stored.
pub struct CachedSearch<S> {
    inner: S,
    cache: SearchCache,
}

impl<S: SearchClient> CachedSearch<S> {
    pub fn new(inner: S, cache: SearchCache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }
}

#[async_trait]
impl<S: SearchClient> SearchClient for CachedSearch<S> {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let key = CacheKey::new(query);
        if let Some(hit) = self.cache.get(&key) {
            debug!(q = %query.query, site = ?query.site, "search cache hit");
            return Ok(hit);
        }

        let response = self.inner.search(query).await?;
        self.cache.insert(key, response.clone());
        Ok(response)
    }
}
