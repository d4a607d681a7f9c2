//! Content-hash validated in-memory cache with TTL and least-recently-
//! accessed eviction, bounded by both entry count and total bytes.

use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use turbo_protocol::ContentHash;

/// Fixed per-entry bookkeeping overhead added to the serialized estimate.
const ENTRY_OVERHEAD_BYTES: u64 = 64;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    content_hash: ContentHash,
    created_at_ms: u64,
    last_accessed_ms: u64,
    hits: u64,
    size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct LruCacheOptions {
    pub max_entries: usize,
    pub max_bytes: u64,
    pub ttl: Duration,
}

impl Default for LruCacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_bytes: 100 * 1024 * 1024,
            ttl: Duration::from_secs(1800),
        }
    }
}

pub struct LruCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
    options: LruCacheOptions,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    // Monotonic tiebreak for entries touched within the same millisecond.
    access_seq: u64,
    access_order: HashMap<String, u64>,
}

impl<T: Clone + Serialize> LruCache<T> {
    #[must_use]
    pub fn new(options: LruCacheOptions) -> Self {
        Self {
            entries: HashMap::new(),
            options,
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            access_seq: 0,
            access_order: HashMap::new(),
        }
    }

    /// Replaces the bounds, evicting immediately if the new bounds are
    /// tighter than the current state.
    pub fn set_options(&mut self, options: LruCacheOptions) {
        self.options = options;
        self.evict_to_bounds();
    }

    /// Returns the value when an unexpired entry exists whose stored hash
    /// equals `hash`. A stale hash or expired TTL deletes the entry.
    pub fn get(&mut self, uri: &str, hash: &ContentHash) -> Option<T> {
        let now = now_ms();
        let valid = match self.entries.get(uri) {
            Some(entry) => entry.content_hash == *hash && self.is_fresh(entry, now),
            None => {
                self.misses += 1;
                return None;
            }
        };
        if !valid {
            self.remove_entry(uri);
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.access_seq += 1;
        self.access_order.insert(uri.to_string(), self.access_seq);
        let entry = self.entries.get_mut(uri).expect("validated above");
        entry.last_accessed_ms = now;
        entry.hits += 1;
        Some(entry.value.clone())
    }

    /// Replaces any prior entry for `uri` and evicts back down to bounds.
    pub fn set(&mut self, uri: &str, hash: ContentHash, value: T) -> Result<()> {
        let size_bytes = self.estimate_size(uri, &value)?;
        let now = now_ms();
        self.remove_entry(uri);
        self.access_seq += 1;
        self.access_order.insert(uri.to_string(), self.access_seq);
        self.entries.insert(
            uri.to_string(),
            CacheEntry {
                value,
                content_hash: hash,
                created_at_ms: now,
                last_accessed_ms: now,
                hits: 0,
                size_bytes,
            },
        );
        self.total_bytes += size_bytes;
        self.evict_to_bounds();
        Ok(())
    }

    pub fn invalidate(&mut self, uri: &str) {
        self.remove_entry(uri);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
        self.total_bytes = 0;
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
    }

    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        self.entries.contains_key(uri)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        };
        CacheStats {
            entries: self.entries.len(),
            total_bytes: self.total_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate,
            miss_rate: if lookups == 0 { 0.0 } else { 1.0 - hit_rate },
        }
    }

    fn is_fresh(&self, entry: &CacheEntry<T>, now: u64) -> bool {
        let ttl_ms = self.options.ttl.as_millis() as u64;
        // A zero TTL means "never valid".
        ttl_ms > 0 && now.saturating_sub(entry.created_at_ms) <= ttl_ms
    }

    fn estimate_size(&self, uri: &str, value: &T) -> Result<u64> {
        let serialized = serde_json::to_vec(value)?;
        Ok(serialized.len() as u64 + uri.len() as u64 + ENTRY_OVERHEAD_BYTES)
    }

    fn remove_entry(&mut self, uri: &str) -> bool {
        match self.entries.remove(uri) {
            Some(entry) => {
                self.total_bytes -= entry.size_bytes;
                self.access_order.remove(uri);
                true
            }
            None => false,
        }
    }

    fn evict_to_bounds(&mut self) {
        while self.entries.len() > self.options.max_entries
            || self.total_bytes > self.options.max_bytes
        {
            let Some(victim) = self.least_recently_accessed() else {
                break;
            };
            self.remove_entry(&victim);
            self.evictions += 1;
        }
    }

    fn least_recently_accessed(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(uri, entry)| {
                (
                    entry.last_accessed_ms,
                    self.access_order.get(*uri).copied().unwrap_or(0),
                )
            })
            .map(|(uri, _)| uri.clone())
    }

    #[cfg(test)]
    fn backdate(&mut self, uri: &str, by: Duration) {
        if let Some(entry) = self.entries.get_mut(uri) {
            let ms = by.as_millis() as u64;
            entry.created_at_ms = entry.created_at_ms.saturating_sub(ms);
            entry.last_accessed_ms = entry.last_accessed_ms.saturating_sub(ms);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
