//! Result cache layered with the dependency graph: invalidating a file
//! also drops every file that (transitively) depends on it.

use crate::deps::DependencyGraph;
use crate::error::Result;
use crate::lru::{CacheStats, LruCache, LruCacheOptions};
use serde::Serialize;
use std::collections::HashSet;
use turbo_protocol::ContentHash;

pub struct TypeCache<T> {
    cache: LruCache<T>,
    graph: DependencyGraph,
}

impl<T: Clone + Serialize> TypeCache<T> {
    #[must_use]
    pub fn new(options: LruCacheOptions) -> Self {
        Self {
            cache: LruCache::new(options),
            graph: DependencyGraph::new(),
        }
    }

    pub fn set_options(&mut self, options: LruCacheOptions) {
        self.cache.set_options(options);
    }

    pub fn get(&mut self, uri: &str, hash: &ContentHash) -> Option<T> {
        self.cache.get(uri, hash)
    }

    pub fn set(&mut self, uri: &str, hash: ContentHash, value: T) -> Result<()> {
        self.cache.set(uri, hash, value)
    }

    pub fn add_dependency(&mut self, from: &str, to: &str) {
        self.graph.add_dependency(from, to);
    }

    /// Replaces the recorded imports of `from` with `targets`.
    pub fn record_dependencies<I>(&mut self, from: &str, targets: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.graph.clear_dependencies(from);
        for target in targets {
            self.graph.add_dependency(from, &target);
        }
    }

    pub fn clear_dependencies(&mut self, from: &str) {
        self.graph.clear_dependencies(from);
    }

    /// Drops the entry for `uri` and for everything reachable from it
    /// along reverse dependency edges. Returns the invalidated closure,
    /// `uri` included.
    pub fn invalidate_cascade(&mut self, uri: &str) -> HashSet<String> {
        let closure = self.graph.reverse_closure(uri);
        for file in &closure {
            self.cache.invalidate(file);
        }
        closure
    }

    pub fn invalidate(&mut self, uri: &str) {
        self.cache.invalidate(uri);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.graph.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
}
