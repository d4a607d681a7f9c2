//! File-level dependency graph: `depends_on` plus its mirrored reverse,
//! used to cascade invalidation when a shared module changes.

use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    depends_on: HashMap<String, HashSet<String>>,
    depended_on_by: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `from` importing `to`. Idempotent; the reverse edge is
    /// mirrored so the duality invariant always holds.
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        self.depends_on
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.depended_on_by
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    /// Removes all outgoing edges of `from`, used before re-recording a
    /// re-analyzed file whose imports may have changed.
    pub fn clear_dependencies(&mut self, from: &str) {
        let Some(targets) = self.depends_on.remove(from) else {
            return;
        };
        for target in targets {
            if let Some(reverse) = self.depended_on_by.get_mut(&target) {
                reverse.remove(from);
                if reverse.is_empty() {
                    self.depended_on_by.remove(&target);
                }
            }
        }
    }

    #[must_use]
    pub fn dependencies_of(&self, uri: &str) -> HashSet<String> {
        self.depends_on.get(uri).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn dependents_of(&self, uri: &str) -> HashSet<String> {
        self.depended_on_by.get(uri).cloned().unwrap_or_default()
    }

    /// Breadth-first closure of `uri` along reverse edges, including `uri`
    /// itself. Visited tracking keeps cycles from looping.
    #[must_use]
    pub fn reverse_closure(&self, uri: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(uri.to_string());
        queue.push_back(uri.to_string());
        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.depended_on_by.get(&current) {
                for dependent in dependents {
                    if visited.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        visited
    }

    pub fn clear(&mut self) {
        self.depends_on.clear();
        self.depended_on_by.clear();
    }

    /// Checks the duality invariant; exercised by tests.
    #[must_use]
    pub fn is_mirrored(&self) -> bool {
        let forward_ok = self.depends_on.iter().all(|(from, targets)| {
            targets.iter().all(|to| {
                self.depended_on_by
                    .get(to)
                    .is_some_and(|rev| rev.contains(from))
            })
        });
        let reverse_ok = self.depended_on_by.iter().all(|(to, sources)| {
            sources.iter().all(|from| {
                self.depends_on
                    .get(from)
                    .is_some_and(|fwd| fwd.contains(to))
            })
        });
        forward_ok && reverse_ok
    }
}
