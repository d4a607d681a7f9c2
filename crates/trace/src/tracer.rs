//! Hierarchical performance tracer. Spans form a tree; children are linked
//! into their parent when they end, so open parent trees stay queryable.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_MAX_HISTORY: usize = 1000;
pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;

/// Notified when a completed span ran longer than the slow threshold.
/// Observer effects are isolated from the tracer: the callback runs
/// outside the tracer lock and nothing it does is propagated.
pub trait SlowSpanObserver: Send + Sync {
    fn on_slow_span(&self, span: &SpanSnapshot);
}

#[derive(Debug, Clone)]
struct Span {
    id: u64,
    name: String,
    parent_id: Option<u64>,
    start_ms: u64,
    end_ms: Option<u64>,
    duration_ms: Option<u64>,
    metadata: serde_json::Map<String, serde_json::Value>,
    children: Vec<u64>,
}

/// Detached copy of a span subtree, safe to serialize for the inspector.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanSnapshot {
    pub id: u64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub start_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SpanSnapshot>,
}

struct TracerState {
    active: HashMap<u64, Span>,
    completed: HashMap<u64, Span>,
    /// Completed root ids in insertion order; bounded by `max_history`.
    roots: VecDeque<u64>,
    next_id: u64,
    max_history: usize,
    slow_threshold_ms: u64,
}

pub struct PerfTracer {
    state: Mutex<TracerState>,
    observer: Mutex<Option<Arc<dyn SlowSpanObserver>>>,
}

impl Default for PerfTracer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY, DEFAULT_SLOW_THRESHOLD_MS)
    }
}

impl PerfTracer {
    #[must_use]
    pub fn new(max_history: usize, slow_threshold_ms: u64) -> Self {
        Self {
            state: Mutex::new(TracerState {
                active: HashMap::new(),
                completed: HashMap::new(),
                roots: VecDeque::new(),
                next_id: 1,
                max_history: max_history.max(1),
                slow_threshold_ms,
            }),
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn SlowSpanObserver>) {
        *self.observer.lock().expect("tracer observer lock") = Some(observer);
    }

    pub fn set_slow_threshold_ms(&self, threshold_ms: u64) {
        self.state.lock().expect("tracer lock").slow_threshold_ms = threshold_ms;
    }

    pub fn set_max_history(&self, max_history: usize) {
        let mut state = self.state.lock().expect("tracer lock");
        state.max_history = max_history.max(1);
        purge_excess_roots(&mut state);
    }

    /// Opens an active span and returns its id.
    pub fn start(
        &self,
        name: &str,
        parent_id: Option<u64>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> u64 {
        let mut state = self.state.lock().expect("tracer lock");
        let id = state.next_id;
        state.next_id += 1;
        state.active.insert(
            id,
            Span {
                id,
                name: name.to_string(),
                parent_id,
                start_ms: now_ms(),
                end_ms: None,
                duration_ms: None,
                metadata: metadata.unwrap_or_default(),
                children: Vec::new(),
            },
        );
        id
    }

    /// Closes a span: computes duration, links it into its parent (active
    /// or completed), and records roots in the bounded history. A no-op
    /// for unknown ids, so double-`end` is harmless.
    pub fn end(
        &self,
        id: u64,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) {
        let slow = {
            let mut state = self.state.lock().expect("tracer lock");
            let Some(mut span) = state.active.remove(&id) else {
                return;
            };
            let end = now_ms();
            span.end_ms = Some(end);
            span.duration_ms = Some(end.saturating_sub(span.start_ms));
            if let Some(extra) = metadata {
                span.metadata.extend(extra);
            }

            if let Some(parent_id) = span.parent_id {
                if let Some(parent) = state.active.get_mut(&parent_id) {
                    parent.children.push(id);
                } else if let Some(parent) = state.completed.get_mut(&parent_id) {
                    parent.children.push(id);
                }
                // A purged or unknown parent drops the link; the child is
                // still retained until its own root is purged.
            }

            let is_root = span.parent_id.is_none();
            let duration = span.duration_ms.unwrap_or(0);
            let threshold = state.slow_threshold_ms;
            state.completed.insert(id, span);
            if is_root {
                state.roots.push_back(id);
                purge_excess_roots(&mut state);
            }

            if threshold > 0 && duration >= threshold {
                snapshot_span(&state, id)
            } else {
                None
            }
        };

        if let Some(snapshot) = slow {
            let observer = self.observer.lock().expect("tracer observer lock").clone();
            if let Some(observer) = observer {
                observer.on_slow_span(&snapshot);
            }
        }
    }

    /// Most recent completed roots, newest first.
    #[must_use]
    pub fn get_recent(&self, limit: usize) -> Vec<SpanSnapshot> {
        let state = self.state.lock().expect("tracer lock");
        state
            .roots
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| snapshot_span(&state, *id))
            .collect()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().expect("tracer lock").active.len()
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.state.lock().expect("tracer lock").completed.len()
    }
}

fn purge_excess_roots(state: &mut TracerState) {
    while state.roots.len() > state.max_history {
        if let Some(oldest) = state.roots.pop_front() {
            remove_subtree(state, oldest);
        }
    }
}

fn remove_subtree(state: &mut TracerState, id: u64) {
    let Some(span) = state.completed.remove(&id) else {
        return;
    };
    for child in span.children {
        remove_subtree(state, child);
    }
}

fn snapshot_span(state: &TracerState, id: u64) -> Option<SpanSnapshot> {
    let span = state.completed.get(&id)?;
    let children = span
        .children
        .iter()
        .filter_map(|child| snapshot_span(state, *child))
        .collect();
    Some(SpanSnapshot {
        id: span.id,
        name: span.name.clone(),
        parent_id: span.parent_id,
        start_ms: span.start_ms,
        end_ms: span.end_ms,
        duration_ms: span.duration_ms,
        metadata: span.metadata.clone(),
        children,
    })
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn child_links_into_parent_tree() {
        let tracer = PerfTracer::new(10, 0);
        let root = tracer.start("analyzeFile", None, None);
        let child = tracer.start("checker.analyze", Some(root), None);
        tracer.end(child, None);
        tracer.end(root, None);

        let recent = tracer.get_recent(10);
        assert_eq!(recent.len(), 1);
        let tree = &recent[0];
        assert_eq!(tree.name, "analyzeFile");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].name, "checker.analyze");
        assert!(tree.children[0].start_ms >= tree.start_ms);
    }

    #[test]
    fn end_is_idempotent_on_unknown_ids() {
        let tracer = PerfTracer::new(10, 0);
        tracer.end(999, None);
        let id = tracer.start("s", None, None);
        tracer.end(id, None);
        tracer.end(id, None);
        assert_eq!(tracer.get_recent(10).len(), 1);
    }

    #[test]
    fn late_child_end_does_not_crash() {
        let tracer = PerfTracer::new(10, 0);
        let root = tracer.start("root", None, None);
        let child = tracer.start("child", Some(root), None);
        tracer.end(root, None);
        tracer.end(child, None);
        let recent = tracer.get_recent(10);
        assert_eq!(recent.len(), 1);
        // The late child still attaches to the completed parent.
        assert_eq!(recent[0].children.len(), 1);
    }

    #[test]
    fn history_is_bounded_and_purges_subtrees() {
        let tracer = PerfTracer::new(2, 0);
        for i in 0..4 {
            let root = tracer.start(&format!("root-{i}"), None, None);
            let child = tracer.start("child", Some(root), None);
            tracer.end(child, None);
            tracer.end(root, None);
        }
        let recent = tracer.get_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].name, "root-3");
        assert_eq!(recent[1].name, "root-2");
        // Two roots + their children; everything older is purged.
        assert_eq!(tracer.completed_count(), 4);
    }

    #[test]
    fn get_recent_returns_newest_first() {
        let tracer = PerfTracer::new(10, 0);
        for name in ["a", "b", "c"] {
            let id = tracer.start(name, None, None);
            tracer.end(id, None);
        }
        let recent = tracer.get_recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].name, "c");
        assert_eq!(recent[1].name, "b");
    }

    #[test]
    fn slow_observer_fires_for_slow_spans_only() {
        struct Counter(AtomicUsize);
        impl SlowSpanObserver for Counter {
            fn on_slow_span(&self, _span: &SpanSnapshot) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        // Threshold 0 disables; every span duration >= 1ms would be noisy
        // in tests, so flip the threshold around a recorded span instead.
        let tracer = PerfTracer::new(10, u64::MAX);
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        tracer.set_observer(counter.clone());

        let fast = tracer.start("fast", None, None);
        tracer.end(fast, None);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        tracer.set_slow_threshold_ms(1);
        let slow = tracer.start("slow", None, None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracer.end(slow, None);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn end_merges_metadata() {
        let tracer = PerfTracer::new(10, 0);
        let mut start_meta = serde_json::Map::new();
        start_meta.insert("uri".to_string(), serde_json::json!("a.ts"));
        let id = tracer.start("s", None, Some(start_meta));
        let mut end_meta = serde_json::Map::new();
        end_meta.insert("diagnostics".to_string(), serde_json::json!(3));
        tracer.end(id, Some(end_meta));
        let recent = tracer.get_recent(1);
        assert_eq!(recent[0].metadata["uri"], "a.ts");
        assert_eq!(recent[0].metadata["diagnostics"], 3);
    }
}
