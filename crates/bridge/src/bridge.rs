//! The analysis bridge: cache-first dispatch with bounded concurrency,
//! per-uri dedup, parallel fan-out to the analyzer pools, and a
//! checker-wins merge of their diagnostics.

use crate::error::{BridgeError, Result};
use crate::queue::{fail, AnalysisQueue, QueueItem};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;
use turbo_cache::{CacheStats, LruCache, LruCacheOptions, TypeCache};
use turbo_checker_pool::{CheckerPool, CheckerPoolOptions, WorkerStatus};
use turbo_linter_pool::{LinterPool, LinterPoolOptions};
use turbo_logging::RingBuffer;
use turbo_protocol::config::CacheConfig;
use turbo_protocol::{
    content_hash, sort_diagnostics, AnalysisResult, Completion, Diagnostic, Priority, TurboConfig,
    TypeInfo,
};
use turbo_trace::tracer::DEFAULT_SLOW_THRESHOLD_MS;
use turbo_trace::{ExpansionGuard, ExpansionObserver, PerfTracer, SlowSpanObserver, SpanSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct BridgeOptions {
    /// How many analyses run at once.
    pub max_concurrent: usize,
    pub checker: CheckerPoolOptions,
    pub linter: LinterPoolOptions,
    /// Entries retained in the recent-diagnostics ring for the inspector.
    pub recent_results: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            checker: CheckerPoolOptions::default(),
            linter: LinterPoolOptions::default(),
            recent_results: 50,
        }
    }
}

/// Pool and queue gauges the server derives its status notification from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub active: usize,
    pub queued: usize,
    pub checker_enabled: bool,
    pub checker_workers: usize,
    pub checker_busy: usize,
    pub linter_enabled: bool,
    pub linter_running: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedCacheStats {
    pub results: CacheStats,
    pub types: CacheStats,
}

/// One line of the inspector's recent-diagnostics panel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentDiagnosticsSummary {
    pub uri: String,
    pub diagnostics: usize,
    pub errors: usize,
    pub analysis_time_ms: u64,
    pub timestamp_ms: u64,
}

struct BridgeInner {
    config: RwLock<TurboConfig>,
    options: BridgeOptions,
    checker: RwLock<Option<Arc<CheckerPool>>>,
    linter: LinterPool,
    result_cache: Mutex<LruCache<AnalysisResult>>,
    type_cache: Mutex<TypeCache<TypeInfo>>,
    tracer: PerfTracer,
    queue: Mutex<AnalysisQueue>,
    active: AtomicUsize,
    shutting_down: AtomicBool,
    recent: Mutex<RingBuffer<RecentDiagnosticsSummary>>,
    expansion_observer: RwLock<Option<Arc<dyn ExpansionObserver>>>,
}

pub struct AnalysisBridge {
    inner: Arc<BridgeInner>,
}

impl AnalysisBridge {
    /// Builds the bridge and starts the enabled pools. A checker pool that
    /// fails to start leaves the bridge running degraded (linter only).
    pub fn new(config: TurboConfig, options: BridgeOptions) -> Self {
        let cache_options = lru_options(&config.cache);
        let checker = if config.checker.enabled {
            match CheckerPool::start(config.checker.clone(), options.checker) {
                Ok(pool) => Some(Arc::new(pool)),
                Err(err) => {
                    log::error!("checker pool failed to start; running degraded: {err}");
                    None
                }
            }
        } else {
            None
        };
        let linter = LinterPool::new(config.linter.clone(), options.linter);
        let tracer = PerfTracer::new(config.inspector.max_trace_history, DEFAULT_SLOW_THRESHOLD_MS);

        Self {
            inner: Arc::new(BridgeInner {
                config: RwLock::new(config),
                options,
                checker: RwLock::new(checker),
                linter,
                result_cache: Mutex::new(LruCache::new(cache_options)),
                type_cache: Mutex::new(TypeCache::new(cache_options)),
                tracer,
                queue: Mutex::new(AnalysisQueue::default()),
                active: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
                recent: Mutex::new(RingBuffer::new(options.recent_results.max(1))),
                expansion_observer: RwLock::new(None),
            }),
        }
    }

    /// Merged diagnostics for one file. Cache-first unless `force`; on a
    /// miss the request is queued and dispatched by priority.
    pub async fn analyze(
        &self,
        uri: &str,
        content: &str,
        force: bool,
        priority: Priority,
    ) -> Result<AnalysisResult> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ShuttingDown);
        }

        let hash = content_hash(content.as_bytes());
        if !force && self.cache_enabled() {
            let cached = self
                .inner
                .result_cache
                .lock()
                .expect("result cache lock")
                .get(uri, &hash);
            if let Some(mut result) = cached {
                result.from_cache = true;
                return Ok(result);
            }
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let superseded = {
            let mut queue = self.inner.queue.lock().expect("bridge queue lock");
            queue.push(uri, content, priority, reply_tx)
        };
        if let Some(old) = superseded {
            fail(old, BridgeError::Superseded);
        }
        pump(&self.inner);
        reply_rx.await.unwrap_or(Err(BridgeError::ShuttingDown))
    }

    /// Hover query: checker type info filtered through the expansion
    /// guard, cached per file content.
    pub async fn type_info(
        &self,
        uri: &str,
        content: &str,
        line: u32,
        column: u32,
    ) -> Result<Option<TypeInfo>> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ShuttingDown);
        }
        let hash = content_hash(content.as_bytes());
        if self.cache_enabled() {
            let cached = self
                .inner
                .type_cache
                .lock()
                .expect("type cache lock")
                .get(uri, &hash);
            if let Some(info) = cached {
                return Ok(Some(info));
            }
        }

        let Some(pool) = self.checker_pool() else {
            return Ok(None);
        };
        let Some(mut info) = pool.type_info(uri, content, line, column).await? else {
            return Ok(None);
        };

        let max_depth = {
            let config = self.inner.config.read().expect("bridge config lock");
            config.checker.max_type_depth
        };
        let observer = self
            .inner
            .expansion_observer
            .read()
            .expect("expansion observer lock")
            .clone();
        let mut guard = match observer {
            Some(observer) => ExpansionGuard::new(max_depth).with_observer(observer),
            None => ExpansionGuard::new(max_depth),
        };
        let (display, expansion) = guard.expand_display(&info.display);
        info.display = display;
        info.expansion = expansion;

        if self.cache_enabled() {
            let store = self
                .inner
                .type_cache
                .lock()
                .expect("type cache lock")
                .set(uri, hash, info.clone());
            if let Err(err) = store {
                log::warn!("failed to cache type info for {uri}: {err}");
            }
        }
        Ok(Some(info))
    }

    /// Completion query, passed straight through to the checker pool.
    pub async fn completions(
        &self,
        uri: &str,
        content: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<Completion>> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::ShuttingDown);
        }
        match self.checker_pool() {
            Some(pool) => Ok(pool.completions(uri, content, line, column).await?),
            None => Ok(Vec::new()),
        }
    }

    pub fn invalidate(&self, uri: &str) {
        self.inner
            .result_cache
            .lock()
            .expect("result cache lock")
            .invalidate(uri);
        self.inner
            .type_cache
            .lock()
            .expect("type cache lock")
            .invalidate(uri);
    }

    /// Drops the cached results of `uri` and of everything that depends on
    /// it, transitively. Returns the invalidated closure.
    pub fn invalidate_cascade(&self, uri: &str) -> std::collections::HashSet<String> {
        let closure = self
            .inner
            .type_cache
            .lock()
            .expect("type cache lock")
            .invalidate_cascade(uri);
        let mut results = self.inner.result_cache.lock().expect("result cache lock");
        for file in &closure {
            results.invalidate(file);
        }
        closure
    }

    pub fn clear_cache(&self) {
        self.inner
            .result_cache
            .lock()
            .expect("result cache lock")
            .clear();
        self.inner
            .type_cache
            .lock()
            .expect("type cache lock")
            .clear();
    }

    /// Hot-applies new settings to the bridge and both pools.
    pub fn update_config(&self, config: TurboConfig) {
        let cache_options = lru_options(&config.cache);
        {
            let mut current = self.inner.config.write().expect("bridge config lock");
            *current = config.clone();
        }

        {
            let mut checker = self.inner.checker.write().expect("checker slot lock");
            match (&*checker, config.checker.enabled) {
                (Some(pool), true) => pool.update_config(config.checker.clone()),
                (Some(_), false) => {
                    if let Some(pool) = checker.take() {
                        tokio::spawn(async move { pool.shutdown().await });
                    }
                }
                (None, true) => match CheckerPool::start(
                    config.checker.clone(),
                    self.inner.options.checker,
                ) {
                    Ok(pool) => *checker = Some(Arc::new(pool)),
                    Err(err) => log::error!("checker pool failed to start on reload: {err}"),
                },
                (None, false) => {}
            }
        }

        self.inner.linter.update_config(config.linter);
        self.inner
            .tracer
            .set_max_history(config.inspector.max_trace_history);
        self.inner
            .result_cache
            .lock()
            .expect("result cache lock")
            .set_options(cache_options);
        self.inner
            .type_cache
            .lock()
            .expect("type cache lock")
            .set_options(cache_options);
    }

    #[must_use]
    pub fn config(&self) -> TurboConfig {
        self.inner.config.read().expect("bridge config lock").clone()
    }

    pub fn set_expansion_observer(&self, observer: Arc<dyn ExpansionObserver>) {
        *self
            .inner
            .expansion_observer
            .write()
            .expect("expansion observer lock") = Some(observer);
    }

    pub fn set_slow_span_observer(&self, observer: Arc<dyn SlowSpanObserver>) {
        self.inner.tracer.set_observer(observer);
    }

    #[must_use]
    pub fn cache_stats(&self) -> CombinedCacheStats {
        CombinedCacheStats {
            results: self
                .inner
                .result_cache
                .lock()
                .expect("result cache lock")
                .stats(),
            types: self.inner.type_cache.lock().expect("type cache lock").stats(),
        }
    }

    #[must_use]
    pub fn status(&self) -> BridgeStatus {
        let config = self.inner.config.read().expect("bridge config lock");
        let checker = self.inner.checker.read().expect("checker slot lock");
        BridgeStatus {
            active: self.inner.active.load(Ordering::SeqCst),
            queued: self.inner.queue.lock().expect("bridge queue lock").len(),
            checker_enabled: config.checker.enabled,
            checker_workers: checker.as_ref().map_or(0, |p| p.worker_count()),
            checker_busy: checker.as_ref().map_or(0, |p| p.busy_count()),
            linter_enabled: config.linter.enabled,
            linter_running: self.inner.linter.running_count(),
        }
    }

    #[must_use]
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.inner
            .checker
            .read()
            .expect("checker slot lock")
            .as_ref()
            .map_or_else(Vec::new, |pool| pool.worker_statuses())
    }

    #[must_use]
    pub fn recent_traces(&self, limit: usize) -> Vec<SpanSnapshot> {
        self.inner.tracer.get_recent(limit)
    }

    #[must_use]
    pub fn recent_diagnostics(&self, limit: usize) -> Vec<RecentDiagnosticsSummary> {
        self.inner.recent.lock().expect("recent ring lock").recent(limit)
    }

    /// Fails everything queued, then stops both pools.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<QueueItem> = {
            let mut queue = self.inner.queue.lock().expect("bridge queue lock");
            queue.drain_all()
        };
        for item in drained {
            fail(item.reply, BridgeError::ShuttingDown);
        }

        let checker = self
            .inner
            .checker
            .write()
            .expect("checker slot lock")
            .take();
        if let Some(pool) = checker {
            pool.shutdown().await;
        }
        self.inner.linter.shutdown();
        log::info!("analysis bridge shut down");
    }

    fn cache_enabled(&self) -> bool {
        self.inner
            .config
            .read()
            .expect("bridge config lock")
            .cache
            .enabled
    }

    fn checker_pool(&self) -> Option<Arc<CheckerPool>> {
        self.inner.checker.read().expect("checker slot lock").clone()
    }
}

fn lru_options(config: &CacheConfig) -> LruCacheOptions {
    LruCacheOptions {
        max_entries: config.max_entries,
        max_bytes: config.max_size_mb * 1024 * 1024,
        ttl: Duration::from_secs(config.ttl_seconds),
    }
}

/// Starts queued analyses while slots are free. Claimed under the queue
/// lock; the work itself runs in spawned tasks.
fn pump(inner: &Arc<BridgeInner>) {
    loop {
        if inner.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let item = {
            let mut queue = inner.queue.lock().expect("bridge queue lock");
            if inner.active.load(Ordering::SeqCst) >= inner.options.max_concurrent.max(1) {
                return;
            }
            let Some(item) = queue.pop_best() else {
                return;
            };
            inner.active.fetch_add(1, Ordering::SeqCst);
            item
        };
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            run_analysis(&inner, item).await;
            inner.active.fetch_sub(1, Ordering::SeqCst);
            pump(&inner);
        });
    }
}

async fn run_analysis(inner: &Arc<BridgeInner>, item: QueueItem) {
    let started = std::time::Instant::now();
    let QueueItem {
        uri,
        content,
        reply,
        enqueued_at_ms,
        ..
    } = item;
    let hash = content_hash(content.as_bytes());

    let mut root_meta = serde_json::Map::new();
    root_meta.insert("uri".to_string(), serde_json::json!(uri));
    root_meta.insert(
        "queueWaitMs".to_string(),
        serde_json::json!(now_ms().saturating_sub(enqueued_at_ms)),
    );
    let root = inner.tracer.start("analyzeFile", None, Some(root_meta));

    let (checker_enabled, linter_enabled, cache_enabled) = {
        let config = inner.config.read().expect("bridge config lock");
        (
            config.checker.enabled,
            config.linter.enabled,
            config.cache.enabled,
        )
    };
    let checker_pool = inner.checker.read().expect("checker slot lock").clone();

    let checker_fut = async {
        let Some(pool) = checker_pool.filter(|_| checker_enabled) else {
            return (Vec::new(), Vec::new());
        };
        let span = inner.tracer.start("checker.analyze", Some(root), None);
        let outcome = pool.analyze(&uri, &content).await;
        inner.tracer.end(span, None);
        match outcome {
            Ok(analysis) => (analysis.result.diagnostics, analysis.dependencies),
            Err(err) => {
                log::warn!("checker analysis failed for {uri}: {err}");
                (Vec::new(), Vec::new())
            }
        }
    };
    let linter_fut = async {
        if !linter_enabled {
            return Vec::new();
        }
        let span = inner.tracer.start("linter.lint", Some(root), None);
        let outcome = inner.linter.lint(&uri, &content).await;
        inner.tracer.end(span, None);
        match outcome {
            Ok(diagnostics) => diagnostics,
            Err(err) => {
                log::warn!("lint failed for {uri}: {err}");
                Vec::new()
            }
        }
    };
    // Settle-all: one analyzer failing never suppresses the other.
    let ((checker_diags, dependencies), linter_diags) = tokio::join!(checker_fut, linter_fut);

    if !dependencies.is_empty() {
        inner
            .type_cache
            .lock()
            .expect("type cache lock")
            .record_dependencies(&uri, dependencies);
    }

    let diagnostics = merge_diagnostics(checker_diags, linter_diags);
    let result = AnalysisResult {
        uri: uri.clone(),
        content_hash: hash,
        diagnostics,
        analysis_time_ms: started.elapsed().as_millis() as u64,
        from_cache: false,
    };

    if cache_enabled {
        let stored = inner
            .result_cache
            .lock()
            .expect("result cache lock")
            .set(&uri, result.content_hash.clone(), result.clone());
        if let Err(err) = stored {
            log::warn!("failed to cache analysis result for {uri}: {err}");
        }
    }

    inner
        .recent
        .lock()
        .expect("recent ring lock")
        .push(RecentDiagnosticsSummary {
            uri: uri.clone(),
            diagnostics: result.diagnostics.len(),
            errors: result
                .diagnostics
                .iter()
                .filter(|d| d.severity == turbo_protocol::Severity::Error)
                .count(),
            analysis_time_ms: result.analysis_time_ms,
            timestamp_ms: now_ms(),
        });

    let mut end_meta = serde_json::Map::new();
    end_meta.insert(
        "diagnostics".to_string(),
        serde_json::json!(result.diagnostics.len()),
    );
    inner.tracer.end(root, Some(end_meta));

    let _ = reply.send(Ok(result));
}

/// Dedup by `(file, line, column, message)`; on conflict the checker's
/// record wins. Output is sorted by the stable presentation key.
fn merge_diagnostics(checker: Vec<Diagnostic>, linter: Vec<Diagnostic>) -> Vec<Diagnostic> {
    let mut merged: HashMap<(String, u32, u32, String), Diagnostic> = HashMap::new();
    for diagnostic in linter {
        merged.insert(diagnostic.dedup_key(), diagnostic);
    }
    for diagnostic in checker {
        merged.insert(diagnostic.dedup_key(), diagnostic);
    }
    let mut out: Vec<Diagnostic> = merged.into_values().collect();
    sort_diagnostics(&mut out);
    out
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
