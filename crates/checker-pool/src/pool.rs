//! Fixed-size pool of persistent checker workers. Requests queue FIFO
//! behind busy workers; each worker handles one request at a time over a
//! newline-delimited JSON protocol.

use crate::error::{CheckerError, Result};
use crate::worker::{now_ms, spawn_worker, Listener, Worker, WorkerStatus};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use turbo_protocol::config::CheckerConfig;
use turbo_protocol::wire::{CheckerRequest, CheckerResponse, CheckerResponseKind};
use turbo_protocol::{content_hash, AnalysisResult, Completion, TypeInfo};

#[derive(Debug, Clone, Copy)]
pub struct CheckerPoolOptions {
    pub pool_size: usize,
    pub health_interval: Duration,
    pub liveness_interval: Duration,
    pub shutdown_grace: Duration,
    pub shutdown_force: Duration,
}

impl Default for CheckerPoolOptions {
    fn default() -> Self {
        Self {
            pool_size: 4,
            health_interval: Duration::from_secs(30),
            liveness_interval: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            shutdown_force: Duration::from_secs(5),
        }
    }
}

/// Analyze outcome plus the import list the checker reported, which feeds
/// the dependency graph upstream.
#[derive(Debug, Clone)]
pub struct CheckerAnalysis {
    pub result: AnalysisResult,
    pub dependencies: Vec<String>,
}

struct PendingRequest {
    uri: String,
    request: CheckerRequest,
    reply: oneshot::Sender<Result<CheckerResponse>>,
}

struct Assignment {
    slot: usize,
    stdin: Arc<TokioMutex<ChildStdin>>,
    listener: Listener,
    pending: PendingRequest,
}

struct PoolShared {
    config: RwLock<CheckerConfig>,
    options: CheckerPoolOptions,
    // Lock order: queue before workers, respawning last. No await points
    // while either is held.
    queue: Mutex<VecDeque<PendingRequest>>,
    workers: Mutex<Vec<Worker>>,
    respawning: Mutex<HashSet<usize>>,
    shutting_down: AtomicBool,
    exit_tx: mpsc::UnboundedSender<usize>,
}

pub struct CheckerPool {
    shared: Arc<PoolShared>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl CheckerPool {
    /// Spawns the pool. Succeeds when at least one worker comes up; a
    /// partially-started pool is reported through `worker_count`.
    pub fn start(config: CheckerConfig, options: CheckerPoolOptions) -> Result<Self> {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared {
            config: RwLock::new(config),
            options,
            queue: Mutex::new(VecDeque::new()),
            workers: Mutex::new(Vec::new()),
            respawning: Mutex::new(HashSet::new()),
            shutting_down: AtomicBool::new(false),
            exit_tx,
        });

        let mut spawned = Vec::new();
        let mut last_error = None;
        {
            let config = shared.config.read().expect("checker config lock");
            for slot in 0..options.pool_size.max(1) {
                match spawn_worker(&config, slot, shared.exit_tx.clone()) {
                    Ok(worker) => spawned.push(worker),
                    Err(err) => {
                        log::error!("failed to spawn checker worker {slot}: {err}");
                        last_error = Some(err);
                    }
                }
            }
        }
        if spawned.is_empty() {
            return Err(last_error
                .unwrap_or_else(|| CheckerError::Spawn("no workers spawned".to_string())));
        }
        log::info!("checker pool started with {} workers", spawned.len());
        *shared.workers.lock().expect("checker workers lock") = spawned;

        let timers = vec![
            spawn_exit_monitor(Arc::clone(&shared), exit_rx),
            spawn_health_timer(Arc::clone(&shared)),
            spawn_liveness_timer(Arc::clone(&shared)),
        ];

        Ok(Self {
            shared,
            timers: Mutex::new(timers),
        })
    }

    /// Full-file analysis on one worker.
    pub async fn analyze(&self, uri: &str, content: &str) -> Result<CheckerAnalysis> {
        let started = std::time::Instant::now();
        let flags = {
            let config = self.shared.config.read().expect("checker config lock");
            config.flags.clone()
        };
        let response = self
            .send_request(uri, CheckerRequest::analyze(uri, content, flags))
            .await?;
        let response = into_result(response)?;
        let analysis_time_ms = response
            .duration_ms
            .unwrap_or_else(|| started.elapsed().as_millis() as u64);
        let diagnostics = response
            .diagnostics
            .into_iter()
            .map(|raw| raw.into_diagnostic(uri))
            .collect();
        Ok(CheckerAnalysis {
            result: AnalysisResult {
                uri: uri.to_string(),
                content_hash: content_hash(content.as_bytes()),
                diagnostics,
                analysis_time_ms,
                from_cache: false,
            },
            dependencies: response.dependencies,
        })
    }

    /// Single-shot hover query over the same transport.
    pub async fn type_info(
        &self,
        uri: &str,
        content: &str,
        line: u32,
        column: u32,
    ) -> Result<Option<TypeInfo>> {
        let response = self
            .send_request(uri, CheckerRequest::type_info(uri, content, line, column))
            .await?;
        let response = into_result(response)?;
        Ok(response.type_info.map(|raw| raw.into_type_info()))
    }

    /// Single-shot completion query over the same transport.
    pub async fn completions(
        &self,
        uri: &str,
        content: &str,
        line: u32,
        column: u32,
    ) -> Result<Vec<Completion>> {
        let response = self
            .send_request(uri, CheckerRequest::completions(uri, content, line, column))
            .await?;
        let response = into_result(response)?;
        Ok(response
            .completions
            .into_iter()
            .map(|raw| raw.into_completion())
            .collect())
    }

    /// Applies to new requests; in-flight work is unaffected.
    pub fn update_config(&self, config: CheckerConfig) {
        *self.shared.config.write().expect("checker config lock") = config;
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.shared.workers.lock().expect("checker workers lock").len()
    }

    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.shared
            .workers
            .lock()
            .expect("checker workers lock")
            .iter()
            .filter(|w| w.busy)
            .count()
    }

    #[must_use]
    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.shared
            .workers
            .lock()
            .expect("checker workers lock")
            .iter()
            .map(Worker::status)
            .collect()
    }

    async fn send_request(&self, uri: &str, request: CheckerRequest) -> Result<CheckerResponse> {
        if self.shared.shutting_down.load(Ordering::SeqCst) {
            return Err(CheckerError::ShuttingDown);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut queue = self.shared.queue.lock().expect("checker queue lock");
            queue.push_back(PendingRequest {
                uri: uri.to_string(),
                request,
                reply: reply_tx,
            });
        }
        pump(&self.shared);
        reply_rx.await.unwrap_or(Err(CheckerError::WorkerExited))
    }

    /// Graceful stop: fail queued requests, ask each worker to exit, then
    /// escalate to kill after the grace and force intervals.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);

        for timer in self.timers.lock().expect("checker timers lock").drain(..) {
            timer.abort();
        }

        let drained: Vec<PendingRequest> = {
            let mut queue = self.shared.queue.lock().expect("checker queue lock");
            queue.drain(..).collect()
        };
        for pending in drained {
            let _ = pending.reply.send(Err(CheckerError::ShuttingDown));
        }

        let workers: Vec<Worker> = {
            let mut workers = self.shared.workers.lock().expect("checker workers lock");
            workers.drain(..).collect()
        };
        for mut worker in workers {
            // Fail anything still in flight on this worker.
            drop(worker.take_listener());

            let shutdown_line = serde_json::to_string(&CheckerRequest::shutdown())
                .expect("static request serializes");
            {
                let mut stdin = worker.stdin.lock().await;
                let _ = stdin.write_all(shutdown_line.as_bytes()).await;
                let _ = stdin.write_all(b"\n").await;
                let _ = stdin.flush().await;
            }

            let grace = self.shared.options.shutdown_grace;
            let force = self.shared.options.shutdown_force;
            if tokio::time::timeout(grace, worker.child.wait()).await.is_ok() {
                continue;
            }
            log::warn!("checker worker {} ignored shutdown; killing", worker.pid);
            let _ = worker.child.start_kill();
            if tokio::time::timeout(force, worker.child.wait()).await.is_err() {
                log::error!("checker worker {} survived kill", worker.pid);
            }
            worker.reader.abort();
            if let Some(drain) = worker.stderr_drain.take() {
                drain.abort();
            }
        }
        log::info!("checker pool shut down");
    }
}

fn into_result(response: CheckerResponse) -> Result<CheckerResponse> {
    match response.kind {
        CheckerResponseKind::Result => Ok(response),
        CheckerResponseKind::Error => Err(CheckerError::Analyzer(
            response.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
    }
}

/// Drains the queue onto idle workers. Assignments are claimed under the
/// locks and dispatched after they are released.
fn pump(shared: &Arc<PoolShared>) {
    let assignments = claim_assignments(shared);
    for assignment in assignments {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            dispatch(shared, assignment).await;
        });
    }
}

fn claim_assignments(shared: &Arc<PoolShared>) -> Vec<Assignment> {
    let mut out = Vec::new();
    let mut queue = shared.queue.lock().expect("checker queue lock");
    let mut workers = shared.workers.lock().expect("checker workers lock");
    while !queue.is_empty() {
        let Some(worker) = workers.iter_mut().find(|w| !w.busy) else {
            break;
        };
        let pending = queue.pop_front().expect("queue checked non-empty");
        worker.busy = true;
        worker.active_uri = Some(pending.uri.clone());
        worker.request_count += 1;
        out.push(Assignment {
            slot: worker.slot,
            stdin: Arc::clone(&worker.stdin),
            listener: Arc::clone(&worker.listener),
            pending,
        });
    }
    out
}

async fn dispatch(shared: Arc<PoolShared>, assignment: Assignment) {
    let Assignment {
        slot,
        stdin,
        listener,
        pending,
    } = assignment;

    let timeout_ms = {
        let config = shared.config.read().expect("checker config lock");
        config.file_timeout_ms
    };

    let line = match serde_json::to_string(&pending.request) {
        Ok(line) => line,
        Err(err) => {
            let _ = pending
                .reply
                .send(Err(CheckerError::Protocol(format!("encode failed: {err}"))));
            release(&shared, slot);
            return;
        }
    };

    let (response_tx, response_rx) = oneshot::channel();
    *listener.lock().expect("worker listener lock") = Some(response_tx);

    let write_result = {
        let mut stdin = stdin.lock().await;
        async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await
    };
    if let Err(err) = write_result {
        drop(listener.lock().expect("worker listener lock").take());
        let _ = pending.reply.send(Err(CheckerError::Io(err)));
        release(&shared, slot);
        return;
    }

    match tokio::time::timeout(Duration::from_millis(timeout_ms), response_rx).await {
        Ok(Ok(response)) => {
            let _ = pending.reply.send(Ok(response));
        }
        // The listener was dropped out from under us: the worker died.
        Ok(Err(_)) => {
            let _ = pending.reply.send(Err(CheckerError::WorkerExited));
        }
        Err(_) => {
            // Detach the listener so a late reply is discarded as idle
            // chatter. The worker is not killed: slow is not dead.
            drop(listener.lock().expect("worker listener lock").take());
            let _ = pending.reply.send(Err(CheckerError::Timeout(timeout_ms)));
        }
    }
    release(&shared, slot);
}

fn release(shared: &Arc<PoolShared>, slot: usize) {
    {
        let mut workers = shared.workers.lock().expect("checker workers lock");
        if let Some(worker) = workers.iter_mut().find(|w| w.slot == slot) {
            worker.busy = false;
            worker.active_uri = None;
        }
    }
    pump(shared);
}

fn spawn_exit_monitor(
    shared: Arc<PoolShared>,
    mut exit_rx: mpsc::UnboundedReceiver<usize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(slot) = exit_rx.recv().await {
            if shared.shutting_down.load(Ordering::SeqCst) {
                continue;
            }
            handle_worker_exit(&shared, slot);
        }
    })
}

fn handle_worker_exit(shared: &Arc<PoolShared>, slot: usize) {
    let removed = {
        let mut workers = shared.workers.lock().expect("checker workers lock");
        workers
            .iter()
            .position(|w| w.slot == slot)
            .map(|index| workers.remove(index))
    };
    let Some(worker) = removed else {
        return;
    };
    log::warn!(
        "checker worker {} (slot {slot}) exited; respawning",
        worker.pid
    );
    // Fails the in-flight request, if any, exactly once.
    drop(worker.take_listener());
    respawn(shared, slot);
}

/// Single-flight per slot: concurrent exit notifications for the same slot
/// produce at most one spawn.
fn respawn(shared: &Arc<PoolShared>, slot: usize) {
    {
        let mut respawning = shared.respawning.lock().expect("checker respawn lock");
        if !respawning.insert(slot) {
            return;
        }
    }
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let config = {
            let config = shared.config.read().expect("checker config lock");
            config.clone()
        };
        let spawned = spawn_worker(&config, slot, shared.exit_tx.clone());
        {
            let mut respawning = shared.respawning.lock().expect("checker respawn lock");
            respawning.remove(&slot);
        }
        match spawned {
            Ok(worker) => {
                log::info!("checker worker respawned in slot {slot} (pid {})", worker.pid);
                shared
                    .workers
                    .lock()
                    .expect("checker workers lock")
                    .push(worker);
                // Queued requests waiting out the respawn get re-dispatched.
                pump(&shared);
            }
            Err(err) => {
                // The liveness timer notices the hole and tries again.
                log::error!("failed to respawn checker worker in slot {slot}: {err}");
            }
        }
    });
}

fn spawn_health_timer(shared: Arc<PoolShared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.options.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if shared.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let idle_stdins: Vec<Arc<TokioMutex<ChildStdin>>> = {
                let now = now_ms();
                let mut workers = shared.workers.lock().expect("checker workers lock");
                workers
                    .iter_mut()
                    .filter(|w| !w.busy)
                    .map(|w| {
                        w.last_health_ms = now;
                        Arc::clone(&w.stdin)
                    })
                    .collect()
            };
            let line = serde_json::to_string(&CheckerRequest::health())
                .expect("static request serializes");
            for stdin in idle_stdins {
                let mut stdin = stdin.lock().await;
                let _ = stdin.write_all(line.as_bytes()).await;
                let _ = stdin.write_all(b"\n").await;
                let _ = stdin.flush().await;
                // The reply is ignored; the reader discards idle lines.
            }
        }
    })
}

fn spawn_liveness_timer(shared: Arc<PoolShared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.options.liveness_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if shared.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let mut dead = Vec::new();
            let missing_slots: Vec<usize> = {
                let mut workers = shared.workers.lock().expect("checker workers lock");
                for worker in workers.iter_mut() {
                    if let Ok(Some(status)) = worker.child.try_wait() {
                        log::warn!(
                            "checker worker {} found dead ({status}) by liveness check",
                            worker.pid
                        );
                        dead.push(worker.slot);
                    }
                }
                let present: HashSet<usize> = workers.iter().map(|w| w.slot).collect();
                let respawning = shared.respawning.lock().expect("checker respawn lock");
                (0..shared.options.pool_size.max(1))
                    .filter(|slot| !present.contains(slot) && !respawning.contains(slot))
                    .collect()
            };
            for slot in dead {
                handle_worker_exit(&shared, slot);
            }
            for slot in missing_slots {
                respawn(&shared, slot);
            }
        }
    })
}
