//! One persistent checker child process: spawn, stdout line routing, and
//! the single-listener dispatch slot.

use crate::error::{CheckerError, Result};
use crate::line_buffer::LineBuffer;
use serde::Serialize;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use turbo_protocol::config::CheckerConfig;
use turbo_protocol::wire::CheckerResponse;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// The listener slot: exactly one in-flight request per worker. The reader
/// task takes the sender when a complete response parses; the timeout path
/// takes it to detach; worker-exit handling takes it to fail the request.
pub(crate) type Listener = Arc<Mutex<Option<oneshot::Sender<CheckerResponse>>>>;

/// Inspector-facing snapshot of one pool worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    pub pid: u32,
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_uri: Option<String>,
    pub started_at_ms: u64,
    pub request_count: u64,
    pub last_health_ms: u64,
}

pub(crate) struct Worker {
    pub slot: usize,
    pub pid: u32,
    pub child: Child,
    pub stdin: Arc<TokioMutex<ChildStdin>>,
    pub listener: Listener,
    pub busy: bool,
    pub active_uri: Option<String>,
    pub started_at_ms: u64,
    pub request_count: u64,
    pub last_health_ms: u64,
    pub reader: JoinHandle<()>,
    pub stderr_drain: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            pid: self.pid,
            busy: self.busy,
            active_uri: self.active_uri.clone(),
            started_at_ms: self.started_at_ms,
            request_count: self.request_count,
            last_health_ms: self.last_health_ms,
        }
    }

    /// Takes the in-flight listener, if any. Dropping the returned sender
    /// fails the matching request exactly once.
    pub fn take_listener(&self) -> Option<oneshot::Sender<CheckerResponse>> {
        self.listener.lock().expect("worker listener lock").take()
    }
}

/// Spawns one worker. `exit_tx` fires with the slot once the child's
/// stdout reaches EOF, i.e. the process is gone.
pub(crate) fn spawn_worker(
    config: &CheckerConfig,
    slot: usize,
    exit_tx: mpsc::UnboundedSender<usize>,
) -> Result<Worker> {
    let mut command = Command::new(config.binary());
    command
        .arg("--lsp-stdio")
        .args(&config.flags)
        .env(
            "NODE_OPTIONS",
            format!("--max-old-space-size={}", config.max_memory_mb),
        )
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| CheckerError::Spawn(format!("{}: {e}", config.binary().display())))?;
    let pid = child
        .id()
        .ok_or_else(|| CheckerError::Spawn("child exited before it was tracked".to_string()))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| CheckerError::Spawn("child stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CheckerError::Spawn("child stdout not captured".to_string()))?;
    let stderr = child.stderr.take();

    let listener: Listener = Arc::new(Mutex::new(None));
    let reader = spawn_reader(slot, pid, stdout, Arc::clone(&listener), exit_tx);
    let stderr_drain = stderr.map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("checker[{pid}] stderr: {line}");
            }
        })
    });

    let now = now_ms();
    Ok(Worker {
        slot,
        pid,
        child,
        stdin: Arc::new(TokioMutex::new(stdin)),
        listener,
        busy: false,
        active_uri: None,
        started_at_ms: now,
        request_count: 0,
        last_health_ms: now,
        reader,
        stderr_drain,
    })
}

fn spawn_reader(
    slot: usize,
    pid: u32,
    stdout: tokio::process::ChildStdout,
    listener: Listener,
    exit_tx: mpsc::UnboundedSender<usize>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = stdout;
        let mut buffer = LineBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for line in buffer.extend(&chunk[..n]) {
                        route_line(pid, &listener, &line);
                    }
                }
            }
        }
        log::debug!("checker[{pid}] stdout closed");
        let _ = exit_tx.send(slot);
    })
}

fn route_line(pid: u32, listener: &Listener, line: &str) {
    let response: CheckerResponse = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(err) => {
            log::debug!("checker[{pid}] discarding unparseable line: {err}");
            return;
        }
    };
    let sender = listener.lock().expect("worker listener lock").take();
    match sender {
        Some(sender) => {
            let _ = sender.send(response);
        }
        // No request in flight: health replies and stray chatter land here.
        None => log::trace!("checker[{pid}] discarding response while idle"),
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
