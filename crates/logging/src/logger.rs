//! Structured log core: a process-local ring plus a batched flusher. The
//! flush callback owns delivery (editor notification, stderr, …); an
//! optional file sink persists batches with rotation.

use crate::ring::RingBuffer;
use crate::sink::FileSink;
use serde::Serialize;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use turbo_protocol::config::LogLevel;

pub const DEFAULT_RING_CAPACITY: usize = 2000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<u64>,
}

impl LogEntry {
    #[must_use]
    pub fn format_pretty(&self) -> String {
        let mut line = format!(
            "[{}] {:5} {}: {}",
            self.timestamp_ms,
            level_label(self.level),
            self.source,
            self.message
        );
        if !self.context.is_empty() {
            line.push(' ');
            line.push_str(
                &serde_json::to_string(&self.context).unwrap_or_else(|_| "{}".to_string()),
            );
        }
        line
    }
}

fn level_label(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "TRACE",
        LogLevel::Debug => "DEBUG",
        LogLevel::Info => "INFO",
        LogLevel::Warn => "WARN",
        LogLevel::Error => "ERROR",
        LogLevel::Fatal => "FATAL",
    }
}

type FlushCallback = Box<dyn Fn(&[LogEntry]) + Send + Sync>;

struct LoggerInner {
    ring: Mutex<RingBuffer<LogEntry>>,
    batch: Mutex<Vec<LogEntry>>,
    level: Mutex<LogLevel>,
    callback: Mutex<Option<FlushCallback>>,
    file: Mutex<Option<FileSink>>,
}

/// Cloneable logger handle. Child loggers share the ring and flusher of
/// their parent and add their own static context to every entry.
#[derive(Clone)]
pub struct StructuredLogger {
    inner: Arc<LoggerInner>,
    source: String,
    context: serde_json::Map<String, serde_json::Value>,
}

impl StructuredLogger {
    #[must_use]
    pub fn new(source: &str, ring_capacity: usize, level: LogLevel) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                ring: Mutex::new(RingBuffer::new(ring_capacity)),
                batch: Mutex::new(Vec::new()),
                level: Mutex::new(level),
                callback: Mutex::new(None),
                file: Mutex::new(None),
            }),
            source: source.to_string(),
            context: serde_json::Map::new(),
        }
    }

    /// A child sharing the ring and flusher, with `context` merged into
    /// each entry it emits.
    #[must_use]
    pub fn child(
        &self,
        source: &str,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let mut merged = self.context.clone();
        merged.extend(context);
        Self {
            inner: Arc::clone(&self.inner),
            source: source.to_string(),
            context: merged,
        }
    }

    pub fn set_level(&self, level: LogLevel) {
        *self.inner.level.lock().expect("logger level lock") = level;
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        *self.inner.level.lock().expect("logger level lock")
    }

    pub fn set_flush_callback(&self, callback: FlushCallback) {
        *self.inner.callback.lock().expect("logger callback lock") = Some(callback);
    }

    pub fn set_file_sink(&self, sink: Option<FileSink>) {
        *self.inner.file.lock().expect("logger file lock") = sink;
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.log_with(level, message, serde_json::Map::new(), None);
    }

    pub fn log_with(
        &self,
        level: LogLevel,
        message: &str,
        context: serde_json::Map<String, serde_json::Value>,
        span_id: Option<u64>,
    ) {
        if level < self.level() {
            return;
        }
        let mut merged = self.context.clone();
        merged.extend(context);
        let entry = LogEntry {
            timestamp_ms: now_ms(),
            level,
            message: message.to_string(),
            context: merged,
            source: self.source.clone(),
            span_id,
        };
        self.inner
            .ring
            .lock()
            .expect("logger ring lock")
            .push(entry.clone());
        self.inner
            .batch
            .lock()
            .expect("logger batch lock")
            .push(entry);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: &str) {
        self.log(LogLevel::Fatal, message);
    }

    /// Delivers the pending batch to the flush callback and file sink.
    pub fn flush(&self) {
        let batch: Vec<LogEntry> = {
            let mut pending = self.inner.batch.lock().expect("logger batch lock");
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return;
        }
        if let Some(callback) = &*self.inner.callback.lock().expect("logger callback lock") {
            callback(&batch);
        }
        if let Some(sink) = &mut *self.inner.file.lock().expect("logger file lock") {
            if let Err(err) = sink.write_batch(&batch) {
                log::warn!("log file sink write failed: {err}");
            }
        }
    }

    /// Spawns the periodic flusher. The task exits once every logger
    /// handle is dropped.
    pub fn start_flusher(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<LoggerInner> = Arc::downgrade(&self.inner);
        let source = self.source.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let handle = StructuredLogger {
                    inner,
                    source: source.clone(),
                    context: serde_json::Map::new(),
                };
                handle.flush();
            }
        })
    }

    /// Newest-first snapshot from the ring; never consumes.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.inner.ring.lock().expect("logger ring lock").recent(limit)
    }

    #[must_use]
    pub fn ring_len(&self) -> usize {
        self.inner.ring.lock().expect("logger ring lock").len()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
