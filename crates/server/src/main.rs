//! `turbod` - the language-analysis coordinator daemon.
//!
//! Commands arrive as newline-delimited JSON on stdin; responses and
//! notifications leave the same way on stdout. The editor-facing LSP
//! framing lives in the client; this loop is the coordinator surface.

mod inspector;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use status::{derive_status, ServerStatus};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use turbo_bridge::{AnalysisBridge, BridgeOptions};
use turbo_logging::logger::{DEFAULT_FLUSH_INTERVAL, DEFAULT_RING_CAPACITY};
use turbo_logging::{FileSink, StructuredLogger};
use turbo_protocol::{Priority, TurboConfig, TypeExpansionInfo};
use turbo_trace::{ExpansionGuard, ExpansionObserver, SlowSpanObserver, SpanSnapshot};

#[derive(Parser, Debug)]
#[command(name = "turbod", version, about = "Language-analysis coordinator")]
struct Args {
    /// Path to a TOML settings file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    id: u64,
    cmd: Command,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Command {
    AnalyzeFile,
    InspectorData,
    ClearCache,
    ReloadConfig,
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeParams {
    uri: String,
    content: String,
    #[serde(default)]
    force: bool,
    priority: Option<Priority>,
}

/// Writes one JSON line to stdout. Responses and notifications share the
/// same lock so lines never interleave.
fn emit_line(value: &serde_json::Value) {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    if writeln!(lock, "{value}").is_ok() {
        let _ = lock.flush();
    }
}

fn emit_response(id: u64, result: std::result::Result<serde_json::Value, String>) {
    let line = match result {
        Ok(value) => serde_json::json!({"id": id, "ok": true, "result": value}),
        Err(message) => serde_json::json!({"id": id, "ok": false, "error": message}),
    };
    emit_line(&line);
}

fn emit_notification(event: &str, payload: serde_json::Value) {
    emit_line(&serde_json::json!({"event": event, "payload": payload}));
}

struct ExpansionNotifier;

impl ExpansionObserver for ExpansionNotifier {
    fn on_truncation(&self, info: &TypeExpansionInfo) {
        emit_notification(
            "expansion-warning",
            serde_json::json!({
                "info": info,
                "suggestion": ExpansionGuard::format_report(info),
            }),
        );
    }
}

struct SlowSpanNotifier;

impl SlowSpanObserver for SlowSpanNotifier {
    fn on_slow_span(&self, span: &SpanSnapshot) {
        emit_notification("perf-trace", serde_json::json!(span));
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<TurboConfig> {
    let Some(path) = path else {
        return Ok(TurboConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
}

fn emit_status(bridge: &AnalysisBridge) {
    let status = derive_status(&bridge.status());
    emit_notification("server-status", serde_json::json!({"state": status}));
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    emit_notification(
        "server-status",
        serde_json::json!({"state": ServerStatus::Starting}),
    );

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            emit_notification(
                "server-status",
                serde_json::json!({"state": ServerStatus::Error, "detail": err.to_string()}),
            );
            return Err(err);
        }
    };

    let logger = StructuredLogger::new("turbod", DEFAULT_RING_CAPACITY, config.logging.level);
    if let Some(path) = &config.logging.file {
        let sink = FileSink::new(
            path.clone(),
            config.logging.max_file_size_mb * 1024 * 1024,
            config.logging.pretty_print,
        )
        .with_context(|| format!("failed to open log file {}", path.display()))?;
        logger.set_file_sink(Some(sink));
    }
    logger.set_flush_callback(Box::new(|batch| {
        for entry in batch {
            emit_notification("log-entry", serde_json::json!(entry));
        }
    }));
    let _flusher = logger.start_flusher(DEFAULT_FLUSH_INTERVAL);

    let bridge = Arc::new(AnalysisBridge::new(config, BridgeOptions::default()));
    bridge.set_expansion_observer(Arc::new(ExpansionNotifier));
    bridge.set_slow_span_observer(Arc::new(SlowSpanNotifier));
    emit_status(&bridge);
    logger.info("turbod ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("discarding unparseable command line: {err}");
                continue;
            }
        };
        match request.cmd {
            Command::AnalyzeFile => {
                let params: AnalyzeParams = match serde_json::from_value(request.params) {
                    Ok(params) => params,
                    Err(err) => {
                        emit_response(request.id, Err(format!("bad analyze params: {err}")));
                        continue;
                    }
                };
                let bridge = Arc::clone(&bridge);
                tokio::spawn(async move {
                    let outcome = bridge
                        .analyze(
                            &params.uri,
                            &params.content,
                            params.force,
                            params.priority.unwrap_or(Priority::Open),
                        )
                        .await;
                    match outcome {
                        Ok(result) => {
                            emit_response(request.id, Ok(serde_json::json!(result)));
                        }
                        Err(err) => emit_response(request.id, Err(err.to_string())),
                    }
                    emit_notification(
                        "cache-stats",
                        serde_json::json!(bridge.cache_stats()),
                    );
                    emit_status(&bridge);
                });
            }
            Command::InspectorData => {
                let data = inspector::collect(&bridge, &logger);
                emit_response(request.id, Ok(serde_json::json!(data)));
            }
            Command::ClearCache => {
                bridge.clear_cache();
                emit_response(request.id, Ok(serde_json::json!(bridge.cache_stats())));
            }
            Command::ReloadConfig => {
                let new_config: TurboConfig = match serde_json::from_value(request.params) {
                    Ok(config) => config,
                    Err(err) => {
                        emit_response(request.id, Err(format!("bad config: {err}")));
                        continue;
                    }
                };
                logger.set_level(new_config.logging.level);
                bridge.update_config(new_config);
                emit_response(request.id, Ok(serde_json::json!({"reloaded": true})));
                emit_status(&bridge);
            }
            Command::Shutdown => {
                bridge.shutdown().await;
                logger.flush();
                emit_response(request.id, Ok(serde_json::json!({"stopped": true})));
                return Ok(());
            }
        }
    }

    // EOF from the client: stop cleanly.
    bridge.shutdown().await;
    logger.flush();
    Ok(())
}
