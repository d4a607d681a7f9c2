//! Pool integration tests against fake checker binaries (small shell
//! scripts), covering dispatch, timeout, and worker-death respawn.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use turbo_checker_pool::{CheckerError, CheckerPool, CheckerPoolOptions};
use turbo_protocol::config::CheckerConfig;
use turbo_protocol::{DiagnosticSource, Severity};

fn fake_checker(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("fake-checker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

const ECHO_WORKER: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"shutdown"'*) exit 0 ;;
    *'"health"'*) printf '%s\n' '{"type":"result"}' ;;
    *) printf '%s\n' '{"type":"result","uri":"file:///a.ts","diagnostics":[{"line":1,"column":1,"message":"boom","severity":"error"}],"durationMs":1}' ;;
  esac
done"#;

fn config_for(binary: PathBuf) -> CheckerConfig {
    CheckerConfig {
        binary_path: Some(binary),
        ..CheckerConfig::default()
    }
}

fn quiet_options(pool_size: usize) -> CheckerPoolOptions {
    CheckerPoolOptions {
        pool_size,
        health_interval: Duration::from_secs(60),
        liveness_interval: Duration::from_secs(60),
        shutdown_grace: Duration::from_millis(200),
        shutdown_force: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn analyze_round_trips_one_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_checker(&dir, ECHO_WORKER);
    let pool = CheckerPool::start(config_for(binary), quiet_options(2)).unwrap();

    let analysis = pool.analyze("file:///a.ts", "let x: number = 'oops';").await.unwrap();
    assert!(!analysis.result.from_cache);
    assert_eq!(analysis.result.diagnostics.len(), 1);
    let diag = &analysis.result.diagnostics[0];
    assert_eq!(diag.message, "boom");
    assert_eq!(diag.severity, Severity::Error);
    assert_eq!(diag.source, DiagnosticSource::Checker);

    pool.shutdown().await;
}

#[tokio::test]
async fn single_worker_serves_concurrent_requests_in_turn() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_checker(&dir, ECHO_WORKER);
    let pool = CheckerPool::start(config_for(binary), quiet_options(1)).unwrap();

    let (a, b) = tokio::join!(
        pool.analyze("file:///a.ts", "a"),
        pool.analyze("file:///b.ts", "b"),
    );
    assert_eq!(a.unwrap().result.diagnostics.len(), 1);
    assert_eq!(b.unwrap().result.diagnostics.len(), 1);
    assert_eq!(pool.busy_count(), 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn timeout_fails_the_request_but_keeps_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    // Consumes stdin forever and never answers: slow, not dead.
    let binary = fake_checker(&dir, "cat >/dev/null");
    let mut config = config_for(binary);
    config.file_timeout_ms = 200;
    let pool = CheckerPool::start(config, quiet_options(1)).unwrap();

    let err = pool.analyze("file:///slow.ts", "x").await.unwrap_err();
    assert!(matches!(err, CheckerError::Timeout(200)));

    // The worker was not killed and is idle again.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.worker_count(), 1);
    assert_eq!(pool.busy_count(), 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn worker_death_fails_in_flight_and_respawns() {
    let dir = tempfile::tempdir().unwrap();
    // Reads exactly one request, then dies without replying.
    let binary = fake_checker(&dir, "IFS= read -r line\nexit 7");
    let pool = CheckerPool::start(config_for(binary), quiet_options(1)).unwrap();

    let err = pool.analyze("file:///dead.ts", "x").await.unwrap_err();
    assert!(matches!(err, CheckerError::WorkerExited));

    // The exit monitor replaces the worker without waiting for the
    // liveness timer.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(pool.worker_count(), 1);
    assert_eq!(pool.busy_count(), 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_fails_new_requests() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_checker(&dir, ECHO_WORKER);
    let pool = CheckerPool::start(config_for(binary), quiet_options(1)).unwrap();
    pool.shutdown().await;

    let err = pool.analyze("file:///late.ts", "x").await.unwrap_err();
    assert!(matches!(err, CheckerError::ShuttingDown));
}
