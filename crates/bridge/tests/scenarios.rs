//! End-to-end bridge scenarios against fake analyzer scripts: cache hits,
//! content changes, supersede, priority order, and partial failure.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use turbo_bridge::{AnalysisBridge, BridgeError, BridgeOptions};
use turbo_checker_pool::CheckerPoolOptions;
use turbo_linter_pool::LinterPoolOptions;
use turbo_protocol::{content_hash, Priority, TurboConfig};

fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

const CHECKER_TWO_DIAGS: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"shutdown"'*) exit 0 ;;
    *'"health"'*) printf '%s\n' '{"type":"result"}' ;;
    *) printf '%s\n' '{"type":"result","diagnostics":[{"line":1,"column":1,"message":"type mismatch","severity":"error"},{"line":4,"column":2,"message":"unused import","severity":"warning"}],"durationMs":2}' ;;
  esac
done"#;

const LINTER_ONE_FINDING: &str = r#"cat >/dev/null
printf '%s' '[{"message":"no console","severity":"warn","ruleId":"no-console","start":{"line":8,"column":3}}]'
exit 1"#;

fn test_options(max_concurrent: usize) -> BridgeOptions {
    BridgeOptions {
        max_concurrent,
        checker: CheckerPoolOptions {
            pool_size: 2,
            health_interval: Duration::from_secs(60),
            liveness_interval: Duration::from_secs(60),
            shutdown_grace: Duration::from_millis(200),
            shutdown_force: Duration::from_secs(2),
        },
        linter: LinterPoolOptions::default(),
        recent_results: 10,
    }
}

fn config_with(checker: Option<PathBuf>, linter: Option<PathBuf>) -> TurboConfig {
    let mut config = TurboConfig::default();
    match checker {
        Some(path) => config.checker.binary_path = Some(path),
        None => config.checker.enabled = false,
    }
    match linter {
        Some(path) => config.linter.binary_path = Some(path),
        None => config.linter.enabled = false,
    }
    config
}

#[tokio::test]
async fn analyze_merges_both_pools_and_hits_cache_on_repeat() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    let linter = script(&dir, "linter.sh", LINTER_ONE_FINDING);
    let bridge = AnalysisBridge::new(
        config_with(Some(checker), Some(linter)),
        test_options(4),
    );

    let first = bridge
        .analyze("file:///a.ts", "console.log(1)", false, Priority::Active)
        .await
        .unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.diagnostics.len(), 3);

    let second = bridge
        .analyze("file:///a.ts", "console.log(1)", false, Priority::Active)
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.diagnostics, first.diagnostics);
    assert_eq!(second.content_hash, content_hash(b"console.log(1)"));

    bridge.shutdown().await;
}

#[tokio::test]
async fn changed_content_misses_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    let bridge = AnalysisBridge::new(config_with(Some(checker), None), test_options(4));

    let first = bridge
        .analyze("file:///a.ts", "let x = 1;", false, Priority::Open)
        .await
        .unwrap();
    assert!(!first.from_cache);

    let second = bridge
        .analyze("file:///a.ts", "let x = 2;", false, Priority::Open)
        .await
        .unwrap();
    assert!(!second.from_cache);
    assert_eq!(second.content_hash, content_hash(b"let x = 2;"));

    // The cache now answers only for the new content.
    let third = bridge
        .analyze("file:///a.ts", "let x = 2;", false, Priority::Open)
        .await
        .unwrap();
    assert!(third.from_cache);

    bridge.shutdown().await;
}

#[tokio::test]
async fn force_bypasses_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    let bridge = AnalysisBridge::new(config_with(Some(checker), None), test_options(4));

    bridge
        .analyze("file:///a.ts", "x", false, Priority::Open)
        .await
        .unwrap();
    let forced = bridge
        .analyze("file:///a.ts", "x", true, Priority::Open)
        .await
        .unwrap();
    assert!(!forced.from_cache);

    bridge.shutdown().await;
}

const SLOW_CHECKER: &str = r#"while IFS= read -r line; do
  case "$line" in
    *'"shutdown"'*) exit 0 ;;
    *) sleep 1; printf '%s\n' '{"type":"result","diagnostics":[]}' ;;
  esac
done"#;

#[tokio::test]
async fn queued_duplicate_is_superseded() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", SLOW_CHECKER);
    let bridge = Arc::new(AnalysisBridge::new(
        config_with(Some(checker), None),
        test_options(1),
    ));

    // Occupy the single slot so the next requests stay queued.
    let blocker = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            bridge
                .analyze("file:///blocker.ts", "b", false, Priority::Active)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let old = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            bridge
                .analyze("file:///u.ts", "old content", false, Priority::Open)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let new = bridge
        .analyze("file:///u.ts", "new content", false, Priority::Active)
        .await
        .unwrap();
    assert_eq!(new.content_hash, content_hash(b"new content"));

    let old = old.await.unwrap();
    assert!(matches!(old, Err(BridgeError::Superseded)));
    assert!(blocker.await.unwrap().is_ok());

    bridge.shutdown().await;
}

#[tokio::test]
async fn higher_priority_dispatches_first_from_a_full_queue() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", SLOW_CHECKER);
    let bridge = Arc::new(AnalysisBridge::new(
        config_with(Some(checker), None),
        test_options(1),
    ));
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let blocker = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            bridge
                .analyze("file:///blocker.ts", "b", false, Priority::Active)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let background = {
        let bridge = Arc::clone(&bridge);
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            let result = bridge
                .analyze("file:///bg.ts", "bg", false, Priority::Background)
                .await;
            order.lock().unwrap().push("background");
            result
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let active = {
        let bridge = Arc::clone(&bridge);
        let order = Arc::clone(&order);
        tokio::spawn(async move {
            let result = bridge
                .analyze("file:///active.ts", "a", false, Priority::Active)
                .await;
            order.lock().unwrap().push("active");
            result
        })
    };

    assert!(blocker.await.unwrap().is_ok());
    assert!(background.await.unwrap().is_ok());
    assert!(active.await.unwrap().is_ok());
    // Enqueued later, dispatched first.
    assert_eq!(*order.lock().unwrap(), vec!["active", "background"]);

    bridge.shutdown().await;
}

#[tokio::test]
async fn linter_only_findings_flow_with_nonzero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let linter = script(&dir, "linter.sh", LINTER_ONE_FINDING);
    let bridge = AnalysisBridge::new(config_with(None, Some(linter)), test_options(4));

    let result = bridge
        .analyze("file:///a.ts", "console.log(1)", false, Priority::Active)
        .await
        .unwrap();
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].code.as_deref(), Some("no-console"));

    bridge.shutdown().await;
}

#[tokio::test]
async fn failing_linter_does_not_suppress_checker_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    // Exit 2 with empty stdout: a hard linter failure.
    let linter = script(&dir, "linter.sh", "cat >/dev/null\nexit 2");
    let bridge = AnalysisBridge::new(
        config_with(Some(checker), Some(linter)),
        test_options(4),
    );

    let result = bridge
        .analyze("file:///a.ts", "x", false, Priority::Active)
        .await
        .unwrap();
    assert_eq!(result.diagnostics.len(), 2);

    bridge.shutdown().await;
}

#[tokio::test]
async fn dead_checker_still_resolves_the_caller() {
    let dir = tempfile::tempdir().unwrap();
    // Dies on the first request without replying.
    let checker = script(&dir, "checker.sh", "IFS= read -r line\nexit 7");
    let bridge = AnalysisBridge::new(config_with(Some(checker), None), test_options(4));

    let result = bridge
        .analyze("file:///a.ts", "x", false, Priority::Active)
        .await
        .unwrap();
    assert!(result.diagnostics.is_empty());

    bridge.shutdown().await;
}

#[tokio::test]
async fn clear_cache_resets_stats_to_zero() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    let bridge = AnalysisBridge::new(config_with(Some(checker), None), test_options(4));

    bridge
        .analyze("file:///a.ts", "x", false, Priority::Open)
        .await
        .unwrap();
    bridge
        .analyze("file:///a.ts", "x", false, Priority::Open)
        .await
        .unwrap();
    let stats = bridge.cache_stats();
    assert_eq!(stats.results.entries, 1);
    assert!(stats.results.hits >= 1);

    bridge.clear_cache();
    let stats = bridge.cache_stats();
    assert_eq!(stats.results.entries, 0);
    assert_eq!(stats.results.total_bytes, 0);
    assert_eq!(stats.results.hits, 0);
    assert_eq!(stats.results.misses, 0);
    assert_eq!(stats.results.evictions, 0);
    assert_eq!(stats.types.entries, 0);

    bridge.shutdown().await;
}

#[tokio::test]
async fn reapplying_the_current_config_keeps_cached_results() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    let bridge = AnalysisBridge::new(config_with(Some(checker), None), test_options(4));

    bridge
        .analyze("file:///a.ts", "x", false, Priority::Open)
        .await
        .unwrap();
    bridge.update_config(bridge.config());
    let result = bridge
        .analyze("file:///a.ts", "x", false, Priority::Open)
        .await
        .unwrap();
    assert!(result.from_cache);

    bridge.shutdown().await;
}

#[tokio::test]
async fn shutdown_fails_new_requests() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    let bridge = AnalysisBridge::new(config_with(Some(checker), None), test_options(4));
    bridge.shutdown().await;

    let err = bridge
        .analyze("file:///a.ts", "x", false, Priority::Active)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ShuttingDown));
}

#[tokio::test]
async fn recent_diagnostics_and_traces_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let checker = script(&dir, "checker.sh", CHECKER_TWO_DIAGS);
    let bridge = AnalysisBridge::new(config_with(Some(checker), None), test_options(4));

    bridge
        .analyze("file:///a.ts", "x", false, Priority::Open)
        .await
        .unwrap();

    let recent = bridge.recent_diagnostics(10);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].uri, "file:///a.ts");
    assert_eq!(recent[0].diagnostics, 2);
    assert_eq!(recent[0].errors, 1);

    let traces = bridge.recent_traces(10);
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].name, "analyzeFile");
    assert_eq!(traces[0].children.len(), 1);
    assert_eq!(traces[0].children[0].name, "checker.analyze");

    bridge.shutdown().await;
}
