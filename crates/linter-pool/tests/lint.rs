//! Integration tests against fake linter scripts: exit-code policy,
//! timeout kill, and shutdown behavior.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use turbo_linter_pool::{LinterError, LinterPool, LinterPoolOptions};
use turbo_protocol::config::LinterConfig;
use turbo_protocol::{DiagnosticSource, Severity};

fn fake_linter(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("fake-linter.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn pool_for(binary: PathBuf) -> LinterPool {
    let config = LinterConfig {
        binary_path: Some(binary),
        file_timeout_ms: 2000,
        ..LinterConfig::default()
    };
    LinterPool::new(config, LinterPoolOptions::default())
}

const TWO_FINDINGS: &str = r#"cat >/dev/null
printf '%s' '[{"message":"unused variable","severity":"warn","ruleId":"no-unused-vars","start":{"line":2,"column":5}},{"message":"eval is banned","severity":"deny","ruleId":"no-eval","start":{"line":9,"column":1},"fix":{"edits":[{"span":{"start":120,"end":135},"content":""}],"message":"remove eval"}}]'
exit 1"#;

#[tokio::test]
async fn nonzero_exit_with_findings_is_success() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_for(fake_linter(&dir, TWO_FINDINGS));

    let diags = pool.lint("file:///src/a.ts", "eval('x')").await.unwrap();
    assert_eq!(diags.len(), 2);
    assert_eq!(diags[0].severity, Severity::Warning);
    assert_eq!(diags[1].severity, Severity::Error);
    assert_eq!(diags[1].code.as_deref(), Some("no-eval"));
    assert!(diags.iter().all(|d| d.source == DiagnosticSource::Linter));
    // The fix payload survives under the attachment.
    let attachment = diags[1].attachment.as_ref().unwrap();
    assert_eq!(attachment["fix"]["edits"][0]["span"]["start"], 120);
}

#[tokio::test]
async fn clean_run_yields_no_findings() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_for(fake_linter(&dir, "cat >/dev/null\nprintf '%s' '[]'\nexit 0"));
    let diags = pool.lint("file:///src/clean.ts", "const x = 1;").await.unwrap();
    assert!(diags.is_empty());
}

#[tokio::test]
async fn high_exit_code_with_empty_stdout_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_for(fake_linter(
        &dir,
        "cat >/dev/null\necho 'config not found' >&2\nexit 2",
    ));
    let err = pool.lint("file:///src/a.ts", "x").await.unwrap_err();
    match err {
        LinterError::Failed { code, stderr } => {
            assert_eq!(code, 2);
            assert!(stderr.contains("config not found"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn high_exit_code_with_stdout_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"cat >/dev/null
printf '%s' '[{"message":"partial result","severity":"warn","start":{"line":1,"column":1}}]'
exit 3"#;
    let pool = pool_for(fake_linter(&dir, body));
    let diags = pool.lint("file:///src/a.ts", "x").await.unwrap();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "partial result");
}

#[tokio::test]
async fn timeout_kills_the_child() {
    let dir = tempfile::tempdir().unwrap();
    let binary = fake_linter(&dir, "sleep 30");
    let config = LinterConfig {
        binary_path: Some(binary),
        file_timeout_ms: 200,
        ..LinterConfig::default()
    };
    let pool = LinterPool::new(config, LinterPoolOptions::default());

    let started = std::time::Instant::now();
    let err = pool.lint("file:///src/slow.ts", "x").await.unwrap_err();
    assert!(matches!(err, LinterError::Timeout(200)));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert_eq!(pool.running_count(), 0);
}

#[tokio::test]
async fn shutdown_fails_new_requests() {
    let dir = tempfile::tempdir().unwrap();
    let pool = pool_for(fake_linter(&dir, "cat >/dev/null\nprintf '[]'"));
    pool.shutdown();
    let err = pool.lint("file:///src/a.ts", "x").await.unwrap_err();
    assert!(matches!(err, LinterError::ShuttingDown));
}
