//! Ephemeral linter pool: every request spawns a fresh child, pipes the
//! content on stdin, and collects JSON findings on stdout. Concurrency is
//! bounded by a semaphore; waiting requests time out like running ones.

use crate::error::{LinterError, Result};
use crate::output::parse_stdout;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{watch, Semaphore};
use turbo_protocol::config::LinterConfig;
use turbo_protocol::Diagnostic;

#[derive(Debug, Clone, Copy)]
pub struct LinterPoolOptions {
    pub max_concurrent: usize,
}

impl Default for LinterPoolOptions {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

struct LinterInner {
    config: RwLock<LinterConfig>,
    semaphore: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicUsize,
}

pub struct LinterPool {
    inner: Arc<LinterInner>,
}

impl LinterPool {
    #[must_use]
    pub fn new(config: LinterConfig, options: LinterPoolOptions) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(LinterInner {
                config: RwLock::new(config),
                semaphore: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
                shutdown_tx,
                running: AtomicUsize::new(0),
            }),
        }
    }

    /// Lints one file. Exit codes 0 and 1 are both success; stdout is the
    /// source of truth for findings.
    pub async fn lint(&self, uri: &str, content: &str) -> Result<Vec<Diagnostic>> {
        if *self.inner.shutdown_tx.borrow() {
            return Err(LinterError::ShuttingDown);
        }
        let (timeout_ms, config) = {
            let config = self.inner.config.read().expect("linter config lock");
            (config.file_timeout_ms, config.clone())
        };

        // Queued requests wait under the same budget as running ones.
        let permit = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            Arc::clone(&self.inner.semaphore).acquire_owned(),
        )
        .await
        {
            Err(_) => return Err(LinterError::QueueTimeout(timeout_ms)),
            Ok(Err(_)) => return Err(LinterError::ShuttingDown),
            Ok(Ok(permit)) => permit,
        };

        self.inner.running.fetch_add(1, Ordering::SeqCst);
        let result = self
            .run_once(&config, uri, content, timeout_ms)
            .await;
        self.inner.running.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        result
    }

    async fn run_once(
        &self,
        config: &LinterConfig,
        uri: &str,
        content: &str,
        timeout_ms: u64,
    ) -> Result<Vec<Diagnostic>> {
        let file = file_path_of(uri);
        let argv = build_argv(config, &file);

        let mut command = Command::new(config.binary());
        command
            .args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child (timeout, shutdown) kills it.
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| LinterError::Spawn(format!("{}: {e}", config.binary().display())))?;

        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| LinterError::Spawn("child stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| LinterError::Spawn("child stderr not captured".to_string()))?;

        let content = content.as_bytes().to_vec();
        let io_fut = async move {
            let mut out = Vec::new();
            let mut err = Vec::new();
            tokio::join!(
                async {
                    if let Some(mut stdin) = stdin {
                        let _ = stdin.write_all(&content).await;
                        let _ = stdin.shutdown().await;
                    }
                },
                async {
                    let _ = stdout.read_to_end(&mut out).await;
                },
                async {
                    let _ = stderr.read_to_end(&mut err).await;
                },
            );
            let status = child.wait().await;
            (status, out, err)
        };

        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let (status, stdout, stderr) = tokio::select! {
            io = io_fut => io,
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                return Err(LinterError::Timeout(timeout_ms));
            }
            _ = shutdown_rx.changed() => {
                return Err(LinterError::ShuttingDown);
            }
        };

        let status = status?;
        let code = status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&stdout);
        // 0 = clean, 1 = findings. Higher codes with output are tolerated;
        // higher codes with nothing to parse are failures.
        if code > 1 && stdout.trim().is_empty() {
            return Err(LinterError::Failed {
                code,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        if code > 1 {
            log::warn!("linter exited {code} for {uri} but produced output; parsing it");
        }
        parse_stdout(&stdout, &file)
    }

    /// Applies to new requests; running children are unaffected.
    pub fn update_config(&self, config: LinterConfig) {
        *self.inner.config.write().expect("linter config lock") = config;
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Kills running children and fails everything queued.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.semaphore.close();
        log::info!("linter pool shut down");
    }
}

fn file_path_of(uri: &str) -> String {
    uri.strip_prefix("file://").unwrap_or(uri).to_string()
}

/// Argv for one lint run: format + stdin filename, optional config path,
/// rule overrides, then `-` for stdin content.
fn build_argv(config: &LinterConfig, file: &str) -> Vec<String> {
    let mut argv = vec![
        "--format=json".to_string(),
        format!("--stdin-filename={file}"),
    ];
    if let Some(path) = &config.config_path {
        argv.push(format!("--config={}", path.display()));
    }
    for (rule, override_) in &config.rules {
        argv.push(override_.as_flag().to_string());
        argv.push(rule.clone());
    }
    argv.push("-".to_string());
    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use turbo_protocol::config::RuleOverride;

    #[test]
    fn argv_carries_format_filename_and_stdin_marker() {
        let config = LinterConfig::default();
        let argv = build_argv(&config, "src/a.ts");
        assert_eq!(argv[0], "--format=json");
        assert_eq!(argv[1], "--stdin-filename=src/a.ts");
        assert_eq!(argv.last().unwrap(), "-");
    }

    #[test]
    fn argv_appends_config_and_rule_overrides() {
        let mut config = LinterConfig {
            config_path: Some(std::path::PathBuf::from(".oxlintrc.json")),
            ..LinterConfig::default()
        };
        config.rules.insert("no-eval".to_string(), RuleOverride::Deny);
        config
            .rules
            .insert("no-console".to_string(), RuleOverride::Warn);
        config
            .rules
            .insert("no-debugger".to_string(), RuleOverride::Disable);
        let argv = build_argv(&config, "a.ts");
        assert!(argv.contains(&"--config=.oxlintrc.json".to_string()));
        let joined = argv.join(" ");
        assert!(joined.contains("--deny no-eval"));
        assert!(joined.contains("--warn no-console"));
        assert!(joined.contains("--disable no-debugger"));
        assert_eq!(argv.last().unwrap(), "-");
    }

    #[test]
    fn uri_scheme_is_stripped_for_stdin_filename() {
        assert_eq!(file_path_of("file:///work/a.ts"), "/work/a.ts");
        assert_eq!(file_path_of("a.ts"), "a.ts");
    }
}
