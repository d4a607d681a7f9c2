//! The settings surface hot-applied through `update_config`.
//!
//! Every level defaults so a partial TOML file (or an empty one) yields a
//! working configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct TurboConfig {
    pub checker: CheckerConfig,
    pub linter: LinterConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub watch: WatchConfig,
    pub inspector: InspectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckerConfig {
    pub enabled: bool,
    /// Override for the checker executable; defaults to `tsgo` on PATH.
    pub binary_path: Option<PathBuf>,
    pub max_type_depth: u32,
    pub file_timeout_ms: u64,
    /// Forwarded to the child as a heap hint
    /// (`NODE_OPTIONS=--max-old-space-size=<MB>`).
    pub max_memory_mb: u64,
    pub flags: Vec<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_path: None,
            max_type_depth: 30,
            file_timeout_ms: 30_000,
            max_memory_mb: 3072,
            flags: Vec::new(),
        }
    }
}

impl CheckerConfig {
    #[must_use]
    pub fn binary(&self) -> PathBuf {
        self.binary_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("tsgo"))
    }
}

/// Per-rule severity override passed to the linter as
/// `--disable` / `--warn` / `--deny`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleOverride {
    Disable,
    Warn,
    Deny,
}

impl RuleOverride {
    #[must_use]
    pub fn as_flag(self) -> &'static str {
        match self {
            Self::Disable => "--disable",
            Self::Warn => "--warn",
            Self::Deny => "--deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LinterConfig {
    pub enabled: bool,
    /// Override for the linter executable; defaults to `oxlint` on PATH.
    pub binary_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    /// Per-request timeout; also bounds how long a request may wait for a
    /// concurrency slot.
    pub file_timeout_ms: u64,
    pub rules: BTreeMap<String, RuleOverride>,
}

impl Default for LinterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_path: None,
            config_path: None,
            file_timeout_ms: 10_000,
            rules: BTreeMap::new(),
        }
    }
}

impl LinterConfig {
    #[must_use]
    pub fn binary(&self) -> PathBuf {
        self.binary_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("oxlint"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
    pub max_file_size_mb: u64,
    pub pretty_print: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            max_file_size_mb: 10,
            pretty_print: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub max_size_mb: u64,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            max_size_mb: 100,
            ttl_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchConfig {
    /// Exposed for callers that debounce their own change streams; the
    /// cache key is unaffected.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct InspectorConfig {
    pub max_trace_history: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            max_trace_history: 1000,
        }
    }
}
