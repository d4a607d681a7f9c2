use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod hash;
pub mod wire;

pub use config::TurboConfig;
pub use hash::{content_hash, ContentHash};

/// Canonical diagnostic severity, shared by both analyzers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    /// Maps a raw checker severity string onto the canonical set.
    /// Unrecognized values fall back to `Warning`.
    #[must_use]
    pub fn from_checker(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "warning" | "warn" => Self::Warning,
            "info" | "information" => Self::Info,
            "hint" | "suggestion" => Self::Hint,
            _ => Self::Warning,
        }
    }

    /// Maps a raw linter severity string onto the canonical set.
    #[must_use]
    pub fn from_linter(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" | "deny" => Self::Error,
            "warning" | "warn" => Self::Warning,
            "info" | "advice" => Self::Info,
            "hint" | "help" => Self::Hint,
            _ => Self::Warning,
        }
    }
}

/// Which analyzer produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSource {
    Checker,
    Linter,
    Turbo,
}

/// A structured finding attached to a source location. Lines and columns
/// are 1-based; the end position, when present, is never before the start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    pub message: String,
    pub severity: Severity,
    pub source: DiagnosticSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_time_ms: Option<u64>,
    /// Opaque payload carried through for downstream quick-fix surfaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<serde_json::Value>,
}

impl Diagnostic {
    /// Stable sort key used when presenting merged results.
    #[must_use]
    pub fn sort_key(&self) -> (&str, u32, u32, DiagnosticSource) {
        (&self.file, self.line, self.column, self.source)
    }

    /// Merge-dedup key: two diagnostics with the same key describe the
    /// same finding regardless of which analyzer reported it.
    #[must_use]
    pub fn dedup_key(&self) -> (String, u32, u32, String) {
        (
            self.file.clone(),
            self.line,
            self.column,
            self.message.clone(),
        )
    }
}

/// The merged outcome of analyzing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub uri: String,
    pub content_hash: ContentHash,
    pub diagnostics: Vec<Diagnostic>,
    pub analysis_time_ms: u64,
    pub from_cache: bool,
}

/// Hover payload from the checker, post expansion-guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfo {
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<TypeExpansionInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_text: Option<String>,
}

/// Snapshot taken when the expansion guard checks a type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeExpansionInfo {
    pub type_name: String,
    pub depth: u32,
    pub max_depth: u32,
    pub truncated: bool,
    /// Stack of enclosing type names at the moment of the check.
    pub path: Vec<String>,
}

/// Scheduling class of an analysis request. Lower value wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Active = 0,
    Open = 1,
    Background = 2,
}

/// Sorts a merged diagnostics list by the stable presentation key.
pub fn sort_diagnostics(diagnostics: &mut [Diagnostic]) {
    diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}
