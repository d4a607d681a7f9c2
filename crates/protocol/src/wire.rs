//! Wire shapes spoken to the external analyzer binaries.
//!
//! The checker speaks newline-delimited JSON request/response pairs over
//! stdin/stdout; the linter is launched per request and emits a JSON array
//! of raw diagnostics on stdout.

use crate::{Completion, Diagnostic, DiagnosticSource, Severity, TypeInfo};
use serde::{Deserialize, Serialize};

/// One newline-terminated request to a checker worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerRequest {
    #[serde(rename = "type")]
    pub kind: CheckerRequestKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckerRequestKind {
    Analyze,
    TypeInfo,
    Completions,
    Health,
    Shutdown,
}

impl CheckerRequest {
    #[must_use]
    pub fn analyze(uri: &str, content: &str, flags: Vec<String>) -> Self {
        Self {
            kind: CheckerRequestKind::Analyze,
            uri: Some(uri.to_string()),
            content: Some(content.to_string()),
            line: None,
            column: None,
            flags,
        }
    }

    #[must_use]
    pub fn type_info(uri: &str, content: &str, line: u32, column: u32) -> Self {
        Self {
            kind: CheckerRequestKind::TypeInfo,
            uri: Some(uri.to_string()),
            content: Some(content.to_string()),
            line: Some(line),
            column: Some(column),
            flags: Vec::new(),
        }
    }

    #[must_use]
    pub fn completions(uri: &str, content: &str, line: u32, column: u32) -> Self {
        Self {
            kind: CheckerRequestKind::Completions,
            uri: Some(uri.to_string()),
            content: Some(content.to_string()),
            line: Some(line),
            column: Some(column),
            flags: Vec::new(),
        }
    }

    #[must_use]
    pub fn health() -> Self {
        Self {
            kind: CheckerRequestKind::Health,
            uri: None,
            content: None,
            line: None,
            column: None,
            flags: Vec::new(),
        }
    }

    #[must_use]
    pub fn shutdown() -> Self {
        Self {
            kind: CheckerRequestKind::Shutdown,
            uri: None,
            content: None,
            line: None,
            column: None,
            flags: Vec::new(),
        }
    }
}

/// One newline-terminated response from a checker worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerResponse {
    #[serde(rename = "type")]
    pub kind: CheckerResponseKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<RawCheckerDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_info: Option<RawTypeInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completions: Vec<RawCompletion>,
    /// Module specifiers this file imports, when the checker reports them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckerResponseKind {
    Result,
    Error,
}

/// Raw diagnostic as emitted by the checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCheckerDiagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
    pub message: String,
    #[serde(default)]
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl RawCheckerDiagnostic {
    /// Normalizes into the canonical model. Positions are clamped to 1-based
    /// so a misbehaving analyzer cannot violate the location invariant.
    #[must_use]
    pub fn into_diagnostic(self, fallback_file: &str) -> Diagnostic {
        let line = self.line.max(1);
        let column = self.column.max(1);
        let end_line = self.end_line.map(|l| l.max(line));
        let end_column = self.end_column.map(|c| {
            if end_line == Some(line) || self.end_line.is_none() {
                c.max(column)
            } else {
                c.max(1)
            }
        });
        Diagnostic {
            file: self.file.unwrap_or_else(|| fallback_file.to_string()),
            line,
            column,
            end_line,
            end_column,
            message: self.message,
            severity: Severity::from_checker(&self.severity),
            source: DiagnosticSource::Checker,
            code: self.code,
            compute_time_ms: None,
            attachment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTypeInfo {
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
}

impl RawTypeInfo {
    #[must_use]
    pub fn into_type_info(self) -> TypeInfo {
        TypeInfo {
            display: self.display,
            documentation: self.documentation,
            expansion: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCompletion {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_text: Option<String>,
}

impl RawCompletion {
    #[must_use]
    pub fn into_completion(self) -> Completion {
        Completion {
            label: self.label,
            kind: self.kind,
            detail: self.detail,
            insert_text: self.insert_text,
        }
    }
}

/// Position inside a file as reported by the linter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawLintPosition {
    pub line: u32,
    pub column: u32,
}

/// Byte span inside the analyzed content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawByteSpan {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLintEdit {
    pub span: RawByteSpan,
    pub content: String,
}

/// Machine-applicable fix payload attached to a lint finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLintFix {
    #[serde(default)]
    pub edits: Vec<RawLintEdit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Raw diagnostic as emitted by the linter's `--format=json` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLintDiagnostic {
    pub message: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default, alias = "ruleId")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<RawLintPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<RawLintPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<RawLintFix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl RawLintDiagnostic {
    /// Normalizes into the canonical model, preserving the fix payload
    /// under the opaque attachment.
    #[must_use]
    pub fn into_diagnostic(self, file: &str) -> Diagnostic {
        let start = self.start.unwrap_or(RawLintPosition { line: 1, column: 1 });
        let line = start.line.max(1);
        let column = start.column.max(1);
        let (end_line, end_column) = match self.end {
            Some(end) => {
                let el = end.line.max(line);
                let ec = if el == line { end.column.max(column) } else { end.column.max(1) };
                (Some(el), Some(ec))
            }
            None => (None, None),
        };
        let attachment = match (&self.fix, &self.help) {
            (None, None) => None,
            _ => serde_json::to_value(serde_json::json!({
                "fix": self.fix,
                "help": self.help,
            }))
            .ok(),
        };
        Diagnostic {
            file: file.to_string(),
            line,
            column,
            end_line,
            end_column,
            message: self.message,
            severity: Severity::from_linter(&self.severity),
            source: DiagnosticSource::Linter,
            code: self.rule_id,
            compute_time_ms: None,
            attachment,
        }
    }
}
