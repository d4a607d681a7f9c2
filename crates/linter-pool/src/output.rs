//! Linter stdout parsing. The primary format is a JSON array (or single
//! object) of raw diagnostics; a line-regex fallback handles plain
//! diagnostic-per-line output from misconfigured runs.

use crate::error::{LinterError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use turbo_protocol::wire::RawLintDiagnostic;
use turbo_protocol::Diagnostic;

static LINE_FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>[^:\s][^:]*):(?P<line>\d+):(?P<column>\d+):?\s*(?:(?P<severity>error|warning|warn|info|advice|hint|help|deny)[:\s]+)?(?P<message>.+)$")
        .expect("fallback pattern")
});

/// Parses linter stdout for `file`. Empty stdout yields no findings; JSON
/// wins, the line parser is the fallback; stdout that matches neither is
/// a parse error.
pub fn parse_stdout(stdout: &str, file: &str) -> Result<Vec<Diagnostic>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if let Ok(raw) = serde_json::from_str::<Vec<RawLintDiagnostic>>(trimmed) {
        return Ok(raw
            .into_iter()
            .map(|diag| diag.into_diagnostic(file))
            .collect());
    }
    if let Ok(raw) = serde_json::from_str::<RawLintDiagnostic>(trimmed) {
        return Ok(vec![raw.into_diagnostic(file)]);
    }

    let fallback = parse_lines(trimmed, file);
    if fallback.is_empty() {
        return Err(LinterError::Parse(format!(
            "neither JSON nor line format ({} bytes)",
            trimmed.len()
        )));
    }
    Ok(fallback)
}

fn parse_lines(stdout: &str, file: &str) -> Vec<Diagnostic> {
    stdout
        .lines()
        .filter_map(|line| {
            let captures = LINE_FALLBACK.captures(line.trim())?;
            let raw = RawLintDiagnostic {
                message: captures["message"].to_string(),
                severity: captures
                    .name("severity")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default(),
                rule_id: None,
                start: Some(turbo_protocol::wire::RawLintPosition {
                    line: captures["line"].parse().unwrap_or(1),
                    column: captures["column"].parse().unwrap_or(1),
                }),
                end: None,
                fix: None,
                help: None,
            };
            Some(raw.into_diagnostic(file))
        })
        .collect()
}
