//! Type-expansion guard: bounds how deep nested generics are expanded so a
//! recursive type cannot stall the editor. The guard is a per-analysis
//! context; concurrent analyses each carry their own.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use turbo_protocol::TypeExpansionInfo;

pub const DEFAULT_CYCLE_WINDOW: usize = 10;

/// Notified when an expansion is truncated. Runs after the guard has
/// recorded the truncation; nothing the observer does is propagated.
pub trait ExpansionObserver: Send + Sync {
    fn on_truncation(&self, info: &TypeExpansionInfo);
}

enum PatternMatcher {
    Regex(Regex),
    /// `X<X<…>>`-style heads that name themselves in their own arguments.
    SelfReferential,
}

/// A known pathological type family and its suggested expansion ceiling.
pub struct ExpansionPattern {
    pub name: &'static str,
    pub max_depth: u32,
    matcher: PatternMatcher,
}

impl ExpansionPattern {
    fn matches(&self, type_name: &str) -> bool {
        match &self.matcher {
            PatternMatcher::Regex(regex) => regex.is_match(type_name),
            PatternMatcher::SelfReferential => is_self_referential(type_name),
        }
    }
}

fn is_self_referential(type_name: &str) -> bool {
    let Some((head, args)) = type_name.split_once('<') else {
        return false;
    };
    let head = head.trim();
    !head.is_empty() && args.contains(&format!("{head}<"))
}

static PATTERNS: Lazy<Vec<ExpansionPattern>> = Lazy::new(|| {
    vec![
        ExpansionPattern {
            name: "self-referential-generic",
            max_depth: 15,
            matcher: PatternMatcher::SelfReferential,
        },
        ExpansionPattern {
            name: "generated-orm-type",
            max_depth: 20,
            matcher: PatternMatcher::Regex(
                Regex::new(r"(GetPayload|FindMany\w*Args|Select|Include)\b|^Prisma\w*")
                    .expect("orm pattern"),
            ),
        },
        ExpansionPattern {
            name: "recursive-router-tree",
            max_depth: 25,
            matcher: PatternMatcher::Regex(
                Regex::new(r"(Router|RouteTree|RouterRecord|Procedure)\b").expect("router pattern"),
            ),
        },
        ExpansionPattern {
            name: "deep-utility-type",
            max_depth: 40,
            matcher: PatternMatcher::Regex(
                Regex::new(r"^Deep(Partial|Readonly|Required|NonNullable)\b")
                    .expect("utility pattern"),
            ),
        },
    ]
});

/// Looks the type name up in the static pattern registry.
#[must_use]
pub fn match_pattern(type_name: &str) -> Option<&'static ExpansionPattern> {
    PATTERNS.iter().find(|pattern| pattern.matches(type_name))
}

pub struct ExpansionGuard {
    stack: Vec<String>,
    truncation_count: u64,
    configured_max: u32,
    observer: Option<Arc<dyn ExpansionObserver>>,
}

impl ExpansionGuard {
    #[must_use]
    pub fn new(configured_max: u32) -> Self {
        Self {
            stack: Vec::new(),
            truncation_count: 0,
            configured_max: configured_max.max(1),
            observer: None,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExpansionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn push(&mut self, type_name: &str) {
        self.stack.push(type_name.to_string());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.stack.pop()
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        self.stack.len() as u32
    }

    #[must_use]
    pub fn truncation_count(&self) -> u64 {
        self.truncation_count
    }

    /// Decides whether expanding `type_name` at `depth` must stop. The
    /// effective ceiling is the configured maximum, lowered further when
    /// the name matches a known pathological pattern.
    pub fn check(&mut self, type_name: &str, depth: u32) -> TypeExpansionInfo {
        let pattern = match_pattern(type_name);
        let effective_max = pattern
            .map(|p| p.max_depth.min(self.configured_max))
            .unwrap_or(self.configured_max);
        let truncated = depth >= effective_max;
        let info = TypeExpansionInfo {
            type_name: type_name.to_string(),
            depth,
            max_depth: effective_max,
            truncated,
            path: self.stack.clone(),
        };
        if truncated {
            self.truncation_count += 1;
            match pattern {
                Some(pattern) => log::warn!(
                    "type expansion truncated at depth {depth} for {type_name} (pattern: {})",
                    pattern.name
                ),
                None => log::warn!(
                    "type expansion truncated at depth {depth} for {type_name}"
                ),
            }
            if let Some(observer) = &self.observer {
                observer.on_truncation(&info);
            }
        }
        info
    }

    /// First name repeated within the last `window` stack entries.
    #[must_use]
    pub fn detect_cycle(&self, window: usize) -> Option<String> {
        let start = self.stack.len().saturating_sub(window);
        let mut seen = HashSet::new();
        for name in &self.stack[start..] {
            if !seen.insert(name.as_str()) {
                return Some(name.clone());
            }
        }
        None
    }

    /// Walks a raw type display string, pushing each generic head onto the
    /// stack and checking the depth budget. Returns the (possibly
    /// truncated) rendering and the truncation snapshot, if any.
    pub fn expand_display(&mut self, display: &str) -> (String, Option<TypeExpansionInfo>) {
        let mut out = String::with_capacity(display.len());
        let mut ident = String::new();
        let mut opened: u32 = 0;
        for ch in display.chars() {
            match ch {
                '<' => {
                    out.push(ch);
                    let name = std::mem::take(&mut ident);
                    self.push(&name);
                    opened += 1;
                    let info = self.check(&name, self.depth());
                    if info.truncated {
                        out.push('\u{2026}');
                        for _ in 0..opened {
                            out.push('>');
                            self.pop();
                        }
                        return (out, Some(info));
                    }
                }
                '>' => {
                    out.push(ch);
                    ident.clear();
                    if opened > 0 {
                        opened -= 1;
                        self.pop();
                    }
                }
                c if c.is_alphanumeric() || c == '_' => {
                    ident.push(c);
                    out.push(c);
                }
                c => {
                    ident.clear();
                    out.push(c);
                }
            }
        }
        for _ in 0..opened {
            self.pop();
        }
        (out, None)
    }

    /// Human-readable truncation report with the expansion path and a
    /// mitigation hint.
    #[must_use]
    pub fn format_report(info: &TypeExpansionInfo) -> String {
        let mut report = format!(
            "Type expansion truncated: {}\n  depth: {} (max {})\n",
            info.type_name, info.depth, info.max_depth
        );
        if !info.path.is_empty() {
            report.push_str("  path: ");
            report.push_str(&info.path.join(" -> "));
            report.push('\n');
        }
        report.push_str(
            "  hint: annotate the value with an explicit type to break the recursive expansion",
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn check_truncates_at_configured_max() {
        let mut guard = ExpansionGuard::new(5);
        let ok = guard.check("Plain", 4);
        assert!(!ok.truncated);
        let truncated = guard.check("Plain", 5);
        assert!(truncated.truncated);
        assert_eq!(truncated.max_depth, 5);
        assert_eq!(guard.truncation_count(), 1);
    }

    #[test]
    fn pattern_lowers_the_ceiling() {
        let mut guard = ExpansionGuard::new(30);
        let info = guard.check("PrismaUserGetPayload", 20);
        assert!(info.truncated);
        assert_eq!(info.max_depth, 20);
        // A plain name at the same depth is fine.
        let info = guard.check("UserRecord", 20);
        assert!(!info.truncated);
    }

    #[test]
    fn configured_max_still_wins_over_looser_patterns() {
        let mut guard = ExpansionGuard::new(10);
        let info = guard.check("DeepPartial", 10);
        assert!(info.truncated);
        assert_eq!(info.max_depth, 10);
    }

    #[test]
    fn self_referential_pattern_matches() {
        assert!(match_pattern("Tree<Tree<Leaf>>").is_some());
        assert_eq!(
            match_pattern("Tree<Tree<Leaf>>").unwrap().name,
            "self-referential-generic"
        );
        assert!(match_pattern("Vec<String>").is_none());
    }

    #[test]
    fn truncation_counter_increments_exactly_once_per_check() {
        let mut guard = ExpansionGuard::new(2);
        guard.check("A", 5);
        guard.check("A", 5);
        assert_eq!(guard.truncation_count(), 2);
    }

    #[test]
    fn detect_cycle_finds_first_repeat_in_window() {
        let mut guard = ExpansionGuard::new(50);
        for name in ["A", "B", "C", "B", "D"] {
            guard.push(name);
        }
        assert_eq!(guard.detect_cycle(DEFAULT_CYCLE_WINDOW).as_deref(), Some("B"));
        // A window too small to span the repeat sees nothing.
        assert_eq!(guard.detect_cycle(2), None);
    }

    #[test]
    fn observer_sees_truncations() {
        struct Counter(AtomicUsize);
        impl ExpansionObserver for Counter {
            fn on_truncation(&self, _info: &TypeExpansionInfo) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut guard = ExpansionGuard::new(1).with_observer(counter.clone());
        guard.check("X", 1);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expand_display_passes_shallow_types_through() {
        let mut guard = ExpansionGuard::new(10);
        let (rendered, info) = guard.expand_display("Map<string, Vec<Item>>");
        assert_eq!(rendered, "Map<string, Vec<Item>>");
        assert!(info.is_none());
        assert_eq!(guard.depth(), 0);
    }

    #[test]
    fn expand_display_truncates_deep_nesting() {
        let mut guard = ExpansionGuard::new(3);
        let display = "Tree<Tree<Tree<Tree<Leaf>>>>";
        let (rendered, info) = guard.expand_display(display);
        let info = info.expect("must truncate");
        assert!(info.truncated);
        assert!(rendered.contains('\u{2026}'));
        assert!(rendered.len() < display.len());
        assert_eq!(guard.truncation_count(), 1);
        assert_eq!(guard.depth(), 0);
        // Rendering stays balanced.
        let opens = rendered.matches('<').count();
        let closes = rendered.matches('>').count();
        assert_eq!(opens, closes);
    }

    #[test]
    fn report_contains_path_and_hint() {
        let mut guard = ExpansionGuard::new(2);
        guard.push("Router");
        guard.push("RouteTree");
        let info = guard.check("RouteTree", 2);
        let report = ExpansionGuard::format_report(&info);
        assert!(report.contains("Router -> RouteTree"));
        assert!(report.contains("hint:"));
        assert!(report.contains("max 2"));
    }
}
