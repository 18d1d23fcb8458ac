//! Conventional commit message validation.
//!
//! A header has the form `type(scope)!: description`, with an optional scope
//! and breaking-change marker. [`validate`] lists every violation found;
//! [`propose_fix`] is a pure rewrite into a conforming message. The
//! interactive accept/edit loop belongs to the caller.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

pub const ALLOWED_TYPES: &[&str] = &[
    "feat", "fix", "docs", "style", "refactor", "perf", "test", "build", "ci", "chore", "revert",
];

pub const MAX_HEADER_LEN: usize = 72;

/// Room a proposed fix keeps for the description before giving up the scope.
const MIN_FIXED_DESCRIPTION: usize = 16;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<type>[A-Za-z]+)(?:\((?P<scope>[^()]*)\))?(?P<breaking>!)?:(?P<desc>.*)$")
        .unwrap_or_else(|e| unreachable!("invalid header regex: {}", e))
});

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitViolation {
    /// Header is not `type(scope): description`
    MissingFormat,
    UnknownType { found: String },
    /// `type(): ...`
    EmptyScope,
    EmptyDescription,
    HeaderTooLong { length: usize },
    TrailingPeriod,
    /// Body does not start after a blank line
    MissingBlankLine,
}

impl std::fmt::Display for CommitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitViolation::MissingFormat => {
                f.write_str("header must look like `type(scope): description`")
            }
            CommitViolation::UnknownType { found } => write!(
                f,
                "unknown type '{}' (allowed: {})",
                found,
                ALLOWED_TYPES.join(", ")
            ),
            CommitViolation::EmptyScope => f.write_str("scope is empty; drop the parentheses"),
            CommitViolation::EmptyDescription => f.write_str("description is empty"),
            CommitViolation::HeaderTooLong { length } => write!(
                f,
                "header is {} characters (max {})",
                length, MAX_HEADER_LEN
            ),
            CommitViolation::TrailingPeriod => f.write_str("description ends with a period"),
            CommitViolation::MissingBlankLine => {
                f.write_str("header and body must be separated by a blank line")
            }
        }
    }
}

/// Parsed header parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitHeader {
    pub kind: String,
    pub scope: Option<String>,
    pub breaking: bool,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub violations: Vec<CommitViolation>,
    pub header: Option<CommitHeader>,
}

impl ValidationResult {
    pub fn describe(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn parse_header(line: &str) -> Option<CommitHeader> {
    let caps = HEADER_RE.captures(line)?;
    let desc = caps.name("desc").map(|m| m.as_str()).unwrap_or_default();
    // exactly one space after the colon, unless the description is empty
    let description = match desc.strip_prefix(' ') {
        Some(rest) if !rest.starts_with(' ') => rest.to_string(),
        None if desc.is_empty() => String::new(),
        _ => return None,
    };
    Some(CommitHeader {
        kind: caps["type"].to_string(),
        scope: caps.name("scope").map(|m| m.as_str().to_string()),
        breaking: caps.name("breaking").is_some(),
        description,
    })
}

/// Check a commit message against the conventional format.
pub fn validate(message: &str) -> ValidationResult {
    let mut violations = Vec::new();
    let mut lines = message.trim_end().lines();
    let header_line = lines.next().unwrap_or("").trim_end();

    let header = parse_header(header_line);
    match &header {
        None => violations.push(CommitViolation::MissingFormat),
        Some(h) => {
            if !ALLOWED_TYPES.contains(&h.kind.as_str()) {
                violations.push(CommitViolation::UnknownType {
                    found: h.kind.clone(),
                });
            }
            if h.scope.as_deref().is_some_and(|s| s.trim().is_empty()) {
                violations.push(CommitViolation::EmptyScope);
            }
            if h.description.trim().is_empty() {
                violations.push(CommitViolation::EmptyDescription);
            } else if h.description.ends_with('.') {
                violations.push(CommitViolation::TrailingPeriod);
            }
        }
    }

    let length = header_line.chars().count();
    if length > MAX_HEADER_LEN {
        violations.push(CommitViolation::HeaderTooLong { length });
    }
    if let Some(second) = lines.next()
        && !second.trim().is_empty()
    {
        violations.push(CommitViolation::MissingBlankLine);
    }

    ValidationResult {
        ok: violations.is_empty(),
        violations,
        header,
    }
}

/// Words that name a type outright; they are consumed when inferring a header.
fn type_word(word: &str) -> Option<&'static str> {
    Some(match word {
        "feat" | "feature" | "features" => "feat",
        "fix" | "fixed" | "fixes" | "bugfix" | "hotfix" => "fix",
        "doc" | "docs" => "docs",
        "style" => "style",
        "refactor" | "refactored" | "refactoring" => "refactor",
        "perf" | "performance" => "perf",
        "test" | "tests" => "test",
        "build" => "build",
        "ci" => "ci",
        "chore" | "chores" => "chore",
        "revert" | "reverted" => "revert",
        _ => return None,
    })
}

/// Verbs that suggest a type but stay part of the description.
fn hint_word(word: &str) -> Option<&'static str> {
    Some(match word {
        "add" | "added" | "adds" | "implement" | "implemented" | "introduce" => "feat",
        "correct" | "repair" | "resolve" | "resolved" => "fix",
        "document" | "documented" => "docs",
        "format" | "formatted" | "lint" => "style",
        "optimize" | "optimized" | "speed" => "perf",
        "update" | "updated" | "bump" | "bumped" | "remove" | "removed" => "chore",
        _ => return None,
    })
}

fn normalize_type(kind: &str) -> &'static str {
    let lower = kind.to_lowercase();
    type_word(&lower)
        .or_else(|| hint_word(&lower))
        .unwrap_or("chore")
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match (chars.next(), chars.clone().next()) {
        // keep acronyms like "API" intact
        (Some(first), Some(second)) if first.is_uppercase() && second.is_lowercase() => {
            first.to_lowercase().chain(chars).collect()
        }
        _ => text.to_string(),
    }
}

fn clean_description(text: &str) -> String {
    let trimmed = text.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        "update".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Rewrite `message` into a conforming commit message.
///
/// Pure: no I/O, same input always yields the same output, and the output
/// always passes [`validate`].
pub fn propose_fix(message: &str) -> String {
    let trimmed = message.trim();
    let mut lines = trimmed.lines();
    let header_line = lines.next().unwrap_or("").trim();
    let body: Vec<&str> = lines.collect();

    let (kind, scope, breaking, description) = match parse_header(header_line) {
        Some(h) => (
            normalize_type(&h.kind),
            h.scope.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            h.breaking,
            clean_description(&h.description),
        ),
        None => {
            // free text such as "fixed stuff" or "Add login page"
            let text = header_line.trim_end_matches(':').trim();
            let first = text
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            match type_word(&first) {
                Some(kind) => {
                    let rest = text
                        .split_once(char::is_whitespace)
                        .map(|(_, rest)| rest)
                        .unwrap_or("")
                        .trim_start_matches([':', '-', ' ']);
                    (kind, None, false, clean_description(&lowercase_first(rest)))
                }
                None => (
                    hint_word(&first).unwrap_or("chore"),
                    None,
                    false,
                    clean_description(&lowercase_first(text)),
                ),
            }
        }
    };

    let bang = if breaking { "!" } else { "" };
    let mut prefix = format!(
        "{}{}{}: ",
        kind,
        scope.map(|s| format!("({})", s)).unwrap_or_default(),
        bang
    );
    // a scope that crowds out the description is dropped
    if MAX_HEADER_LEN.saturating_sub(prefix.chars().count()) < MIN_FIXED_DESCRIPTION {
        prefix = format!("{}{}: ", kind, bang);
    }
    let budget = MAX_HEADER_LEN.saturating_sub(prefix.chars().count()).max(1);
    let description = if description.chars().count() > budget {
        let cut: String = description.chars().take(budget).collect();
        // prefer a word boundary when it keeps most of the text
        let cut = match cut.rfind(' ') {
            Some(pos) if pos > budget / 2 => cut[..pos].to_string(),
            _ => cut,
        };
        clean_description(&cut)
    } else {
        description
    };

    let mut fixed = format!("{}{}", prefix, description);
    let body_text: Vec<&str> = body
        .iter()
        .copied()
        .skip_while(|line| line.trim().is_empty())
        .collect();
    if !body_text.is_empty() {
        fixed.push_str("\n\n");
        fixed.push_str(&body_text.join("\n"));
    }
    fixed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_messages() {
        assert!(validate("fix: correct null check").ok);
        assert!(validate("feat(auth)!: drop legacy tokens").ok);
        assert!(validate("docs(readme): describe lanes\n\nLonger body text.").ok);
    }

    #[test]
    fn test_free_text_is_missing_format() {
        let result = validate("fixed stuff");
        assert!(!result.ok);
        assert_eq!(result.violations, vec![CommitViolation::MissingFormat]);
        assert!(result.header.is_none());
    }

    #[test]
    fn test_unknown_type() {
        let result = validate("feature: login page");
        assert_eq!(
            result.violations,
            vec![CommitViolation::UnknownType {
                found: "feature".into()
            }]
        );
    }

    #[test]
    fn test_empty_scope_and_description() {
        let result = validate("fix(): ");
        assert!(result.violations.contains(&CommitViolation::EmptyScope));
        assert!(result.violations.contains(&CommitViolation::EmptyDescription));
    }

    #[test]
    fn test_trailing_period_and_length() {
        let result = validate("fix: correct null check.");
        assert_eq!(result.violations, vec![CommitViolation::TrailingPeriod]);

        let long = format!("feat: {}", "a".repeat(80));
        let result = validate(&long);
        assert_eq!(
            result.violations,
            vec![CommitViolation::HeaderTooLong { length: 86 }]
        );
    }

    #[test]
    fn test_missing_blank_line() {
        let result = validate("fix: correct null check\nbody starts too early");
        assert_eq!(result.violations, vec![CommitViolation::MissingBlankLine]);
    }

    #[test]
    fn test_missing_space_after_colon() {
        assert_eq!(
            validate("fix:correct").violations,
            vec![CommitViolation::MissingFormat]
        );
    }

    #[test]
    fn test_propose_fix_free_text() {
        assert_eq!(propose_fix("fixed stuff"), "fix: stuff");
        assert_eq!(propose_fix("Add login page"), "feat: add login page");
        assert_eq!(propose_fix("something happened."), "chore: something happened");
    }

    #[test]
    fn test_propose_fix_repairs_header_parts() {
        assert_eq!(propose_fix("Feature(): login page."), "feat: login page");
        assert_eq!(propose_fix("FIX(api): handle 404"), "fix(api): handle 404");
        assert_eq!(
            propose_fix("fix: null check\nexplain why"),
            "fix: null check\n\nexplain why"
        );
    }

    #[test]
    fn test_propose_fix_is_pure_and_conforming() {
        let inputs = [
            "fixed stuff",
            "",
            "   ",
            "WIP",
            "feat(): ",
            "update deps.",
            "Refactor the API layer so that every handler shares one error type and one logger",
            "feat(core)!: this header is much too long because it keeps going and going past the limit.",
            "docs: fine\nno blank line",
            "feat(an-extremely-long-scope-name-that-keeps-going-and-going-past-the-limit-xyz): add it",
            "fix(a-scope-of-exactly-the-wrong-length-to-leave-room-for-text)!: handle it",
        ];
        for input in inputs {
            let fixed = propose_fix(input);
            assert_eq!(fixed, propose_fix(input));
            let result = validate(&fixed);
            assert!(result.ok, "{:?} -> {:?}: {}", input, fixed, result.describe());
        }
    }

    #[test]
    fn test_propose_fix_drops_oversized_scope() {
        let scope = "an-extremely-long-scope-name-that-keeps-going-and-going-past-the-limit-xyz";
        let fixed = propose_fix(&format!("feat({}): add it", scope));
        assert_eq!(fixed, "feat: add it");
        assert!(validate(&fixed).ok);

        // a scope that still leaves room is kept
        assert_eq!(propose_fix("feat(auth): add login."), "feat(auth): add login");
    }

    #[test]
    fn test_valid_message_is_unchanged_by_fix() {
        let msg = "fix(parser): correct null check\n\nDetails.";
        assert_eq!(propose_fix(msg), msg);
    }
}
