//! Verdict Parser (C4): converts reviewer output into a structured [`Verdict`] (§4.4).
//!
//! Headings below (`## Verdict`, `## Tier 1`, `## Tier 2`, `## Suggestions`) fix the
//! markdown layout the spec leaves unnamed for the high-priority and suggestions lists; a
//! single "Tier N" naming scheme keeps the three lists visually parallel in the reviewer's
//! own output.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::model::{normalize, Decision, Verdict};

const UNPARSEABLE_MESSAGE: &str = "Verdict could not be parsed";

static VERDICT_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)##\s*Verdict\s*\n(.*?)(\n##|\z)").unwrap());
static CHECKED_BOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[x\]\s*(APPROVED|BLOCK|REVISE|DISCUSS)").unwrap()
});
static TIER1_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)##\s*Tier\s*1\s*\n(.*?)(\n##|\z)").unwrap());
static TIER2_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)##\s*Tier\s*2\s*\n(.*?)(\n##|\z)").unwrap());
static SUGGESTIONS_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)##\s*Suggestions\s*\n(.*?)(\n##|\z)").unwrap());
static BULLET_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*[-*]\s+(.*)$").unwrap());

#[derive(Debug, Deserialize)]
struct RawVerdictJson {
    decision: String,
    #[serde(default)]
    blocking_issues: Vec<String>,
    #[serde(default)]
    high_priority_issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Applies §4.4's parsing rules in order; first match wins. Never fails — unparseable
/// input fails closed to `BLOCK` (rule 4).
pub fn parse_verdict(raw_text: &str, reviewer_model: &str) -> Verdict {
    if let Some(verdict) = parse_json(raw_text, reviewer_model) {
        return verdict;
    }
    if let Some(verdict) = parse_markdown(raw_text, reviewer_model) {
        return verdict;
    }
    Verdict {
        decision: Decision::Block,
        blocking_issues: vec![UNPARSEABLE_MESSAGE.to_string()],
        high_priority_issues: Vec::new(),
        suggestions: Vec::new(),
        reviewer_model: reviewer_model.to_string(),
        raw_text: raw_text.to_string(),
    }
}

fn parse_json(raw_text: &str, reviewer_model: &str) -> Option<Verdict> {
    let parsed: RawVerdictJson = serde_json::from_str(raw_text.trim()).ok()?;
    let decision = parse_decision(&parsed.decision)?;
    Some(Verdict {
        decision,
        blocking_issues: dedupe(&parsed.blocking_issues),
        high_priority_issues: dedupe(&parsed.high_priority_issues),
        suggestions: dedupe(&parsed.suggestions),
        reviewer_model: reviewer_model.to_string(),
        raw_text: raw_text.to_string(),
    })
}

fn parse_markdown(raw_text: &str, reviewer_model: &str) -> Option<Verdict> {
    let section = VERDICT_SECTION.captures(raw_text)?.get(1)?.as_str();
    let keyword = CHECKED_BOX.captures(section)?.get(1)?.as_str();
    let decision = parse_decision(keyword)?;

    let blocking_issues = extract_bullets(raw_text, &TIER1_SECTION);
    let high_priority_issues = extract_bullets(raw_text, &TIER2_SECTION);
    let suggestions = extract_bullets(raw_text, &SUGGESTIONS_SECTION);

    Some(Verdict {
        decision,
        blocking_issues: dedupe(&blocking_issues),
        high_priority_issues: dedupe(&high_priority_issues),
        suggestions: dedupe(&suggestions),
        reviewer_model: reviewer_model.to_string(),
        raw_text: raw_text.to_string(),
    })
}

fn parse_decision(raw: &str) -> Option<Decision> {
    match raw.trim().to_uppercase().as_str() {
        "APPROVED" => Some(Decision::Approved),
        "BLOCK" | "REVISE" => Some(Decision::Block),
        "DISCUSS" => Some(Decision::Discuss),
        _ => None,
    }
}

fn extract_bullets(raw_text: &str, section_pattern: &Regex) -> Vec<String> {
    let Some(captures) = section_pattern.captures(raw_text) else {
        return Vec::new();
    };
    let Some(section) = captures.get(1) else {
        return Vec::new();
    };
    BULLET_LINE
        .captures_iter(section.as_str())
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect()
}

/// Deduplicates by case-insensitive, whitespace-normalized equality, preserving first
/// occurrence order (§4.4 normalization).
fn dedupe(items: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    let mut result = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        let key = normalize(trimmed);
        if !seen.contains(&key) {
            seen.push(key);
            result.push(trimmed.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_json_verdict() {
        let raw = r#"{"decision":"approved","blocking_issues":[]}"#;
        let verdict = parse_verdict(raw, "model-x");
        assert_eq!(verdict.decision, Decision::Approved);
        assert!(verdict.blocking_issues.is_empty());
    }

    #[test]
    fn parses_markdown_block_with_tier1_bullets() {
        let raw = "\
## Verdict
[x] BLOCK

## Tier 1
- define worktree scope
- add observability
";
        let verdict = parse_verdict(raw, "model-x");
        assert_eq!(verdict.decision, Decision::Block);
        assert_eq!(
            verdict.blocking_issues,
            vec!["define worktree scope".to_string(), "add observability".to_string()]
        );
    }

    #[test]
    fn unparseable_output_fails_closed_to_block() {
        let raw = "no json, no headings here";
        let verdict = parse_verdict(raw, "model-x");
        assert_eq!(verdict.decision, Decision::Block);
        assert_eq!(verdict.blocking_issues, vec![UNPARSEABLE_MESSAGE.to_string()]);
    }

    #[test]
    fn dedupes_blocking_issues_case_insensitively() {
        let raw = "\
## Verdict
[x] BLOCK

## Tier 1
- Define Worktree Scope
- define worktree scope
";
        let verdict = parse_verdict(raw, "model-x");
        assert_eq!(verdict.blocking_issues.len(), 1);
    }

    #[test]
    fn discuss_keyword_is_recognized() {
        let raw = "## Verdict\n[x] DISCUSS\n";
        let verdict = parse_verdict(raw, "model-x");
        assert_eq!(verdict.decision, Decision::Discuss);
    }

    #[test]
    fn revise_keyword_maps_to_block() {
        let raw = "## Verdict\n[x] REVISE\n";
        let verdict = parse_verdict(raw, "model-x");
        assert_eq!(verdict.decision, Decision::Block);
    }

    #[test]
    fn empty_bullets_are_discarded() {
        let raw = "\
## Verdict
[x] BLOCK

## Tier 1
-
- real issue
";
        let verdict = parse_verdict(raw, "model-x");
        assert_eq!(verdict.blocking_issues, vec!["real issue".to_string()]);
    }
}
