//! Fuzzy extraction of string lists from free-form model output.
//!
//! Models asked for "a JSON list" answer with fenced blocks, Python-style
//! single-quoted lists, lists buried in prose, or one item per line. The
//! tiers below are tried in a fixed order, each trading precision for recall:
//!
//! 1. take the interior of the first fenced code block, if any
//! 2. strict JSON array of strings
//! 3. manual split of the bracketed `[ ... ]` region on commas
//!
//! URL-selection mode goes from the strict tier straight to a line scan for
//! `url_<n>` tokens; the bracket split is only a last resort there, and only
//! its `url_<n>` tokens are kept.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::ParseError;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+\-]*\s*(.*?)\s*```").expect("valid fenced block regex")
});

static URL_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^url_\d+$").expect("valid url token regex"));

/// Which tier produced a parse result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Structured,
    Bracketed,
}

/// Extract a list of strings, failing only when no tier applies.
pub fn parse_list(blob: &str) -> Result<Vec<String>, ParseError> {
    parse_with_tier(blob).map(|(items, _)| items)
}

/// Like [`parse_list`], also reporting which tier matched.
pub fn parse_with_tier(blob: &str) -> Result<(Vec<String>, Tier), ParseError> {
    let text = fenced_interior(blob).unwrap_or_else(|| blob.trim());

    if let Some(items) = parse_structured(text) {
        return Ok((items, Tier::Structured));
    }

    if let Some(inner) = bracketed_region(text) {
        let items = split_bracketed(inner);
        debug!(count = items.len(), "Parsed bracketed list manually");
        return Ok((items, Tier::Bracketed));
    }

    Err(ParseError {
        blob: blob.to_string(),
    })
}

/// Extract `url_<n>` selection tokens. Never fails: an empty result means
/// nothing recognizable was found and the caller decides the fallback.
pub fn parse_url_tokens(blob: &str) -> Vec<String> {
    let text = fenced_interior(blob).unwrap_or_else(|| blob.trim());
    if let Some(items) = parse_structured(text) {
        if !items.is_empty() {
            return items;
        }
    }

    let tokens = scan_url_lines(blob);
    debug!(count = tokens.len(), "Line-scanned url tokens");
    if !tokens.is_empty() {
        return tokens;
    }

    // Single-line lists such as ['url_1', 'url_2']
    bracketed_region(text)
        .map(split_bracketed)
        .unwrap_or_default()
        .into_iter()
        .filter(|token| URL_TOKEN.is_match(token))
        .collect()
}

/// Strict JSON array of strings.
fn parse_structured(text: &str) -> Option<Vec<String>> {
    let items = serde_json::from_str::<Vec<String>>(text).ok()?;
    debug!(count = items.len(), "Parsed structured list");
    Some(items)
}

/// Interior text of the first fenced code block, trimmed.
fn fenced_interior(blob: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(blob)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Text strictly between the first `[` and the last `]`.
fn bracketed_region(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (start < end).then(|| &text[start + 1..end])
}

fn split_bracketed(inner: &str) -> Vec<String> {
    inner
        .split(',')
        .map(|item| strip_one_quote_layer(item.trim()).trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_one_quote_layer(item: &str) -> &str {
    for quote in ['"', '\''] {
        if item.len() >= 2 && item.starts_with(quote) && item.ends_with(quote) {
            return &item[1..item.len() - 1];
        }
    }
    item
}

fn scan_url_lines(blob: &str) -> Vec<String> {
    blob.lines()
        .map(|line| line.trim().trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ',')))
        .filter(|line| URL_TOKEN.is_match(line))
        .map(str::to_string)
        .collect()
}
