use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Longest title taken from a plain first line.
const MAX_LINE_TITLE: usize = 80;

static RULE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-*_]{3,}$").unwrap());
static NON_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[^\w\s\-.,!?'"]+"#).unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Title for a source saved without one: the first heading or line that
/// still has words once cleaned, else the stem of `fallback`.
pub fn extract_title(text: &str, fallback: &str) -> String {
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let candidate: String = if line.starts_with('#') {
            line.trim_start_matches('#').trim().to_string()
        } else {
            line.chars().take(MAX_LINE_TITLE).collect()
        };
        let title = clean_title(&candidate);
        if !title.is_empty() {
            return title;
        }
    }

    Path::new(fallback)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("Untitled")
        .to_string()
}

/// Strip markup symbols from a title, keeping words and plain punctuation.
pub fn clean_title(title: &str) -> String {
    if RULE_LINE.is_match(title.trim()) {
        return String::new();
    }
    let title = NON_TITLE.replace_all(title, " ");
    let title = WHITESPACE.replace_all(&title, " ");
    title.trim_matches(|c| matches!(c, '-' | '.' | ' ')).trim().to_string()
}
