//! Markdown/HTML → speakable prose.
//!
//! The pipeline always strips raw markup first, optionally rewrites tables as
//! sentences, then walks the remaining block structure (with `pulldown-cmark`
//! when the `markdown` feature is on, line by line otherwise) and cleans each
//! run of inline text according to [`CleaningOptions`].

mod fallback;
mod inline;
#[cfg(feature = "markdown")]
mod markdown;
mod markup;
mod tables;

#[cfg(test)]
mod tests;

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

const CODE_PLACEHOLDER: &str = "(Code block.)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CodeBlockRule {
    /// Drop fenced code entirely.
    #[default]
    Skip,
    /// Replace each code block with a fixed phrase.
    Placeholder,
    /// Read a lightly cleaned version prefixed with "Code:".
    Read,
}

impl CodeBlockRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Placeholder => "placeholder",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for CodeBlockRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeBlockRule {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "placeholder" => Ok(Self::Placeholder),
            "read" => Ok(Self::Read),
            other => Err(AppError::InvalidConfig(format!(
                "Unknown code block rule: {}",
                other
            ))),
        }
    }
}

/// Lenient conversion for values read back from storage.
impl From<String> for CodeBlockRule {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningOptions {
    /// Aggressively strip symbols instead of the light cleanup.
    pub remove_non_text: bool,
    /// Rewrite markdown tables as descriptive sentences.
    pub handle_tables: bool,
    /// Read URLs as bare domains.
    pub speak_urls: bool,
    pub expand_abbreviations: bool,
    pub code_block_rule: CodeBlockRule,
    /// Keep `(` and `)` when `remove_non_text` is on.
    pub preserve_parentheses: bool,
}

impl Default for CleaningOptions {
    fn default() -> Self {
        Self {
            remove_non_text: false,
            handle_tables: true,
            speak_urls: true,
            expand_abbreviations: true,
            code_block_rule: CodeBlockRule::Skip,
            preserve_parentheses: true,
        }
    }
}

impl CleaningOptions {
    /// Build options from the persisted `clean_*` settings, falling back to
    /// defaults for anything missing or unparseable.
    pub fn from_settings(settings: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            settings
                .get(key)
                .and_then(|v| parse_flag(v))
                .unwrap_or(default)
        };

        Self {
            remove_non_text: flag("clean_remove_non_text", defaults.remove_non_text),
            handle_tables: flag("clean_handle_tables", defaults.handle_tables),
            speak_urls: flag("clean_speak_urls", defaults.speak_urls),
            expand_abbreviations: flag("clean_expand_abbreviations", defaults.expand_abbreviations),
            code_block_rule: settings
                .get("code_block_rule")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.code_block_rule),
            preserve_parentheses: flag("clean_preserve_parentheses", defaults.preserve_parentheses),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

type BlockRenderer = fn(&str, &CleaningOptions) -> Vec<String>;

/// Convert raw markdown/HTML into plain speakable text. Deterministic.
pub fn normalize(raw: &str, options: &CleaningOptions) -> String {
    #[cfg(feature = "markdown")]
    let render: BlockRenderer = markdown::render_blocks;
    #[cfg(not(feature = "markdown"))]
    let render: BlockRenderer = fallback::render_blocks;

    run_pipeline(raw, options, render)
}

/// Same pipeline with the line-oriented block pass, regardless of features.
/// Looser on nested inline markup than [`normalize`].
pub fn normalize_lines(raw: &str, options: &CleaningOptions) -> String {
    run_pipeline(raw, options, fallback::render_blocks)
}

fn run_pipeline(raw: &str, options: &CleaningOptions, render: BlockRenderer) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let text = markup::strip_markup(raw);
    let text = if options.handle_tables {
        tables::convert_tables(&text)
    } else {
        text
    };

    let blocks = render(&text, options);
    inline::final_clean(&blocks.join("\n\n"))
}

/// Spoken form of a heading.
fn section_line(heading: &str) -> Option<String> {
    let heading = heading.trim().trim_end_matches(['.', ':', ';', ',']).trim_end();
    if heading.is_empty() {
        return None;
    }
    if heading.ends_with(['?', '!']) {
        Some(format!("Section: {}", heading))
    } else {
        Some(format!("Section: {}.", heading))
    }
}

/// Spoken form of a fenced or indented code block, per the configured rule.
fn code_block(code: &str, options: &CleaningOptions) -> Option<String> {
    match options.code_block_rule {
        CodeBlockRule::Skip => None,
        CodeBlockRule::Placeholder => Some(CODE_PLACEHOLDER.to_string()),
        CodeBlockRule::Read => {
            let cleaned = inline::clean_code(code, options);
            (!cleaned.is_empty()).then(|| format!("Code: {}", cleaned))
        }
    }
}

/// Inline code is spoken only under [`CodeBlockRule::Read`].
fn inline_code<'a>(code: &'a str, options: &CleaningOptions) -> Option<&'a str> {
    match options.code_block_rule {
        CodeBlockRule::Read => Some(code),
        CodeBlockRule::Skip | CodeBlockRule::Placeholder => None,
    }
}

fn image_phrase(alt: &str) -> String {
    let alt = alt.trim();
    if alt.is_empty() {
        String::new()
    } else {
        format!("(Image: {})", alt)
    }
}
