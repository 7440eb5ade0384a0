//! Line-oriented block pass, used when the markdown tokenizer is compiled out.

use super::inline::InlineRun;
use super::markup::fence_marker;
use super::{code_block, image_phrase, section_line, CleaningOptions};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.*?)(?:\s+#+)?\s*$").unwrap());
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+").unwrap());
static RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s{0,3}(?:(?:-\s*){3,}|(?:\*\s*){3,}|(?:_\s*){3,})$").unwrap());
static BLOCKQUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:>\s?)+").unwrap());
static TABLE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\|[\s:|-]*-[\s:|-]*$").unwrap());

static IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static INLINE_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").unwrap());

pub(super) fn render_blocks(text: &str, options: &CleaningOptions) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut code: Option<(char, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some((open, lines)) = code.as_mut() {
            if fence_marker(line) == Some(*open) {
                let body = lines.join("\n");
                blocks.extend(code_block(&body, options));
                code = None;
            } else {
                lines.push(line);
            }
            continue;
        }

        if let Some(marker) = fence_marker(line) {
            flush(&mut paragraph, &mut blocks, options);
            code = Some((marker, Vec::new()));
            continue;
        }

        if line.trim().is_empty() || RULE.is_match(line) {
            flush(&mut paragraph, &mut blocks, options);
            continue;
        }

        if TABLE_SEPARATOR.is_match(line) {
            continue;
        }

        if let Some(caps) = HEADING.captures(line) {
            flush(&mut paragraph, &mut blocks, options);
            let heading = inline_run(&caps[1]).clean(options);
            blocks.extend(section_line(&heading));
            continue;
        }

        let content = match BLOCKQUOTE.find(line) {
            Some(m) => &line[m.end()..],
            None => line,
        };

        let trimmed = content.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('|') && trimmed.ends_with('|') {
            // Raw table row left in place when tables are not described
            flush(&mut paragraph, &mut blocks, options);
            let cells: Vec<&str> = trimmed
                .trim_matches('|')
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            let row = inline_run(&cells.join(". ")).clean(options);
            if !row.is_empty() {
                blocks.push(row);
            }
            continue;
        }

        if let Some(m) = LIST_MARKER.find(content) {
            flush(&mut paragraph, &mut blocks, options);
            paragraph.push(&content[m.end()..]);
        } else {
            paragraph.push(content);
        }
    }

    if let Some((_, lines)) = code {
        blocks.extend(code_block(&lines.join("\n"), options));
    }
    flush(&mut paragraph, &mut blocks, options);

    blocks
}

fn flush(paragraph: &mut Vec<&str>, blocks: &mut Vec<String>, options: &CleaningOptions) {
    if paragraph.is_empty() {
        return;
    }
    let joined = paragraph
        .iter()
        .map(|l| l.trim())
        .collect::<Vec<_>>()
        .join(" ");
    paragraph.clear();

    let cleaned = inline_run(&joined).clean(options);
    if !cleaned.is_empty() {
        blocks.push(cleaned);
    }
}

/// Split out code spans, then unwrap images and links in the prose between them.
fn inline_run(text: &str) -> InlineRun {
    let mut run = InlineRun::default();
    let mut last = 0;
    for caps in INLINE_CODE.captures_iter(text) {
        let Some(span) = caps.get(0) else { continue };
        run.push_prose(&strip_links(&text[last..span.start()]));
        run.push_code(&caps[1]);
        last = span.end();
    }
    run.push_prose(&strip_links(&text[last..]));
    run
}

fn strip_links(text: &str) -> String {
    let text = IMAGE.replace_all(text, |caps: &Captures| image_phrase(&caps[1]));
    LINK.replace_all(&text, "$1").into_owned()
}
