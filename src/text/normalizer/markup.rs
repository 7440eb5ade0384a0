//! First pass: strip raw HTML and inline markdown decoration.
//!
//! Fenced code blocks and inline code spans pass through untouched so the
//! block pass can apply the code rule to their original content.

use super::image_phrase;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static HTML_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static DOCTYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<!DOCTYPE[^>]*>").unwrap());
static SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:br|hr|p|div|li|tr|td|th|h[1-6]|blockquote|section|article)\b[^>]*>")
        .unwrap()
});
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?([a-zA-Z][^<>\n]*)>").unwrap());

static IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());

static BOLD_STARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*([^*\s][^*\n]*?)\*\*").unwrap());
static BOLD_UNDERSCORES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b__([^_\s][^_\n]*?)__\b").unwrap());
static ITALIC_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*\s][^*\n]*?)\*").unwrap());
static ITALIC_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b_([^_\s][^_\n]*?)_\b").unwrap());
static STRIKETHROUGH: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~([^~\n]+)~~").unwrap());

static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());
static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

static INLINE_CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]+`").unwrap());

pub(super) fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prose = String::new();
    let mut fence: Option<char> = None;

    for line in text.split_inclusive('\n') {
        let marker = fence_marker(line);
        match (fence, marker) {
            (None, Some(m)) => {
                out.push_str(&strip_prose(&prose));
                prose.clear();
                fence = Some(m);
                out.push_str(line);
            }
            (Some(open), Some(m)) if open == m => {
                fence = None;
                out.push_str(line);
            }
            (Some(_), _) => out.push_str(line),
            (None, None) => prose.push_str(line),
        }
    }
    out.push_str(&strip_prose(&prose));

    EXCESS_NEWLINES.replace_all(&out, "\n\n").into_owned()
}

/// The fence character when `line` opens or closes a fenced code block.
pub(super) fn fence_marker(line: &str) -> Option<char> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    if trimmed.starts_with("```") {
        Some('`')
    } else if trimmed.starts_with("~~~") {
        Some('~')
    } else {
        None
    }
}

fn strip_prose(prose: &str) -> String {
    if prose.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(prose.len());
    let mut last = 0;
    for span in INLINE_CODE_SPAN.find_iter(prose) {
        out.push_str(&strip_segment(&prose[last..span.start()]));
        out.push_str(span.as_str());
        last = span.end();
    }
    out.push_str(&strip_segment(&prose[last..]));
    out
}

fn strip_segment(segment: &str) -> String {
    let text = HTML_COMMENT.replace_all(segment, "");
    let text = DOCTYPE.replace_all(&text, "");
    let text = SCRIPT.replace_all(&text, "");
    let text = STYLE.replace_all(&text, "");
    let text = BLOCK_TAG.replace_all(&text, "\n");
    let text = ANY_TAG.replace_all(&text, |caps: &Captures| {
        // `<https://...>` autolinks keep their target
        let inner = &caps[1];
        if inner.contains("://") {
            inner.to_string()
        } else {
            String::new()
        }
    });

    let text = IMAGE.replace_all(&text, |caps: &Captures| image_phrase(&caps[1]));
    let text = LINK.replace_all(&text, "$1");

    let text = BOLD_STARS.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORES.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");
    let text = STRIKETHROUGH.replace_all(&text, "$1");

    ENTITY
        .replace_all(&text, |caps: &Captures| {
            decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn decode_entity(name: &str) -> Option<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }

    let decoded = match name {
        "nbsp" => " ",
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "mdash" => "—",
        "ndash" => "–",
        "hellip" => "...",
        "lsquo" | "rsquo" => "'",
        "ldquo" | "rdquo" => "\"",
        "copy" => "(c)",
        _ => return None,
    };
    Some(decoded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_scripts_comments_and_tags() {
        let html = "<!DOCTYPE html><!-- hidden --><script>alert(1)</script><p>Hello <b>there</b></p>";
        assert_eq!(strip_markup(html).trim(), "Hello there");
    }

    #[test]
    fn test_block_tags_become_line_breaks() {
        let out = strip_markup("<p>One</p><p>Two</p>");
        assert_eq!(out, "\nOne\n\nTwo\n");
    }

    #[test]
    fn test_links_and_emphasis_reduce_to_text() {
        let out = strip_markup("See [the docs](https://x.io) for **bold** and _soft_ notes.");
        assert_eq!(out, "See the docs for bold and soft notes.");
    }

    #[test]
    fn test_images_become_phrases() {
        assert_eq!(strip_markup("![A cat](cat.png)"), "(Image: A cat)");
        assert_eq!(strip_markup("x ![](cat.png) y"), "x  y");
    }

    #[test]
    fn test_identifiers_keep_underscores() {
        assert_eq!(strip_markup("call snake_case_name now"), "call snake_case_name now");
    }

    #[test]
    fn test_multiplication_is_not_emphasis() {
        assert_eq!(strip_markup("2 * 3 * 4"), "2 * 3 * 4");
    }

    #[test]
    fn test_entities_decode() {
        assert_eq!(strip_markup("Tom &amp; Jerry&#33; &#x41;&nbsp;&bogus;"), "Tom & Jerry! A &bogus;");
    }

    #[test]
    fn test_fenced_code_is_untouched() {
        let text = "Intro **bold**\n```\n<div>*ptr*</div>\n```\nAfter";
        assert_eq!(strip_markup(text), "Intro bold\n```\n<div>*ptr*</div>\n```\nAfter");
    }

    #[test]
    fn test_inline_code_is_untouched() {
        assert_eq!(strip_markup("use `<T>` and *x*"), "use `<T>` and x");
    }

    #[test]
    fn test_collapses_blank_runs() {
        assert_eq!(strip_markup("a\n\n\n\n\nb"), "a\n\nb");
    }
}
