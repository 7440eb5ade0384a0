//! Cleanup applied to each run of inline text.

use super::{inline_code, CleaningOptions};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashMap;

const ABBREVIATIONS: &[(&str, &str)] = &[
    ("dr.", "doctor"),
    ("mr.", "mister"),
    ("mrs.", "misses"),
    ("ms.", "miss"),
    ("st.", "saint"),
    ("ave.", "avenue"),
    ("blvd.", "boulevard"),
    ("rd.", "road"),
    ("no.", "number"),
    ("vol.", "volume"),
    ("etc.", "et cetera"),
    ("i.e.", "that is"),
    ("e.g.", "for example"),
    ("vs.", "versus"),
    ("fig.", "figure"),
    ("et al.", "and others"),
    ("pp.", "pages"),
    ("ch.", "chapter"),
    ("sec.", "section"),
    ("approx.", "approximately"),
    ("dept.", "department"),
];

static ABBREVIATION_LOOKUP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| ABBREVIATIONS.iter().copied().collect());

/// One alternation, longest abbreviation first so "et al." wins over shorter overlaps.
static ABBREVIATION: Lazy<Regex> = Lazy::new(|| {
    let mut keys: Vec<&str> = ABBREVIATIONS.iter().map(|(abbr, _)| *abbr).collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let alternation = keys
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{})", alternation)).unwrap()
});

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://([^\s\])}>]+)").unwrap());

static NON_SPEECH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-—•*|#_~`\[\]{}<>^&%$@=+]").unwrap());
static NON_SPEECH_WITH_PARENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-—•*|#_~`\[\]{}()<>^&%$@=+]").unwrap());

static CARET_OR_PIPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\^|]").unwrap());
static LONG_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"[‒–―]").unwrap());
static HYPHEN_VARIANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[‐‑]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+([.,;:!?])").unwrap());

/// Inline text of one block, with code spans kept apart from the prose.
#[derive(Debug, Default)]
pub(super) struct InlineRun {
    spans: Vec<Span>,
}

#[derive(Debug)]
enum Span {
    Prose(String),
    Code(String),
}

impl InlineRun {
    pub(super) fn push_prose(&mut self, text: &str) {
        match self.spans.last_mut() {
            Some(Span::Prose(last)) => last.push_str(text),
            _ => self.spans.push(Span::Prose(text.to_string())),
        }
    }

    pub(super) fn push_code(&mut self, code: &str) {
        self.spans.push(Span::Code(code.to_string()));
    }

    /// Append another run, separated by `separator` prose.
    pub(super) fn append(&mut self, other: InlineRun, separator: &str) {
        if !self.spans.is_empty() {
            self.push_prose(separator);
        }
        for span in other.spans {
            match span {
                Span::Prose(text) => self.push_prose(&text),
                Span::Code(code) => self.spans.push(Span::Code(code)),
            }
        }
    }

    pub(super) fn is_blank(&self) -> bool {
        self.spans.iter().all(|span| match span {
            Span::Prose(text) | Span::Code(text) => text.trim().is_empty(),
        })
    }

    /// URLs and abbreviations are rewritten in prose only. Code spans follow
    /// the code rule, then the whole run gets the aggressive or light cleanup.
    pub(super) fn clean(self, options: &CleaningOptions) -> String {
        let mut text = String::new();
        for span in self.spans {
            match span {
                Span::Prose(prose) => text.push_str(&rewrite_prose(&prose, options)),
                Span::Code(code) => match inline_code(&code, options) {
                    Some(spoken) => text.push_str(spoken),
                    None => text.push(' '),
                },
            }
        }
        scrub(&text, options)
    }
}

fn rewrite_prose<'a>(text: &'a str, options: &CleaningOptions) -> Cow<'a, str> {
    let mut text = Cow::Borrowed(text);
    if options.speak_urls {
        text = Cow::Owned(speak_urls(&text));
    }
    if options.expand_abbreviations {
        text = Cow::Owned(expand_abbreviations(&text));
    }
    text
}

/// Code content skips URL and abbreviation rewriting.
pub(super) fn clean_code(code: &str, options: &CleaningOptions) -> String {
    scrub(code, options)
}

fn scrub(text: &str, options: &CleaningOptions) -> String {
    if options.remove_non_text {
        strip_non_speech(text, options.preserve_parentheses)
    } else {
        light_clean(text)
    }
}

/// `https://www.example.com/docs.` reads as `example.com/docs.`
fn speak_urls(text: &str) -> String {
    URL.replace_all(text, |caps: &Captures| {
        let target = &caps[1];
        let target = target.strip_prefix("www.").unwrap_or(target);
        let spoken = target.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        let trailing = &target[spoken.len()..];
        format!("{}{}", spoken.trim_end_matches('/'), trailing)
    })
    .into_owned()
}

fn expand_abbreviations(text: &str) -> String {
    ABBREVIATION
        .replace_all(text, |caps: &Captures| {
            let matched = &caps[0];
            let Some(expansion) = ABBREVIATION_LOOKUP.get(matched.to_lowercase().as_str()) else {
                return matched.to_string();
            };
            if matched.starts_with(|c: char| c.is_uppercase()) {
                capitalize(expansion)
            } else {
                expansion.to_string()
            }
        })
        .into_owned()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn strip_non_speech(text: &str, preserve_parentheses: bool) -> String {
    let pattern = if preserve_parentheses {
        &*NON_SPEECH
    } else {
        &*NON_SPEECH_WITH_PARENS
    };
    let text = pattern.replace_all(text, " ");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn light_clean(text: &str) -> String {
    let text = CARET_OR_PIPE.replace_all(text, " ");
    let text = LONG_DASH.replace_all(&text, "—");
    let text = HYPHEN_VARIANT.replace_all(&text, "-");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Last pass over the joined blocks.
pub(super) fn final_clean(text: &str) -> String {
    let text = EXCESS_NEWLINES.replace_all(text, "\n\n");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::normalizer::CodeBlockRule;

    #[test]
    fn test_abbreviations_preserve_capitalization() {
        assert_eq!(
            expand_abbreviations("Dr. Smith met Mr. Jones."),
            "Doctor Smith met Mister Jones."
        );
        assert_eq!(expand_abbreviations("see fig. 2"), "see figure 2");
    }

    #[test]
    fn test_longest_abbreviation_wins() {
        assert_eq!(expand_abbreviations("Smith et al. agree"), "Smith and others agree");
        assert_eq!(expand_abbreviations("Mrs. Doe"), "Misses Doe");
    }

    #[test]
    fn test_abbreviations_need_word_start() {
        assert_eq!(expand_abbreviations("a piano. A forest."), "a piano. A forest.");
    }

    #[test]
    fn test_urls_read_as_domains() {
        assert_eq!(
            speak_urls("Go to https://www.example.com/docs."),
            "Go to example.com/docs."
        );
        assert_eq!(speak_urls("(http://rust-lang.org/)"), "(rust-lang.org)");
    }

    #[test]
    fn test_light_clean_normalizes_dashes_and_space() {
        assert_eq!(light_clean("  a – b ^ c |  d ‐ e "), "a — b c d - e");
    }

    #[test]
    fn test_aggressive_strip_respects_parentheses_flag() {
        assert_eq!(strip_non_speech("x = (a + b) * #c", true), "x (a b) c");
        assert_eq!(strip_non_speech("x = (a + b) * #c", false), "x a b c");
    }

    #[test]
    fn test_code_spans_skip_prose_rewrites() {
        let read = CleaningOptions {
            code_block_rule: CodeBlockRule::Read,
            ..CleaningOptions::default()
        };
        let build = || {
            let mut run = InlineRun::default();
            run.push_prose("Dr. Lee ran ");
            run.push_code("st.run(https://x.io)");
            run.push_prose(" at https://www.x.io today");
            run
        };

        assert_eq!(
            build().clean(&read),
            "Doctor Lee ran st.run(https://x.io) at x.io today"
        );
        assert_eq!(
            build().clean(&CleaningOptions::default()),
            "Doctor Lee ran at x.io today"
        );
    }

    #[test]
    fn test_append_joins_cells() {
        let mut row = InlineRun::default();
        for cell in ["a", "b"] {
            let mut run = InlineRun::default();
            run.push_prose(cell);
            row.append(run, ". ");
        }
        assert_eq!(row.clean(&CleaningOptions::default()), "a. b");
        assert!(InlineRun::default().is_blank());
    }

    #[test]
    fn test_final_clean_tightens_punctuation() {
        assert_eq!(final_clean("Hello .\n\n\n\nWorld !"), "Hello.\n\nWorld!");
    }
}
