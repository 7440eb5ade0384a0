//! Pause cues for engines without prosody markup.
//!
//! The synthesizer only sees plain text, so pauses are simulated with extra
//! punctuation. Intensities are cumulative: `heavy` does everything `normal`
//! does, which does everything `light` does.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static CONJUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+(and|but|or|so|yet|for|nor)\s+").unwrap());

static INTRO_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(well|so|now|however|therefore|finally|first|second|then)[,.]?\s+").unwrap()
});

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*(\([^)]+\))").unwrap());
static EM_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"—\s*").unwrap());
static COLON: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s+").unwrap());
static DRAMATIC_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(suddenly|finally|amazingly|unfortunately|fortunately|interestingly)\s+",
    )
    .unwrap()
});

/// A conjunction only gets a comma when the clause before it is at least this long.
const MIN_CLAUSE_WORDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreathingIntensity {
    None,
    Light,
    #[default]
    Normal,
    Heavy,
}

impl BreathingIntensity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Light => "light",
            Self::Normal => "normal",
            Self::Heavy => "heavy",
        }
    }
}

impl fmt::Display for BreathingIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown names fall back to `normal`.
impl From<&str> for BreathingIntensity {
    fn from(s: &str) -> Self {
        match s {
            "none" => Self::None,
            "light" => Self::Light,
            "heavy" => Self::Heavy,
            _ => Self::Normal,
        }
    }
}

impl From<String> for BreathingIntensity {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

/// Insert pause punctuation paragraph by paragraph.
pub fn add_breathing(text: &str, intensity: BreathingIntensity) -> String {
    if intensity == BreathingIntensity::None {
        return text.to_string();
    }

    text.split("\n\n")
        .map(|paragraph| breathe_paragraph(paragraph, intensity))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn breathe_paragraph(paragraph: &str, intensity: BreathingIntensity) -> String {
    if paragraph.trim().is_empty() {
        return paragraph.to_string();
    }

    let mut text = paragraph.to_string();

    if intensity >= BreathingIntensity::Normal {
        text = INTRO_PHRASE.replace(&text, "${1}... ").into_owned();
    }

    let pause = if intensity == BreathingIntensity::Heavy {
        "..."
    } else {
        ","
    };
    text = add_sentence_pauses(&text, pause);

    if intensity >= BreathingIntensity::Normal {
        text = add_clause_pauses(&text);
    }

    if intensity == BreathingIntensity::Heavy {
        text = PARENTHETICAL.replace_all(&text, "... ${1}").into_owned();
        text = EM_DASH.replace_all(&text, "—... ").into_owned();
        text = COLON.replace_all(&text, ":... ").into_owned();
        text = DRAMATIC_WORD.replace_all(&text, "${1}... ").into_owned();
    }

    text
}

/// After `.`, `!` or `?` that is followed by whitespace and a capital letter,
/// append `pause`. The last dot of an existing ellipsis is left alone.
fn add_sentence_pauses(text: &str, pause: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut prev: Option<char> = None;

    for (i, c) in text.char_indices() {
        out.push(c);
        if matches!(c, '.' | '!' | '?') && !(c == '.' && prev == Some('.')) {
            let rest = &text[i + c.len_utf8()..];
            let next_word = rest.trim_start();
            if next_word.len() < rest.len() && next_word.starts_with(|ch: char| ch.is_ascii_uppercase()) {
                out.push_str(pause);
            }
        }
        prev = Some(c);
    }

    out
}

/// Comma before a coordinating conjunction that ends a long, unpunctuated run.
fn add_clause_pauses(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;

    for caps in CONJUNCTION.captures_iter(text) {
        let (Some(whole), Some(word)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let before = &text[last..whole.start()];
        out.push_str(before);

        if needs_clause_comma(&out) {
            out.push_str(", ");
        } else {
            out.push(' ');
        }
        out.push_str(word.as_str());
        out.push(' ');
        last = whole.end();
    }

    out.push_str(&text[last..]);
    out
}

fn needs_clause_comma(preceding: &str) -> bool {
    let Some(last_char) = preceding.trim_end().chars().last() else {
        return false;
    };
    if matches!(last_char, ',' | ';' | ':' | '.' | '!' | '?' | '—' | '-') {
        return false;
    }

    let clause_start = preceding
        .rfind(|c: char| matches!(c, ',' | ';' | ':' | '.' | '!' | '?' | '\n'))
        .map(|i| i + 1)
        .unwrap_or(0);
    preceding[clause_start..].split_whitespace().count() >= MIN_CLAUSE_WORDS
}
