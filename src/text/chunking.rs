use super::{char_len, split_sentences};
use crate::error::AppError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MAX_CHARS: usize = 2000;

const HEADING_PREFIX: &str = "Section: ";

static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    #[default]
    Paragraph,
    Sentence,
    Heading,
    MaxChars,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Sentence => "sentence",
            Self::Heading => "heading",
            Self::MaxChars => "max_chars",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(Self::Paragraph),
            "sentence" => Ok(Self::Sentence),
            "heading" => Ok(Self::Heading),
            "max_chars" => Ok(Self::MaxChars),
            other => Err(AppError::InvalidConfig(format!(
                "Unknown chunk strategy: {}",
                other
            ))),
        }
    }
}

/// One labeled piece of narration text. `index` is 0-based and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub label: String,
}

/// Split normalized text into ordered, labeled chunks.
///
/// Whitespace-only input yields an empty list; callers creating an episode
/// must treat that as an error.
pub fn chunk_text(text: &str, strategy: ChunkStrategy, max_chars: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let raw = match strategy {
        ChunkStrategy::Paragraph => by_paragraph(text, max_chars),
        ChunkStrategy::Sentence => by_sentence(text),
        ChunkStrategy::Heading => by_heading(text, max_chars),
        ChunkStrategy::MaxChars => by_max_chars(text, max_chars),
    };

    raw.into_iter()
        .filter_map(|(body, label)| {
            let body = body.trim();
            (!body.is_empty()).then(|| (body.to_string(), label))
        })
        .enumerate()
        .map(|(index, (text, label))| TextChunk {
            index,
            text,
            label: label.unwrap_or_else(|| format!("Chunk {}", index + 1)),
        })
        .collect()
}

type RawChunk = (String, Option<String>);

/// Greedy paragraph packing. A paragraph longer than the bound is kept whole.
fn by_paragraph(text: &str, max_chars: usize) -> Vec<RawChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for para in PARAGRAPH_BREAK.split(text) {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        let para_len = char_len(para);
        if current.is_empty() {
            current.push_str(para);
            current_len = para_len;
        } else if current_len + para_len + 2 > max_chars {
            let part = format!("Part {}", chunks.len() + 1);
            chunks.push((std::mem::take(&mut current), Some(part)));
            current.push_str(para);
            current_len = para_len;
        } else {
            current.push_str("\n\n");
            current.push_str(para);
            current_len += para_len + 2;
        }
    }

    if !current.trim().is_empty() {
        let part = format!("Part {}", chunks.len() + 1);
        chunks.push((current, Some(part)));
    }

    chunks
}

/// One sentence per chunk regardless of length.
fn by_sentence(text: &str) -> Vec<RawChunk> {
    split_sentences(text)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, s)| (s.to_string(), Some(format!("Part {}", i + 1))))
        .collect()
}

/// Split before every `Section: ...` line the normalizer emits. Oversized
/// sections fall back to paragraph packing with numbered sub-labels.
fn by_heading(text: &str, max_chars: usize) -> Vec<RawChunk> {
    let mut sections: Vec<Vec<&str>> = vec![Vec::new()];
    for line in text.lines() {
        let starts_section = line
            .strip_prefix(HEADING_PREFIX)
            .is_some_and(|rest| !rest.is_empty());
        if starts_section && sections.last().is_some_and(|s| !s.is_empty()) {
            sections.push(Vec::new());
        }
        if let Some(current) = sections.last_mut() {
            current.push(line);
        }
    }

    let mut chunks = Vec::new();
    for lines in sections {
        let section = lines.join("\n");
        let section = section.trim();
        if section.is_empty() {
            continue;
        }

        let label = heading_label(section);
        if char_len(section) > max_chars {
            for (i, (sub_text, _)) in by_paragraph(section, max_chars).into_iter().enumerate() {
                let sub_label = label.as_ref().map(|l| format!("{} ({})", l, i + 1));
                chunks.push((sub_text, sub_label));
            }
        } else {
            chunks.push((section.to_string(), label));
        }
    }

    chunks
}

fn heading_label(section: &str) -> Option<String> {
    let first = section.lines().next()?;
    let heading = first.strip_prefix(HEADING_PREFIX)?.trim_end();
    let heading = heading.strip_suffix('.').unwrap_or(heading).trim_end();
    (!heading.is_empty()).then(|| heading.to_string())
}

/// Word-boundary packing; never splits inside a word.
fn by_max_chars(text: &str, max_chars: usize) -> Vec<RawChunk> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = char_len(word);
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + word_len + 1 > max_chars {
            let part = format!("Part {}", chunks.len() + 1);
            chunks.push((std::mem::take(&mut current), Some(part)));
            current.push_str(word);
            current_len = word_len;
        } else {
            current.push(' ');
            current.push_str(word);
            current_len += word_len + 1;
        }
    }

    if !current.is_empty() {
        let part = format!("Part {}", chunks.len() + 1);
        chunks.push((current, Some(part)));
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[TextChunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        for strategy in [
            ChunkStrategy::Paragraph,
            ChunkStrategy::Sentence,
            ChunkStrategy::Heading,
            ChunkStrategy::MaxChars,
        ] {
            assert!(chunk_text("", strategy, 100).is_empty());
            assert!(chunk_text("  \n\n\t ", strategy, 100).is_empty());
        }
    }

    #[test]
    fn test_unknown_strategy_is_invalid_config() {
        let err = "chapters".parse::<ChunkStrategy>().unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
        assert_eq!("max_chars".parse::<ChunkStrategy>().unwrap(), ChunkStrategy::MaxChars);
    }

    // =========================================================================
    // Paragraph strategy
    // =========================================================================

    #[test]
    fn test_paragraphs_that_fit_are_merged() {
        let text = format!("{}\n\n{}", "a".repeat(500), "b".repeat(1400));
        let chunks = chunk_text(&text, ChunkStrategy::Paragraph, 2000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].label, "Part 1");
    }

    #[test]
    fn test_paragraphs_that_overflow_are_split() {
        let text = format!("{}\n\n{}", "a".repeat(1200), "b".repeat(1200));
        let chunks = chunk_text(&text, ChunkStrategy::Paragraph, 2000);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "a".repeat(1200));
        assert_eq!(chunks[1].label, "Part 2");
    }

    #[test]
    fn test_oversized_paragraph_is_not_split() {
        let text = "word ".repeat(100);
        let chunks = chunk_text(&text, ChunkStrategy::Paragraph, 50);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_paragraph_separator_counts_toward_bound() {
        // 4 + 2 + 4 = 10 fits exactly, one more char does not
        let fits = chunk_text("aaaa\n\nbbbb", ChunkStrategy::Paragraph, 10);
        assert_eq!(texts(&fits), vec!["aaaa\n\nbbbb"]);
        let splits = chunk_text("aaaa\n\nbbbbb", ChunkStrategy::Paragraph, 10);
        assert_eq!(texts(&splits), vec!["aaaa", "bbbbb"]);
    }

    // =========================================================================
    // Sentence strategy
    // =========================================================================

    #[test]
    fn test_sentence_strategy_one_chunk_per_sentence() {
        let chunks = chunk_text("Hello world. Goodbye now! Wait?", ChunkStrategy::Sentence, 5);
        assert_eq!(texts(&chunks), vec!["Hello world.", "Goodbye now!", "Wait?"]);
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    // =========================================================================
    // Heading strategy
    // =========================================================================

    #[test]
    fn test_heading_strategy_labels_from_sections() {
        let text = "Intro words.\n\nSection: Setup.\n\nInstall it.\n\nSection: Usage.\n\nRun it.";
        let chunks = chunk_text(text, ChunkStrategy::Heading, 2000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].label, "Chunk 1");
        assert_eq!(chunks[1].label, "Setup");
        assert_eq!(chunks[1].text, "Section: Setup.\n\nInstall it.");
        assert_eq!(chunks[2].label, "Usage");
    }

    #[test]
    fn test_heading_strategy_splits_long_sections() {
        let body = format!("{}\n\n{}", "x".repeat(30), "y".repeat(30));
        let text = format!("Section: Long.\n\n{}", body);
        let chunks = chunk_text(&text, ChunkStrategy::Heading, 50);
        let labels: Vec<&str> = chunks.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Long (1)", "Long (2)"]);
        assert!(chunks[0].text.starts_with("Section: Long."));
    }

    // =========================================================================
    // Max chars strategy
    // =========================================================================

    #[test]
    fn test_max_chars_never_splits_words() {
        let text = "the quick brown fox jumps over the lazy dog again and again";
        let words: Vec<&str> = text.split_whitespace().collect();
        for bound in 5..40 {
            let chunks = chunk_text(text, ChunkStrategy::MaxChars, bound);
            let mut rebuilt = Vec::new();
            for chunk in &chunks {
                assert!(chunk.text.chars().count() <= bound);
                rebuilt.extend(chunk.text.split_whitespace());
            }
            assert_eq!(rebuilt, words, "bound {}", bound);
        }
    }

    #[test]
    fn test_max_chars_packs_greedily() {
        let chunks = chunk_text("aa bb cc dd", ChunkStrategy::MaxChars, 5);
        assert_eq!(texts(&chunks), vec!["aa bb", "cc dd"]);
    }

    #[test]
    fn test_long_multibyte_input_packs_to_the_bound() {
        let text = vec!["héllo"; 5000].join(" ");
        let chunks = chunk_text(&text, ChunkStrategy::MaxChars, 100);
        // 16 words plus separators is 95 chars; a 17th would overflow.
        assert_eq!(chunks.len(), 5000usize.div_ceil(16));
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.text.chars().count(), 95);
        }

        let paragraphs = vec!["ça va"; 3000].join("\n\n");
        let chunks = chunk_text(&paragraphs, ChunkStrategy::Paragraph, 50);
        // 7 paragraphs of 5 chars joined by blank lines is 47 chars.
        assert_eq!(chunks.len(), 3000usize.div_ceil(7));
        assert_eq!(chunks[0].text.chars().count(), 47);
    }
}
