//! Pure text pipeline: raw markup → speakable prose → bounded chunks → paced
//! narration text, plus the heuristic word-timing estimate recorded per chunk.
//!
//! Nothing in here touches the database, the filesystem or the clock.

pub mod breathing;
pub mod chunking;
pub mod normalizer;
pub mod timing;
pub mod title;

pub use breathing::{add_breathing, BreathingIntensity};
pub use chunking::{chunk_text, ChunkStrategy, TextChunk, DEFAULT_MAX_CHARS};
pub use normalizer::{normalize, CleaningOptions, CodeBlockRule};
pub use timing::{estimate_timings, WordTiming};
pub use title::extract_title;

/// Split on sentence-terminal punctuation (`.`, `!`, `?`) followed by
/// whitespace. The punctuation stays with the sentence it ends and the
/// whitespace run between sentences is consumed. Pieces are not trimmed and
/// may be empty (e.g. trailing whitespace after the last sentence).
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            pieces.push(&text[start..i]);
            let mut end = i + c.len_utf8();
            while let Some(&(j, next)) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                end = j + next.len_utf8();
                chars.next();
            }
            start = end;
            prev = None;
            continue;
        }
        prev = Some(c);
    }

    pieces.push(&text[start..]);
    pieces
}

/// Length in characters, which is what every size bound in this module counts.
pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}
