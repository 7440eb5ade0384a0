use super::{char_len, split_sentences};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Spread `duration_secs` over the words of `text`.
///
/// Each sentence gets a share proportional to its non-whitespace character
/// count, and each word a share of its sentence proportional to its length.
/// This is an estimate for highlighting during playback, not an alignment:
/// it knows nothing about how the voice actually paced the words.
pub fn estimate_timings(text: &str, duration_secs: f64) -> Vec<WordTiming> {
    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Vec::new();
    }

    let sentences: Vec<Vec<&str>> = split_sentences(text)
        .into_iter()
        .map(|s| s.split_whitespace().collect::<Vec<_>>())
        .filter(|words| !words.is_empty())
        .collect();

    let total_chars: usize = sentences
        .iter()
        .flat_map(|words| words.iter())
        .map(|w| char_len(w))
        .sum();
    if total_chars == 0 {
        return Vec::new();
    }

    let mut timings = Vec::new();
    let mut sentence_start = 0.0;

    for words in sentences {
        let sentence_chars: usize = words.iter().map(|w| char_len(w)).sum();
        let sentence_duration = duration_secs * sentence_chars as f64 / total_chars as f64;

        let mut consumed = 0usize;
        for word in words {
            let start =
                sentence_start + sentence_duration * consumed as f64 / sentence_chars as f64;
            consumed += char_len(word);
            let end =
                sentence_start + sentence_duration * consumed as f64 / sentence_chars as f64;
            timings.push(WordTiming {
                word: word.to_string(),
                start,
                end,
            });
        }

        sentence_start += sentence_duration;
    }

    // Pin the tail so rounding never leaves a gap at the end of the clip
    if let Some(last) = timings.last_mut() {
        last.end = duration_secs;
    }

    timings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_sentences_cover_full_duration() {
        let timings = estimate_timings("Hi. Bye.", 2.0);
        let words: Vec<&str> = timings.iter().map(|t| t.word.as_str()).collect();
        assert_eq!(words, vec!["Hi.", "Bye."]);

        assert!((timings.last().unwrap().end - 2.0).abs() < 1e-9);
        for pair in timings.windows(2) {
            assert!(pair[0].end <= pair[1].start + 1e-9);
        }
        for t in &timings {
            assert!(t.start <= t.end);
        }
    }

    #[test]
    fn test_shares_follow_character_counts() {
        // "Hi." is 3 of 7 characters
        let timings = estimate_timings("Hi. Bye.", 7.0);
        assert!((timings[0].end - 3.0).abs() < 1e-9);
        assert!((timings[1].start - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_input_is_empty() {
        assert!(estimate_timings("", 3.0).is_empty());
        assert!(estimate_timings("   \n ", 3.0).is_empty());
        assert!(estimate_timings("Hello.", f64::NAN).is_empty());
    }

    #[test]
    fn test_zero_duration_gives_zero_length_words() {
        let timings = estimate_timings("One two.", 0.0);
        assert_eq!(timings.len(), 2);
        assert!(timings.iter().all(|t| t.start == 0.0 && t.end == 0.0));
    }
}
