//! Sentence-aware text chunking with character overlap.

/// Default maximum characters per chunk.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1000;
/// Default number of characters shared by consecutive chunks.
pub const DEFAULT_OVERLAP_SIZE: usize = 200;
/// Trailing window of a candidate chunk searched for a sentence terminator.
const BOUNDARY_WINDOW: usize = 200;

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into overlapping chunks of at most `max_chunk_size` characters.
///
/// Offsets are measured in characters of the whitespace-normalized text.
/// Non-final chunks end after the last `. `, `! ` or `? ` inside their
/// trailing 200 characters when one exists. Each following chunk starts
/// `overlap_size` characters before the previous end, unless that would not
/// move forward, in which case it starts at the previous end.
#[must_use]
pub fn chunk_text(text: &str, max_chunk_size: usize, overlap_size: usize) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let max_chunk_size = max_chunk_size.max(1);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() <= max_chunk_size {
        return vec![normalized];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max_chunk_size).min(chars.len());
        if end < chars.len()
            && let Some(cut) = find_sentence_boundary(&chars, start, end)
        {
            end = cut;
        }

        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_owned());
        }

        if end >= chars.len() {
            break;
        }

        let next = end.saturating_sub(overlap_size);
        start = if next > start { next } else { end };
    }

    chunks
}

/// Position just after the last sentence terminator in the trailing window
/// of `chars[start..end]`.
///
/// The returned cut is always greater than `start`.
fn find_sentence_boundary(chars: &[char], start: usize, end: usize) -> Option<usize> {
    let window_start = end.saturating_sub(BOUNDARY_WINDOW).max(start);
    (window_start..end.saturating_sub(1))
        .rev()
        .find(|&idx| matches!(chars[idx], '.' | '!' | '?') && chars[idx + 1] == ' ')
        .map(|idx| idx + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alphabet_text(len: usize) -> String {
        (0..len)
            .map(|idx| char::from(b'a' + (idx % 26) as u8))
            .collect()
    }

    #[test]
    fn empty_and_blank_input_produce_no_chunks() {
        assert!(chunk_text("", 1000, 200).is_empty());
        assert!(chunk_text(" \n\t  ", 1000, 200).is_empty());
    }

    #[test]
    fn short_text_is_a_single_normalized_chunk() {
        let chunks = chunk_text("  Hello \n\n   world.\tSecond   line ", 1000, 200);
        assert_eq!(chunks, vec!["Hello world. Second line".to_owned()]);
    }

    #[test]
    fn text_exactly_at_limit_is_one_chunk() {
        let text = alphabet_text(1000);
        assert_eq!(chunk_text(&text, 1000, 200), vec![text]);
    }

    #[test]
    fn hard_boundaries_overlap_by_exact_amount() {
        let text = alphabet_text(2500);
        let chunks = chunk_text(&text, 1000, 200);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], text[0..1000]);
        assert_eq!(chunks[1], text[800..1800]);
        assert_eq!(chunks[2], text[1600..2500]);
        for pair in chunks.windows(2) {
            let tail = &pair[0][pair[0].len() - 200..];
            assert!(pair[1].starts_with(tail));
        }
    }

    #[test]
    fn cuts_prefer_sentence_terminators() {
        let text = "This sentence is exactly forty chars ok. ".repeat(60);
        let chunks = chunk_text(&text, 1000, 200);

        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.chars().count() <= 1000);
            assert!(chunk.ends_with('.'), "chunk should end at a sentence: {chunk:?}");
        }
    }

    #[test]
    fn question_and_exclamation_marks_are_terminators() {
        let mut text = alphabet_text(900);
        text.push_str(" Really? ");
        text.push_str(&alphabet_text(300));
        let chunks = chunk_text(&text, 1000, 200);
        assert!(chunks[0].ends_with("Really?"));

        let mut shout = alphabet_text(950);
        shout.push_str("! ");
        shout.push_str(&alphabet_text(300));
        assert!(chunk_text(&shout, 1000, 200)[0].ends_with('!'));
    }

    #[test]
    fn dense_terminators_still_make_progress() {
        let text = "a. ".repeat(400);
        let normalized_len = normalize_whitespace(&text).chars().count();
        let chunks = chunk_text(&text, 10, 8);

        assert!(!chunks.is_empty());
        assert!(chunks.len() <= normalized_len);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
    }

    #[test]
    fn overlap_not_smaller_than_chunk_still_terminates() {
        let text = alphabet_text(50);
        let chunks = chunk_text(&text, 10, 25);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn zero_chunk_size_is_treated_as_one() {
        let chunks = chunk_text("abc", 0, 0);
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    #[test]
    fn multibyte_text_is_measured_in_characters() {
        let text = "é".repeat(1500);
        let chunks = chunk_text(&text, 1000, 200);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[1].chars().count(), 700);
    }
}
