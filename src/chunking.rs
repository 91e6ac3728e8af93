//! Transcript and payload splitting.
//!
//! `split_text` favors sentence boundaries so each piece stays coherent for
//! the model; `split_bytes` is a plain fixed-size partition for audio
//! payloads that exceed the transcription service ceiling.

/// Split text into chunks of at most `max_chars + 1` characters each.
///
/// Each cut prefers the rightmost `". "` within the window, falling back to
/// the rightmost whitespace, and finally to a hard cut. Boundary candidates
/// in the left half of the window are rejected so chunks cannot degenerate.
/// Concatenating the returned chunks reproduces the input exactly.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.chars().count() > max_chars {
        let cut = cut_point(remaining, max_chars);
        chunks.push(remaining[..cut].to_string());
        remaining = &remaining[cut..];
    }
    if !remaining.is_empty() || chunks.is_empty() {
        chunks.push(remaining.to_string());
    }

    chunks
}

/// Byte offset at which to end the next chunk. `remaining` holds more than
/// `max_chars` characters.
fn cut_point(remaining: &str, max_chars: usize) -> usize {
    // Char positions up to one past the window, so a ". " straddling the
    // window edge is still visible.
    let positions: Vec<(usize, char)> = remaining.char_indices().take(max_chars + 2).collect();
    let end_of = |i: usize| positions.get(i + 1).map(|p| p.0).unwrap_or(remaining.len());

    let mut sentence: Option<usize> = None;
    let mut space: Option<usize> = None;
    for i in (0..=max_chars).rev() {
        let c = positions[i].1;
        if space.is_none() && c.is_whitespace() {
            space = Some(i);
        }
        if sentence.is_none() && c == '.' && positions.get(i + 1).map(|p| p.1) == Some(' ') {
            sentence = Some(i);
        }
        if space.is_some() && sentence.is_some() {
            break;
        }
    }

    // A candidate in the left half of the window is worse than a hard cut
    let split_at = match sentence {
        Some(i) if 2 * i >= max_chars => i,
        _ => match space {
            Some(i) if 2 * i >= max_chars => i,
            _ => max_chars,
        },
    };

    end_of(split_at)
}

/// Partition a byte payload into windows of at most `max_bytes`.
///
/// No boundary seeking; an empty payload yields no chunks.
pub fn split_bytes(data: &[u8], max_bytes: usize) -> Vec<&[u8]> {
    data.chunks(max_bytes.max(1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_lossless(text: &str, max_chars: usize) {
        let chunks = split_text(text, max_chars);
        assert_eq!(chunks.concat(), text);
        for chunk in &chunks {
            assert!(
                chunk.chars().count() <= max_chars + 1,
                "chunk of {} chars exceeds limit {}",
                chunk.chars().count(),
                max_chars
            );
        }
    }

    #[test]
    fn test_short_input_is_single_chunk() {
        assert_eq!(split_text("hello world", 100), vec!["hello world"]);
        assert_eq!(split_text("", 10), vec![""]);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let chunks = split_text("aaaa. bbbb. cccc", 12);
        assert_eq!(chunks, vec!["aaaa. bbbb.", " cccc"]);
    }

    #[test]
    fn test_falls_back_to_whitespace() {
        // The only sentence boundary sits in the left half of the window,
        // so the rightmost space wins instead
        let chunks = split_text("a. bcdefgh ijklmnopqrs", 10);
        assert_eq!(chunks[0], "a. bcdefgh ");
        assert_lossless("a. bcdefgh ijklmnopqrs", 10);
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let text = "a".repeat(25);
        let chunks = split_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 11);
        assert_eq!(chunks[1].len(), 11);
        assert_eq!(chunks[2].len(), 3);
        assert_lossless(&text, 10);
    }

    #[test]
    fn test_lossless_with_multibyte_chars() {
        let text = "höga berg och djupa dalar. ".repeat(40);
        assert_lossless(&text, 50);
        assert_lossless(&text, 7);
        assert_lossless(&text, 1);
    }

    #[test]
    fn test_uniform_long_input_chunk_count() {
        // 250k chars against a 100k window: two full windows plus remainder
        let text = "a".repeat(250_000);
        let chunks = split_text(&text, 100_000);
        assert_eq!(chunks.len(), 3);
        assert_lossless(&text, 100_000);
    }

    #[test]
    fn test_split_bytes_partition() {
        let data: Vec<u8> = (0..50).collect();
        let chunks = split_bytes(&data, 24);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 24);
        assert_eq!(chunks[1].len(), 24);
        assert_eq!(chunks[2].len(), 2);

        let rejoined: Vec<u8> = chunks.concat();
        assert_eq!(rejoined, data);
    }

    #[test]
    fn test_split_bytes_empty() {
        assert!(split_bytes(&[], 24).is_empty());
    }
}
