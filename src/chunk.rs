//! Paragraph-boundary text chunker.
//!
//! Splits page text into [`TextChunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! to preserve semantic coherence within each chunk. Each chunk records its
//! character offset within the input text.

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Character (not byte) offset of the chunk start in the input.
    pub offset: usize,
    pub text: String,
}

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Empty or whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<TextChunk> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let mut chunks = Vec::new();
    let mut current_buf = String::new();
    let mut current_start = 0usize;

    let mut cursor = 0usize;
    for para in text.split("\n\n") {
        let para_start = cursor;
        cursor += para.len() + 2;

        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let trimmed_start = para_start + (para.len() - para.trim_start().len());

        // If adding this paragraph would exceed max, flush current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !current_buf.is_empty() {
            chunks.push(make_chunk(text, current_start, &current_buf));
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            // Hard split at max_chars boundaries, preferring newline or space
            let mut remaining = trimmed;
            let mut start = trimmed_start;
            while !remaining.is_empty() {
                let mut split_at = remaining.len().min(max_chars);
                while !remaining.is_char_boundary(split_at) {
                    split_at -= 1;
                }
                if split_at == 0 {
                    split_at = remaining
                        .char_indices()
                        .nth(1)
                        .map(|(i, _)| i)
                        .unwrap_or(remaining.len());
                }
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .filter(|pos| *pos > 0)
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = &remaining[..actual_split];
                let lead = piece.len() - piece.trim_start().len();
                if !piece.trim().is_empty() {
                    chunks.push(make_chunk(text, start + lead, piece.trim()));
                }
                start += actual_split;
                remaining = &remaining[actual_split..];
            }
        } else {
            if current_buf.is_empty() {
                current_start = trimmed_start;
            } else {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        chunks.push(make_chunk(text, current_start, &current_buf));
    }
    chunks
}

fn make_chunk(source: &str, byte_offset: usize, text: &str) -> TextChunk {
    TextChunk {
        offset: source[..byte_offset].chars().count(),
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 700);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 700).is_empty());
        assert!(chunk_text("  \n\n  ", 700).is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 700);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text(text, 5);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 20, "chunk too long: {:?}", c.text);
        }
    }

    #[test]
    fn test_offsets_point_into_source() {
        let text = "Alpha one.\n\n  Beta two.\n\nGamma three.";
        let chunks = chunk_text(text, 3);
        let chars: Vec<char> = text.chars().collect();
        for c in &chunks {
            let at: String = chars[c.offset..c.offset + c.text.chars().count()]
                .iter()
                .collect();
            assert_eq!(at, c.text);
        }
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "ü".repeat(50);
        let chunks = chunk_text(&text, 2);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(chunk_text(text, 5), chunk_text(text, 5));
    }
}
