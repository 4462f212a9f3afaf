/// Splits source text into overlapping passages, preferring sentence boundaries.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(1500, 200)
    }
}

impl TextChunker {
    /// Sizes are in characters. Overlap is capped below the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size / 2),
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        if text.trim().is_empty() {
            return chunks;
        }

        let mut start = 0;
        while start < total {
            let mut end = (start + self.chunk_size).min(total);
            if end < total {
                // back up to the last sentence end in the second half of the window
                let floor = start + self.chunk_size / 2;
                if let Some(boundary) = (floor..end)
                    .rev()
                    .find(|&i| matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).is_some_and(|c| c.is_whitespace()))
                {
                    end = boundary + 1;
                }
            }

            let chunk: String = chars[start..end].iter().collect();
            let trimmed = chunk.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= total {
                break;
            }
            start = end.saturating_sub(self.chunk_overlap).max(start + 1);
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = TextChunker::default();
        assert_eq!(chunker.chunk("A short note."), vec!["A short note.".to_string()]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(TextChunker::default().chunk("  ").is_empty());
    }

    #[test]
    fn test_chunks_break_on_sentences_and_overlap() {
        let sentence = "Ownership keeps memory safe without a collector. ";
        let text = sentence.repeat(10);
        let chunker = TextChunker::new(120, 30);
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'), "chunk did not end on a sentence: {:?}", chunk);
            assert!(chunk.chars().count() <= 120);
        }
    }

    #[test]
    fn test_covers_whole_text() {
        let text = "x".repeat(1000);
        let chunks = TextChunker::new(300, 50).chunk(&text);
        let last = chunks.last().unwrap();
        assert!(last.ends_with('x'));
        assert!(chunks.len() >= 4);
    }
}
