use async_trait::async_trait;

use crate::application::ports::{Chunker, ChunkerError};
use crate::domain::{Document, DocumentChunk, SourceSpan};

/// Fixed-size overlapping character windows. A trailing window shorter than
/// `min_tail` is folded into the previous chunk instead of standing alone.
pub struct WindowChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_tail: usize,
}

impl WindowChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_tail: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            min_tail,
        }
    }

    fn step(&self) -> usize {
        if self.chunk_size > self.chunk_overlap {
            self.chunk_size - self.chunk_overlap
        } else {
            self.chunk_size.max(1)
        }
    }

    /// The window starts for a text of `total_len` characters, before tail
    /// merging. Tests mirror this arithmetic.
    pub fn window_count(&self, total_len: usize) -> usize {
        if total_len == 0 {
            return 0;
        }

        let step = self.step();
        let mut count = 0;
        let mut start = 0;
        while start < total_len {
            let end = (start + self.chunk_size).min(total_len);
            let is_tail = end == total_len && start > 0;
            if !(is_tail && end - start < self.min_tail) {
                count += 1;
            }
            if end == total_len {
                break;
            }
            start += step;
        }
        count
    }
}

#[async_trait]
impl Chunker for WindowChunker {
    async fn chunk(
        &self,
        text: &str,
        document: &Document,
    ) -> Result<Vec<DocumentChunk>, ChunkerError> {
        let chars: Vec<char> = text.chars().collect();
        let total_len = chars.len();

        if total_len == 0 {
            return Err(ChunkerError::EmptyText);
        }

        let step = self.step();
        let mut chunks: Vec<DocumentChunk> = Vec::new();
        let mut start = 0usize;

        while start < total_len {
            let end = (start + self.chunk_size).min(total_len);

            if end == total_len && end - start < self.min_tail {
                if let Some(last) = chunks.last_mut() {
                    // Fold the short tail into the previous window; the id is
                    // re-derived because the window bounds changed.
                    let merged_start = last.span.start;
                    let merged_text: String = chars[merged_start..total_len].iter().collect();
                    *last = DocumentChunk::new(
                        document.id,
                        &document.content_hash,
                        last.ordinal,
                        merged_text,
                        SourceSpan {
                            page: last.span.page,
                            start: merged_start,
                            end: total_len,
                        },
                    );
                    break;
                }
            }

            let chunk_text: String = chars[start..end].iter().collect();
            chunks.push(DocumentChunk::new(
                document.id,
                &document.content_hash,
                chunks.len() as u32,
                chunk_text,
                SourceSpan {
                    page: None,
                    start,
                    end,
                },
            ));

            if end == total_len {
                break;
            }
            start += step;
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentType, StoragePath};

    fn test_document() -> Document {
        Document::new(
            StoragePath::from_raw("test/source"),
            "tester".to_string(),
            ContentType::Text,
            "feedbeef".to_string(),
        )
    }

    #[tokio::test]
    async fn given_text_when_chunking_then_windows_overlap_by_configured_amount() {
        let chunker = WindowChunker::new(10, 4, 2);
        let text: String = ('a'..='z').collect();
        let chunks = chunker.chunk(&text, &test_document()).await.unwrap();

        for pair in chunks.windows(2) {
            assert_eq!(pair[1].span.start, pair[0].span.start + 6);
        }
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 10 + 2));
    }

    #[tokio::test]
    async fn given_short_tail_when_chunking_then_tail_is_merged_into_prior_chunk() {
        // 17 chars with size 10 / overlap 4 leaves a 5-char window at offset
        // 12; min_tail 6 folds it into the window starting at 6.
        let chunker = WindowChunker::new(10, 4, 6);
        let text = "abcdefghijklmnopq";
        let chunks = chunker.chunk(text, &test_document()).await.unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "ghijklmnopq");
        assert_eq!(chunks[1].span.start, 6);
        assert_eq!(chunks[1].span.end, 17);
        assert_eq!(chunks.len(), chunker.window_count(17));
    }

    #[tokio::test]
    async fn given_unchanged_content_when_chunking_twice_then_chunk_ids_match() {
        let chunker = WindowChunker::new(10, 4, 2);
        let doc = test_document();
        let text = "the quick brown fox jumps over the lazy dog";

        let first = chunker.chunk(text, &doc).await.unwrap();
        let second = chunker.chunk(text, &doc).await.unwrap();

        let first_ids: Vec<_> = first.iter().map(|c| c.id).collect();
        let second_ids: Vec<_> = second.iter().map(|c| c.id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[tokio::test]
    async fn given_empty_text_when_chunking_then_empty_text_error_is_returned() {
        let chunker = WindowChunker::new(10, 4, 2);
        let result = chunker.chunk("", &test_document()).await;
        assert!(matches!(result, Err(ChunkerError::EmptyText)));
    }

    #[tokio::test]
    async fn given_long_text_when_counting_windows_then_arithmetic_matches_chunks() {
        let chunker = WindowChunker::new(1000, 200, 200);
        let text = "x".repeat(5000);
        let chunks = chunker.chunk(&text, &test_document()).await.unwrap();
        assert_eq!(chunks.len(), chunker.window_count(5000));
    }
}
