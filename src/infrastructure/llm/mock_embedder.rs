use async_trait::async_trait;

use crate::application::ports::{Embedder, EmbedderError};
use crate::domain::Embedding;

/// Deterministic embedder for tests and offline runs; vectors depend on the
/// input so similarity search stays non-degenerate.
pub struct MockEmbedder {
    dimensions: usize,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vector_for(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimensions];
        for (i, byte) in text.bytes().enumerate() {
            values[i % self.dimensions] += byte as f32 / 255.0;
        }
        Embedding::new(values)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedderError> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbedderError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
