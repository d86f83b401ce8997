use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{ContentExtractor, ExtractorError};
use crate::domain::{ContentType, Document, ExtractedContent};

use super::markdown_extractor::MarkdownExtractor;
use super::plain_text_extractor::PlainTextExtractor;

/// Routes extraction by the document's content type.
pub struct CompositeExtractor {
    plain_text: Arc<PlainTextExtractor>,
    markdown: Arc<MarkdownExtractor>,
}

impl CompositeExtractor {
    pub fn new() -> Self {
        Self {
            plain_text: Arc::new(PlainTextExtractor),
            markdown: Arc::new(MarkdownExtractor),
        }
    }
}

impl Default for CompositeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentExtractor for CompositeExtractor {
    async fn extract(
        &self,
        data: &[u8],
        document: &Document,
    ) -> Result<ExtractedContent, ExtractorError> {
        match document.content_type {
            ContentType::Text => self.plain_text.extract(data, document).await,
            ContentType::Markdown => self.markdown.extract(data, document).await,
        }
    }
}
