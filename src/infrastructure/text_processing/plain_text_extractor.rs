use async_trait::async_trait;

use crate::application::ports::{ContentExtractor, ExtractorError};
use crate::domain::{ContentType, Document, ExtractedContent, TextBlock};

use super::text_sanitizer::sanitize_extracted_text;

pub struct PlainTextExtractor;

#[async_trait]
impl ContentExtractor for PlainTextExtractor {
    async fn extract(
        &self,
        data: &[u8],
        document: &Document,
    ) -> Result<ExtractedContent, ExtractorError> {
        if document.content_type != ContentType::Text {
            return Err(ExtractorError::UnsupportedContentType(
                document.content_type.as_mime().to_string(),
            ));
        }

        let raw = String::from_utf8(data.to_vec())
            .map_err(|e| ExtractorError::CorruptInput(e.to_string()))?;
        let text = sanitize_extracted_text(&raw);

        if text.is_empty() {
            return Err(ExtractorError::NoTextFound(
                document.source_locator.to_string(),
            ));
        }

        Ok(ExtractedContent {
            blocks: vec![TextBlock {
                text,
                page: None,
                offset: 0,
            }],
            images: Vec::new(),
        })
    }
}
