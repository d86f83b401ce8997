use std::sync::LazyLock;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use regex::Regex;

use crate::application::ports::{ContentExtractor, ExtractorError};
use crate::domain::{ContentType, Document, ExtractedContent, ImageRegion, TextBlock};

use super::text_sanitizer::sanitize_extracted_text;

static INLINE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\(data:image/(?:png|jpe?g|gif|webp);base64,(?P<data>[A-Za-z0-9+/=\s]+)\)")
        .unwrap()
});

/// Markdown source adapter: the text stream is the document minus its inline
/// data-URI images; each image becomes an `ImageRegion` pinned to the
/// character offset where its caption belongs.
pub struct MarkdownExtractor;

#[async_trait]
impl ContentExtractor for MarkdownExtractor {
    async fn extract(
        &self,
        data: &[u8],
        document: &Document,
    ) -> Result<ExtractedContent, ExtractorError> {
        if document.content_type != ContentType::Markdown {
            return Err(ExtractorError::UnsupportedContentType(
                document.content_type.as_mime().to_string(),
            ));
        }

        let raw = String::from_utf8(data.to_vec())
            .map_err(|e| ExtractorError::CorruptInput(e.to_string()))?;

        let mut blocks: Vec<TextBlock> = Vec::new();
        let mut images: Vec<ImageRegion> = Vec::new();
        let mut combined_len = 0usize;
        let mut cursor = 0usize;

        for capture in INLINE_IMAGE.captures_iter(&raw) {
            let whole = capture.get(0).expect("capture 0 always present");

            let segment = sanitize_extracted_text(&raw[cursor..whole.start()]);
            if !segment.is_empty() {
                if combined_len > 0 {
                    combined_len += 2;
                }
                let offset = combined_len;
                combined_len += segment.chars().count();
                blocks.push(TextBlock {
                    text: segment,
                    page: None,
                    offset,
                });
            }

            let encoded: String = capture["data"].chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| {
                    ExtractorError::CorruptInput(format!("inline image base64: {e}"))
                })?;

            images.push(ImageRegion {
                bytes,
                page: None,
                position: combined_len,
            });

            cursor = whole.end();
        }

        let tail = sanitize_extracted_text(&raw[cursor..]);
        if !tail.is_empty() {
            if combined_len > 0 {
                combined_len += 2;
            }
            blocks.push(TextBlock {
                text: tail,
                page: None,
                offset: combined_len,
            });
        }

        if blocks.is_empty() && images.is_empty() {
            return Err(ExtractorError::NoTextFound(
                document.source_locator.to_string(),
            ));
        }

        Ok(ExtractedContent { blocks, images })
    }
}
