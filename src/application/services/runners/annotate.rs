use std::sync::Arc;

use async_trait::async_trait;

use super::StageRunner;
use crate::application::ports::{BlobStore, Captioner};
use crate::domain::{ProcessingJob, Stage, StageFailure, StageOutputs, StagedImage, TextBlock};

/// Captions each staged image region and splices the caption into the text
/// stream at the image's original position.
pub struct AnnotateRunner {
    blob_store: Arc<dyn BlobStore>,
    captioner: Arc<dyn Captioner>,
}

impl AnnotateRunner {
    pub fn new(blob_store: Arc<dyn BlobStore>, captioner: Arc<dyn Captioner>) -> Self {
        Self {
            blob_store,
            captioner,
        }
    }

    fn splice_captions(blocks: &[TextBlock], captions: &[(usize, String)]) -> String {
        let mut combined = String::new();
        for (i, block) in blocks.iter().enumerate() {
            if i > 0 {
                combined.push_str("\n\n");
            }
            combined.push_str(&block.text);
        }

        // Insert from the back so earlier positions stay valid.
        let mut ordered: Vec<&(usize, String)> = captions.iter().collect();
        ordered.sort_by(|a, b| b.0.cmp(&a.0));

        let chars: Vec<char> = combined.chars().collect();
        let mut result: Vec<char> = chars;
        for (position, caption) in ordered {
            let at = (*position).min(result.len());
            let insert: Vec<char> = format!("\n\n[Image: {}]", caption).chars().collect();
            result.splice(at..at, insert);
        }

        result.into_iter().collect::<String>().trim().to_string()
    }
}

#[async_trait]
impl StageRunner for AnnotateRunner {
    fn stage(&self) -> Stage {
        Stage::Annotate
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, document_id = %job.document_id))]
    async fn run(&self, job: &ProcessingJob) -> Result<StageOutputs, StageFailure> {
        let (blocks, images): (Vec<TextBlock>, Vec<StagedImage>) = match &job.payload {
            Some(StageOutputs::Extracted { blocks, images }) => {
                (blocks.clone(), images.clone())
            }
            _ => {
                return Err(StageFailure::malformed(
                    "annotate job carries no extraction payload",
                ));
            }
        };

        let mut captions: Vec<(usize, String)> = Vec::with_capacity(images.len());
        for image in &images {
            let bytes = self
                .blob_store
                .fetch(&image.key)
                .await
                .map_err(StageFailure::from)?;

            let caption = self
                .captioner
                .caption(&bytes)
                .await
                .map_err(StageFailure::from)?;

            tracing::debug!(key = %image.key, caption_chars = caption.chars().count(), "Image captioned");
            captions.push((image.position, caption));
        }

        let text = Self::splice_captions(&blocks, &captions);
        if text.is_empty() {
            return Err(StageFailure::malformed("no text after annotation"));
        }

        // All captions are in; the staged bytes are no longer needed.
        for image in &images {
            if let Err(e) = self.blob_store.delete(&image.key).await {
                tracing::warn!(error = %e, key = %image.key, "Failed to delete staged image");
            }
        }

        Ok(StageOutputs::Annotated { text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str, offset: usize) -> TextBlock {
        TextBlock {
            text: text.to_string(),
            page: None,
            offset,
        }
    }

    #[test]
    fn given_caption_between_blocks_when_splicing_then_caption_lands_at_recorded_position() {
        let blocks = vec![block("Hello", 0), block("World", 7)];
        let captions = vec![(5, "a cat".to_string())];

        let text = AnnotateRunner::splice_captions(&blocks, &captions);
        assert_eq!(text, "Hello\n\n[Image: a cat]\n\nWorld");
    }

    #[test]
    fn given_multiple_captions_when_splicing_then_earlier_positions_stay_valid() {
        let blocks = vec![block("aaaa", 0), block("bbbb", 6)];
        let captions = vec![(4, "first".to_string()), (10, "second".to_string())];

        let text = AnnotateRunner::splice_captions(&blocks, &captions);
        assert_eq!(text, "aaaa\n\n[Image: first]\n\nbbbb\n\n[Image: second]");
    }

    #[test]
    fn given_no_captions_when_splicing_then_blocks_are_joined_unchanged() {
        let blocks = vec![block("one", 0), block("two", 5)];
        let text = AnnotateRunner::splice_captions(&blocks, &[]);
        assert_eq!(text, "one\n\ntwo");
    }
}
