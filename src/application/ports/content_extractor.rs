use async_trait::async_trait;

use crate::domain::{Document, ExtractedContent, FailureKind, StageFailure};

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(
        &self,
        data: &[u8],
        document: &Document,
    ) -> Result<ExtractedContent, ExtractorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("corrupt input: {0}")]
    CorruptInput(String),
    #[error("no text found in {0}")]
    NoTextFound(String),
    #[error("transient read failure: {0}")]
    TransientRead(String),
}

impl From<ExtractorError> for StageFailure {
    fn from(e: ExtractorError) -> Self {
        let kind = match e {
            ExtractorError::TransientRead(_) => FailureKind::Transient,
            _ => FailureKind::Malformed,
        };
        StageFailure {
            kind,
            message: e.to_string(),
            retry_after: None,
        }
    }
}
