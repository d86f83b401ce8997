use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{FailureKind, StageFailure};

/// External vision service: one caption per image region.
#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image: &[u8]) -> Result<String, CaptionerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CaptionerError {
    #[error("caption api request failed: {0}")]
    ApiRequestFailed(String),
    #[error("caption request timed out")]
    Timeout,
    #[error("caption service rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("caption quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("invalid caption response: {0}")]
    InvalidResponse(String),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
}

impl From<CaptionerError> for StageFailure {
    fn from(e: CaptionerError) -> Self {
        let (kind, retry_after) = match &e {
            CaptionerError::ApiRequestFailed(_) | CaptionerError::Timeout => {
                (FailureKind::Transient, None)
            }
            CaptionerError::RateLimited { retry_after } => (FailureKind::Transient, *retry_after),
            CaptionerError::QuotaExhausted(_) => (FailureKind::ResourceExhausted, None),
            CaptionerError::InvalidResponse(_) | CaptionerError::UnsupportedImage(_) => {
                (FailureKind::Malformed, None)
            }
        };
        StageFailure {
            kind,
            message: e.to_string(),
            retry_after,
        }
    }
}
