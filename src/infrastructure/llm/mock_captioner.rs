use async_trait::async_trait;

use crate::application::ports::{Captioner, CaptionerError};

/// Deterministic captioner for tests and offline runs.
pub struct MockCaptioner;

#[async_trait]
impl Captioner for MockCaptioner {
    async fn caption(&self, image: &[u8]) -> Result<String, CaptionerError> {
        Ok(format!("A figure of {} bytes.", image.len()))
    }
}
