mod mock_captioner;
mod mock_embedder;
mod openai_captioner;
mod openai_embedder;

pub use mock_captioner::MockCaptioner;
pub use mock_embedder::MockEmbedder;
pub use openai_captioner::{OpenAiCaptioner, CAPTION_PROMPT};
pub use openai_embedder::OpenAiEmbedder;
