mod chunk;
mod document;
mod embedding;
mod extraction;
mod failure;
mod job;
mod job_status;
mod retry;
mod stage;
mod storage_path;

pub use chunk::{ChunkId, DocumentChunk, SourceSpan};
pub use document::{ContentType, Document, DocumentId, DocumentStatus};
pub use embedding::Embedding;
pub use extraction::{ExtractedContent, ImageRegion, StagedImage, TextBlock};
pub use failure::{FailureKind, StageFailure};
pub use job::{JobId, ProcessingJob, StageOutputs, WorkerId};
pub use job_status::JobStatus;
pub use retry::RetryPolicy;
pub use stage::Stage;
pub use storage_path::StoragePath;
