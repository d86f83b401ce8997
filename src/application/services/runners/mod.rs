mod annotate;
mod chunk;
mod embed;
mod extract;
mod store;

use async_trait::async_trait;

use crate::domain::{ProcessingJob, Stage, StageFailure, StageOutputs};

pub use annotate::AnnotateRunner;
pub use chunk::ChunkRunner;
pub use embed::EmbedRunner;
pub use extract::ExtractRunner;
pub use store::StoreRunner;

/// Executes one claimed job for its stage. Runners convert every failure to
/// a classified `StageFailure`; the worker turns the result into a single
/// `complete` or `fail` call. Nothing in a runner retries on its own.
#[async_trait]
pub trait StageRunner: Send + Sync {
    fn stage(&self) -> Stage;

    async fn run(&self, job: &ProcessingJob) -> Result<StageOutputs, StageFailure>;
}
