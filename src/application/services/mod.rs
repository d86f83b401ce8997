mod pipeline_service;
pub mod runners;
mod runtime;
mod sweeper;
mod worker;

pub use pipeline_service::{PipelineError, PipelineService, RegisterDocument, Registered};
pub use runtime::{PipelineRuntime, RuntimeOptions};
pub use sweeper::LeaseSweeper;
pub use worker::StageWorker;
