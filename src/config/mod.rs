mod environment;
mod settings;

pub use environment::Environment;
pub use settings::{
    CaptioningSettings, ChunkingSettings, DatabaseSettings, EmbeddingsSettings, LedgerSettings,
    LoggingSettings, QdrantSettings, RetrySettings, Settings, StagingSettings, WorkerSettings,
};
