mod blob_store;
mod captioner;
mod chunk_repository;
mod chunker;
mod content_extractor;
mod embedder;
mod ledger;
mod repository_error;
mod vector_store;
mod vector_store_error;

pub use blob_store::{BlobStore, BlobStoreError};
pub use captioner::{Captioner, CaptionerError};
pub use chunk_repository::ChunkRepository;
pub use chunker::{Chunker, ChunkerError};
pub use content_extractor::{ContentExtractor, ExtractorError};
pub use embedder::{Embedder, EmbedderError};
pub use ledger::{most_recent_error, DocumentProgress, JobLedger, LedgerError, StageProgress};
pub use repository_error::RepositoryError;
pub use vector_store::{ChunkPoint, SearchHit, VectorStore};
pub use vector_store_error::VectorStoreError;
