mod memory_chunk_repository;
mod memory_ledger;
mod pg_chunk_repository;
mod pg_ledger;
mod pg_pool;
mod vector_store;

pub use memory_chunk_repository::MemoryChunkRepository;
pub use memory_ledger::MemoryLedger;
pub use pg_chunk_repository::PgChunkRepository;
pub use pg_ledger::PgLedger;
pub use pg_pool::create_pool;
pub use vector_store::MemoryVectorStore;
pub use vector_store::QdrantVectorStore;
