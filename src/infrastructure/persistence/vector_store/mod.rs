mod memory_vector_store;
mod qdrant_vector_store;

pub use memory_vector_store::MemoryVectorStore;
pub use qdrant_vector_store::QdrantVectorStore;
