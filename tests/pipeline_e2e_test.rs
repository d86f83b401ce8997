use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};

use tarakan::application::ports::{
    Captioner, ChunkRepository, Chunker, ContentExtractor, Embedder, EmbedderError, JobLedger,
    VectorStore,
};
use tarakan::application::services::runners::{
    AnnotateRunner, ChunkRunner, EmbedRunner, ExtractRunner, StageRunner, StoreRunner,
};
use tarakan::application::services::{PipelineRuntime, PipelineService, RuntimeOptions};
use tarakan::domain::{
    ContentType, DocumentId, DocumentStatus, Embedding, JobStatus, RetryPolicy, Stage,
};
use tarakan::infrastructure::llm::{MockCaptioner, MockEmbedder};
use tarakan::infrastructure::persistence::{
    MemoryChunkRepository, MemoryLedger, MemoryVectorStore,
};
use tarakan::infrastructure::storage::MemoryBlobStore;
use tarakan::infrastructure::text_processing::{CompositeExtractor, WindowChunker};

const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 200;
const MIN_TAIL: usize = 250;
const EMBED_DIMENSIONS: usize = 64;

/// Fails the first `failures` embedding calls with a rate limit, then
/// behaves like the mock embedder.
struct FlakyEmbedder {
    inner: MockEmbedder,
    calls: AtomicUsize,
    failures: usize,
}

impl FlakyEmbedder {
    fn new(failures: usize) -> Self {
        Self {
            inner: MockEmbedder::new(EMBED_DIMENSIONS),
            calls: AtomicUsize::new(0),
            failures,
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedderError> {
        let results = self.embed_batch(&[text]).await?;
        Ok(results.into_iter().next().expect("single input"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, EmbedderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(EmbedderError::RateLimited {
                retry_after: Some(Duration::from_millis(20)),
            });
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        EMBED_DIMENSIONS
    }
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    chunks: Arc<MemoryChunkRepository>,
    vectors: Arc<MemoryVectorStore>,
    service: PipelineService,
    runtime: PipelineRuntime,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_secs(2),
        jitter_ratio: 0.2,
        max_attempts: 5,
        resource_delay_multiplier: 4,
        resource_max_attempts: 3,
    }
}

fn start_pipeline(embedder: Arc<dyn Embedder>, embed_batch_size: usize) -> Harness {
    let ledger = Arc::new(MemoryLedger::new(fast_policy(), Duration::from_secs(10)));
    let chunks = Arc::new(MemoryChunkRepository::new());
    let vectors = Arc::new(MemoryVectorStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());

    let ledger_dyn: Arc<dyn JobLedger> = ledger.clone();
    let chunks_dyn: Arc<dyn ChunkRepository> = chunks.clone();
    let vectors_dyn: Arc<dyn VectorStore> = vectors.clone();

    let extractor: Arc<dyn ContentExtractor> = Arc::new(CompositeExtractor::new());
    let chunker: Arc<dyn Chunker> =
        Arc::new(WindowChunker::new(CHUNK_SIZE, CHUNK_OVERLAP, MIN_TAIL));
    let captioner: Arc<dyn Captioner> = Arc::new(MockCaptioner);

    let runners: Vec<Arc<dyn StageRunner>> = vec![
        Arc::new(ExtractRunner::new(
            ledger_dyn.clone(),
            blobs.clone(),
            extractor,
        )),
        Arc::new(AnnotateRunner::new(blobs.clone(), captioner)),
        Arc::new(ChunkRunner::new(
            ledger_dyn.clone(),
            chunker,
            chunks_dyn.clone(),
        )),
        Arc::new(EmbedRunner::new(
            ledger_dyn.clone(),
            chunks_dyn.clone(),
            embedder,
            embed_batch_size,
        )),
        Arc::new(StoreRunner::new(
            chunks_dyn.clone(),
            vectors_dyn.clone(),
            EMBED_DIMENSIONS as u64,
        )),
    ];

    let options = RuntimeOptions {
        extract_workers: 2,
        annotate_workers: 2,
        chunk_workers: 2,
        embed_workers: 3,
        store_workers: 1,
        poll_interval: Duration::from_millis(10),
        heartbeat_interval: Duration::from_secs(2),
        sweep_interval: Duration::from_millis(50),
    };

    let service = PipelineService::new(
        ledger_dyn.clone(),
        chunks_dyn,
        vectors_dyn,
        blobs,
    );
    let runtime = PipelineRuntime::start(ledger_dyn, runners, options);

    Harness {
        ledger,
        chunks,
        vectors,
        service,
        runtime,
    }
}

async fn wait_for_terminal(harness: &Harness, document_id: DocumentId) -> DocumentStatus {
    for _ in 0..500 {
        let progress = harness
            .service
            .get_status(document_id)
            .await
            .unwrap()
            .expect("document should exist");
        if progress.status.is_terminal() {
            return progress.status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("document {document_id} did not reach a terminal status in time");
}

fn illustrated_markdown() -> Vec<u8> {
    let png = general_purpose::STANDARD.encode([0x89u8, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a]);
    format!(
        "{}\n\n![first figure](data:image/png;base64,{png})\n\n{}\n\n![second figure](data:image/png;base64,{png})\n\n{}",
        "a".repeat(2000),
        "b".repeat(2000),
        "c".repeat(1000),
    )
    .into_bytes()
}

#[tokio::test]
async fn given_document_with_images_when_pipeline_runs_then_chunks_embeddings_and_vectors_line_up()
{
    let harness = start_pipeline(Arc::new(MockEmbedder::new(EMBED_DIMENSIONS)), 4);

    let registered = harness
        .service
        .register_bytes(illustrated_markdown().into(), "e2e".to_string(), ContentType::Markdown)
        .await
        .unwrap();

    let status = wait_for_terminal(&harness, registered.document_id).await;
    assert_eq!(status, DocumentStatus::Completed);

    let chunks = harness
        .chunks
        .list_by_document(registered.document_id)
        .await
        .unwrap();
    assert!(!chunks.is_empty());

    // Chunk count must match the window arithmetic over the final combined
    // text, captions included.
    let combined_len = chunks.iter().map(|c| c.span.end).max().unwrap();
    assert!(combined_len >= 5000, "captions should extend the text stream");
    let chunker = WindowChunker::new(CHUNK_SIZE, CHUNK_OVERLAP, MIN_TAIL);
    assert_eq!(chunks.len(), chunker.window_count(combined_len));

    for chunk in &chunks {
        let embedding = chunk
            .embedding
            .as_ref()
            .unwrap_or_else(|| panic!("chunk {} has no embedding", chunk.ordinal));
        assert_eq!(embedding.dimensions(), EMBED_DIMENSIONS);
        assert!(
            harness.vectors.contains(chunk.id).await,
            "chunk {} missing from vector store",
            chunk.ordinal
        );
    }
    assert_eq!(harness.vectors.len().await, chunks.len());

    // Both captions made it into the text stream.
    let all_text: String = chunks.iter().map(|c| c.text.as_str()).collect();
    assert!(all_text.contains("[Image:"));

    let progress = harness
        .service
        .get_status(registered.document_id)
        .await
        .unwrap()
        .unwrap();
    let embed_stage = progress
        .stages
        .iter()
        .find(|s| s.stage == Stage::Embed)
        .unwrap();
    assert_eq!(embed_stage.total_units, chunks.len() as u32);
    assert_eq!(embed_stage.completed_units, chunks.len() as u32);

    harness.runtime.shutdown().await;
}

#[tokio::test]
async fn given_completed_document_when_reregistered_then_no_duplicate_chunks_or_vectors() {
    let harness = start_pipeline(Arc::new(MockEmbedder::new(EMBED_DIMENSIONS)), 4);

    let first = harness
        .service
        .register_bytes(illustrated_markdown().into(), "e2e".to_string(), ContentType::Markdown)
        .await
        .unwrap();
    assert_eq!(
        wait_for_terminal(&harness, first.document_id).await,
        DocumentStatus::Completed
    );

    let chunk_count = harness
        .chunks
        .list_by_document(first.document_id)
        .await
        .unwrap()
        .len();
    let vector_count = harness.vectors.len().await;

    let second = harness
        .service
        .register_bytes(illustrated_markdown().into(), "e2e".to_string(), ContentType::Markdown)
        .await
        .unwrap();

    assert_eq!(second.document_id, first.document_id);
    // Give any stray work a moment to surface before checking.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        harness
            .chunks
            .list_by_document(first.document_id)
            .await
            .unwrap()
            .len(),
        chunk_count
    );
    assert_eq!(harness.vectors.len().await, vector_count);

    harness.runtime.shutdown().await;
}

#[tokio::test]
async fn given_transient_embed_failures_when_retried_then_document_still_completes() {
    let embedder = Arc::new(FlakyEmbedder::new(3));
    let harness = start_pipeline(embedder.clone(), 1);

    // Short text: exactly one chunk, so the retry path is easy to observe.
    let registered = harness
        .service
        .register_bytes(
            "A short note about nothing in particular.".as_bytes().to_vec().into(),
            "e2e".to_string(),
            ContentType::Text,
        )
        .await
        .unwrap();

    let status = wait_for_terminal(&harness, registered.document_id).await;
    assert_eq!(status, DocumentStatus::Completed);

    let progress = harness
        .service
        .get_status(registered.document_id)
        .await
        .unwrap()
        .unwrap();
    let embed_stage = progress
        .stages
        .iter()
        .find(|s| s.stage == Stage::Embed)
        .unwrap();
    assert_eq!(embed_stage.status, JobStatus::Succeeded);
    assert_eq!(embed_stage.attempt_count, 4);
    assert!(embedder.calls.load(Ordering::SeqCst) >= 4);

    harness.runtime.shutdown().await;
}

#[tokio::test]
async fn given_batch_failure_when_fanned_out_then_every_chunk_retries_and_completes() {
    let embedder = Arc::new(FlakyEmbedder::new(1));
    let harness = start_pipeline(embedder.clone(), 16);

    let registered = harness
        .service
        .register_bytes(illustrated_markdown().into(), "e2e".to_string(), ContentType::Markdown)
        .await
        .unwrap();

    let status = wait_for_terminal(&harness, registered.document_id).await;
    assert_eq!(status, DocumentStatus::Completed);

    let chunks = harness
        .chunks
        .list_by_document(registered.document_id)
        .await
        .unwrap();
    assert!(chunks.iter().all(|c| c.embedding.is_some()));
    assert_eq!(harness.vectors.len().await, chunks.len());

    harness.runtime.shutdown().await;
}

#[tokio::test]
async fn given_corrupt_document_when_processed_then_it_fails_terminally_after_one_attempt() {
    let harness = start_pipeline(Arc::new(MockEmbedder::new(EMBED_DIMENSIONS)), 4);

    // Truncated base64 payload: extraction is a terminal, malformed failure.
    let registered = harness
        .service
        .register_bytes(
            b"Some text.\n\n![broken](data:image/png;base64,A)".to_vec().into(),
            "e2e".to_string(),
            ContentType::Markdown,
        )
        .await
        .unwrap();

    let status = wait_for_terminal(&harness, registered.document_id).await;
    assert_eq!(status, DocumentStatus::Failed);

    let progress = harness
        .service
        .get_status(registered.document_id)
        .await
        .unwrap()
        .unwrap();
    let extract_stage = progress
        .stages
        .iter()
        .find(|s| s.stage == Stage::Extract)
        .unwrap();
    assert_eq!(extract_stage.status, JobStatus::Failed);
    assert_eq!(extract_stage.attempt_count, 1);
    assert!(progress.last_error.as_deref().unwrap().contains("base64"));

    // No downstream stage may have started.
    assert!(progress.stages.iter().all(|s| s.stage == Stage::Extract));

    harness.runtime.shutdown().await;
}

#[tokio::test]
async fn given_purged_document_when_reading_then_chunks_and_vectors_are_gone() {
    let harness = start_pipeline(Arc::new(MockEmbedder::new(EMBED_DIMENSIONS)), 4);

    let registered = harness
        .service
        .register_bytes(illustrated_markdown().into(), "e2e".to_string(), ContentType::Markdown)
        .await
        .unwrap();
    wait_for_terminal(&harness, registered.document_id).await;
    assert!(harness.vectors.len().await > 0);

    harness.service.purge(registered.document_id).await.unwrap();

    assert!(harness
        .service
        .get_status(registered.document_id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(harness.vectors.len().await, 0);
    assert!(harness
        .chunks
        .list_by_document(registered.document_id)
        .await
        .unwrap()
        .is_empty());
    assert!(harness
        .ledger
        .get_document(registered.document_id)
        .await
        .unwrap()
        .is_none());

    harness.runtime.shutdown().await;
}

#[tokio::test]
async fn given_completed_document_when_searching_then_matching_chunk_is_ranked_first() {
    let harness = start_pipeline(Arc::new(MockEmbedder::new(EMBED_DIMENSIONS)), 4);

    let registered = harness
        .service
        .register_bytes(
            b"The quick brown fox jumps over the lazy dog.".to_vec().into(),
            "e2e".to_string(),
            ContentType::Text,
        )
        .await
        .unwrap();
    assert_eq!(
        wait_for_terminal(&harness, registered.document_id).await,
        DocumentStatus::Completed
    );

    let chunks = harness
        .chunks
        .list_by_document(registered.document_id)
        .await
        .unwrap();
    let query = chunks[0].embedding.clone().unwrap();

    let hits = harness.service.search(&query, 5).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].chunk_id, chunks[0].id);
    assert_eq!(hits[0].document_id, registered.document_id);

    harness.runtime.shutdown().await;
}
