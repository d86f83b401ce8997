use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tarakan::application::ports::{
    BlobStore, Captioner, ChunkRepository, Chunker, ContentExtractor, Embedder, JobLedger,
    VectorStore,
};
use tarakan::application::services::runners::{
    AnnotateRunner, ChunkRunner, EmbedRunner, ExtractRunner, StageRunner, StoreRunner,
};
use tarakan::application::services::{PipelineRuntime, PipelineService};
use tarakan::domain::ContentType;
use tarakan::config::Settings;
use tarakan::infrastructure::llm::{MockCaptioner, MockEmbedder, OpenAiCaptioner, OpenAiEmbedder};
use tarakan::infrastructure::observability::{init_tracing, TracingConfig};
use tarakan::infrastructure::persistence::{
    create_pool, MemoryChunkRepository, MemoryLedger, MemoryVectorStore, PgChunkRepository,
    PgLedger, QdrantVectorStore,
};
use tarakan::infrastructure::storage::LocalBlobStore;
use tarakan::infrastructure::text_processing::{CompositeExtractor, WindowChunker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(TracingConfig::default());

    let mut settings = Settings::default();
    if let Ok(url) = std::env::var("DATABASE_URL") {
        settings.database.url = url;
    }
    if let Ok(url) = std::env::var("QDRANT_URL") {
        settings.qdrant.url = url;
    }
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        settings.embeddings.api_key = key.clone();
        settings.captioning.api_key = key;
    }
    if let Ok(path) = std::env::var("STAGING_PATH") {
        settings.staging.base_path = path;
    }

    let use_memory_backends = std::env::var("TARAKAN_BACKEND")
        .map(|v| v.to_lowercase() == "memory")
        .unwrap_or(false);

    let blob_store: Arc<dyn BlobStore> =
        Arc::new(LocalBlobStore::new(PathBuf::from(&settings.staging.base_path))?);

    let (ledger, chunk_repository, vector_store): (
        Arc<dyn JobLedger>,
        Arc<dyn ChunkRepository>,
        Arc<dyn VectorStore>,
    ) = if use_memory_backends {
        tracing::info!("Using in-memory ledger, chunk store and vector store");
        (
            Arc::new(MemoryLedger::new(
                settings.retry_policy(),
                Duration::from_secs(settings.ledger.lease_ttl_secs),
            )),
            Arc::new(MemoryChunkRepository::new()),
            Arc::new(MemoryVectorStore::new()),
        )
    } else {
        let pool = create_pool(&settings.database.url, settings.database.max_connections).await?;
        sqlx::migrate!().run(&pool).await?;
        let vector_store = QdrantVectorStore::new(
            &settings.qdrant.url,
            settings.qdrant.collection_name.clone(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("qdrant connection failed: {e}"))?;
        (
            Arc::new(PgLedger::new(
                pool.clone(),
                settings.retry_policy(),
                Duration::from_secs(settings.ledger.lease_ttl_secs),
            )),
            Arc::new(PgChunkRepository::new(pool)),
            Arc::new(vector_store),
        )
    };

    let offline_models = settings.embeddings.api_key.is_empty();
    let embedder: Arc<dyn Embedder> = if offline_models {
        tracing::warn!("No OPENAI_API_KEY set, using mock caption and embedding services");
        Arc::new(MockEmbedder::new(settings.embeddings.dimension))
    } else {
        Arc::new(OpenAiEmbedder::new(
            &settings.embeddings.base_url,
            settings.embeddings.api_key.clone(),
            settings.embeddings.model.clone(),
            settings.embeddings.dimension,
            Duration::from_secs(settings.embeddings.timeout_secs),
        ))
    };
    let captioner: Arc<dyn Captioner> = if offline_models {
        Arc::new(MockCaptioner)
    } else {
        Arc::new(OpenAiCaptioner::new(
            &settings.captioning.base_url,
            &settings.captioning.model,
            &settings.captioning.api_key,
            Duration::from_secs(settings.captioning.timeout_secs),
        ))
    };

    let extractor: Arc<dyn ContentExtractor> = Arc::new(CompositeExtractor::new());
    let chunker: Arc<dyn Chunker> = Arc::new(WindowChunker::new(
        settings.chunking.chunk_size,
        settings.chunking.chunk_overlap,
        settings.chunking.min_tail,
    ));

    let runners: Vec<Arc<dyn StageRunner>> = vec![
        Arc::new(ExtractRunner::new(
            Arc::clone(&ledger),
            Arc::clone(&blob_store),
            extractor,
        )),
        Arc::new(AnnotateRunner::new(Arc::clone(&blob_store), captioner)),
        Arc::new(ChunkRunner::new(
            Arc::clone(&ledger),
            chunker,
            Arc::clone(&chunk_repository),
        )),
        Arc::new(EmbedRunner::new(
            Arc::clone(&ledger),
            Arc::clone(&chunk_repository),
            Arc::clone(&embedder),
            settings.embeddings.batch_size,
        )),
        Arc::new(StoreRunner::new(
            Arc::clone(&chunk_repository),
            Arc::clone(&vector_store),
            embedder.dimensions() as u64,
        )),
    ];

    let service = PipelineService::new(
        Arc::clone(&ledger),
        Arc::clone(&chunk_repository),
        Arc::clone(&vector_store),
        Arc::clone(&blob_store),
    );

    let runtime = PipelineRuntime::start(ledger, runners, settings.runtime_options());

    // Any paths on the command line are registered straight away.
    for path in std::env::args().skip(1) {
        let data = tokio::fs::read(&path).await?;
        let content_type = if path.ends_with(".md") {
            ContentType::Markdown
        } else {
            ContentType::Text
        };
        let registered = service
            .register_bytes(data.into(), "cli".to_string(), content_type)
            .await?;
        tracing::info!(
            path = %path,
            document_id = %registered.document_id,
            "Registered document from command line"
        );
    }

    tracing::info!("Pipeline running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
