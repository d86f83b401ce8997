use serde::Deserialize;

/// Explicit configuration tree injected into components at construction.
/// Nothing in the pipeline reads process-wide state after startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub qdrant: QdrantSettings,
    pub ledger: LedgerSettings,
    pub retry: RetrySettings,
    pub workers: WorkerSettings,
    pub chunking: ChunkingSettings,
    pub embeddings: EmbeddingsSettings,
    pub captioning: CaptioningSettings,
    pub staging: StagingSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QdrantSettings {
    pub url: String,
    pub collection_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSettings {
    pub lease_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_secs: u64,
    pub jitter_ratio: f64,
    pub max_attempts: u32,
    pub resource_delay_multiplier: u32,
    pub resource_max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    pub extract: usize,
    pub annotate: usize,
    pub chunk: usize,
    pub embed: usize,
    pub store: usize,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_tail: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptioningSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagingSettings {
    pub base_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub enable_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings {
                url: "postgres://localhost:5432/tarakan".to_string(),
                max_connections: 10,
            },
            qdrant: QdrantSettings {
                url: "http://localhost:6334".to_string(),
                collection_name: "document_chunks".to_string(),
            },
            ledger: LedgerSettings {
                lease_ttl_secs: 60,
                sweep_interval_secs: 5,
            },
            retry: RetrySettings {
                base_delay_ms: 1000,
                max_delay_secs: 300,
                jitter_ratio: 0.25,
                max_attempts: 5,
                resource_delay_multiplier: 4,
                resource_max_attempts: 3,
            },
            workers: WorkerSettings {
                extract: 2,
                annotate: 2,
                chunk: 2,
                embed: 4,
                store: 1,
                poll_interval_ms: 250,
                heartbeat_interval_secs: 10,
            },
            chunking: ChunkingSettings {
                chunk_size: 1000,
                chunk_overlap: 200,
                min_tail: 250,
            },
            embeddings: EmbeddingsSettings {
                base_url: "https://api.openai.com".to_string(),
                api_key: String::new(),
                model: "text-embedding-3-small".to_string(),
                dimension: 1536,
                batch_size: 16,
                timeout_secs: 30,
            },
            captioning: CaptioningSettings {
                base_url: "https://api.openai.com".to_string(),
                api_key: String::new(),
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 60,
            },
            staging: StagingSettings {
                base_path: "./staging".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                enable_json: false,
            },
        }
    }
}

impl Settings {
    pub fn retry_policy(&self) -> crate::domain::RetryPolicy {
        crate::domain::RetryPolicy {
            base_delay: std::time::Duration::from_millis(self.retry.base_delay_ms),
            max_delay: std::time::Duration::from_secs(self.retry.max_delay_secs),
            jitter_ratio: self.retry.jitter_ratio,
            max_attempts: self.retry.max_attempts,
            resource_delay_multiplier: self.retry.resource_delay_multiplier,
            resource_max_attempts: self.retry.resource_max_attempts,
        }
    }

    pub fn runtime_options(&self) -> crate::application::services::RuntimeOptions {
        crate::application::services::RuntimeOptions {
            extract_workers: self.workers.extract,
            annotate_workers: self.workers.annotate,
            chunk_workers: self.workers.chunk,
            embed_workers: self.workers.embed,
            store_workers: self.workers.store,
            poll_interval: std::time::Duration::from_millis(self.workers.poll_interval_ms),
            heartbeat_interval: std::time::Duration::from_secs(
                self.workers.heartbeat_interval_secs,
            ),
            sweep_interval: std::time::Duration::from_secs(self.ledger.sweep_interval_secs),
        }
    }
}
