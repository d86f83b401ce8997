use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::runners::StageRunner;
use super::sweeper::LeaseSweeper;
use super::worker::StageWorker;
use crate::application::ports::JobLedger;
use crate::domain::{Stage, WorkerId};

/// Pool sizing and cadence for the dispatcher. Concurrency is bounded per
/// stage so each downstream service's rate limits are respected
/// independently.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub extract_workers: usize,
    pub annotate_workers: usize,
    pub chunk_workers: usize,
    pub embed_workers: usize,
    pub store_workers: usize,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            extract_workers: 2,
            annotate_workers: 2,
            chunk_workers: 2,
            embed_workers: 4,
            store_workers: 1,
            poll_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl RuntimeOptions {
    fn workers_for(&self, stage: Stage) -> usize {
        match stage {
            Stage::Extract => self.extract_workers,
            Stage::Annotate => self.annotate_workers,
            Stage::Chunk => self.chunk_workers,
            Stage::Embed => self.embed_workers,
            Stage::Store => self.store_workers,
        }
    }
}

/// Running dispatcher: per-stage worker pools plus the lease sweeper.
pub struct PipelineRuntime {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl PipelineRuntime {
    pub fn start(
        ledger: Arc<dyn JobLedger>,
        runners: Vec<Arc<dyn StageRunner>>,
        options: RuntimeOptions,
    ) -> Self {
        let (shutdown, receiver) = watch::channel(false);
        let mut handles = Vec::new();

        for runner in runners {
            let stage = runner.stage();
            for index in 0..options.workers_for(stage) {
                let worker = StageWorker::new(
                    WorkerId::new(stage, index),
                    Arc::clone(&ledger),
                    Arc::clone(&runner),
                    options.poll_interval,
                    options.heartbeat_interval,
                );
                handles.push(tokio::spawn(worker.run(receiver.clone())));
            }
        }

        let sweeper = LeaseSweeper::new(Arc::clone(&ledger), options.sweep_interval);
        handles.push(tokio::spawn(sweeper.run(receiver.clone())));

        tracing::info!(tasks = handles.len(), "Pipeline runtime started");
        Self { shutdown, handles }
    }

    /// Signals every worker and waits for in-flight jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Worker task ended abnormally");
                }
            }
        }
        tracing::info!("Pipeline runtime stopped");
    }
}
