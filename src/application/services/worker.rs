use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::runners::StageRunner;
use crate::application::ports::{JobLedger, LedgerError};
use crate::domain::{ProcessingJob, Stage, WorkerId};

/// One worker in a stage pool: claim, run, report. Workers never talk to
/// each other; the Ledger's atomic operations are the only coordination.
pub struct StageWorker {
    stage: Stage,
    worker_id: WorkerId,
    ledger: Arc<dyn JobLedger>,
    runner: Arc<dyn StageRunner>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl StageWorker {
    pub fn new(
        worker_id: WorkerId,
        ledger: Arc<dyn JobLedger>,
        runner: Arc<dyn StageRunner>,
        poll_interval: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            stage: runner.stage(),
            worker_id,
            ledger,
            runner,
            poll_interval,
            heartbeat_interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(stage = %self.stage, worker = %self.worker_id, "Stage worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.ledger.claim_next(self.stage, &self.worker_id).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    // Empty backlog; sleep unless shutdown lands first.
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(stage = %self.stage, error = %e, "Claim failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        tracing::info!(stage = %self.stage, worker = %self.worker_id, "Stage worker stopped");
    }

    async fn process(&self, job: ProcessingJob) {
        let span = tracing::info_span!(
            "stage_job",
            stage = %self.stage,
            job_id = %job.id,
            document_id = %job.document_id,
            attempt = job.attempt_count,
        );

        async {
            let heartbeat = self.spawn_heartbeat(job.id);

            let result = self.runner.run(&job).await;
            heartbeat.abort();

            match result {
                Ok(outputs) => match self.ledger.complete(job.id, outputs).await {
                    Ok(()) => tracing::debug!("Job completed"),
                    Err(LedgerError::LeaseLost { .. }) => {
                        tracing::warn!(
                            "Lease lost before completion; another worker owns the retry"
                        );
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to record completion"),
                },
                Err(failure) => {
                    tracing::warn!(kind = %failure.kind, error = %failure.message, "Stage run failed");
                    match self.ledger.fail(job.id, &failure).await {
                        Ok(()) => {}
                        Err(LedgerError::LeaseLost { .. }) => {
                            tracing::warn!("Lease lost before failure report");
                        }
                        Err(e) => tracing::error!(error = %e, "Failed to record failure"),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Long jobs keep their lease alive so the sweeper does not reclaim live
    /// work; the task is aborted as soon as the run finishes.
    fn spawn_heartbeat(&self, job_id: crate::domain::JobId) -> JoinHandle<()> {
        let ledger = Arc::clone(&self.ledger);
        let worker_id = WorkerId::from_raw(self.worker_id.as_str());
        let interval = self.heartbeat_interval;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match ledger.heartbeat(job_id, &worker_id).await {
                    Ok(()) => {}
                    Err(LedgerError::LeaseLost { .. }) => {
                        tracing::warn!(job_id = %job_id, "Heartbeat found lease lost");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %job_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        })
    }
}
