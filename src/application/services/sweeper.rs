use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::application::ports::JobLedger;

/// Periodically hands RUNNING jobs with expired leases back to the backlog.
/// This is the only crash-recovery mechanism: a worker that dies simply
/// stops heartbeating and its job becomes claimable again.
pub struct LeaseSweeper {
    ledger: Arc<dyn JobLedger>,
    interval: Duration,
}

impl LeaseSweeper {
    pub fn new(ledger: Arc<dyn JobLedger>, interval: Duration) -> Self {
        Self { ledger, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Lease sweeper started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.ledger.release_expired().await {
                        tracing::error!(error = %e, "Lease sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Lease sweeper stopped");
    }
}
