use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tarakan::application::ports::JobLedger;
use tarakan::domain::{
    ChunkId, ContentType, Document, DocumentStatus, JobStatus, RetryPolicy, Stage, StageFailure,
    StageOutputs, StoragePath, TextBlock, WorkerId,
};
use tarakan::infrastructure::persistence::MemoryLedger;

const LEASE_TTL: Duration = Duration::from_secs(30);

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_secs(5),
        jitter_ratio: 0.2,
        max_attempts: 5,
        resource_delay_multiplier: 4,
        resource_max_attempts: 3,
    }
}

fn ledger() -> MemoryLedger {
    MemoryLedger::new(fast_policy(), LEASE_TTL)
}

fn test_document(content_hash: &str) -> Document {
    Document::new(
        StoragePath::from_raw(format!("test/{content_hash}")),
        "tester".to_string(),
        ContentType::Text,
        content_hash.to_string(),
    )
}

fn worker(name: &str) -> WorkerId {
    WorkerId::from_raw(name)
}

fn extracted_outputs() -> StageOutputs {
    StageOutputs::Extracted {
        blocks: vec![TextBlock {
            text: "some extracted text".to_string(),
            page: None,
            offset: 0,
        }],
        images: Vec::new(),
    }
}

fn annotated_outputs() -> StageOutputs {
    StageOutputs::Annotated {
        text: "some annotated text".to_string(),
    }
}

/// Drives a registered document to the point where its Embed children exist.
async fn advance_to_embed(ledger: &MemoryLedger, chunk_ids: &[ChunkId]) {
    let w = worker("driver");

    let extract = ledger.claim_next(Stage::Extract, &w).await.unwrap().unwrap();
    ledger.complete(extract.id, extracted_outputs()).await.unwrap();

    let annotate = ledger.claim_next(Stage::Annotate, &w).await.unwrap().unwrap();
    ledger.complete(annotate.id, annotated_outputs()).await.unwrap();

    let chunk = ledger.claim_next(Stage::Chunk, &w).await.unwrap().unwrap();
    ledger
        .complete(
            chunk.id,
            StageOutputs::Chunked {
                chunk_ids: chunk_ids.to_vec(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn given_registered_document_when_claiming_then_extract_job_is_leased() {
    let ledger = ledger();
    let document = test_document("hash-claim");
    let job_ids = ledger.register_document(&document).await.unwrap();
    assert_eq!(job_ids.len(), 1);

    let claimed = ledger
        .claim_next(Stage::Extract, &worker("w1"))
        .await
        .unwrap()
        .expect("one extract job should be claimable");

    assert_eq!(claimed.id, job_ids[0]);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.attempt_count, 1);
    assert_eq!(claimed.lease_owner.as_deref(), Some("w1"));
    assert!(claimed.lease_expires_at.is_some());

    let second = ledger.claim_next(Stage::Extract, &worker("w2")).await.unwrap();
    assert!(second.is_none(), "a leased job must not be claimable again");
}

#[tokio::test]
async fn given_many_workers_racing_when_claiming_then_each_job_is_claimed_exactly_once() {
    let ledger = Arc::new(ledger());

    let mut expected = HashSet::new();
    for i in 0..50 {
        let ids = ledger
            .register_document(&test_document(&format!("hash-race-{i}")))
            .await
            .unwrap();
        expected.insert(ids[0]);
    }

    let mut tasks = Vec::new();
    for t in 0..8 {
        let ledger = Arc::clone(&ledger);
        tasks.push(tokio::spawn(async move {
            let w = worker(&format!("racer-{t}"));
            let mut claimed = Vec::new();
            while let Some(job) = ledger.claim_next(Stage::Extract, &w).await.unwrap() {
                claimed.push(job.id);
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for id in task.await.unwrap() {
            total += 1;
            assert!(seen.insert(id), "job {id} was claimed twice");
        }
    }

    assert_eq!(total, 50);
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn given_expired_lease_when_sweeping_then_job_is_reclaimable_without_budget_loss() {
    let ledger = MemoryLedger::new(fast_policy(), Duration::from_millis(40));
    ledger
        .register_document(&test_document("hash-crash"))
        .await
        .unwrap();

    let crashed = ledger
        .claim_next(Stage::Extract, &worker("doomed"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(crashed.attempt_count, 1);

    // No heartbeat: simulate a dead worker.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let reclaimed = ledger.release_expired().await.unwrap();
    assert_eq!(reclaimed, 1);

    let job = ledger.get_job(crashed.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt_count, 0, "crash recovery must not consume retry budget");

    let retaken = ledger
        .claim_next(Stage::Extract, &worker("survivor"))
        .await
        .unwrap()
        .expect("reclaimed job should be claimable");
    assert_eq!(retaken.id, crashed.id);

    ledger.complete(retaken.id, extracted_outputs()).await.unwrap();
    let done = ledger.get_job(crashed.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn given_heartbeats_when_lease_would_expire_then_job_is_not_reclaimed() {
    let ledger = MemoryLedger::new(fast_policy(), Duration::from_millis(60));
    ledger
        .register_document(&test_document("hash-heartbeat"))
        .await
        .unwrap();

    let w = worker("alive");
    let job = ledger.claim_next(Stage::Extract, &w).await.unwrap().unwrap();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        ledger.heartbeat(job.id, &w).await.unwrap();
    }

    assert_eq!(ledger.release_expired().await.unwrap(), 0);
    let live = ledger.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(live.status, JobStatus::Running);
}

#[tokio::test]
async fn given_foreign_worker_when_heartbeating_then_lease_lost_is_reported() {
    let ledger = ledger();
    ledger
        .register_document(&test_document("hash-foreign"))
        .await
        .unwrap();

    let job = ledger
        .claim_next(Stage::Extract, &worker("owner"))
        .await
        .unwrap()
        .unwrap();

    let result = ledger.heartbeat(job.id, &worker("intruder")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn given_transient_failures_when_retrying_then_backoff_grows_and_attempts_accumulate() {
    let ledger = ledger();
    ledger
        .register_document(&test_document("hash-retry"))
        .await
        .unwrap();

    let w = worker("retrier");
    let mut delays = Vec::new();
    let mut job_id = None;

    for _ in 0..3 {
        // Retries become due on their own schedule; wait out the delay.
        let job = loop {
            if let Some(job) = ledger.claim_next(Stage::Extract, &w).await.unwrap() {
                break job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        job_id = Some(job.id);

        ledger
            .fail(job.id, &StageFailure::transient("upstream timeout"))
            .await
            .unwrap();

        let failed = ledger.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::RetryScheduled);
        let delay = failed.next_attempt_at.unwrap() - failed.updated_at;
        delays.push(delay);
    }

    assert!(delays[1] > delays[0], "backoff must grow: {delays:?}");
    assert!(delays[2] > delays[1], "backoff must grow: {delays:?}");

    let job = loop {
        if let Some(job) = ledger.claim_next(Stage::Extract, &w).await.unwrap() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    ledger.complete(job.id, extracted_outputs()).await.unwrap();

    let done = ledger.get_job(job_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.attempt_count, 4);
}

#[tokio::test]
async fn given_malformed_input_when_failing_then_job_is_terminal_after_one_attempt() {
    let ledger = ledger();
    let document = test_document("hash-malformed");
    ledger.register_document(&document).await.unwrap();

    let job = ledger
        .claim_next(Stage::Extract, &worker("w"))
        .await
        .unwrap()
        .unwrap();
    ledger
        .fail(job.id, &StageFailure::malformed("corrupt input: not utf-8"))
        .await
        .unwrap();

    let failed = ledger.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempt_count, 1);
    assert!(failed.last_error.as_deref().unwrap().contains("corrupt input"));

    let progress = ledger
        .document_progress(document.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, DocumentStatus::Failed);
    assert!(progress.last_error.is_some());

    assert!(ledger
        .claim_next(Stage::Extract, &worker("w"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn given_exhausted_attempts_when_failing_then_document_fails_terminally() {
    let ledger = MemoryLedger::new(
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(5),
            ..fast_policy()
        },
        LEASE_TTL,
    );
    let document = test_document("hash-exhausted");
    ledger.register_document(&document).await.unwrap();
    let w = worker("w");

    for _ in 0..2 {
        let job = loop {
            if let Some(job) = ledger.claim_next(Stage::Extract, &w).await.unwrap() {
                break job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        ledger
            .fail(job.id, &StageFailure::transient("still down"))
            .await
            .unwrap();
    }

    let progress = ledger
        .document_progress(document.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, DocumentStatus::Failed);
    assert_eq!(progress.stages[0].status, JobStatus::Failed);
    assert_eq!(progress.stages[0].attempt_count, 2);
}

#[tokio::test]
async fn given_fan_out_when_children_complete_in_any_order_then_store_job_is_created_exactly_once()
{
    let ledger = ledger();
    let document = test_document("hash-fanin");
    ledger.register_document(&document).await.unwrap();

    let chunk_ids: Vec<ChunkId> = (0..4)
        .map(|i| ChunkId::derive("hash-fanin", i, i as usize * 800, i as usize * 800 + 1000))
        .collect();
    advance_to_embed(&ledger, &chunk_ids).await;

    let w = worker("embedder");
    let mut children = Vec::new();
    while let Some(job) = ledger.claim_next(Stage::Embed, &w).await.unwrap() {
        children.push(job);
    }
    assert_eq!(children.len(), 4);

    // Complete out of creation order; the gate must hold until the last one.
    children.reverse();
    for (i, child) in children.iter().enumerate() {
        assert!(
            ledger
                .claim_next(Stage::Store, &w)
                .await
                .unwrap()
                .is_none(),
            "store job appeared after only {i} of 4 embeds"
        );
        ledger
            .complete(
                child.id,
                StageOutputs::Embedded {
                    chunk_id: child.chunk_id.unwrap(),
                },
            )
            .await
            .unwrap();
    }

    let store = ledger
        .claim_next(Stage::Store, &w)
        .await
        .unwrap()
        .expect("store job should exist after all embeds");
    assert!(
        ledger.claim_next(Stage::Store, &w).await.unwrap().is_none(),
        "exactly one store job must be created"
    );

    ledger
        .complete(store.id, StageOutputs::Stored { point_count: 4 })
        .await
        .unwrap();

    let progress = ledger
        .document_progress(document.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, DocumentStatus::Completed);
}

#[tokio::test]
async fn given_completed_document_when_reregistering_same_hash_then_no_new_jobs_are_created() {
    let ledger = ledger();
    let document = test_document("hash-idempotent");
    let original_jobs = ledger.register_document(&document).await.unwrap();

    let w = worker("w");
    advance_to_embed(&ledger, &[ChunkId::derive("hash-idempotent", 0, 0, 100)]).await;
    let embed = ledger.claim_next(Stage::Embed, &w).await.unwrap().unwrap();
    ledger
        .complete(
            embed.id,
            StageOutputs::Embedded {
                chunk_id: embed.chunk_id.unwrap(),
            },
        )
        .await
        .unwrap();
    let store = ledger.claim_next(Stage::Store, &w).await.unwrap().unwrap();
    ledger
        .complete(store.id, StageOutputs::Stored { point_count: 1 })
        .await
        .unwrap();

    let duplicate = test_document("hash-idempotent");
    let jobs = ledger.register_document(&duplicate).await.unwrap();

    assert!(jobs.contains(&original_jobs[0]));
    assert!(
        ledger.claim_next(Stage::Extract, &w).await.unwrap().is_none(),
        "re-registration must not enqueue new work"
    );
    assert!(ledger.get_document(duplicate.id).await.unwrap().is_none());
}

#[tokio::test]
async fn given_cancelled_document_when_claiming_then_its_jobs_are_skipped() {
    let ledger = ledger();
    let document = test_document("hash-cancel");
    ledger.register_document(&document).await.unwrap();

    ledger.cancel_document(document.id).await.unwrap();

    assert!(ledger
        .claim_next(Stage::Extract, &worker("w"))
        .await
        .unwrap()
        .is_none());

    let progress = ledger
        .document_progress(document.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.status, DocumentStatus::Cancelled);
}

#[tokio::test]
async fn given_cancelled_document_when_in_flight_job_completes_then_chain_stops() {
    let ledger = ledger();
    let document = test_document("hash-cancel-mid");
    ledger.register_document(&document).await.unwrap();

    let w = worker("w");
    let extract = ledger.claim_next(Stage::Extract, &w).await.unwrap().unwrap();

    ledger.cancel_document(document.id).await.unwrap();

    // The in-flight job finishes its current work and reports; no Annotate
    // job may follow.
    ledger.complete(extract.id, extracted_outputs()).await.unwrap();
    assert!(ledger
        .claim_next(Stage::Annotate, &w)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn given_reclaimed_job_when_old_worker_reports_then_lease_lost_has_no_side_effects() {
    let ledger = MemoryLedger::new(fast_policy(), Duration::from_millis(30));
    let document = test_document("hash-zombie");
    ledger.register_document(&document).await.unwrap();

    let zombie = ledger
        .claim_next(Stage::Extract, &worker("zombie"))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    ledger.release_expired().await.unwrap();

    // The zombie wakes up and tries to report on its reclaimed job.
    let result = ledger.complete(zombie.id, extracted_outputs()).await;
    assert!(result.is_err(), "zombie completion must be rejected");

    let job = ledger.get_job(zombie.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let fresh = ledger
        .claim_next(Stage::Extract, &worker("fresh"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.id, zombie.id);
    ledger.complete(fresh.id, extracted_outputs()).await.unwrap();
}

#[tokio::test]
async fn given_purged_document_when_reading_then_nothing_remains() {
    let ledger = ledger();
    let document = test_document("hash-purge");
    let jobs = ledger.register_document(&document).await.unwrap();

    ledger.purge_document(document.id).await.unwrap();

    assert!(ledger.get_document(document.id).await.unwrap().is_none());
    assert!(ledger.get_job(jobs[0]).await.unwrap().is_none());
    assert!(ledger
        .document_progress(document.id)
        .await
        .unwrap()
        .is_none());
}
