//! Clear, deregistration and shutdown E2E tests.
//!
//! Removing queued work must never affect a job a worker already owns.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{wait_until, ListenerEvent, TestHarness, INDEX_ID};
use sift_scheduler::SchedulerError;
use sift_types::{Job, Priority, Requester};

async fn wait_for_entered(harness: &TestHarness, count: usize) {
    assert!(
        wait_until(Duration::from_secs(5), || {
            harness.engine.entered.load(Ordering::SeqCst) == count
        })
        .await,
        "Expected {} write(s) to reach the engine",
        count
    );
}

/// Dequeued J survives clear_for_index and finishes normally.
#[tokio::test(flavor = "multi_thread")]
async fn test_clear_for_index_does_not_affect_running_job() {
    let harness = TestHarness::new(1);
    harness.put_content(&["running", "queued1", "queued2"]);
    harness.engine.gate.close();
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("running", INDEX_ID)).unwrap();
    wait_for_entered(&harness, 1).await;

    harness.manager.index(Job::update("queued1", INDEX_ID)).unwrap();
    harness.manager.index(Job::update("queued2", INDEX_ID)).unwrap();
    assert_eq!(harness.manager.clear_for_index(INDEX_ID), 2);
    assert!(!harness.manager.has_jobs_for_index(INDEX_ID));

    harness.engine.gate.open();
    assert!(harness.wait_idle().await);

    assert_eq!(
        harness.listener.events(),
        vec![
            ListenerEvent::JobStart("idx:running".to_string()),
            ListenerEvent::JobEnd {
                signature: "idx:running".to_string(),
                success: true,
            },
        ]
    );
    assert_eq!(harness.engine.applied(), vec!["running"]);

    harness.manager.shutdown().await.unwrap();
}

/// clear() drops queued jobs and wipes the index.
#[tokio::test(flavor = "multi_thread")]
async fn test_clear_index() {
    let harness = TestHarness::new(1);
    harness.put_content(&["a", "b", "c"]);
    harness.manager.start().await.unwrap();

    for id in ["a", "b"] {
        harness.manager.index(Job::update(id, INDEX_ID)).unwrap();
    }
    assert!(harness.wait_idle().await);
    assert_eq!(harness.engine.document_count(), 2);

    harness.engine.gate.close();
    harness.manager.index(Job::update("c", INDEX_ID)).unwrap();
    wait_for_entered(&harness, 3).await;
    harness.manager.index(Job::update("a", INDEX_ID)).unwrap();

    harness
        .manager
        .clear(INDEX_ID, Priority::High, Requester::new("admin"))
        .unwrap();
    let queued = harness.manager.jobs_for_requester(&Requester::new("admin"));
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].action().name(), "clear");
    assert_eq!(harness.manager.count_for_index(INDEX_ID), 1);

    harness.engine.gate.open();
    assert!(harness.wait_idle().await);

    assert_eq!(harness.engine.applied(), vec!["a", "b", "c", "clear"]);
    assert_eq!(harness.engine.document_count(), 0);

    harness.manager.shutdown().await.unwrap();
}

/// Two indexes are independent: clearing one leaves the other's queue alone.
#[tokio::test(flavor = "multi_thread")]
async fn test_deregister_index_keeps_other_indexes() {
    let harness = TestHarness::new(0);
    let other = Arc::new(e2e_tests::MemoryEngine::new("other"));
    harness.manager.register_index(other.clone());

    harness.manager.index(Job::update("a", INDEX_ID)).unwrap();
    harness.manager.index(Job::update("a", "other")).unwrap();

    assert!(harness.manager.deregister_index("other").is_some());
    assert_eq!(harness.manager.count_for_index("other"), 0);
    assert_eq!(harness.manager.count_for_index(INDEX_ID), 1);
    assert!(harness.manager.index(Job::update("b", "other")).is_err());
}

/// Shutdown lets the running job finish, drops the queue and closes engines.
#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_waits_for_running_job() {
    let harness = Arc::new(TestHarness::new(1));
    harness.put_content(&["running", "queued"]);
    harness.engine.gate.close();
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("running", INDEX_ID)).unwrap();
    wait_for_entered(&harness, 1).await;
    harness.manager.index(Job::update("queued", INDEX_ID)).unwrap();

    let shutdown = {
        let harness = harness.clone();
        tokio::spawn(async move { harness.manager.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shutdown.is_finished());

    harness.engine.gate.open();
    tokio::time::timeout(Duration::from_secs(10), shutdown)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(!harness.manager.is_running());
    assert_eq!(harness.engine.applied(), vec!["running"]);
    assert!(harness.manager.all_jobs().is_empty());
    assert_eq!(
        harness
            .listener
            .count(|e| matches!(e, ListenerEvent::JobEnd { success: true, .. })),
        1
    );
}

/// Batch jobs still queued at shutdown end their batch as cancelled.
#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_cancels_queued_batch() {
    let harness = TestHarness::new(0);
    harness.put_content(&["a", "b"]);

    let batch = harness
        .manager
        .index_batch(INDEX_ID, ["a", "b"], Priority::Low, Requester::anonymous())
        .unwrap();
    harness.manager.start().await.unwrap();
    harness.manager.shutdown().await.unwrap();

    assert!(batch.is_finished());
    assert!(batch.is_cancelled());
    let report = batch.report();
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(harness.listener.batch_ends(&batch), 1);
    assert!(harness.engine.applied().is_empty());
}

/// A job stuck past the timeout makes shutdown report it.
#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_timeout() {
    let config = sift_scheduler::SchedulerConfig::default()
        .with_parallel_workers(1)
        .with_shutdown_timeout(1);
    let harness = TestHarness::with_engine(config, e2e_tests::MemoryEngine::new(INDEX_ID));
    harness.put_content(&["stuck"]);
    harness.engine.gate.close();
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("stuck", INDEX_ID)).unwrap();
    wait_for_entered(&harness, 1).await;

    let result = harness.manager.shutdown().await;
    assert!(matches!(result, Err(SchedulerError::ShutdownTimeout(1))));
    assert!(!harness.manager.is_running());

    // Let the blocked write finish so the runtime can shut down
    harness.engine.gate.open();
    assert!(wait_until(Duration::from_secs(5), || harness.listener.job_ends() == 1).await);
}

/// The manager can be started again after shutdown.
#[tokio::test(flavor = "multi_thread")]
async fn test_restart() {
    let harness = TestHarness::new(1);
    harness.put_content(&["a", "b"]);

    harness.manager.start().await.unwrap();
    harness.manager.index(Job::update("a", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);
    harness.manager.shutdown().await.unwrap();

    harness.manager.start().await.unwrap();
    harness.manager.index(Job::update("b", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);
    harness.manager.shutdown().await.unwrap();

    assert_eq!(harness.engine.applied(), vec!["a", "b"]);
}

/// Previewing documents runs translation only.
#[test]
fn test_preview_documents() {
    let harness = TestHarness::new(0);
    harness.fetcher.put("doc", "First paragraph\n\nSecond paragraph");

    let docs = harness
        .manager
        .preview_documents(&Job::update("doc", INDEX_ID).with_requester(Requester::new("ui")))
        .unwrap();

    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].get("body"), Some("First paragraph"));
    assert_eq!(docs[1].get("body"), Some("Second paragraph"));
    assert_eq!(docs[0].get("_requester"), Some("ui"));
    assert!(harness.engine.applied().is_empty());
    assert!(harness.manager.is_idle());
}
