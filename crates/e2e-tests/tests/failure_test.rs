//! Failure isolation E2E tests.
//!
//! A failing job is reported through the listener and the worker moves on
//! to the next job.

use std::sync::atomic::Ordering;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{wait_until, ListenerEvent, TestHarness, FAIL_MARKER, INDEX_ID};
use sift_scheduler::NO_DOCUMENTS_WARNING;
use sift_types::{Job, Priority};

/// Translation failure: job error, then the next queued job runs.
#[tokio::test(flavor = "multi_thread")]
async fn test_translation_failure_does_not_stop_worker() {
    let harness = TestHarness::new(1);
    harness.fetcher.put("bad", FAIL_MARKER);
    harness.put_content(&["good"]);

    harness
        .manager
        .index(Job::update("bad", INDEX_ID).with_priority(Priority::High))
        .unwrap();
    harness.manager.index(Job::update("good", INDEX_ID)).unwrap();

    harness.manager.start().await.unwrap();
    assert!(harness.wait_idle().await);

    let events = harness.listener.events();
    assert_eq!(
        events,
        vec![
            ListenerEvent::JobStart("idx:bad".to_string()),
            ListenerEvent::Error {
                signature: "idx:bad".to_string(),
                message: "Failed to update content: Translation error: cannot translate bad"
                    .to_string(),
            },
            ListenerEvent::JobEnd {
                signature: "idx:bad".to_string(),
                success: false,
            },
            ListenerEvent::JobStart("idx:good".to_string()),
            ListenerEvent::JobEnd {
                signature: "idx:good".to_string(),
                success: true,
            },
        ]
    );
    assert_eq!(harness.engine.applied(), vec!["good"]);

    harness.manager.shutdown().await.unwrap();
}

/// Engine failure: job error, no retry, worker continues.
#[tokio::test(flavor = "multi_thread")]
async fn test_engine_failure_does_not_stop_worker() {
    let harness = TestHarness::new(1);
    harness.put_content(&["a", "b"]);
    harness.engine.fail_updates.store(true, Ordering::SeqCst);
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("a", INDEX_ID)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || harness.listener.job_ends() == 1).await);
    assert!(harness.wait_idle().await);

    harness.engine.fail_updates.store(false, Ordering::SeqCst);
    harness.manager.index(Job::update("b", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);

    let errors = harness.listener.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ListenerEvent::Error { signature, message }
            if signature == "idx:a" && message.contains("update rejected")
    ));
    assert_eq!(harness.engine.updates.load(Ordering::SeqCst), 1);
    assert_eq!(harness.engine.documents_for("b").len(), 1);

    harness.manager.shutdown().await.unwrap();
}

/// Missing translator for a media type is a job error.
#[tokio::test(flavor = "multi_thread")]
async fn test_unsupported_media_type() {
    let harness = TestHarness::new(1);
    harness.fetcher.put_typed("image", "bytes", "image/png");
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("image", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);

    let errors = harness.listener.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        ListenerEvent::Error { message, .. } if message.contains("Unsupported media type: image/png")
    ));

    harness.manager.shutdown().await.unwrap();
}

/// Content without paragraphs yields a warning, not a failure, and keeps
/// what was indexed for it before.
#[tokio::test(flavor = "multi_thread")]
async fn test_empty_content_warns() {
    let harness = TestHarness::new(1);
    harness.put_content(&["doc"]);
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("doc", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);
    assert_eq!(harness.engine.document_count(), 1);

    harness.fetcher.put("doc", "   ");
    harness.manager.index(Job::update("doc", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);

    assert_eq!(
        harness.listener.count(|e| matches!(
            e,
            ListenerEvent::Warning { message, .. } if message == NO_DOCUMENTS_WARNING
        )),
        1
    );
    assert_eq!(
        harness
            .listener
            .count(|e| matches!(e, ListenerEvent::JobEnd { success: true, .. })),
        2
    );
    assert_eq!(harness.engine.updates.load(Ordering::SeqCst), 1);
    assert_eq!(harness.engine.documents_for("doc").len(), 1);

    harness.manager.shutdown().await.unwrap();
}

/// Content the fetcher no longer knows is removed from the index.
#[tokio::test(flavor = "multi_thread")]
async fn test_deleted_content_is_removed() {
    let harness = TestHarness::new(1);
    harness.put_content(&["doc"]);
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("doc", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);
    assert_eq!(harness.engine.documents_for("doc").len(), 1);

    harness.fetcher.remove("doc");
    harness.manager.index(Job::update("doc", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);

    assert_eq!(harness.engine.deletes.load(Ordering::SeqCst), 1);
    assert!(harness.engine.documents_for("doc").is_empty());

    harness.manager.shutdown().await.unwrap();
}
