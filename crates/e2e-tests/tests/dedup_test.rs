//! Deduplication and promotion E2E tests.
//!
//! Jobs are submitted through the manager while it is stopped, so the queue
//! can be inspected before any worker takes a job.

use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;

use e2e_tests::{TestHarness, INDEX_ID};
use sift_scheduler::EnqueueOutcome;
use sift_types::{DeleteRule, Job, Priority, Requester};

fn pending(harness: &TestHarness) -> Vec<(String, Priority)> {
    let mut jobs: Vec<(String, Priority)> = harness
        .manager
        .all_jobs()
        .iter()
        .map(|job| (job.signature().to_string(), job.priority()))
        .collect();
    jobs.sort();
    jobs
}

/// LOW J1 then HIGH J2 for one signature: only J2 remains.
#[test]
fn test_high_submission_promotes_pending_low() {
    let harness = TestHarness::new(0);

    let j1 = Job::update("doc1", INDEX_ID).with_priority(Priority::Low);
    let j1_id = j1.id();
    let j2 = Job::update("doc1", INDEX_ID).with_priority(Priority::High);
    let j2_id = j2.id();

    harness.manager.index(j1).unwrap();
    match harness.manager.index(j2).unwrap() {
        EnqueueOutcome::Promoted { displaced } => assert_eq!(displaced.id(), j1_id),
        other => panic!("Expected promotion, got {:?}", other),
    }

    let jobs = harness.manager.all_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id(), j2_id);
    assert_eq!(jobs[0].priority(), Priority::High);
}

/// HIGH J1 then LOW J2 for one signature: J1 stays unchanged.
#[test]
fn test_low_submission_does_not_replace_pending_high() {
    let harness = TestHarness::new(0);

    let j1 = Job::update("doc1", INDEX_ID)
        .with_priority(Priority::High)
        .with_parameter("origin", "first");
    let j1_id = j1.id();

    harness.manager.index(j1).unwrap();
    let outcome = harness
        .manager
        .index(Job::update("doc1", INDEX_ID).with_parameter("origin", "second"))
        .unwrap();
    assert!(!outcome.is_queued());

    let jobs = harness.manager.all_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id(), j1_id);
    assert_eq!(
        jobs[0].parameters().get("origin").map(String::as_str),
        Some("first")
    );
}

/// The action is not part of the signature: a HIGH delete replaces a LOW update.
#[test]
fn test_promotion_replaces_action() {
    let harness = TestHarness::new(0);

    harness.manager.index(Job::update("doc1", INDEX_ID)).unwrap();
    harness
        .manager
        .index(
            Job::delete("doc1", INDEX_ID, DeleteRule::term("_path", "doc1"))
                .with_priority(Priority::High),
        )
        .unwrap();

    let jobs = harness.manager.all_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].action().name(), "delete");
}

/// Many producers racing on a few signatures leave one job per signature,
/// at the highest priority submitted for it.
#[test]
fn test_concurrent_producers_dedup() {
    let harness = Arc::new(TestHarness::new(0));

    let producers: Vec<_> = (0..6)
        .map(|producer| {
            let harness = harness.clone();
            thread::spawn(move || {
                for round in 0..40 {
                    let doc = format!("doc{}", round % 4);
                    // Only doc0 and doc1 ever see a HIGH submission
                    let priority = if round % 4 < 2 && (producer + round) % 5 == 0 {
                        Priority::High
                    } else {
                        Priority::Low
                    };
                    harness
                        .manager
                        .index(
                            Job::update(doc, INDEX_ID)
                                .with_priority(priority)
                                .with_requester(Requester::new(format!("p{}", producer))),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(
        pending(&harness),
        vec![
            ("idx:doc0".to_string(), Priority::High),
            ("idx:doc1".to_string(), Priority::High),
            ("idx:doc2".to_string(), Priority::Low),
            ("idx:doc3".to_string(), Priority::Low),
        ]
    );
}

/// Once a worker has taken a job, its signature is free again, so a later
/// change to the same content is indexed too.
#[tokio::test(flavor = "multi_thread")]
async fn test_resubmission_after_dequeue_runs_again() {
    let harness = TestHarness::new(1);
    harness.put_content(&["doc1"]);
    harness.manager.start().await.unwrap();

    harness.manager.index(Job::update("doc1", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);

    harness.fetcher.put("doc1", "Changed content");
    harness.manager.index(Job::update("doc1", INDEX_ID)).unwrap();
    assert!(harness.wait_idle().await);

    assert_eq!(harness.engine.applied(), vec!["doc1", "doc1"]);
    let docs = harness.engine.documents_for("doc1");
    assert_eq!(docs[0].get("body"), Some("Changed content"));

    harness.manager.shutdown().await.unwrap();
}
