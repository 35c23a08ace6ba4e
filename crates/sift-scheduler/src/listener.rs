//! Job and batch lifecycle events.
//!
//! Implementations of [`IndexListener`] observe what workers do. Every
//! callback has a no-op default so implementers only override what they need.
//! Callbacks run on worker threads and are fire-and-forget: a panicking
//! listener is logged and otherwise ignored.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use sift_indexing::IndexingError;
use sift_types::{Batch, Job};

/// Observer of job execution.
pub trait IndexListener: Send + Sync {
    /// A worker took the job and is about to execute it.
    fn on_job_start(&self, _job: &Job) {}

    /// The job finished, successfully or not. Check [`Job::was_successful`].
    fn on_job_end(&self, _job: &Job) {}

    /// Something noteworthy happened that did not fail the job.
    fn on_job_warning(&self, _job: &Job, _message: &str) {}

    /// The job failed.
    fn on_job_error(&self, _job: &Job, _message: &str, _cause: Option<&IndexingError>) {}

    /// The first job of the batch started.
    fn on_batch_start(&self, _batch: &Batch) {}

    /// Every job of the batch has finished or been dropped.
    fn on_batch_end(&self, _batch: &Batch) {}
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpListener;

impl IndexListener for NoOpListener {}

/// Listener that turns events into `tracing` log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl IndexListener for TracingListener {
    fn on_job_start(&self, job: &Job) {
        debug!(
            job = %job.id(),
            action = job.action().name(),
            signature = %job.signature(),
            priority = %job.priority(),
            "Job started"
        );
    }

    fn on_job_end(&self, job: &Job) {
        debug!(
            job = %job.id(),
            signature = %job.signature(),
            success = job.was_successful(),
            "Job finished"
        );
    }

    fn on_job_warning(&self, job: &Job, message: &str) {
        warn!(job = %job.id(), signature = %job.signature(), "{}", message);
    }

    fn on_job_error(&self, job: &Job, message: &str, cause: Option<&IndexingError>) {
        match cause {
            Some(cause) => error!(
                job = %job.id(),
                signature = %job.signature(),
                error = %cause,
                "{}",
                message
            ),
            None => error!(job = %job.id(), signature = %job.signature(), "{}", message),
        }
    }

    fn on_batch_start(&self, batch: &Batch) {
        debug!(
            batch = %batch.id(),
            index = batch.index_id().unwrap_or_default(),
            total = batch.total_count(),
            "Batch started"
        );
    }

    fn on_batch_end(&self, batch: &Batch) {
        let report = batch.report();
        info!(
            batch = %report.batch_id,
            index = report.index_id.as_deref().unwrap_or_default(),
            total = report.total,
            skipped = report.skipped,
            cancelled = report.cancelled,
            indexing_ms = report.indexing_ms.unwrap_or_default(),
            total_ms = report.total_ms.unwrap_or_default(),
            "Batch finished"
        );
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Shared listener whose callbacks cannot unwind into the caller.
#[derive(Clone)]
pub(crate) struct ListenerHandle {
    inner: Arc<dyn IndexListener>,
}

impl ListenerHandle {
    pub(crate) fn new(inner: Arc<dyn IndexListener>) -> Self {
        Self { inner }
    }

    fn dispatch(&self, event: &'static str, f: impl FnOnce(&dyn IndexListener)) {
        let listener = self.inner.as_ref();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| f(listener))) {
            error!(
                event = event,
                panic = %panic_message(payload.as_ref()),
                "Listener panicked"
            );
        }
    }

    pub(crate) fn job_start(&self, job: &Job) {
        self.dispatch("job_start", |l| l.on_job_start(job));
    }

    pub(crate) fn job_end(&self, job: &Job) {
        self.dispatch("job_end", |l| l.on_job_end(job));
    }

    pub(crate) fn job_warning(&self, job: &Job, message: &str) {
        self.dispatch("job_warning", |l| l.on_job_warning(job, message));
    }

    pub(crate) fn job_error(&self, job: &Job, message: &str, cause: Option<&IndexingError>) {
        self.dispatch("job_error", |l| l.on_job_error(job, message, cause));
    }

    pub(crate) fn batch_start(&self, batch: &Batch) {
        self.dispatch("batch_start", |l| l.on_batch_start(batch));
    }

    pub(crate) fn batch_end(&self, batch: &Batch) {
        self.dispatch("batch_end", |l| l.on_batch_end(batch));
    }
}
