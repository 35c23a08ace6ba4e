//! Worker loop draining one lane of the job queue.
//!
//! A worker is a tokio task that waits on its lane and runs each job on the
//! blocking pool, since index engine calls are blocking I/O. A failing or
//! panicking job is reported to the listener and never stops the worker; only
//! cancellation of the shutdown token does.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sift_indexing::{Content, ContentFetcher, IndexEngine, IndexingError, TranslatorRegistry};
use sift_types::{Batch, DeleteRule, IndexDocument, Job, JobAction};

use crate::listener::{panic_message, ListenerHandle};
use crate::queue::{JobQueue, Lane};
use crate::registry::IndexRegistry;

/// Warning reported when translation yields nothing.
pub const NO_DOCUMENTS_WARNING: &str = "No documents to index";

/// Run a collaborator call, turning a panic into [`IndexingError::Panicked`].
fn guarded<T>(
    what: &str,
    f: impl FnOnce() -> Result<T, IndexingError>,
) -> Result<T, IndexingError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(IndexingError::Panicked(format!(
            "{} panicked: {}",
            what,
            panic_message(payload.as_ref())
        )))
    })
}

/// Fail with [`IndexingError::Interrupted`] once shutdown has been requested.
fn ensure_running(shutdown: &CancellationToken) -> Result<(), IndexingError> {
    if shutdown.is_cancelled() {
        return Err(IndexingError::Interrupted);
    }
    Ok(())
}

/// Everything a worker needs to execute jobs, shared with the manager.
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) registry: Arc<IndexRegistry>,
    pub(crate) translators: Arc<TranslatorRegistry>,
    pub(crate) fetcher: Arc<dyn ContentFetcher>,
    pub(crate) listener: ListenerHandle,
}

impl WorkerContext {
    /// Fetch and translate the content of an update job, merging in the
    /// engine's custom fields.
    pub(crate) fn documents_for(
        &self,
        job: &Job,
        engine: &dyn IndexEngine,
    ) -> Result<Translated, IndexingError> {
        let content = guarded("Content fetcher", || self.fetcher.fetch(job))?;
        let mut source = match content {
            Content::Deleted(rule) => return Ok(Translated::Deleted(rule)),
            Content::Source(source) => source,
        };

        let parameters = guarded("Index engine", || Ok(engine.parameters()))?;
        let mut documents = guarded("Translator", || {
            self.translators.translate(job, &mut source, parameters)
        })?;

        let custom = guarded("Index engine", || Ok(engine.custom_fields(job)))?;
        if !custom.is_empty() {
            for document in documents.iter_mut() {
                document.merge_custom_fields(&custom);
            }
        }

        Ok(Translated::Documents {
            delete_rule: source.delete_rule,
            documents,
        })
    }

    /// Execute one dequeued job from start to end events.
    pub(crate) fn execute(&self, mut job: Job, shutdown: &CancellationToken) {
        let batch = job.batch().cloned();
        if let Some(batch) = &batch {
            if batch.mark_started_if_needed() {
                self.listener.batch_start(batch);
            }
        }

        job.mark_started();
        self.listener.job_start(&job);

        let engine = self.registry.get(job.index_id());
        let success = match &engine {
            Ok(engine) => match self.perform(&job, engine.as_ref(), shutdown) {
                Ok(success) => success,
                Err(e) => {
                    let message = format!("Failed to {} content", job.action().name());
                    debug!(job = %job.id(), error = %e, "{}", message);
                    self.listener.job_error(&job, &message, Some(&e));
                    false
                }
            },
            Err(e) => {
                self.listener
                    .job_error(&job, "No index engine for job", Some(e));
                false
            }
        };

        job.finish(success);
        let batch_completed = batch
            .as_ref()
            .map(|batch| batch.record_completion())
            .unwrap_or(false);

        if let Ok(engine) = &engine {
            if batch_completed || (batch.is_none() && success) {
                self.hint(&job, "refresh", || engine.maybe_refresh());
            }
            if !self.queue.has_jobs_for_index(job.index_id()) {
                self.hint(&job, "commit", || engine.maybe_commit());
            }
        }

        self.listener.job_end(&job);
        if batch_completed {
            if let Some(batch) = &batch {
                self.listener.batch_end(batch);
            }
        }
    }

    /// Apply the job to its engine.
    ///
    /// `Ok(false)` means the job failed and a warning was already reported.
    fn perform(
        &self,
        job: &Job,
        engine: &dyn IndexEngine,
        shutdown: &CancellationToken,
    ) -> Result<bool, IndexingError> {
        match job.action() {
            JobAction::Clear => {
                ensure_running(shutdown)?;
                let cleared = guarded("Index engine", || engine.clear_index())?;
                if !cleared {
                    self.listener.job_warning(job, "Index was not cleared");
                }
                Ok(cleared)
            }
            JobAction::Delete { delete_rule, .. } => {
                ensure_running(shutdown)?;
                guarded("Index engine", || engine.delete_documents(delete_rule))?;
                Ok(true)
            }
            JobAction::Update { .. } => match self.documents_for(job, engine)? {
                Translated::Deleted(rule) => {
                    ensure_running(shutdown)?;
                    guarded("Index engine", || engine.delete_documents(&rule))?;
                    Ok(true)
                }
                Translated::Documents {
                    delete_rule,
                    documents,
                } => {
                    // Entries already indexed for the content are kept
                    if documents.is_empty() {
                        self.listener.job_warning(job, NO_DOCUMENTS_WARNING);
                        return Ok(true);
                    }
                    ensure_running(shutdown)?;
                    let applied = guarded("Index engine", || {
                        engine.update_documents(&delete_rule, documents)
                    })?;
                    if !applied {
                        self.listener
                            .job_warning(job, "Index engine did not apply the update");
                    }
                    Ok(true)
                }
            },
        }
    }

    /// Hints for a batch that completed without a worker finishing its last
    /// job: refresh the index, and commit it when nothing else is queued for it.
    pub(crate) fn batch_hints(&self, batch: &Batch, index_id: &str) {
        let engine = match self.registry.get(index_id) {
            Ok(engine) => engine,
            Err(e) => {
                debug!(batch = %batch.id(), error = %e, "No index engine for batch");
                return;
            }
        };

        let report = |what: &str, result: Result<(), IndexingError>| {
            if let Err(e) = result {
                warn!(batch = %batch.id(), index = %index_id, error = %e, "Index {} failed", what);
            }
        };
        report("refresh", guarded("Index engine", || engine.maybe_refresh()));
        if !self.queue.has_jobs_for_index(index_id) {
            report("commit", guarded("Index engine", || engine.maybe_commit()));
        }
    }

    /// Best-effort commit or refresh. Failures become warnings.
    fn hint(&self, job: &Job, what: &str, f: impl FnOnce() -> Result<(), IndexingError>) {
        if let Err(e) = guarded("Index engine", f) {
            warn!(job = %job.id(), index = %job.index_id(), error = %e, "Index {} failed", what);
            self.listener
                .job_warning(job, &format!("Index {} failed: {}", what, e));
        }
    }
}

/// Result of fetching and translating an update job's content.
pub(crate) enum Translated {
    /// The content is gone; remove what matches the rule.
    Deleted(DeleteRule),
    /// Replace what matches the rule with these documents.
    Documents {
        delete_rule: DeleteRule,
        documents: Vec<IndexDocument>,
    },
}

/// One consumer of a lane.
pub(crate) struct Worker {
    name: String,
    lane: Lane,
    context: Arc<WorkerContext>,
    shutdown: CancellationToken,
}

impl Worker {
    pub(crate) fn parallel(
        number: usize,
        context: Arc<WorkerContext>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name: format!("indexing-t{}", number),
            lane: Lane::Parallel,
            context,
            shutdown,
        }
    }

    pub(crate) fn serial(context: Arc<WorkerContext>, shutdown: CancellationToken) -> Self {
        Self {
            name: "indexing-serial".to_string(),
            lane: Lane::Serial,
            context,
            shutdown,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Drain the lane until shutdown.
    pub(crate) async fn run(self) {
        info!(worker = %self.name, lane = ?self.lane, "Worker started");

        while let Some(job) = self
            .context
            .queue
            .dequeue(self.lane, &self.shutdown)
            .await
        {
            debug!(worker = %self.name, job = %job.id(), "Dequeued job");
            let context = self.context.clone();
            let shutdown = self.shutdown.clone();
            let task = tokio::task::spawn_blocking(move || context.execute(job, &shutdown));
            if let Err(e) = task.await {
                // Bookkeeping outside the guarded calls failed; keep draining.
                error!(worker = %self.name, error = %e, "Job execution aborted");
            }
            self.context.queue.mark_done();
        }

        info!(worker = %self.name, "Worker stopped");
    }
}
