//! Index manager: producer facade and worker lifecycle.
//!
//! The manager owns the job queue, the index registry and the translator
//! registry, and starts the workers that drain the queue. Producers submit
//! jobs through it; queued jobs that leave without running are settled
//! against their batch here so batches always complete. Jobs covered by
//! another queued job count as skipped, jobs abandoned by a clear or a
//! shutdown count as cancelled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sift_indexing::{ContentFetcher, ContentTranslator, IndexEngine, TranslatorRegistry};
use sift_types::{Batch, IndexDocument, Job, Priority, Requester};

use crate::listener::{IndexListener, ListenerHandle};
use crate::queue::{EnqueueOutcome, JobQueue, Lane};
use crate::registry::IndexRegistry;
use crate::worker::{Translated, Worker, WorkerContext};
use crate::{SchedulerConfig, SchedulerError};

/// Workers of one start/shutdown cycle.
struct RunState {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

/// Entry point for scheduling index work.
///
/// Created stopped. Jobs may be submitted before [`IndexManager::start`]; they
/// wait in the queue until workers run.
pub struct IndexManager {
    config: SchedulerConfig,
    context: Arc<WorkerContext>,
    running: Mutex<Option<RunState>>,
}

impl IndexManager {
    /// Create a stopped manager.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the configuration is invalid.
    pub fn new(
        config: SchedulerConfig,
        fetcher: Arc<dyn ContentFetcher>,
        listener: Arc<dyn IndexListener>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let context = Arc::new(WorkerContext {
            queue: Arc::new(JobQueue::new()),
            registry: Arc::new(IndexRegistry::new()),
            translators: Arc::new(TranslatorRegistry::new()),
            fetcher,
            listener: ListenerHandle::new(listener),
        });

        Ok(Self {
            config,
            context,
            running: Mutex::new(None),
        })
    }

    fn run_state(&self) -> MutexGuard<'_, Option<RunState>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the workers.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the manager is already started.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut running = self.run_state();
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let mut workers = Vec::with_capacity(self.config.parallel_workers + 1);

        for number in 0..self.config.parallel_workers {
            let worker = Worker::parallel(number, self.context.clone(), shutdown.clone());
            debug!(worker = %worker.name(), "Spawning worker");
            workers.push(tokio::spawn(worker.run()));
        }
        if self.config.serial_lane {
            let worker = Worker::serial(self.context.clone(), shutdown.clone());
            debug!(worker = %worker.name(), "Spawning worker");
            workers.push(tokio::spawn(worker.run()));
        }

        info!(
            parallel_workers = self.config.parallel_workers,
            serial_lane = self.config.serial_lane,
            "Index manager started"
        );
        *running = Some(RunState { shutdown, workers });
        Ok(())
    }

    /// Stop the workers and close every registered engine.
    ///
    /// Queued jobs are dropped. Jobs already executing are given
    /// `shutdown_timeout_secs` to finish; jobs that have not written to their
    /// engine yet fail as interrupted. A stopped manager can be started again.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the manager is not started, or
    /// `SchedulerError::ShutdownTimeout` if workers were still busy when the
    /// timeout expired. Engines are closed in both cases.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        let state = self.run_state().take().ok_or(SchedulerError::NotRunning)?;

        info!("Initiating index manager shutdown");
        state.shutdown.cancel();

        let dropped = self.context.queue.clear();
        if !dropped.is_empty() {
            info!(count = dropped.len(), "Dropped queued jobs");
        }
        self.settle(&dropped, Batch::record_cancelled);

        let timeout_secs = self.config.shutdown_timeout_secs;
        let joined = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            futures::future::join_all(state.workers),
        )
        .await;

        let result = match joined {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Worker task failed");
                    }
                }
                Ok(())
            }
            Err(_) => {
                warn!(timeout_secs, "Workers still busy after shutdown timeout");
                Err(SchedulerError::ShutdownTimeout(timeout_secs))
            }
        };

        let failures = self.context.registry.close_all();
        if failures > 0 {
            warn!(failures, "Some index engines failed to close");
        }

        info!("Index manager shutdown complete");
        result
    }

    /// Check if the workers are running.
    pub fn is_running(&self) -> bool {
        self.run_state().is_some()
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The engines this manager routes jobs to.
    pub fn registry(&self) -> &IndexRegistry {
        &self.context.registry
    }

    /// Register an engine under its index identifier, replacing any previous one.
    pub fn register_index(&self, engine: Arc<dyn IndexEngine>) -> Option<Arc<dyn IndexEngine>> {
        self.context.registry.register(engine)
    }

    /// Remove an engine and every queued job targeting it.
    ///
    /// Jobs already executing against the engine are unaffected. The engine is
    /// returned, not closed.
    pub fn deregister_index(&self, index_id: &str) -> Option<Arc<dyn IndexEngine>> {
        self.clear_for_index(index_id);
        self.context.registry.deregister(index_id)
    }

    /// Register a translator for every media type it advertises.
    pub fn register_translator(&self, translator: Arc<dyn ContentTranslator>) {
        self.context.translators.register(translator);
    }

    /// Register a translator for one media type.
    pub fn register_translator_for(
        &self,
        media_type: impl Into<String>,
        translator: Arc<dyn ContentTranslator>,
    ) {
        self.context.translators.register_for(media_type, translator);
    }

    /// Set the translator used for media types without a dedicated one.
    pub fn set_default_translator(&self, translator: Arc<dyn ContentTranslator>) {
        self.context.translators.set_default(translator);
    }

    /// Queue a job in a lane.
    ///
    /// With the serial lane disabled, serial submissions go to the parallel
    /// lane. A job that is displaced by or rejected in favour of another is
    /// counted as skipped in its batch.
    pub fn submit(&self, job: Job, lane: Lane) -> EnqueueOutcome {
        let lane = if lane == Lane::Serial && !self.config.serial_lane {
            Lane::Parallel
        } else {
            lane
        };

        let outcome = self.context.queue.enqueue(job, lane);
        match &outcome {
            EnqueueOutcome::Inserted => {}
            EnqueueOutcome::Promoted { displaced } => {
                self.settle(std::slice::from_ref(displaced), Batch::record_skipped)
            }
            EnqueueOutcome::Discarded { rejected } => {
                self.settle(std::slice::from_ref(rejected), Batch::record_skipped)
            }
        }
        outcome
    }

    /// Queue a job in the lane its engine needs.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Indexing` if the job's index is not registered.
    pub fn index(&self, job: Job) -> Result<EnqueueOutcome, SchedulerError> {
        let lane = self.lane_for(job.index_id())?;
        Ok(self.submit(job, lane))
    }

    /// Queue one update job per content id, tracked as a single batch.
    ///
    /// An empty batch completes immediately.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Indexing` if the index is not registered.
    pub fn index_batch<I, S>(
        &self,
        index_id: &str,
        content_ids: I,
        priority: Priority,
        requester: Requester,
    ) -> Result<Arc<Batch>, SchedulerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lane = self.lane_for(index_id)?;
        let content_ids: Vec<String> = content_ids.into_iter().map(Into::into).collect();

        if content_ids.is_empty() {
            let batch = Arc::new(Batch::open(index_id));
            self.complete_batch(&batch);
            return Ok(batch);
        }

        let batch = Arc::new(Batch::for_index(index_id, content_ids.len()));
        info!(
            batch = %batch.id(),
            index = %index_id,
            total = content_ids.len(),
            "Submitting batch"
        );
        for content_id in content_ids {
            let job = Job::update(content_id, index_id)
                .with_priority(priority)
                .with_requester(requester.clone())
                .with_batch(batch.clone());
            self.submit(job, lane);
        }
        Ok(batch)
    }

    /// Mark an open batch as fully submitted.
    ///
    /// Reports the batch end right away if every job already finished.
    pub fn complete_batch(&self, batch: &Arc<Batch>) {
        if batch.set_computed() {
            self.report_batch_end(batch, batch.index_id());
        }
    }

    /// Remove queued jobs for an index, then queue a job clearing it.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Indexing` if the index is not registered.
    pub fn clear(
        &self,
        index_id: &str,
        priority: Priority,
        requester: Requester,
    ) -> Result<EnqueueOutcome, SchedulerError> {
        let lane = self.lane_for(index_id)?;
        self.clear_for_index(index_id);
        let job = Job::clear(index_id)
            .with_priority(priority)
            .with_requester(requester);
        Ok(self.submit(job, lane))
    }

    /// Remove every queued job targeting an index.
    ///
    /// Jobs already taken by a worker run to completion. Removed batch jobs
    /// are counted as cancelled. Returns the number of jobs removed.
    pub fn clear_for_index(&self, index_id: &str) -> usize {
        let removed = self.context.queue.clear_for_index(index_id);
        self.settle(&removed, Batch::record_cancelled);
        removed.len()
    }

    /// Fetch and translate a job's content without touching queue or engine.
    ///
    /// Deleted content yields no documents.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Indexing` if the index is not registered or
    /// fetching or translation fails.
    pub fn preview_documents(&self, job: &Job) -> Result<Vec<IndexDocument>, SchedulerError> {
        let engine = self.context.registry.get(job.index_id())?;
        match self.context.documents_for(job, engine.as_ref())? {
            Translated::Deleted(_) => Ok(Vec::new()),
            Translated::Documents { documents, .. } => Ok(documents),
        }
    }

    /// Queued jobs submitted by a requester.
    pub fn jobs_for_requester(&self, requester: &Requester) -> Vec<Job> {
        self.context.queue.jobs_for_requester(requester)
    }

    /// Number of queued jobs submitted by a requester.
    pub fn count_for_requester(&self, requester: &Requester) -> usize {
        self.context.queue.count_for_requester(requester)
    }

    /// Queued jobs targeting an index.
    pub fn jobs_for_index(&self, index_id: &str) -> Vec<Job> {
        self.context.queue.jobs_for_index(index_id)
    }

    /// Number of queued jobs targeting an index.
    pub fn count_for_index(&self, index_id: &str) -> usize {
        self.context.queue.count_for_index(index_id)
    }

    /// Whether any job for the index is queued.
    pub fn has_jobs_for_index(&self, index_id: &str) -> bool {
        self.context.queue.has_jobs_for_index(index_id)
    }

    /// Every queued job.
    pub fn all_jobs(&self) -> Vec<Job> {
        self.context.queue.all_jobs()
    }

    /// Whether no job is queued or executing.
    pub fn is_idle(&self) -> bool {
        self.context.queue.is_idle()
    }

    fn lane_for(&self, index_id: &str) -> Result<Lane, SchedulerError> {
        let engine = self.context.registry.get(index_id)?;
        Ok(if engine.requires_single_writer() {
            Lane::Serial
        } else {
            Lane::Parallel
        })
    }

    /// Count batch members that left the queue without running.
    fn settle(&self, jobs: &[Job], record: fn(&Batch) -> bool) {
        for job in jobs {
            if let Some(batch) = job.batch() {
                if record(batch.as_ref()) {
                    self.report_batch_end(batch, Some(job.index_id()));
                }
            }
        }
    }

    /// Report a batch that completed outside a worker.
    fn report_batch_end(&self, batch: &Batch, index_id: Option<&str>) {
        if batch.mark_started_if_needed() {
            self.context.listener.batch_start(batch);
        }
        if let Some(index_id) = index_id {
            self.context.batch_hints(batch, index_id);
        }
        self.context.listener.batch_end(batch);
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        if let Some(state) = self.run_state().take() {
            state.shutdown.cancel();
        }
    }
}
