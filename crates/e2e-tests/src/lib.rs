//! End-to-end test infrastructure for sift.
//!
//! Provides a shared TestHarness wiring an `IndexManager` to in-memory
//! collaborators, plus helpers for observing what workers did.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use sift_indexing::{
    Content, ContentFetcher, ContentSource, ContentTranslator, IndexEngine, IndexingError,
    TranslationRequest,
};
use sift_scheduler::{IndexListener, IndexManager, SchedulerConfig};
use sift_types::{Batch, DeleteRule, IndexDocument, IndexField, Job};

/// Index identifier used by the harness engine.
pub const INDEX_ID: &str = "idx";

/// Field holding the content identifier in translated documents.
pub const PATH_FIELD: &str = "_path";

/// Content containing this marker fails translation.
pub const FAIL_MARKER: &str = "FAIL";

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A latch engine calls wait on while it is closed.
#[derive(Default)]
pub struct Gate {
    closed: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    pub fn open(&self) {
        *self.closed.lock().unwrap() = false;
        self.changed.notify_all();
    }

    fn pass(&self) {
        let mut closed = self.closed.lock().unwrap();
        while *closed {
            closed = self.changed.wait(closed).unwrap();
        }
    }
}

fn rule_key(rule: &DeleteRule) -> String {
    match rule {
        DeleteRule::Term { value, .. } => value.clone(),
        DeleteRule::Query(query) => query.clone(),
    }
}

/// In-memory index engine recording every call.
pub struct MemoryEngine {
    id: String,
    single_writer: bool,
    documents: Mutex<HashMap<String, Vec<IndexDocument>>>,
    applied: Mutex<Vec<String>>,
    /// Blocks writes while closed.
    pub gate: Gate,
    /// Writes that reached the engine, including those waiting at the gate.
    pub entered: AtomicUsize,
    in_write: AtomicUsize,
    max_in_write: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub clears: AtomicUsize,
    pub commits: AtomicUsize,
    pub refreshes: AtomicUsize,
    /// When set, every update fails with an engine error.
    pub fail_updates: AtomicBool,
}

impl MemoryEngine {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            single_writer: false,
            documents: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
            gate: Gate::default(),
            entered: AtomicUsize::new(0),
            in_write: AtomicUsize::new(0),
            max_in_write: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            fail_updates: AtomicBool::new(false),
        }
    }

    /// Engine whose jobs go to the serial lane.
    pub fn single_writer(id: &str) -> Self {
        Self {
            single_writer: true,
            ..Self::new(id)
        }
    }

    /// Content ids in the order their writes were applied (`clear` for clears).
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    /// Documents currently stored for a content id.
    pub fn documents_for(&self, content_id: &str) -> Vec<IndexDocument> {
        self.documents
            .lock()
            .unwrap()
            .get(content_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of content ids with stored documents.
    pub fn document_count(&self) -> usize {
        self.documents.lock().unwrap().len()
    }

    /// Highest number of writes observed running at the same time.
    pub fn max_concurrent_writes(&self) -> usize {
        self.max_in_write.load(Ordering::SeqCst)
    }

    fn write<T>(&self, key: String, f: impl FnOnce() -> T) -> T {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let now = self.in_write.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_write.fetch_max(now, Ordering::SeqCst);
        self.gate.pass();
        let result = f();
        self.applied.lock().unwrap().push(key);
        self.in_write.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl IndexEngine for MemoryEngine {
    fn index_id(&self) -> &str {
        &self.id
    }

    fn requires_single_writer(&self) -> bool {
        self.single_writer
    }

    fn custom_fields(&self, job: &Job) -> Vec<IndexField> {
        vec![IndexField::keyword("_requester", job.requester().id())]
    }

    fn update_documents(
        &self,
        delete_rule: &DeleteRule,
        documents: Vec<IndexDocument>,
    ) -> Result<bool, IndexingError> {
        let key = rule_key(delete_rule);
        self.write(key.clone(), || {
            if self.fail_updates.load(Ordering::SeqCst) {
                return Err(IndexingError::Engine("update rejected".to_string()));
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            let mut stored = self.documents.lock().unwrap();
            if documents.is_empty() {
                stored.remove(&key);
            } else {
                stored.insert(key.clone(), documents);
            }
            Ok(true)
        })
    }

    fn delete_documents(&self, delete_rule: &DeleteRule) -> Result<(), IndexingError> {
        let key = rule_key(delete_rule);
        self.write(key.clone(), || {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.documents.lock().unwrap().remove(&key);
            Ok(())
        })
    }

    fn clear_index(&self) -> Result<bool, IndexingError> {
        self.write("clear".to_string(), || {
            self.clears.fetch_add(1, Ordering::SeqCst);
            self.documents.lock().unwrap().clear();
            Ok(true)
        })
    }

    fn maybe_commit(&self) -> Result<(), IndexingError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn maybe_refresh(&self) -> Result<(), IndexingError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fetcher serving content from a map. Unknown ids are reported deleted.
#[derive(Default)]
pub struct StaticFetcher {
    content: Mutex<HashMap<String, (String, String)>>,
}

impl StaticFetcher {
    /// Store plain text content.
    pub fn put(&self, content_id: &str, text: &str) {
        self.put_typed(content_id, text, "text/plain");
    }

    /// Store content with an explicit media type.
    pub fn put_typed(&self, content_id: &str, text: &str, media_type: &str) {
        self.content.lock().unwrap().insert(
            content_id.to_string(),
            (text.to_string(), media_type.to_string()),
        );
    }

    pub fn remove(&self, content_id: &str) {
        self.content.lock().unwrap().remove(content_id);
    }
}

impl ContentFetcher for StaticFetcher {
    fn fetch(&self, job: &Job) -> Result<Content, IndexingError> {
        let content_id = job
            .content_id()
            .ok_or_else(|| IndexingError::Fetch("job has no content".to_string()))?;
        let rule = DeleteRule::term(PATH_FIELD, content_id);
        match self.content.lock().unwrap().get(content_id) {
            Some((text, media_type)) => Ok(Content::Source(ContentSource::from_text(
                text.clone(),
                media_type.clone(),
                rule,
            ))),
            None => Ok(Content::Deleted(rule)),
        }
    }
}

/// One document per paragraph of plain text.
pub struct PlainTextTranslator;

impl ContentTranslator for PlainTextTranslator {
    fn media_types(&self) -> Vec<String> {
        vec!["text/plain".to_string()]
    }

    fn translate(&self, request: TranslationRequest<'_>) -> Result<Vec<IndexDocument>, IndexingError> {
        let mut text = String::new();
        request.reader.read_to_string(&mut text)?;
        if text.contains(FAIL_MARKER) {
            return Err(IndexingError::Translation(format!(
                "cannot translate {}",
                request.job.content_id().unwrap_or_default()
            )));
        }

        let path = request.job.content_id().unwrap_or_default();
        Ok(text
            .split("\n\n")
            .map(str::trim)
            .filter(|paragraph| !paragraph.is_empty())
            .map(|paragraph| {
                IndexDocument::new()
                    .with_field(IndexField::keyword(PATH_FIELD, path))
                    .with_field(IndexField::new("body", paragraph))
            })
            .collect())
    }
}

/// What a [`RecordingListener`] saw, keyed by job signature or batch id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    JobStart(String),
    JobEnd { signature: String, success: bool },
    Warning { signature: String, message: String },
    Error { signature: String, message: String },
    BatchStart(String),
    BatchEnd(String),
}

/// Listener keeping every event in order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ListenerEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    pub fn job_ends(&self) -> usize {
        self.count(|e| matches!(e, ListenerEvent::JobEnd { .. }))
    }

    pub fn errors(&self) -> Vec<ListenerEvent> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, ListenerEvent::Error { .. }))
            .collect()
    }

    pub fn batch_ends(&self, batch: &Batch) -> usize {
        let id = batch.id();
        self.count(|e| matches!(e, ListenerEvent::BatchEnd(b) if *b == id))
    }

    pub fn batch_starts(&self, batch: &Batch) -> usize {
        let id = batch.id();
        self.count(|e| matches!(e, ListenerEvent::BatchStart(b) if *b == id))
    }

    fn push(&self, event: ListenerEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl IndexListener for RecordingListener {
    fn on_job_start(&self, job: &Job) {
        self.push(ListenerEvent::JobStart(job.signature().to_string()));
    }

    fn on_job_end(&self, job: &Job) {
        self.push(ListenerEvent::JobEnd {
            signature: job.signature().to_string(),
            success: job.was_successful(),
        });
    }

    fn on_job_warning(&self, job: &Job, message: &str) {
        self.push(ListenerEvent::Warning {
            signature: job.signature().to_string(),
            message: message.to_string(),
        });
    }

    fn on_job_error(&self, job: &Job, message: &str, cause: Option<&IndexingError>) {
        let message = match cause {
            Some(cause) => format!("{}: {}", message, cause),
            None => message.to_string(),
        };
        self.push(ListenerEvent::Error {
            signature: job.signature().to_string(),
            message,
        });
    }

    fn on_batch_start(&self, batch: &Batch) {
        self.push(ListenerEvent::BatchStart(batch.id()));
    }

    fn on_batch_end(&self, batch: &Batch) {
        self.push(ListenerEvent::BatchEnd(batch.id()));
    }
}

/// Shared test harness for E2E tests.
///
/// A manager with one registered [`MemoryEngine`] under [`INDEX_ID`], a
/// [`StaticFetcher`], a [`PlainTextTranslator`] and a [`RecordingListener`].
/// The manager is not started.
pub struct TestHarness {
    pub manager: IndexManager,
    pub engine: Arc<MemoryEngine>,
    pub fetcher: Arc<StaticFetcher>,
    pub listener: Arc<RecordingListener>,
}

impl TestHarness {
    /// Harness with `workers` parallel workers and no serial lane.
    pub fn new(workers: usize) -> Self {
        Self::with_engine(
            SchedulerConfig::default()
                .with_parallel_workers(workers)
                .with_shutdown_timeout(5),
            MemoryEngine::new(INDEX_ID),
        )
    }

    /// Harness with a custom configuration and engine.
    pub fn with_engine(config: SchedulerConfig, engine: MemoryEngine) -> Self {
        init_tracing();

        let engine = Arc::new(engine);
        let fetcher = Arc::new(StaticFetcher::default());
        let listener = Arc::new(RecordingListener::default());

        let manager = IndexManager::new(config, fetcher.clone(), listener.clone())
            .expect("Failed to create index manager");
        manager.register_index(engine.clone());
        manager.register_translator(Arc::new(PlainTextTranslator));

        Self {
            manager,
            engine,
            fetcher,
            listener,
        }
    }

    /// Store plain text content for each id.
    pub fn put_content(&self, ids: &[&str]) {
        for id in ids {
            self.fetcher.put(id, &format!("Content of {}", id));
        }
    }

    /// Wait until nothing is queued or running.
    pub async fn wait_idle(&self) -> bool {
        wait_until(Duration::from_secs(10), || self.manager.is_idle()).await
    }
}
