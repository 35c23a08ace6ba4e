//! Index jobs.
//!
//! A [`Job`] describes one unit of indexing work: update or delete one content
//! item, or clear a whole index. Identity fields are fixed at construction;
//! only the lifecycle flags change, and only through `&mut self`, so the worker
//! that dequeued a job (and therefore owns it) is the only one that can touch them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::batch::Batch;
use crate::document::DeleteRule;

/// Scheduling priority of a job.
///
/// `High` sorts before `Low`, so a derived ordering puts high-priority
/// jobs first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Always dequeued before `Low` jobs.
    High,
    /// Background work.
    #[default]
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("high"),
            Priority::Low => f.write_str("low"),
        }
    }
}

/// Opaque tag identifying who submitted a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester(String);

impl Requester {
    /// Create a requester tag.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Requester used when a producer does not identify itself.
    pub fn anonymous() -> Self {
        Self("anonymous".to_string())
    }

    /// The requester identifier.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl Default for Requester {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique job identifier (ULID, so identifiers sort by creation time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Ulid);

impl JobId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a job does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobAction {
    /// Fetch and translate the content, then replace its documents in the index.
    Update {
        /// Identifier of the content to index
        content_id: String,
    },
    /// Remove the content's documents from the index.
    Delete {
        /// Identifier of the deleted content
        content_id: String,
        /// Which index entries to remove
        delete_rule: DeleteRule,
    },
    /// Remove every document from the index.
    Clear,
}

impl JobAction {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            JobAction::Update { .. } => "update",
            JobAction::Delete { .. } => "delete",
            JobAction::Clear => "clear",
        }
    }

    /// Content identifier, `None` for clear jobs.
    pub fn content_id(&self) -> Option<&str> {
        match self {
            JobAction::Update { content_id } | JobAction::Delete { content_id, .. } => {
                Some(content_id)
            }
            JobAction::Clear => None,
        }
    }
}

/// Deduplication key for pending jobs.
///
/// Two jobs with the same signature cover the same work: the action is
/// deliberately not part of the key, so an update and a delete for the same
/// content share one slot. Clear jobs for an index share the `None` slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobSignature {
    /// Target index
    pub index_id: String,
    /// Content identifier, `None` for clear jobs
    pub content_id: Option<String>,
}

impl fmt::Display for JobSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content_id {
            Some(content_id) => write!(f, "{}:{}", self.index_id, content_id),
            None => write!(f, "{}:*", self.index_id),
        }
    }
}

/// One unit of scheduled index work.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    index_id: String,
    action: JobAction,
    priority: Priority,
    requester: Requester,
    batch: Option<Arc<Batch>>,
    parameters: HashMap<String, String>,
    created: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    finished: bool,
    success: bool,
}

impl Job {
    fn new(index_id: impl Into<String>, action: JobAction) -> Self {
        Self {
            id: JobId::new(),
            index_id: index_id.into(),
            action,
            priority: Priority::default(),
            requester: Requester::default(),
            batch: None,
            parameters: HashMap::new(),
            created: Utc::now(),
            started: None,
            finished: false,
            success: false,
        }
    }

    /// Create a job that (re)indexes one content item.
    pub fn update(content_id: impl Into<String>, index_id: impl Into<String>) -> Self {
        Self::new(
            index_id,
            JobAction::Update {
                content_id: content_id.into(),
            },
        )
    }

    /// Create a job that removes one content item's documents.
    pub fn delete(
        content_id: impl Into<String>,
        index_id: impl Into<String>,
        delete_rule: DeleteRule,
    ) -> Self {
        Self::new(
            index_id,
            JobAction::Delete {
                content_id: content_id.into(),
                delete_rule,
            },
        )
    }

    /// Create a job that clears the whole index.
    pub fn clear(index_id: impl Into<String>) -> Self {
        Self::new(index_id, JobAction::Clear)
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the requester.
    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }

    /// Attach the job to a batch.
    pub fn with_batch(mut self, batch: Arc<Batch>) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Add one translation parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Add translation parameters, overriding existing keys.
    pub fn with_parameters(mut self, parameters: HashMap<String, String>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn action(&self) -> &JobAction {
        &self.action
    }

    /// Content identifier, `None` for clear jobs.
    pub fn content_id(&self) -> Option<&str> {
        self.action.content_id()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    /// The batch this job belongs to, if any.
    pub fn batch(&self) -> Option<&Arc<Batch>> {
        self.batch.as_ref()
    }

    /// Whether the job belongs to a batch.
    pub fn is_batch(&self) -> bool {
        self.batch.is_some()
    }

    /// Parameters passed through to translation.
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// When a worker started executing the job.
    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the job succeeded. Only meaningful once finished.
    pub fn was_successful(&self) -> bool {
        self.success
    }

    /// The deduplication key.
    pub fn signature(&self) -> JobSignature {
        JobSignature {
            index_id: self.index_id.clone(),
            content_id: self.content_id().map(str::to_string),
        }
    }

    /// Whether this job targets the given index.
    pub fn is_for_index(&self, index_id: &str) -> bool {
        self.index_id == index_id
    }

    /// Whether this job was submitted by the given requester.
    pub fn is_for_requester(&self, requester: &Requester) -> bool {
        self.requester == *requester
    }

    /// Record that execution started.
    pub fn mark_started(&mut self) {
        self.started = Some(Utc::now());
    }

    /// Record the final outcome.
    pub fn finish(&mut self, success: bool) {
        self.finished = true;
        self.success = success;
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Job {} {} {} priority:{} finished:{} success:{}]",
            self.id,
            self.action.name(),
            self.signature(),
            self.priority,
            self.finished,
            self.success
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Low);
        assert_eq!(Priority::default(), Priority::Low);

        let mut priorities = vec![Priority::Low, Priority::High, Priority::Low];
        priorities.sort();
        assert_eq!(priorities[0], Priority::High);
    }

    #[test]
    fn test_priority_serialization() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: Priority = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(back, Priority::Low);
    }

    #[test]
    fn test_update_job_defaults() {
        let job = Job::update("doc1", "idx");

        assert_eq!(job.index_id(), "idx");
        assert_eq!(job.content_id(), Some("doc1"));
        assert_eq!(job.priority(), Priority::Low);
        assert_eq!(job.requester(), &Requester::anonymous());
        assert!(!job.is_batch());
        assert!(job.started().is_none());
        assert!(!job.is_finished());
        assert!(!job.was_successful());
    }

    #[test]
    fn test_builder_methods() {
        let mut params = HashMap::new();
        params.insert("lang".to_string(), "en".to_string());

        let job = Job::update("doc1", "idx")
            .with_priority(Priority::High)
            .with_requester(Requester::new("watcher"))
            .with_parameters(params)
            .with_parameter("folder", "/a");

        assert_eq!(job.priority(), Priority::High);
        assert_eq!(job.requester().id(), "watcher");
        assert_eq!(job.parameters().len(), 2);
        assert_eq!(job.parameters().get("lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_signature_ignores_action() {
        let update = Job::update("doc1", "idx");
        let delete = Job::delete("doc1", "idx", DeleteRule::term("_path", "doc1"));
        let other_index = Job::update("doc1", "other");

        assert_eq!(update.signature(), delete.signature());
        assert_ne!(update.signature(), other_index.signature());
    }

    #[test]
    fn test_clear_job_signature() {
        let clear = Job::clear("idx");
        assert_eq!(clear.content_id(), None);
        assert_eq!(clear.action().name(), "clear");
        assert_eq!(clear.signature(), Job::clear("idx").signature());
        assert_ne!(clear.signature(), Job::update("doc1", "idx").signature());
        assert_eq!(clear.signature().to_string(), "idx:*");
    }

    #[test]
    fn test_filters() {
        let job = Job::update("doc1", "idx").with_requester(Requester::new("api"));

        assert!(job.is_for_index("idx"));
        assert!(!job.is_for_index("idx2"));
        assert!(job.is_for_requester(&Requester::new("api")));
        assert!(!job.is_for_requester(&Requester::new("watcher")));
    }

    #[test]
    fn test_lifecycle() {
        let mut job = Job::update("doc1", "idx");
        job.mark_started();
        assert!(job.started().is_some());

        job.finish(true);
        assert!(job.is_finished());
        assert!(job.was_successful());
    }

    #[test]
    fn test_clone_keeps_identity() {
        let job = Job::update("doc1", "idx");
        let copy = job.clone();
        assert_eq!(job.id(), copy.id());
        assert_ne!(job.id(), Job::update("doc1", "idx").id());
    }

    #[test]
    fn test_display() {
        let job = Job::update("doc1", "idx").with_priority(Priority::High);
        let text = job.to_string();
        assert!(text.contains("update"));
        assert!(text.contains("idx:doc1"));
        assert!(text.contains("priority:high"));
    }
}
