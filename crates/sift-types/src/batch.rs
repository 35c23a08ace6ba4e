//! Batch progress tracking.
//!
//! A [`Batch`] groups jobs submitted together (e.g. "reindex folder X") and
//! detects when the last of them finishes. It is shared between workers via
//! `Arc`, so every mutation goes through atomics or a write-once cell:
//!
//! - the indexing start is claimed by exactly one worker ([`Batch::mark_started_if_needed`])
//! - completion is reported by exactly one call ([`Batch::record_completion`],
//!   [`Batch::record_skipped`], [`Batch::record_cancelled`] or
//!   [`Batch::set_computed`]), guarded by a single
//!   compare-and-swap on the `ended` flag

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Aggregate progress for a group of jobs.
#[derive(Debug)]
pub struct Batch {
    id: Ulid,
    index_id: Option<String>,
    total: AtomicUsize,
    current: AtomicUsize,
    skipped: AtomicUsize,
    cancelled: AtomicUsize,
    computed: AtomicBool,
    ended: AtomicBool,
    created: DateTime<Utc>,
    computed_at: OnceLock<DateTime<Utc>>,
    started_at: OnceLock<DateTime<Utc>>,
    ended_at: OnceLock<DateTime<Utc>>,
}

impl Batch {
    fn build(index_id: Option<String>, total: usize, computed: bool) -> Self {
        Self {
            id: Ulid::new(),
            index_id,
            total: AtomicUsize::new(total),
            current: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
            computed: AtomicBool::new(computed),
            ended: AtomicBool::new(false),
            created: Utc::now(),
            computed_at: OnceLock::new(),
            started_at: OnceLock::new(),
            ended_at: OnceLock::new(),
        }
    }

    /// Create a batch expecting exactly `total` jobs.
    pub fn new(total: usize) -> Self {
        Self::build(None, total, true)
    }

    /// Create a batch of `total` jobs targeting one index.
    pub fn for_index(index_id: impl Into<String>, total: usize) -> Self {
        Self::build(Some(index_id.into()), total, true)
    }

    /// Create a batch whose size is not known yet.
    ///
    /// Grow it with [`Batch::increase_total`] while submitting jobs, then call
    /// [`Batch::set_computed`] once every job has been submitted. The batch cannot
    /// complete before that.
    pub fn open(index_id: impl Into<String>) -> Self {
        Self::build(Some(index_id.into()), 0, false)
    }

    pub fn id(&self) -> String {
        self.id.to_string()
    }

    /// Index targeted by the batch, when known.
    pub fn index_id(&self) -> Option<&str> {
        self.index_id.as_deref()
    }

    /// Add `by` expected jobs to an open batch.
    pub fn increase_total(&self, by: usize) {
        self.total.fetch_add(by, Ordering::SeqCst);
    }

    /// Mark the batch as fully submitted.
    ///
    /// Returns `true` if every job had already finished, in which case the caller
    /// is the one observing completion and must report the batch end.
    pub fn set_computed(&self) -> bool {
        if self.computed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.computed_at.set(Utc::now());
        self.try_end()
    }

    /// Record the indexing start if no worker has done so yet.
    ///
    /// Returns `true` for the single caller that set it.
    pub fn mark_started_if_needed(&self) -> bool {
        self.started_at.set(Utc::now()).is_ok()
    }

    /// Count one finished job.
    ///
    /// Returns `true` for the single call that observes the batch completing.
    pub fn record_completion(&self) -> bool {
        self.current.fetch_add(1, Ordering::SeqCst);
        self.try_end()
    }

    /// Count one job that left the queue because another queued job covers
    /// the same content.
    ///
    /// It still advances the batch, so a batch never waits on a superseded
    /// job. Returns `true` when this call completes the batch.
    pub fn record_skipped(&self) -> bool {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.record_completion()
    }

    /// Count one job whose work was abandoned before it ran (index cleared or
    /// manager shut down).
    ///
    /// The batch still completes, but reports itself as cancelled. Returns
    /// `true` when this call completes the batch.
    pub fn record_cancelled(&self) -> bool {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.record_completion()
    }

    fn try_end(&self) -> bool {
        let done = self.computed.load(Ordering::SeqCst)
            && self.current.load(Ordering::SeqCst) >= self.total.load(Ordering::SeqCst);
        if done
            && self
                .ended
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let _ = self.ended_at.set(Utc::now());
            return true;
        }
        false
    }

    pub fn is_started(&self) -> bool {
        self.started_at.get().is_some()
    }

    pub fn is_computed(&self) -> bool {
        self.computed.load(Ordering::SeqCst)
    }

    /// Whether completion has been observed.
    pub fn is_finished(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Jobs counted through [`Batch::record_skipped`].
    pub fn skipped_count(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Jobs counted through [`Batch::record_cancelled`].
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether any member job was abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled_count() > 0
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at.get().copied()
    }

    /// Time spent before the batch was fully submitted (open batches only).
    pub fn computing_duration(&self) -> Option<Duration> {
        self.computed_at.get().map(|at| *at - self.created)
    }

    /// Time between the first job starting and the last job finishing.
    pub fn indexing_duration(&self) -> Option<Duration> {
        match (self.started_at.get(), self.ended_at.get()) {
            (Some(start), Some(end)) => Some(*end - *start),
            _ => None,
        }
    }

    /// Time between creation and the last job finishing.
    pub fn total_duration(&self) -> Option<Duration> {
        self.ended_at.get().map(|end| *end - self.created)
    }

    /// Serializable snapshot of the batch.
    pub fn report(&self) -> BatchReport {
        BatchReport {
            batch_id: self.id(),
            index_id: self.index_id.clone(),
            total: self.total_count(),
            completed: self.current_count(),
            skipped: self.skipped_count(),
            cancelled: self.cancelled_count(),
            finished: self.is_finished(),
            created: self.created,
            started: self.started_at(),
            ended: self.ended_at(),
            computing_ms: self.computing_duration().map(|d| d.num_milliseconds()),
            indexing_ms: self.indexing_duration().map(|d| d.num_milliseconds()),
            total_ms: self.total_duration().map(|d| d.num_milliseconds()),
        }
    }
}

/// Point-in-time view of a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub index_id: Option<String>,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub cancelled: usize,
    pub finished: bool,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub computing_ms: Option<i64>,
    pub indexing_ms: Option<i64>,
    pub total_ms: Option<i64>,
}
