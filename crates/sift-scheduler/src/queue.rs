//! Priority job queue with two lanes and signature deduplication.
//!
//! The queue holds pending jobs in two independent lanes:
//!
//! - [`Lane::Parallel`]: drained by any number of workers
//! - [`Lane::Serial`]: drained by exactly one worker, for engines that need
//!   single-writer discipline
//!
//! Across both lanes at most one job per [`JobSignature`] is pending. A new
//! submission for an occupied signature either replaces the pending job (LOW
//! pending, HIGH submitted) or is discarded.
//!
//! Within a lane, HIGH jobs are dequeued before LOW jobs, and jobs of equal
//! priority come out in submission order (a sequence number breaks ties).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use sift_types::{Job, JobSignature, Priority, Requester};

/// Which lane a job is queued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Many workers drain concurrently.
    Parallel,
    /// A single worker drains, one job at a time.
    Serial,
}

impl Lane {
    fn slot(self) -> usize {
        match self {
            Lane::Parallel => 0,
            Lane::Serial => 1,
        }
    }
}

/// What happened to a submitted job.
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// No job with the signature was pending; the job was queued.
    Inserted,
    /// A pending LOW job was replaced by the submitted HIGH job.
    Promoted {
        /// The job that was removed from the queue
        displaced: Job,
    },
    /// A job with the signature and at least the same priority was already
    /// pending; the submitted job was dropped.
    Discarded {
        /// The submitted job, returned to the caller
        rejected: Job,
    },
}

impl EnqueueOutcome {
    /// Whether the submitted job is now in the queue.
    pub fn is_queued(&self) -> bool {
        !matches!(self, EnqueueOutcome::Discarded { .. })
    }
}

/// Position of a job inside a lane: priority first, then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Priority,
    sequence: u64,
}

#[derive(Default)]
struct QueueState {
    lanes: [BTreeMap<QueueKey, Job>; 2],
    slots: HashMap<JobSignature, (Lane, QueueKey)>,
}

impl QueueState {
    fn lane(&self, lane: Lane) -> &BTreeMap<QueueKey, Job> {
        &self.lanes[lane.slot()]
    }

    fn lane_mut(&mut self, lane: Lane) -> &mut BTreeMap<QueueKey, Job> {
        &mut self.lanes[lane.slot()]
    }

    fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.lanes.iter().flat_map(|lane| lane.values())
    }

    fn remove_where(&mut self, predicate: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut removed = Vec::new();
        for lane in self.lanes.iter_mut() {
            let keys: Vec<QueueKey> = lane
                .iter()
                .filter(|(_, job)| predicate(job))
                .map(|(key, _)| *key)
                .collect();
            for key in keys {
                if let Some(job) = lane.remove(&key) {
                    removed.push(job);
                }
            }
        }
        for job in &removed {
            self.slots.remove(&job.signature());
        }
        removed
    }
}

/// Concurrent, priority-ordered, deduplicating job container.
///
/// The signature lookup and both lanes sit behind one mutex, so the
/// search/remove/insert sequence of [`JobQueue::enqueue`] is a single
/// critical section. Dequeue waits on a per-lane [`Notify`].
///
/// Dequeued jobs count as in flight until the consumer calls
/// [`JobQueue::mark_done`], which lets [`JobQueue::is_idle`] see work that
/// has left the queue but not finished yet.
pub struct JobQueue {
    state: Mutex<QueueState>,
    ready: [Notify; 2],
    sequence: AtomicU64,
    in_flight: AtomicUsize,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: [Notify::new(), Notify::new()],
            sequence: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        // No operation panics midway through a mutation, so a poisoned
        // state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_key(&self, priority: Priority) -> QueueKey {
        QueueKey {
            priority,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Submit a job to a lane.
    ///
    /// After this returns exactly one job with the submitted job's signature is
    /// pending, with the higher of the two priorities. On promotion the new job
    /// replaces the old one entirely (action and parameters included), and is
    /// queued in the requested lane whichever lane the old one was in.
    pub fn enqueue(&self, job: Job, lane: Lane) -> EnqueueOutcome {
        let signature = job.signature();
        let outcome = {
            let mut state = self.state();

            let displaced = match state.slots.get(&signature).copied() {
                None => None,
                Some((existing_lane, existing_key)) => {
                    if existing_key.priority == Priority::Low && job.priority() == Priority::High {
                        state.slots.remove(&signature);
                        state.lane_mut(existing_lane).remove(&existing_key)
                    } else {
                        debug!(
                            job = %job.id(),
                            signature = %signature,
                            "Similar job already queued, discarding submission"
                        );
                        return EnqueueOutcome::Discarded { rejected: job };
                    }
                }
            };

            let key = self.next_key(job.priority());
            state.slots.insert(signature.clone(), (lane, key));
            state.lane_mut(lane).insert(key, job);

            match displaced {
                Some(displaced) => {
                    debug!(
                        displaced = %displaced.id(),
                        signature = %signature,
                        lane = ?lane,
                        "Promoted queued job to high priority"
                    );
                    EnqueueOutcome::Promoted { displaced }
                }
                None => EnqueueOutcome::Inserted,
            }
        };

        self.ready[lane.slot()].notify_one();
        outcome
    }

    /// Take the next job from a lane without waiting.
    pub fn try_dequeue(&self, lane: Lane) -> Option<Job> {
        let mut state = self.state();
        let (_, job) = state.lane_mut(lane).pop_first()?;
        if state.slots.remove(&job.signature()).is_none() {
            error!(job = %job.id(), lane = ?lane, "Dequeued job had no signature slot");
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(job)
    }

    /// Record that a dequeued job has finished executing.
    pub fn mark_done(&self) {
        let previous = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            error!("mark_done called with no job in flight");
        }
    }

    /// Number of dequeued jobs not yet marked done.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether no job is pending or executing.
    pub fn is_idle(&self) -> bool {
        let state = self.state();
        state.slots.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }

    /// Wait for the next job in a lane.
    ///
    /// Returns `None` once `shutdown` is cancelled; the caller should stop.
    pub async fn dequeue(&self, lane: Lane, shutdown: &CancellationToken) -> Option<Job> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }

            // Register interest before checking, so a job queued between the
            // check and the wait still wakes us.
            let notified = self.ready[lane.slot()].notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue(lane) {
                return Some(job);
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Remove every pending job targeting an index, from both lanes.
    ///
    /// Jobs already taken by a worker are unaffected. Returns the removed jobs.
    pub fn clear_for_index(&self, index_id: &str) -> Vec<Job> {
        let removed = self.state().remove_where(|job| job.is_for_index(index_id));
        if !removed.is_empty() {
            debug!(index = %index_id, count = removed.len(), "Removed queued jobs for index");
        }
        removed
    }

    /// Remove every pending job. Returns the removed jobs.
    pub fn clear(&self) -> Vec<Job> {
        let mut state = self.state();
        state.slots.clear();
        let mut removed = Vec::new();
        for lane in state.lanes.iter_mut() {
            removed.extend(std::mem::take(lane).into_values());
        }
        removed
    }

    /// Pending jobs submitted by a requester, in dequeue order per lane.
    pub fn jobs_for_requester(&self, requester: &Requester) -> Vec<Job> {
        self.state()
            .jobs()
            .filter(|job| job.is_for_requester(requester))
            .cloned()
            .collect()
    }

    /// Number of pending jobs submitted by a requester.
    pub fn count_for_requester(&self, requester: &Requester) -> usize {
        self.state()
            .jobs()
            .filter(|job| job.is_for_requester(requester))
            .count()
    }

    /// Pending jobs targeting an index.
    pub fn jobs_for_index(&self, index_id: &str) -> Vec<Job> {
        self.state()
            .jobs()
            .filter(|job| job.is_for_index(index_id))
            .cloned()
            .collect()
    }

    /// Number of pending jobs targeting an index.
    pub fn count_for_index(&self, index_id: &str) -> usize {
        self.state()
            .jobs()
            .filter(|job| job.is_for_index(index_id))
            .count()
    }

    /// Whether any job targeting the index is pending.
    pub fn has_jobs_for_index(&self, index_id: &str) -> bool {
        self.state().jobs().any(|job| job.is_for_index(index_id))
    }

    /// Snapshot of every pending job.
    pub fn all_jobs(&self) -> Vec<Job> {
        self.state().jobs().cloned().collect()
    }

    /// The pending job holding a signature, if any.
    pub fn find(&self, signature: &JobSignature) -> Option<Job> {
        let state = self.state();
        let (lane, key) = state.slots.get(signature)?;
        state.lane(*lane).get(key).cloned()
    }

    /// Number of pending jobs in one lane.
    pub fn lane_len(&self, lane: Lane) -> usize {
        self.state().lane(lane).len()
    }

    /// Number of pending jobs across both lanes.
    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
