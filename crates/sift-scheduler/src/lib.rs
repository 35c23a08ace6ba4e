//! Asynchronous indexing job scheduler.
//!
//! This crate queues index work (update, delete and clear jobs) and runs it
//! on background workers against pluggable index engines.
//!
//! # Features
//!
//! - Priority queue with two lanes: a parallel lane drained by N workers and
//!   a serial lane drained by one worker for single-writer engines
//! - Deduplication by job signature, with promotion of pending LOW jobs
//! - Batch tracking with exactly-once completion events
//! - Failure isolation: job errors become listener events, never dead workers
//! - Graceful shutdown via CancellationToken
//!
//! # Example
//!
//! ```ignore
//! use sift_scheduler::{IndexManager, SchedulerConfig, TracingListener};
//! use sift_types::{Job, Priority};
//!
//! let config = SchedulerConfig::load(None)?;
//! let manager = IndexManager::new(config, Arc::new(my_fetcher), Arc::new(TracingListener))?;
//! manager.register_index(Arc::new(my_engine));
//! manager.register_translator(Arc::new(my_translator));
//! manager.start().await?;
//!
//! manager.index(Job::update("docs/intro.xml", "main").with_priority(Priority::High))?;
//!
//! manager.shutdown().await?;
//! ```

mod config;
mod error;
mod listener;
mod manager;
mod queue;
mod registry;
mod worker;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use listener::{IndexListener, NoOpListener, TracingListener};
pub use manager::IndexManager;
pub use queue::{EnqueueOutcome, JobQueue, Lane};
pub use registry::IndexRegistry;
pub use worker::NO_DOCUMENTS_WARNING;
