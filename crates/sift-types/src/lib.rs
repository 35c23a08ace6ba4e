//! # sift-types
//!
//! Shared domain types for the sift indexing scheduler.
//!
//! This crate defines the core data structures used throughout the system:
//! - Jobs: one unit of index work (update, delete or clear) with a priority
//! - Batches: progress tracking for groups of jobs submitted together
//! - Documents: what translation produces and index engines consume
//!
//! ## Usage
//!
//! ```rust
//! use sift_types::{Job, Priority};
//!
//! let job = Job::update("docs/intro.xml", "main").with_priority(Priority::High);
//! assert_eq!(job.content_id(), Some("docs/intro.xml"));
//! ```

pub mod batch;
pub mod document;
pub mod job;

pub use batch::{Batch, BatchReport};
pub use document::{DeleteRule, IndexDocument, IndexField};
pub use job::{Job, JobAction, JobId, JobSignature, Priority, Requester};
