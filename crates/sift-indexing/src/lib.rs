//! Boundary contracts between the sift scheduler and its collaborators.
//!
//! The scheduler drives three external components through this crate:
//!
//! - [`IndexEngine`]: the physical index (update, delete, clear, commit, refresh)
//! - [`ContentFetcher`]: resolves a job into deleted content or a readable source
//! - [`ContentTranslator`]: turns a source into index documents, looked up by
//!   media type through a [`TranslatorRegistry`]
//!
//! Every failure is reported as an [`IndexingError`]; the scheduler converts
//! them into listener events instead of propagating them.

pub mod content;
pub mod engine;
pub mod error;
pub mod translator;

pub use content::{Content, ContentFetcher, ContentSource};
pub use engine::IndexEngine;
pub use error::IndexingError;
pub use translator::{ContentTranslator, TranslationRequest, TranslatorRegistry};
