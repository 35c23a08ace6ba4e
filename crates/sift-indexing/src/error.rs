//! Error types for content fetching, translation and index engine calls.

use thiserror::Error;

/// Errors that can occur while executing an index job.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Content could not be retrieved
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Content has no media type, so no translator can be chosen
    #[error("Media type not found for content {0}")]
    MissingMediaType(String),

    /// No translator registered for the media type and no default translator
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Content could not be turned into index documents
    #[error("Translation error: {0}")]
    Translation(String),

    /// The index engine rejected an operation
    #[error("Engine error: {0}")]
    Engine(String),

    /// Job targets an index that is not registered
    #[error("Index not registered: {0}")]
    IndexNotRegistered(String),

    /// Shutdown was requested before the job reached the index
    #[error("Indexing interrupted")]
    Interrupted,

    /// A collaborator panicked while handling the job
    #[error("Unexpected failure: {0}")]
    Panicked(String),

    /// Reading the content source failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
