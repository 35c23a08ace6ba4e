//! Content retrieval for update jobs.
//!
//! A [`ContentFetcher`] resolves the content behind a job into either a
//! deletion notice or a readable source with its media type.

use std::fmt;
use std::io::Read;

use sift_types::{DeleteRule, Job};

use crate::error::IndexingError;

/// Readable content plus what translation needs to know about it.
pub struct ContentSource {
    /// Raw content bytes
    pub reader: Box<dyn Read + Send>,
    /// Media type used to pick a translator
    pub media_type: String,
    /// Criteria matching the entries previously indexed for this content
    pub delete_rule: DeleteRule,
}

impl ContentSource {
    pub fn new(
        reader: Box<dyn Read + Send>,
        media_type: impl Into<String>,
        delete_rule: DeleteRule,
    ) -> Self {
        Self {
            reader,
            media_type: media_type.into(),
            delete_rule,
        }
    }

    /// Source backed by an in-memory string.
    pub fn from_text(
        text: impl Into<String>,
        media_type: impl Into<String>,
        delete_rule: DeleteRule,
    ) -> Self {
        let bytes = text.into().into_bytes();
        Self::new(Box::new(std::io::Cursor::new(bytes)), media_type, delete_rule)
    }
}

impl fmt::Debug for ContentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentSource")
            .field("media_type", &self.media_type)
            .field("delete_rule", &self.delete_rule)
            .finish_non_exhaustive()
    }
}

/// What the fetcher found for a job.
#[derive(Debug)]
pub enum Content {
    /// The content no longer exists; its entries should be removed.
    Deleted(DeleteRule),
    /// The content exists and can be translated.
    Source(ContentSource),
}

/// Resolves jobs into content.
pub trait ContentFetcher: Send + Sync {
    fn fetch(&self, job: &Job) -> Result<Content, IndexingError>;
}
