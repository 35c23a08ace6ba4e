//! Index engine trait.
//!
//! Defines the operations the scheduler needs from the component that stores
//! and searches documents. Calls are blocking; workers run them off the async
//! runtime.

use std::collections::HashMap;

use sift_types::{DeleteRule, IndexDocument, IndexField, Job};

use crate::error::IndexingError;

/// Trait for the physical index behind an index identifier.
///
/// Implementations handle storage details; the scheduler only asks them to
/// apply document changes and, as best-effort hints, to make changes durable
/// or visible.
pub trait IndexEngine: Send + Sync {
    /// Identifier jobs use to target this index.
    fn index_id(&self) -> &str;

    /// Whether the engine needs single-writer discipline.
    ///
    /// Jobs for such engines go to the serial lane.
    fn requires_single_writer(&self) -> bool {
        false
    }

    /// Index-level parameters passed to translation. Job parameters override them.
    fn parameters(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Fields added to every document produced for the job.
    fn custom_fields(&self, _job: &Job) -> Vec<IndexField> {
        Vec::new()
    }

    /// Replace the entries matching `delete_rule` with `documents`.
    ///
    /// Returns `false` if the engine accepted the call but did not apply it.
    fn update_documents(
        &self,
        delete_rule: &DeleteRule,
        documents: Vec<IndexDocument>,
    ) -> Result<bool, IndexingError>;

    /// Remove the entries matching `delete_rule`.
    fn delete_documents(&self, delete_rule: &DeleteRule) -> Result<(), IndexingError>;

    /// Remove every entry. Returns `false` if the index was not cleared.
    fn clear_index(&self) -> Result<bool, IndexingError>;

    /// Flush pending changes to durable storage if the engine sees fit.
    fn maybe_commit(&self) -> Result<(), IndexingError>;

    /// Make applied changes visible to searches if the engine sees fit.
    fn maybe_refresh(&self) -> Result<(), IndexingError>;

    /// Release resources. Called when the owning manager shuts down.
    fn close(&self) -> Result<(), IndexingError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullEngine;

    impl IndexEngine for NullEngine {
        fn index_id(&self) -> &str {
            "null"
        }

        fn update_documents(
            &self,
            _delete_rule: &DeleteRule,
            documents: Vec<IndexDocument>,
        ) -> Result<bool, IndexingError> {
            Ok(!documents.is_empty())
        }

        fn delete_documents(&self, _delete_rule: &DeleteRule) -> Result<(), IndexingError> {
            Ok(())
        }

        fn clear_index(&self) -> Result<bool, IndexingError> {
            Ok(true)
        }

        fn maybe_commit(&self) -> Result<(), IndexingError> {
            Ok(())
        }

        fn maybe_refresh(&self) -> Result<(), IndexingError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_methods() {
        let engine = NullEngine;
        let job = Job::update("doc1", "null");

        assert!(!engine.requires_single_writer());
        assert!(engine.parameters().is_empty());
        assert!(engine.custom_fields(&job).is_empty());
        assert!(engine.close().is_ok());
    }

    #[test]
    fn test_engine_as_trait_object() {
        let engine: Box<dyn IndexEngine> = Box::new(NullEngine);
        let rule = DeleteRule::term("_path", "doc1");

        assert_eq!(engine.index_id(), "null");
        assert!(!engine.update_documents(&rule, Vec::new()).unwrap());
        assert!(engine
            .update_documents(&rule, vec![IndexDocument::new()])
            .unwrap());
    }
}
