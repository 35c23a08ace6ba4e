//! Registry of index engines.
//!
//! The `IndexRegistry` maps index identifiers to their engines. It is shared
//! by the manager, which registers and removes engines, and the workers,
//! which look up the engine for each job.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use sift_indexing::{IndexEngine, IndexingError};

type EngineMap = HashMap<String, Arc<dyn IndexEngine>>;

/// Thread-safe index identifier → engine lookup.
///
/// # Example
///
/// ```ignore
/// let registry = IndexRegistry::new();
/// registry.register(Arc::new(my_engine));
/// let engine = registry.get("main")?;
/// ```
pub struct IndexRegistry {
    engines: RwLock<EngineMap>,
}

impl IndexRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EngineMap> {
        self.engines.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EngineMap> {
        self.engines.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an engine under its own index identifier.
    ///
    /// Returns the engine previously registered under that identifier, if any.
    pub fn register(&self, engine: Arc<dyn IndexEngine>) -> Option<Arc<dyn IndexEngine>> {
        let index_id = engine.index_id().to_string();
        let previous = self.write().insert(index_id.clone(), engine);
        if previous.is_some() {
            warn!(index = %index_id, "Replaced registered index engine");
        } else {
            info!(index = %index_id, "Registered index engine");
        }
        previous
    }

    /// Remove an engine. The engine is returned, not closed.
    pub fn deregister(&self, index_id: &str) -> Option<Arc<dyn IndexEngine>> {
        let removed = self.write().remove(index_id);
        if removed.is_some() {
            info!(index = %index_id, "Deregistered index engine");
        }
        removed
    }

    /// Get the engine for an index.
    pub fn get(&self, index_id: &str) -> Result<Arc<dyn IndexEngine>, IndexingError> {
        self.read()
            .get(index_id)
            .cloned()
            .ok_or_else(|| IndexingError::IndexNotRegistered(index_id.to_string()))
    }

    /// Check if an index is registered.
    pub fn contains(&self, index_id: &str) -> bool {
        self.read().contains_key(index_id)
    }

    /// Identifiers of every registered index, sorted.
    pub fn index_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get the number of registered engines.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Close every registered engine.
    ///
    /// Engines stay registered. Close failures are logged and counted; the
    /// return value is the number of engines that failed to close.
    pub fn close_all(&self) -> usize {
        let engines: Vec<Arc<dyn IndexEngine>> = self.read().values().cloned().collect();
        let mut failures = 0;
        for engine in engines {
            if let Err(e) = engine.close() {
                warn!(index = %engine.index_id(), error = %e, "Failed to close index engine");
                failures += 1;
            }
        }
        failures
    }
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}
