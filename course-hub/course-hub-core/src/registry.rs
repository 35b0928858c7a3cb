//! One loaded chain per storage location.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::{ChainError, Result};
use crate::storage::chain::DocumentChain;

/// Chain handle shared between callers. Holding the lock serializes
/// mutations of one course.
pub type SharedChain = Arc<AsyncMutex<DocumentChain>>;

/// Cache of loaded chains keyed by their directory. Entries live until they
/// are invalidated or the registry is cleared.
#[derive(Default)]
pub struct ChainRegistry {
    chains: Mutex<HashMap<PathBuf, SharedChain>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached chain for `location`, rebuilding it from disk on a
    /// miss. The map is not locked while the directory is read; when two
    /// callers rebuild the same location at once the first insert wins.
    pub fn get(&self, location: &Path) -> Result<SharedChain> {
        if let Some(chain) = self.chains.lock().get(location) {
            return Ok(chain.clone());
        }
        if !location.is_dir() {
            return Err(ChainError::NotFound("course storage".to_string()));
        }
        let chain = DocumentChain::reconstruct(location)?;
        let shared = self
            .chains
            .lock()
            .entry(location.to_path_buf())
            .or_insert_with(|| {
                debug!(?location, "loaded chain into registry");
                Arc::new(AsyncMutex::new(chain))
            })
            .clone();
        Ok(shared)
    }

    /// Whether `chain` is still the entry cached for `location`.
    pub fn is_current(&self, location: &Path, chain: &SharedChain) -> bool {
        self.chains
            .lock()
            .get(location)
            .is_some_and(|cached| Arc::ptr_eq(cached, chain))
    }

    /// Install a freshly created chain, replacing any cached one.
    pub fn register(&self, location: impl Into<PathBuf>, chain: DocumentChain) -> SharedChain {
        let shared = Arc::new(AsyncMutex::new(chain));
        self.chains.lock().insert(location.into(), shared.clone());
        shared
    }

    /// Drop the cached chain. Returns whether one was cached.
    pub fn invalidate(&self, location: &Path) -> bool {
        let removed = self.chains.lock().remove(location).is_some();
        if removed {
            debug!(?location, "invalidated cached chain");
        }
        removed
    }

    pub fn contains(&self, location: &Path) -> bool {
        self.chains.lock().contains_key(location)
    }

    pub fn len(&self) -> usize {
        self.chains.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.lock().is_empty()
    }

    /// Drop every cached chain.
    pub fn clear(&self) {
        self.chains.lock().clear();
    }
}
