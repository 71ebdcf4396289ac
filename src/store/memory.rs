//! In-memory session store for development and tests.

use super::traits::{SessionStore, StoreError};
use crate::records::SessionMap;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Holds the blob in process memory. `load` clones the current image and
/// `save` replaces it, matching the whole-blob semantics of the file backend
/// (including the lost-update hazard for callers that bypass the single
/// writer).
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<SessionMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> SessionMap {
        self.inner.read().clone()
    }

    async fn save(&self, map: &SessionMap) -> Result<(), StoreError> {
        *self.inner.write() = map.clone();
        Ok(())
    }
}
