//! Session store trait definition

use crate::records::SessionMap;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while persisting the session map.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Disk full")]
    DiskFull,

    #[error("Store error: {0}")]
    Other(String),
}

/// Whole-blob persistence for the session map.
///
/// `load` is fail-closed: missing or unreadable data yields an empty map, so
/// prior sessions become non-existent rather than trusted, and the gateway
/// keeps running. `save` replaces the blob in one shot. The trait does no
/// coordination of its own; load→mutate→save cycles are serialized by the
/// single writer that owns the store.
///
/// This trait is object-safe and can be used with `Box<dyn SessionStore>`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read the current map, degrading to empty on missing or corrupt data.
    async fn load(&self) -> SessionMap;

    /// Replace the persisted map with `map`.
    async fn save(&self, map: &SessionMap) -> Result<(), StoreError>;
}

/// Blanket implementation for boxed trait objects, enabling dynamic dispatch
#[async_trait]
impl SessionStore for Box<dyn SessionStore> {
    async fn load(&self) -> SessionMap {
        (**self).load().await
    }

    async fn save(&self, map: &SessionMap) -> Result<(), StoreError> {
        (**self).save(map).await
    }
}
