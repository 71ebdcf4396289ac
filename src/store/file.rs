//! File-backed session store: one JSON blob, atomically replaced on save.

use super::traits::{SessionStore, StoreError};
use crate::records::SessionMap;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

/// ENOSPC raw error code on Linux and macOS.
const ENOSPC: i32 = 28;

/// Convert an io::Error into StoreError, detecting disk-full (ENOSPC).
fn io_to_store_error(e: std::io::Error) -> StoreError {
    if e.raw_os_error() == Some(ENOSPC) {
        StoreError::DiskFull
    } else {
        StoreError::Io(e)
    }
}

/// Atomically write data to a file using write-to-temp + fsync + rename.
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Other("Cannot atomic-write to a path with no parent".into()))?
        .to_path_buf();
    let path = path.to_path_buf();
    let data = data.to_vec();

    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_to_store_error)?;
        tmp.write_all(&data).map_err(io_to_store_error)?;
        tmp.as_file().sync_all().map_err(io_to_store_error)?;
        tmp.persist(&path)
            .map_err(|e| io_to_store_error(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Other(format!("spawn_blocking join failed: {}", e)))?
}

/// Session store backed by a single JSON file.
///
/// A crash mid-save never leaves a torn blob (temp file + rename within the
/// same directory); a blob that is torn or hand-edited anyway reads as empty
/// at the next load.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn load(&self) -> SessionMap {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "session file absent, starting empty");
                return SessionMap::new();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "session file unreadable, treating all sessions as signed out"
                );
                return SessionMap::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "session file corrupt, treating all sessions as signed out"
                );
                SessionMap::new()
            }
        }
    }

    async fn save(&self, map: &SessionMap) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(io_to_store_error)?;
            }
        }
        let data = serde_json::to_vec_pretty(map)?;
        atomic_write(&self.path, &data).await
    }
}
