//! Durable "last processed story" watermark.
//!
//! The watermark is the id boundary separating already-processed stories
//! from not-yet-processed ones. It is the only state that survives across
//! cycles, so its write path has to be durable before it returns: a crash
//! right after a successful write must not lose the watermark, and a crash
//! before the write must not silently advance it.
//!
//! [`FileWatermarkStore`] persists the id as a small JSON file, written to a
//! temp path, fsynced, and renamed over the live path so readers never
//! observe a half-written state file.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::WatermarkError;

/// Durable store for the highest fully-processed story id.
///
/// `read` returning `Ok(None)` means the store was never initialized; the
/// pipeline then seeds it with the newest fetched id instead of treating
/// every existing story as new.
pub trait WatermarkStore {
    async fn read(&self) -> Result<Option<u64>, WatermarkError>;
    async fn write(&self, id: u64) -> Result<(), WatermarkError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkFile {
    last_processed_id: u64,
}

/// File-backed watermark store.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileWatermarkStore { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

impl WatermarkStore for FileWatermarkStore {
    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    async fn read(&self) -> Result<Option<u64>, WatermarkError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file yet; watermark is uninitialized");
                return Ok(None);
            }
            Err(e) => return Err(WatermarkError::io(&self.path, e)),
        };

        let state: WatermarkFile =
            serde_json::from_slice(&bytes).map_err(|e| WatermarkError::Corrupt {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(Some(state.last_processed_id))
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), id))]
    async fn write(&self, id: u64) -> Result<(), WatermarkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| WatermarkError::io(parent, e))?;
            }
        }

        let payload =
            serde_json::to_vec(&WatermarkFile {
                last_processed_id: id,
            })
            .map_err(|e| WatermarkError::Corrupt {
                path: self.path.clone(),
                source: e,
            })?;

        let tmp = self.tmp_path();
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| WatermarkError::io(&tmp, e))?;
        file.write_all(&payload)
            .await
            .map_err(|e| WatermarkError::io(&tmp, e))?;
        // The rename only makes the write visible; sync_all makes it durable.
        file.sync_all()
            .await
            .map_err(|e| WatermarkError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| WatermarkError::io(&self.path, e))?;
        debug!("Watermark persisted");
        Ok(())
    }
}

/// In-memory watermark store for tests and throwaway runs.
///
/// Cloning shares the underlying slot, so a test can keep a handle while the
/// pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryWatermarkStore {
    slot: Arc<Mutex<Option<u64>>>,
}

impl MemoryWatermarkStore {
    pub fn new(initial: Option<u64>) -> Self {
        MemoryWatermarkStore {
            slot: Arc::new(Mutex::new(initial)),
        }
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    async fn read(&self) -> Result<Option<u64>, WatermarkError> {
        Ok(*self.slot.lock().unwrap())
    }

    async fn write(&self, id: u64) -> Result<(), WatermarkError> {
        *self.slot.lock().unwrap() = Some(id);
        Ok(())
    }
}
