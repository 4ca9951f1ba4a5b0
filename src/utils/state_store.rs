use crate::error::SyncError;
use crate::model::{Collection, CollectionId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// The part of the engine state that survives a restart.
///
/// Bucket mappings and the feed itself are rebuilt from the remotes after a
/// restart and are deliberately not part of the snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Last successful directory fetch, milliseconds since the Unix epoch.
    pub last_fetch_ms: u64,
    pub collections: Vec<Collection>,
    pub filters: Vec<CollectionId>,
}

impl PersistedState {
    pub fn last_fetch(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.last_fetch_ms)
    }
}

pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<PersistedState>, SyncError>;
    async fn save(&self, state: &PersistedState) -> Result<(), SyncError>;
}

/// Stores the snapshot as one JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<PersistedState>, SyncError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_str(&contents)?;
        debug!("Loaded state from {}", self.path.display());
        Ok(Some(state))
    }

    async fn save(&self, state: &PersistedState) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_vec_pretty(state)?;

        // Write aside then rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}
