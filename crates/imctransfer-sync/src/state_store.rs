//! JSON-file state store
//!
//! Implements [`IStateStore`] over a single pretty-printed JSON array of
//! URLs.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: write-to-temp + rename, so a crash mid-save leaves
//!   either the old snapshot or the new one.
//! - **Corruption**: the snapshot is only a cache of prior observations; an
//!   unreadable file is logged and treated as empty.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use imctransfer_core::domain::SyncState;
use imctransfer_core::ports::IStateStore;
use tracing::{debug, instrument, warn};

use crate::SyncError;

/// [`IStateStore`] persisted as a JSON file
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut p = self.path.as_os_str().to_owned();
        p.push(".tmp");
        PathBuf::from(p)
    }
}

#[async_trait::async_trait]
impl IStateStore for JsonStateStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> anyhow::Result<SyncState> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no state file, starting empty");
                return Ok(SyncState::new());
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read state file {}", self.path.display())
                })
            }
        };

        match serde_json::from_str::<SyncState>(&content) {
            Ok(state) => {
                debug!(files = state.len(), "state loaded");
                Ok(state)
            }
            Err(e) => {
                let err = SyncError::StateCorruption(e.to_string());
                warn!(error = %err, "ignoring unreadable state file");
                Ok(SyncState::new())
            }
        }
    }

    #[instrument(skip(self, state), fields(path = %self.path.display(), files = state.len()))]
    async fn save(&self, state: &SyncState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp_path = self.tmp_path();

        debug!(?tmp_path, "writing to temporary file");
        tokio::fs::write(&tmp_path, json.as_bytes()).await?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace state file {}", self.path.display()))?;

        debug!("state saved");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn reset(&self) -> anyhow::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("state file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
