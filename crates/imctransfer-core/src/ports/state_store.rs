//! State store port
//!
//! Durable storage for the [`SyncState`] snapshot between cycles and
//! between process runs.

use crate::domain::SyncState;

/// Port trait for persisting the observed-files snapshot
#[async_trait::async_trait]
pub trait IStateStore: Send + Sync {
    /// Reads the prior snapshot
    ///
    /// A missing backing artifact yields an empty snapshot, not an error.
    async fn load(&self) -> anyhow::Result<SyncState>;

    /// Atomically replaces the stored snapshot
    ///
    /// Readers never observe a partially written artifact.
    async fn save(&self, state: &SyncState) -> anyhow::Result<()>;

    /// Deletes the stored snapshot; absence is not an error
    async fn reset(&self) -> anyhow::Result<()>;
}
