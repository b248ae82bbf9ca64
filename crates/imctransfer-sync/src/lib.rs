//! imctransfer Sync - polling synchronization engine
//!
//! Provides:
//! - Streaming SHA-1 integrity hashing
//! - A JSON snapshot of observed remote files
//! - Change detection against that snapshot
//! - Download-and-verify of every listed file with bounded concurrency
//! - The sorted metadata table
//! - The polling loop with refresh interval and overall deadline
//!
//! ## Modules
//!
//! - [`hasher`] - Chunked SHA-1 over files and async readers
//! - [`state_store`] - [`IStateStore`](imctransfer_core::ports::IStateStore) backed by a JSON file
//! - [`detector`] - Set comparison of listing and snapshot
//! - [`executor`] - Per-file fetch, transfer and verification
//! - [`metadata`] - CSV rendering of the per-file records
//! - [`scheduler`] - The [`Poller`](scheduler::Poller) state machine

pub mod detector;
pub mod executor;
pub mod hasher;
pub mod metadata;
pub mod scheduler;
pub mod state_store;

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A call to the remote directory failed
    #[error("Remote error: {0}")]
    Remote(String),

    /// Local content does not match the remote checksum
    #[error("Integrity mismatch for {}: expected {expected}, got {actual}", path.display())]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// A transfer was cancelled; the partial file has been removed
    #[error("Transfer interrupted: {}", .0.display())]
    Interrupted(PathBuf),

    /// Cancelled while waiting on the remote, before any file was written
    #[error("Operation cancelled")]
    Cancelled,

    /// The persisted snapshot could not be parsed
    #[error("State file corrupted: {0}")]
    StateCorruption(String),

    /// The state store could not be read or written
    #[error("State store error: {0}")]
    State(String),

    /// The metadata table could not be serialized
    #[error("Metadata error: {0}")]
    Metadata(#[from] csv::Error),

    /// A domain-level error propagated from imctransfer-core
    #[error("Domain error: {0}")]
    Domain(#[from] imctransfer_core::domain::DomainError),
}

impl SyncError {
    /// Wrap a remote directory failure, keeping the full cause chain
    pub fn remote(err: anyhow::Error) -> Self {
        Self::Remote(format!("{err:#}"))
    }

    /// Whether this error is a cancellation rather than a failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_) | Self::Cancelled)
    }
}
