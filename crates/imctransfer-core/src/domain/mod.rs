//! Domain entities and value types
//!
//! - Newtypes for validated identifiers and digests
//! - Remote file references, metadata and the per-file sync record
//! - The persisted snapshot of observed files
//! - Domain error type

pub mod errors;
pub mod file;
pub mod newtypes;
pub mod sync_state;

pub use errors::DomainError;
pub use file::{
    acquisition_date, destination_path, sample_name, validate_file_name, FileSyncRecord,
    RemoteFileMetadata, RemoteFileRef,
};
pub use newtypes::{ContentHash, RemoteId};
pub use sync_state::SyncState;
