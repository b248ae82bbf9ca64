//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync engine depends on; their
//! implementations live in adapter crates or in the engine itself.
//!
//! ## Ports Overview
//!
//! - [`IRemoteDirectory`] - Listing, metadata and content of remote files
//! - [`IStateStore`] - Durable snapshot of the last observed listing

pub mod remote_directory;
pub mod state_store;

pub use remote_directory::{ContentStream, FileQuery, IRemoteDirectory};
pub use state_store::IStateStore;
