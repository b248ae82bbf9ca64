//! imctransfer core - domain types, configuration and ports
//!
//! This crate holds everything the synchronization engine reasons about
//! without touching the network:
//! - **Domain types** - `RemoteFileRef`, `RemoteFileMetadata`, `FileSyncRecord`, `SyncState`
//! - **Port definitions** - `IRemoteDirectory` (the remote file host) and
//!   `IStateStore` (the persisted snapshot)
//! - **Configuration** - typed, validated settings loaded from YAML
//!
//! # Architecture
//!
//! Ports are traits implemented by adapter crates (`imctransfer-box` for the
//! remote side, `imctransfer-sync` for the JSON state file). The domain module
//! is pure: name normalization, date extraction and snapshot comparison.

pub mod config;
pub mod domain;
pub mod ports;
