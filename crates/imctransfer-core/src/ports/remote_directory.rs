//! Remote directory port (driven/secondary port)
//!
//! The engine reaches the file host only through this trait. The Box.com
//! adapter implements it over HTTP; tests implement it in memory.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because errors at port boundaries are adapter-specific.
//! - Content is returned as a stream of byte chunks so the caller decides
//!   where bytes land and can stop reading at any chunk boundary.

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::domain::{RemoteFileMetadata, RemoteFileRef};

/// Stream of content chunks for one remote file
pub type ContentStream = BoxStream<'static, anyhow::Result<Bytes>>;

/// Search criteria for a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileQuery {
    /// Free-text query passed to the remote search
    pub pattern: String,
    /// File extension (without the dot) results are restricted to
    pub file_type: String,
}

impl FileQuery {
    pub fn new(pattern: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            file_type: file_type.into(),
        }
    }
}

/// Port trait for the remote file directory
#[async_trait::async_trait]
pub trait IRemoteDirectory: Send + Sync {
    /// Lists every file matching the query
    ///
    /// Ordering is whatever the remote returns and is not stable across calls.
    ///
    /// # Arguments
    /// * `query` - Search pattern and file type restriction
    async fn list_files(&self, query: &FileQuery) -> anyhow::Result<Vec<RemoteFileRef>>;

    /// Fetches name, creator, creation time and checksum for one file
    ///
    /// # Arguments
    /// * `file` - Listing entry to describe
    async fn fetch_metadata(&self, file: &RemoteFileRef) -> anyhow::Result<RemoteFileMetadata>;

    /// Opens a content stream for one file
    ///
    /// Dropping the stream aborts the transfer.
    ///
    /// # Arguments
    /// * `file` - Listing entry to download
    async fn fetch_content(&self, file: &RemoteFileRef) -> anyhow::Result<ContentStream>;
}
