//! BoxRemoteDirectory - IRemoteDirectory implementation for Box.com
//!
//! Wraps a [`BoxClient`] and maps Box resources onto the port-level types:
//! search hits become [`RemoteFileRef`]s keyed by their API URL, and file
//! info becomes [`RemoteFileMetadata`] with the version SHA-1 as the
//! content hash.

use std::sync::Arc;

use anyhow::{Context, Result};
use imctransfer_core::domain::{ContentHash, RemoteFileMetadata, RemoteFileRef, RemoteId};
use imctransfer_core::ports::{ContentStream, FileQuery, IRemoteDirectory};
use tracing::debug;

use crate::client::{BoxClient, FileInfo};
use crate::BoxError;

/// Box.com adapter for the remote directory port
#[derive(Clone)]
pub struct BoxRemoteDirectory {
    client: Arc<BoxClient>,
}

impl BoxRemoteDirectory {
    pub fn new(client: Arc<BoxClient>) -> Self {
        Self { client }
    }

    /// Returns the underlying client
    pub fn client(&self) -> &BoxClient {
        &self.client
    }
}

/// Converts Box file info into port-level metadata
///
/// A file without a version SHA-1 cannot be verified and is rejected.
fn file_info_to_metadata(id: &RemoteId, info: FileInfo) -> Result<RemoteFileMetadata> {
    let sha1 = info
        .file_version
        .and_then(|v| v.sha1)
        .ok_or_else(|| BoxError::InvalidResponse(format!("file {id} has no file_version.sha1")))?;
    let content_hash = ContentHash::new(sha1).with_context(|| format!("file {id}"))?;

    Ok(RemoteFileMetadata {
        id: id.clone(),
        name: info.name,
        created_at: info.created_at.unwrap_or_default(),
        created_by_name: info.created_by.and_then(|u| u.name).unwrap_or_default(),
        content_hash,
    })
}

#[async_trait::async_trait]
impl IRemoteDirectory for BoxRemoteDirectory {
    async fn list_files(&self, query: &FileQuery) -> Result<Vec<RemoteFileRef>> {
        let entries = self.client.search_files(query).await?;

        let refs = entries
            .into_iter()
            .map(|entry| {
                let url = self.client.file_url(&entry.id);
                let id = RemoteId::new(entry.id).context("Search returned an unusable file id")?;
                Ok(RemoteFileRef::new(id, url))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            pattern = %query.pattern,
            file_type = %query.file_type,
            count = refs.len(),
            "Listed remote files"
        );
        Ok(refs)
    }

    async fn fetch_metadata(&self, file: &RemoteFileRef) -> Result<RemoteFileMetadata> {
        let info = self.client.get_file(&file.id).await?;
        file_info_to_metadata(&file.id, info)
    }

    async fn fetch_content(&self, file: &RemoteFileRef) -> Result<ContentStream> {
        self.client.download(&file.id).await
    }
}
