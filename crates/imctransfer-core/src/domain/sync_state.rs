//! Persisted snapshot of observed remote files

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::file::RemoteFileRef;

/// The set of remote file URLs seen as of the last completed cycle
///
/// Stored in listing order so the persisted file diffs cleanly, but compared
/// as a set: the remote host does not guarantee a stable listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncState(Vec<String>);

impl SyncState {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a snapshot from URLs, dropping duplicates but keeping order
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let urls = urls
            .into_iter()
            .map(Into::into)
            .filter(|url| seen.insert(url.clone()))
            .collect();
        Self(urls)
    }

    /// Create a snapshot from a listing
    pub fn from_refs<'a, I>(refs: I) -> Self
    where
        I: IntoIterator<Item = &'a RemoteFileRef>,
    {
        Self::from_urls(refs.into_iter().map(|r| r.url.clone()))
    }

    /// URLs in the order they were recorded
    pub fn urls(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.0.iter().any(|u| u == url)
    }

    /// Order-insensitive comparison of the two snapshots
    pub fn same_files(&self, other: &SyncState) -> bool {
        let ours: HashSet<&str> = self.0.iter().map(String::as_str).collect();
        let theirs: HashSet<&str> = other.0.iter().map(String::as_str).collect();
        ours == theirs
    }

    /// URLs present in `self` but not in `previous`, in `self`'s order
    pub fn added_since(&self, previous: &SyncState) -> Vec<String> {
        let old: HashSet<&str> = previous.0.iter().map(String::as_str).collect();
        self.0
            .iter()
            .filter(|url| !old.contains(url.as_str()))
            .cloned()
            .collect()
    }

    /// URLs present in `previous` but no longer in `self`
    pub fn removed_since(&self, previous: &SyncState) -> Vec<String> {
        previous.added_since(self)
    }
}
