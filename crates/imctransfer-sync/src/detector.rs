//! Change detector
//!
//! Compares a fresh listing against the persisted snapshot. Both sides are
//! treated as sets because the remote does not promise a stable order.

use imctransfer_core::domain::{RemoteFileRef, SyncState};

/// Result of comparing a listing with the snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Same set of files as the last completed cycle
    Unchanged,
    /// The listing differs from the snapshot
    Changed {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

impl Change {
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Decide whether a cycle has work to do
///
/// # Arguments
/// * `listing` - Files returned by the current query
/// * `previous` - Snapshot saved by the last changed cycle
pub fn detect(listing: &[RemoteFileRef], previous: &SyncState) -> Change {
    let current = SyncState::from_refs(listing);
    if current.same_files(previous) {
        return Change::Unchanged;
    }

    let added = current.added_since(previous);
    let removed = current.removed_since(previous);
    Change::Changed { added, removed }
}
