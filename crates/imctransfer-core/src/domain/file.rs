//! Remote file entities and the per-file sync record
//!
//! ## Design Notes
//!
//! A [`RemoteFileRef`] is what a listing returns and what the persisted
//! snapshot remembers (through its `url`). [`RemoteFileMetadata`] is fetched
//! lazily, only in cycles that have work to do. The [`FileSyncRecord`] is
//! rebuilt from scratch every changed cycle and becomes one row of the
//! metadata table.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, RemoteId};

/// Leading `20YYMMDD` run of a sample name
static ACQUISITION_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(20\d{6})").expect("valid acquisition date regex"));

// ============================================================================
// RemoteFileRef
// ============================================================================

/// Opaque handle to a remote file as returned by a directory listing
///
/// Identity is the `id`; the `url` is the canonical API location of the
/// file and is what the state snapshot stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteFileRef {
    pub id: RemoteId,
    pub url: String,
}

impl RemoteFileRef {
    pub fn new(id: RemoteId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
        }
    }
}

// ============================================================================
// RemoteFileMetadata
// ============================================================================

/// Per-file metadata reported by the remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileMetadata {
    pub id: RemoteId,
    /// File name on the remote host, including its extension
    pub name: String,
    /// Creation timestamp as reported by the host (ISO 8601)
    pub created_at: String,
    /// Display name of the uploading user
    pub created_by_name: String,
    /// Authoritative checksum of the current file version
    pub content_hash: ContentHash,
}

// ============================================================================
// FileSyncRecord
// ============================================================================

/// Outcome of syncing one remote file, one row of the metadata table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSyncRecord {
    pub sample_name: String,
    pub remote_file_name: String,
    pub created_by: String,
    pub created_at: String,
    pub url: String,
    pub content_hash: ContentHash,
    /// True only when the local copy was verified against `content_hash`
    pub downloaded: bool,
    /// Local path of the verified copy; set only when `downloaded` is true
    pub written_to: Option<PathBuf>,
    pub acquisition_date: Option<NaiveDate>,
}

impl FileSyncRecord {
    /// Build an undownloaded record from a listing entry and its metadata
    ///
    /// # Arguments
    /// * `file` - The listing entry the metadata was fetched for
    /// * `metadata` - Metadata reported by the remote host
    /// * `file_type` - Extension stripped from the name to form the sample name
    pub fn from_metadata(
        file: &RemoteFileRef,
        metadata: &RemoteFileMetadata,
        file_type: &str,
    ) -> Self {
        let sample_name = sample_name(&metadata.name, file_type);
        let acquisition_date = acquisition_date(&sample_name);

        Self {
            sample_name,
            remote_file_name: metadata.name.clone(),
            created_by: metadata.created_by_name.clone(),
            created_at: metadata.created_at.clone(),
            url: file.url.clone(),
            content_hash: metadata.content_hash.clone(),
            downloaded: false,
            written_to: None,
            acquisition_date,
        }
    }

    /// Mark the record as verified at `path`
    pub fn mark_downloaded(&mut self, path: PathBuf) {
        self.downloaded = true;
        self.written_to = Some(path);
    }

    /// Clear any download state, used when verification fails
    pub fn mark_not_downloaded(&mut self) {
        self.downloaded = false;
        self.written_to = None;
    }
}

// ============================================================================
// Name derivation
// ============================================================================

/// Derive the sample name from a remote file name
///
/// Strips a trailing `.<file_type>` (case-insensitive) and replaces every
/// whitespace character with `_`.
pub fn sample_name(file_name: &str, file_type: &str) -> String {
    let suffix_len = file_type.len() + 1;
    let stem = if !file_type.is_empty()
        && file_name.len() > suffix_len
        && file_name.is_char_boundary(file_name.len() - suffix_len)
    {
        let (head, tail) = file_name.split_at(file_name.len() - suffix_len);
        if tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(file_type) {
            head
        } else {
            file_name
        }
    } else {
        file_name
    };

    stem.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Extract the acquisition date encoded at the start of a sample name
///
/// Returns `None` when the name does not start with `20YYMMDD` or when the
/// digits do not form a calendar date.
pub fn acquisition_date(sample_name: &str) -> Option<NaiveDate> {
    let captures = ACQUISITION_DATE_RE.captures(sample_name)?;
    NaiveDate::parse_from_str(captures.get(1)?.as_str(), "%Y%m%d").ok()
}

/// Check that a remote file name is safe to use as a single path component
///
/// # Errors
/// Returns [`DomainError::InvalidFileName`] for empty names, `.`, `..`, and
/// names containing `/`, `\` or NUL.
pub fn validate_file_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(DomainError::InvalidFileName(name.to_string()));
    }

    if name.contains(['/', '\\', '\0']) {
        return Err(DomainError::InvalidFileName(name.to_string()));
    }

    Ok(())
}

/// Compute `<data_dir>/<sample_name>/<file_name>`
///
/// Both components are validated so the result always stays inside
/// `data_dir`.
///
/// # Errors
/// Returns [`DomainError::InvalidFileName`] if either component is unsafe
pub fn destination_path(
    data_dir: &Path,
    sample_name: &str,
    file_name: &str,
) -> Result<PathBuf, DomainError> {
    validate_file_name(sample_name)?;
    validate_file_name(file_name)?;
    Ok(data_dir.join(sample_name).join(file_name))
}
