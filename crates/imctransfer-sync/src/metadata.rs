//! Metadata aggregator
//!
//! Renders one CSV row per [`FileSyncRecord`], sorted by acquisition date,
//! and replaces the metadata file atomically. The table is recomputed from
//! scratch each time; it is never appended to.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use imctransfer_core::domain::FileSyncRecord;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::SyncError;

/// One line of the metadata table; field names form the header row
#[derive(Debug, Serialize)]
struct MetadataRow<'a> {
    sample_name: &'a str,
    mcd_file: &'a str,
    created_by: &'a str,
    created_at: String,
    url: &'a str,
    sha1: &'a str,
    downloaded: bool,
    written_to: String,
    acquisition_date: String,
}

impl<'a> From<&'a FileSyncRecord> for MetadataRow<'a> {
    fn from(record: &'a FileSyncRecord) -> Self {
        Self {
            sample_name: &record.sample_name,
            mcd_file: &record.remote_file_name,
            created_by: &record.created_by,
            created_at: normalize_timestamp(&record.created_at),
            url: &record.url,
            sha1: record.content_hash.as_str(),
            downloaded: record.downloaded,
            written_to: record
                .written_to
                .as_ref()
                .filter(|_| record.downloaded)
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            acquisition_date: record
                .acquisition_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        }
    }
}

/// Re-render RFC 3339 timestamps canonically; pass anything else through
fn normalize_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|_| raw.to_string())
}

/// Sort ascending by acquisition date, undated records last
///
/// The sort is stable, so ties keep their listing order.
pub fn sort_records(records: &mut [FileSyncRecord]) {
    records.sort_by_key(|r| (r.acquisition_date.is_none(), r.acquisition_date));
}

/// Render records (in the given order) as CSV with a header row
pub fn render(records: &[FileSyncRecord]) -> Result<Vec<u8>, SyncError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(MetadataRow::from(record))?;
    }
    writer
        .into_inner()
        .map_err(|e| SyncError::Io(e.into_error()))
}

/// Writes the metadata table for a cycle
#[derive(Debug, Clone)]
pub struct MetadataWriter {
    path: PathBuf,
    enabled: bool,
}

impl MetadataWriter {
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            path: path.into(),
            enabled,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sort and write `records`, replacing any previous table
    ///
    /// # Returns
    /// `true` if the file was written, `false` when output is disabled or
    /// there are no records.
    #[instrument(skip(self, records), fields(path = %self.path.display(), records = records.len()))]
    pub async fn write(&self, mut records: Vec<FileSyncRecord>) -> Result<bool, SyncError> {
        if !self.enabled {
            debug!("metadata output disabled");
            return Ok(false);
        }
        if records.is_empty() {
            debug!("no records, leaving metadata untouched");
            return Ok(false);
        }

        sort_records(&mut records);
        let bytes = render(&records)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = {
            let mut p = self.path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };
        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        info!("Metadata written");
        Ok(true)
    }
}
