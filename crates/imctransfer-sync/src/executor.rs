//! Download-and-verify executor
//!
//! For every file in a listing the executor fetches metadata, decides
//! whether the local copy must be (re)fetched, streams the content to its
//! destination and verifies the result against the remote SHA-1.
//!
//! ## Design Notes
//!
//! - A listing is processed in three stages: describe (metadata for every
//!   file), place (one destination per file for the whole listing), sync
//!   (compare, transfer, verify).
//! - Files with the same name in different remote folders would share
//!   `<sample>/<name>`. Every member of such a group is stored as
//!   `<sample>/<id>_<name>` instead, so no two records ever point at the
//!   same path and the choice does not depend on listing order.
//! - Work runs on a `JoinSet` bounded by a `Semaphore`. Permits are taken
//!   before a task is spawned, in listing order, so one permit means
//!   strictly sequential processing in listing order.
//! - Outcomes are reassembled in listing order before they are returned; the
//!   caller writes metadata and state only after this join barrier.
//! - A failure in one file becomes [`FileOutcome::Failed`] (worth retrying)
//!   or [`FileOutcome::Rejected`] (will fail the same way again) and never
//!   aborts its siblings. Only cancellation is returned as an error.
//! - Cancellation is a `CancellationToken` checked at every suspension point.
//!   A transfer that observes it removes its partial output before returning.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use imctransfer_core::config::Config;
use imctransfer_core::domain::{destination_path, FileSyncRecord, RemoteFileRef};
use imctransfer_core::ports::{ContentStream, IRemoteDirectory};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::hasher;
use crate::SyncError;

// ============================================================================
// FileOutcome
// ============================================================================

/// What happened to one listed file during a cycle
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// Transferred and verified against the remote checksum
    Downloaded(FileSyncRecord),
    /// A verified local copy already existed
    SkippedUpToDate(FileSyncRecord),
    /// File downloads are disabled; metadata only
    SkippedDisabled(FileSyncRecord),
    /// Metadata fetch, transfer or verification failed
    ///
    /// `record` is present when metadata was fetched before the failure.
    Failed {
        file: RemoteFileRef,
        record: Option<FileSyncRecord>,
        reason: String,
    },
    /// The file can never be stored as listed, e.g. its name is not a safe
    /// path component
    Rejected {
        file: RemoteFileRef,
        record: Option<FileSyncRecord>,
        reason: String,
    },
}

impl FileOutcome {
    pub fn record(&self) -> Option<&FileSyncRecord> {
        match self {
            Self::Downloaded(r) | Self::SkippedUpToDate(r) | Self::SkippedDisabled(r) => Some(r),
            Self::Failed { record, .. } | Self::Rejected { record, .. } => record.as_ref(),
        }
    }

    pub fn into_record(self) -> Option<FileSyncRecord> {
        match self {
            Self::Downloaded(r) | Self::SkippedUpToDate(r) | Self::SkippedDisabled(r) => Some(r),
            Self::Failed { record, .. } | Self::Rejected { record, .. } => record,
        }
    }

    /// True for transient failures that the next cycle should retry
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// URL of the listed file this outcome belongs to
    pub fn url(&self) -> &str {
        match self {
            Self::Downloaded(r) | Self::SkippedUpToDate(r) | Self::SkippedDisabled(r) => &r.url,
            Self::Failed { file, .. } | Self::Rejected { file, .. } => &file.url,
        }
    }

    fn failed(file: &RemoteFileRef, reason: impl Into<String>) -> Self {
        Self::Failed {
            file: file.clone(),
            record: None,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// ExecutorOptions
// ============================================================================

/// Settings that shape per-file processing
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Root under which `<sample>/<file>` destinations are created
    pub data_dir: PathBuf,
    /// Extension stripped from file names to form sample names
    pub file_type: String,
    /// Transfer content; when false only records are produced
    pub save_files: bool,
    /// Re-transfer even when a verified local copy exists
    pub overwrite: bool,
    /// Files processed at the same time
    pub max_concurrent: usize,
}

impl ExecutorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.data_dir(),
            file_type: config.sync.file_type.clone(),
            save_files: config.sync.save_files,
            overwrite: config.sync.overwrite,
            max_concurrent: config.sync.max_concurrent_downloads,
        }
    }
}

// ============================================================================
// Stages
// ============================================================================

/// A file either settles early or moves on to the next stage with `T`
enum Step<T> {
    Done(FileOutcome),
    Next(T),
}

/// Metadata is known, content still has to be synced
struct Described {
    file: RemoteFileRef,
    record: FileSyncRecord,
}

/// A described file together with its unique local destination
struct Placed {
    file: RemoteFileRef,
    record: FileSyncRecord,
    dest: PathBuf,
}

/// Assign one destination per described file
///
/// Files whose `<sample>/<name>` is shared with another listed file are
/// stored as `<sample>/<id>_<name>`. A destination that is invalid or still
/// taken after that is rejected.
fn place_files(data_dir: &Path, steps: Vec<Step<Described>>) -> Vec<Step<Placed>> {
    let plain: Vec<Option<PathBuf>> = steps
        .iter()
        .map(|step| match step {
            Step::Next(d) => {
                destination_path(data_dir, &d.record.sample_name, &d.record.remote_file_name).ok()
            }
            Step::Done(_) => None,
        })
        .collect();

    let mut sharing: HashMap<&Path, usize> = HashMap::new();
    for path in plain.iter().flatten() {
        *sharing.entry(path.as_path()).or_default() += 1;
    }

    let mut claimed: HashSet<PathBuf> = HashSet::new();
    steps
        .into_iter()
        .zip(plain.iter())
        .map(|(step, plain)| {
            let Described { file, record } = match step {
                Step::Next(d) => d,
                Step::Done(outcome) => return Step::Done(outcome),
            };

            let dest = match plain {
                Some(path) if sharing.get(path.as_path()).copied().unwrap_or(0) > 1 => {
                    let unique = format!("{}_{}", file.id, record.remote_file_name);
                    debug!(name = %record.remote_file_name, %unique, "file name shared by several listed files");
                    destination_path(data_dir, &record.sample_name, &unique)
                }
                Some(path) => Ok(path.clone()),
                None => destination_path(data_dir, &record.sample_name, &record.remote_file_name),
            };

            let reason = match dest {
                Ok(dest) if claimed.insert(dest.clone()) => {
                    return Step::Next(Placed { file, record, dest });
                }
                Ok(dest) => format!(
                    "destination {} is already used by another listed file",
                    dest.display()
                ),
                Err(e) => e.to_string(),
            };

            warn!(name = %record.remote_file_name, %reason, "refusing to write file");
            Step::Done(FileOutcome::Rejected {
                file,
                record: Some(record),
                reason,
            })
        })
        .collect()
}

// ============================================================================
// DownloadExecutor
// ============================================================================

/// Fetches and verifies every file of a listing
#[derive(Clone)]
pub struct DownloadExecutor {
    remote: Arc<dyn IRemoteDirectory>,
    options: Arc<ExecutorOptions>,
}

impl DownloadExecutor {
    pub fn new(remote: Arc<dyn IRemoteDirectory>, options: ExecutorOptions) -> Self {
        Self {
            remote,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Process every distinct file and return one outcome per file, in
    /// listing order
    ///
    /// A URL listed more than once is processed once.
    ///
    /// # Errors
    /// Returns [`SyncError::Interrupted`] (or [`SyncError::Cancelled`] if no
    /// transfer had started) when `cancel` fired while any file was still in
    /// progress. Partial output has been removed by then.
    pub async fn process_all(
        &self,
        files: &[RemoteFileRef],
        cancel: &CancellationToken,
    ) -> Result<Vec<FileOutcome>, SyncError> {
        let mut seen = HashSet::new();
        let files: Vec<RemoteFileRef> = files
            .iter()
            .filter(|f| seen.insert(f.url.clone()))
            .cloned()
            .collect();

        let described = self
            .run_in_order(files.clone(), cancel, |this, file, cancel| async move {
                this.describe(&file, &cancel).await
            })
            .await?;
        let described: Vec<Step<Described>> = described
            .into_iter()
            .zip(&files)
            .map(|(slot, file)| match slot {
                Some(Ok(step)) => step,
                Some(Err(e)) => Step::Done(FileOutcome::failed(file, e.to_string())),
                None => Step::Done(FileOutcome::failed(file, "task did not complete")),
            })
            .collect();

        let mut outcomes: Vec<Option<FileOutcome>> = Vec::with_capacity(files.len());
        let mut pending = Vec::new();
        for (index, step) in place_files(&self.options.data_dir, described)
            .into_iter()
            .enumerate()
        {
            match step {
                Step::Done(outcome) => outcomes.push(Some(outcome)),
                Step::Next(placed) => {
                    outcomes.push(None);
                    pending.push((index, placed));
                }
            }
        }

        let indices: Vec<usize> = pending.iter().map(|(index, _)| *index).collect();
        let synced = self
            .run_in_order(
                pending.into_iter().map(|(_, placed)| placed).collect(),
                cancel,
                |this, placed, cancel| async move { this.sync_file(placed, &cancel).await },
            )
            .await?;
        for (index, slot) in indices.into_iter().zip(synced) {
            outcomes[index] = Some(match slot {
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) => FileOutcome::failed(&files[index], e.to_string()),
                None => FileOutcome::failed(&files[index], "task did not complete"),
            });
        }

        Ok(outcomes
            .into_iter()
            .zip(&files)
            .map(|(slot, file)| {
                slot.unwrap_or_else(|| FileOutcome::failed(file, "task did not complete"))
            })
            .collect())
    }

    /// Run `work` on every item, at most `max_concurrent` at a time
    ///
    /// Tasks start in item order. The result slot of a task that panicked is
    /// `None`; interruptions are collected and returned once every started
    /// task has finished.
    async fn run_in_order<T, O, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<Vec<Option<Result<O, SyncError>>>, SyncError>
    where
        T: Send + 'static,
        O: Send + 'static,
        F: Fn(Self, T, CancellationToken) -> Fut,
        Fut: Future<Output = Result<O, SyncError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent.max(1)));
        let mut join_set = JoinSet::new();
        let mut slots: Vec<Option<Result<O, SyncError>>> =
            std::iter::repeat_with(|| None).take(items.len()).collect();
        let mut interrupted: Option<SyncError> = None;

        for (index, item) in items.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = Some(SyncError::Cancelled);
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit,
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "worker pool closed");
                    break;
                }
            };

            let task = work(self.clone(), item, cancel.clone());
            join_set.spawn(async move {
                let result = task.await;
                drop(permit);
                (index, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Err(e))) if e.is_interrupted() => {
                    // Prefer reporting a transfer that was cut short.
                    if matches!(interrupted, None | Some(SyncError::Cancelled)) {
                        interrupted = Some(e);
                    }
                }
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!(error = %e, "file task panicked"),
            }
        }

        match interrupted {
            Some(e) => Err(e),
            None => Ok(slots),
        }
    }

    /// Fetch metadata and build the record for one file
    #[instrument(skip(self, cancel), fields(id = %file.id))]
    async fn describe(
        &self,
        file: &RemoteFileRef,
        cancel: &CancellationToken,
    ) -> Result<Step<Described>, SyncError> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            fetched = self.remote.fetch_metadata(file) => fetched,
        };
        let metadata = match fetched {
            Ok(m) => m,
            Err(e) => {
                let err = SyncError::remote(e);
                warn!(url = %file.url, error = %err, "could not fetch file metadata");
                return Ok(Step::Done(FileOutcome::failed(file, err.to_string())));
            }
        };

        let record = FileSyncRecord::from_metadata(file, &metadata, &self.options.file_type);

        if !self.options.save_files {
            debug!(name = %metadata.name, "file downloads disabled");
            return Ok(Step::Done(FileOutcome::SkippedDisabled(record)));
        }

        Ok(Step::Next(Described {
            file: file.clone(),
            record,
        }))
    }

    /// Bring the local copy of one placed file up to date
    ///
    /// Every failure except cancellation is folded into the returned outcome.
    #[instrument(skip(self, placed, cancel), fields(id = %placed.file.id))]
    async fn sync_file(
        &self,
        placed: Placed,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome, SyncError> {
        let Placed {
            file,
            mut record,
            dest,
        } = placed;
        let written_to = std::path::absolute(&dest).unwrap_or_else(|_| dest.clone());

        let mut mismatch = false;
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            match hasher::digest_file(&dest).await {
                Ok(local) if local == record.content_hash => {
                    if !self.options.overwrite {
                        debug!(path = %dest.display(), "local copy up to date");
                        record.mark_downloaded(written_to);
                        return Ok(FileOutcome::SkippedUpToDate(record));
                    }
                }
                Ok(local) => {
                    info!(
                        path = %dest.display(),
                        expected = %record.content_hash,
                        actual = %local,
                        "File exists but SHA1 does not match, re-downloading"
                    );
                    mismatch = true;
                }
                Err(e) => {
                    warn!(path = %dest.display(), error = %e, "could not hash existing file, re-downloading");
                    mismatch = true;
                }
            }
        }

        info!(
            name = %record.remote_file_name,
            path = %dest.display(),
            overwrite = self.options.overwrite,
            mismatch,
            "Downloading file"
        );

        if let Err(e) = self.transfer(&file, &dest, cancel).await {
            if e.is_interrupted() {
                return Err(e);
            }
            error!(path = %dest.display(), error = %e, "download failed");
            return Ok(FileOutcome::Failed {
                file,
                record: Some(record),
                reason: e.to_string(),
            });
        }

        match self.verify(&dest, &record).await {
            Ok(()) => {
                info!(path = %dest.display(), "SHA1 matches");
                record.mark_downloaded(written_to);
                Ok(FileOutcome::Downloaded(record))
            }
            Err(e) => {
                error!(error = %e, "SHA1 mismatch after download, deleting file");
                remove_file_logged(&dest).await;
                record.mark_not_downloaded();
                Ok(FileOutcome::Failed {
                    file,
                    record: Some(record),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stream the file content into `dest`, removing it on any failure
    async fn transfer(
        &self,
        file: &RemoteFileRef,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            opened = self.remote.fetch_content(file) => opened,
        };
        let stream = opened.map_err(SyncError::remote)?;

        let result = write_stream(stream, dest, cancel).await;
        if let Err(e) = &result {
            if e.is_interrupted() {
                info!(path = %dest.display(), "transfer interrupted, removing partial file");
            }
            remove_file_logged(dest).await;
        }
        result
    }

    async fn verify(&self, dest: &Path, record: &FileSyncRecord) -> Result<(), SyncError> {
        let actual = hasher::digest_file(dest).await?;
        if actual == record.content_hash {
            Ok(())
        } else {
            Err(SyncError::IntegrityMismatch {
                path: dest.to_path_buf(),
                expected: record.content_hash.to_string(),
                actual: actual.to_string(),
            })
        }
    }
}

/// Copy chunks from `stream` into a freshly created `dest`
///
/// The file handle is closed before returning so the caller may delete it.
async fn write_stream(
    mut stream: ContentStream,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<(), SyncError> {
    let mut out = tokio::fs::File::create(dest).await?;
    let mut bytes_written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Interrupted(dest.to_path_buf())),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                out.write_all(&chunk).await?;
                bytes_written += chunk.len() as u64;
            }
            Some(Err(e)) => return Err(SyncError::remote(e)),
            None => break,
        }
    }

    out.flush().await?;
    out.sync_all().await?;
    debug!(path = %dest.display(), bytes_written, "transfer complete");
    Ok(())
}

async fn remove_file_logged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
