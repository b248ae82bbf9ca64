//! Poller - drives the query / detect / sync / persist / sleep cycle
//!
//! The [`Poller`] owns everything one daemon instance needs (remote
//! directory, state store, executor, metadata writer) so several instances
//! can coexist in one process.
//!
//! ## State Machine
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            ▼                                      │
//! Idle ──→ Querying ──→ Unchanged ──┐               │
//!              │                    ├──→ sleep ─────┘
//!              └────→ Syncing ──────┘      │
//!                                          ▼
//!                                       Stopped   (deadline or interrupt)
//! ```
//!
//! The current state is published on a `watch` channel.

use std::sync::Arc;
use std::time::Duration;

use imctransfer_core::config::Config;
use imctransfer_core::domain::SyncState;
use imctransfer_core::ports::{FileQuery, IRemoteDirectory, IStateStore};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::detector::{self, Change};
use crate::executor::{DownloadExecutor, ExecutorOptions, FileOutcome};
use crate::metadata::MetadataWriter;
use crate::SyncError;

// ============================================================================
// PollerState / StopReason / CycleReport
// ============================================================================

/// Observable state of the polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Querying,
    Unchanged,
    Syncing,
    Stopped,
}

/// Why [`Poller::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured maximum run duration elapsed
    DeadlineReached,
    /// The cancellation token fired
    Interrupted,
}

/// Summary of a cycle that found changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub downloaded: usize,
    pub up_to_date: usize,
    pub disabled: usize,
    pub failed: usize,
    pub rejected: usize,
    pub metadata_written: bool,
    pub duration: Duration,
}

// ============================================================================
// Poller
// ============================================================================

/// The polling session
pub struct Poller {
    remote: Arc<dyn IRemoteDirectory>,
    state_store: Arc<dyn IStateStore>,
    executor: DownloadExecutor,
    metadata: MetadataWriter,
    query: FileQuery,
    refresh_interval: Duration,
    max_run_duration: Option<Duration>,
    started: Instant,
    state_tx: watch::Sender<PollerState>,
}

impl Poller {
    /// Creates a poller from configuration
    ///
    /// The run deadline is measured from this call.
    ///
    /// # Arguments
    /// * `remote` - Remote file directory
    /// * `state_store` - Persisted snapshot of observed files
    /// * `config` - Application configuration
    pub fn new(
        remote: Arc<dyn IRemoteDirectory>,
        state_store: Arc<dyn IStateStore>,
        config: &Config,
    ) -> Self {
        let executor = DownloadExecutor::new(
            Arc::clone(&remote),
            ExecutorOptions::from_config(config),
        );
        let metadata = MetadataWriter::new(config.metadata_file(), config.sync.save_metadata);
        let query = FileQuery::new(config.query_pattern(), config.sync.file_type.clone());
        let (state_tx, _) = watch::channel(PollerState::Idle);

        Self {
            remote,
            state_store,
            executor,
            metadata,
            query,
            refresh_interval: config.refresh_interval(),
            max_run_duration: config.max_run_duration(),
            started: Instant::now(),
            state_tx,
        }
    }

    /// Override the sleep between cycles
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Override the overall run deadline (`None` runs until interrupted)
    pub fn with_max_run_duration(mut self, duration: Option<Duration>) -> Self {
        self.max_run_duration = duration;
        self
    }

    /// Receiver for state transitions
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> PollerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: PollerState) {
        debug!(?state, "poller state");
        self.state_tx.send_replace(state);
    }

    fn deadline_reached(&self) -> bool {
        self.max_run_duration
            .is_some_and(|max| self.started.elapsed() >= max)
    }

    /// Time to sleep before the next cycle, capped at the deadline
    fn next_sleep(&self) -> Duration {
        match self.max_run_duration {
            Some(max) => self
                .refresh_interval
                .min(max.saturating_sub(self.started.elapsed())),
            None => self.refresh_interval,
        }
    }

    /// Run one query / detect / sync / persist pass
    ///
    /// # Returns
    /// `None` when the listing matches the snapshot and nothing was touched.
    ///
    /// # Errors
    /// Listing, metadata-table and state-store failures abort the cycle
    /// without saving state. Cancellation is reported as
    /// [`SyncError::Interrupted`] or [`SyncError::Cancelled`].
    #[tracing::instrument(skip(self, cancel))]
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<CycleReport>, SyncError> {
        let start = std::time::Instant::now();
        self.set_state(PollerState::Querying);

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            listed = self.remote.list_files(&self.query) => listed,
        };
        let listing = listed.map_err(SyncError::remote)?;

        let previous = self
            .state_store
            .load()
            .await
            .map_err(|e| SyncError::State(format!("{e:#}")))?;

        let (added, removed) = match detector::detect(&listing, &previous) {
            Change::Unchanged => {
                info!(listed = listing.len(), "No new files");
                self.set_state(PollerState::Unchanged);
                return Ok(None);
            }
            Change::Changed { added, removed } => (added.len(), removed.len()),
        };

        info!(listed = listing.len(), added, removed, "New files found, syncing");
        self.set_state(PollerState::Syncing);

        let outcomes = self.executor.process_all(&listing, cancel).await?;

        let mut report = CycleReport {
            listed: listing.len(),
            ..CycleReport::default()
        };
        for outcome in &outcomes {
            match outcome {
                FileOutcome::Downloaded(_) => report.downloaded += 1,
                FileOutcome::SkippedUpToDate(_) => report.up_to_date += 1,
                FileOutcome::SkippedDisabled(_) => report.disabled += 1,
                FileOutcome::Failed { file, reason, .. } => {
                    report.failed += 1;
                    error!(url = %file.url, %reason, "file not synced, will retry next cycle");
                }
                FileOutcome::Rejected { file, reason, .. } => {
                    report.rejected += 1;
                    warn!(url = %file.url, %reason, "file skipped until the listing changes");
                }
            }
        }

        // Failed files stay out of the snapshot so the next cycle retries them.
        // Rejected files are kept: retrying would fail the same way.
        let snapshot = SyncState::from_urls(
            outcomes
                .iter()
                .filter(|o| !o.is_failed())
                .map(|o| o.url().to_string()),
        );
        let records = outcomes
            .into_iter()
            .filter_map(FileOutcome::into_record)
            .collect();

        report.metadata_written = self.metadata.write(records).await?;

        self.state_store
            .save(&snapshot)
            .await
            .map_err(|e| SyncError::State(format!("{e:#}")))?;

        report.duration = start.elapsed();
        info!(
            listed = report.listed,
            downloaded = report.downloaded,
            up_to_date = report.up_to_date,
            disabled = report.disabled,
            failed = report.failed,
            rejected = report.rejected,
            metadata_written = report.metadata_written,
            duration_ms = report.duration.as_millis() as u64,
            "Sync cycle completed"
        );

        Ok(Some(report))
    }

    /// Main loop: cycle, sleep, repeat until the deadline or cancellation
    ///
    /// A failed cycle is logged and retried after the refresh interval; it
    /// never ends the loop.
    pub async fn run(&self, cancel: CancellationToken) -> StopReason {
        info!(
            query = %self.query.pattern,
            file_type = %self.query.file_type,
            refresh_secs = self.refresh_interval.as_secs(),
            max_run_secs = self.max_run_duration.map(|d| d.as_secs()),
            "Poller starting"
        );

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Interrupted;
            }

            match self.run_cycle(&cancel).await {
                Ok(_) => {}
                Err(e) if e.is_interrupted() => break StopReason::Interrupted,
                Err(e) => error!(error = %e, "Sync cycle failed, retrying after refresh interval"),
            }

            if self.deadline_reached() {
                break StopReason::DeadlineReached;
            }

            self.set_state(PollerState::Idle);
            let sleep_for = self.next_sleep();
            debug!(secs = sleep_for.as_secs_f64(), "sleeping until next cycle");

            tokio::select! {
                _ = cancel.cancelled() => break StopReason::Interrupted,
                _ = tokio::time::sleep(sleep_for) => {}
            }

            if self.deadline_reached() {
                break StopReason::DeadlineReached;
            }
        };

        self.set_state(PollerState::Stopped);
        match reason {
            StopReason::DeadlineReached => info!("Maximum run time reached, stopping"),
            StopReason::Interrupted => info!("Interrupted, stopping"),
        }
        reason
    }
}
