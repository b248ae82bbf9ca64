//! Integration tests for the poller
//!
//! - Idempotence of unchanged cycles
//! - Change detection and snapshot replacement
//! - Failed files are retried on the next cycle
//! - Rejected files do not make later cycles look changed
//! - Metadata table ordering and integrity of downloaded rows
//! - Loop termination on deadline and on cancellation

use std::sync::Arc;
use std::time::Duration;

use imctransfer_core::domain::SyncState;
use imctransfer_core::ports::IStateStore;
use imctransfer_sync::hasher;
use imctransfer_sync::scheduler::{Poller, PollerState, StopReason};
use imctransfer_sync::state_store::JsonStateStore;
use imctransfer_sync::SyncError;
use tokio_util::sync::CancellationToken;

use crate::common::{self, ContentMode, FakeFile, FakeRemote};

struct Harness {
    dir: tempfile::TempDir,
    remote: Arc<FakeRemote>,
    store: Arc<JsonStateStore>,
    poller: Poller,
}

impl Harness {
    fn new(files: Vec<FakeFile>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = common::default_config(dir.path());
        Self::with_config(dir, config, files)
    }

    fn with_config(
        dir: tempfile::TempDir,
        config: imctransfer_core::config::Config,
        files: Vec<FakeFile>,
    ) -> Self {
        let remote = FakeRemote::with_files(files);
        let store = Arc::new(JsonStateStore::new(config.paths.state_file.clone()));
        let poller = Poller::new(remote.clone(), store.clone(), &config);
        Self {
            dir,
            remote,
            store,
            poller,
        }
    }

    fn metadata_path(&self) -> std::path::PathBuf {
        self.dir.path().join("metadata/annotation.auto.csv")
    }

    async fn saved_state(&self) -> SyncState {
        self.store.load().await.unwrap()
    }
}

#[tokio::test]
async fn test_second_unchanged_cycle_touches_nothing() {
    let h = Harness::new(vec![
        FakeFile::new("1", "a.mcd", b"aaa"),
        FakeFile::new("2", "b.mcd", b"bbb"),
    ]);
    let cancel = CancellationToken::new();

    let first = h.poller.run_cycle(&cancel).await.unwrap().expect("first cycle syncs");
    assert_eq!(first.listed, 2);
    assert_eq!(first.downloaded, 2);
    assert!(first.metadata_written);

    // An unchanged cycle must not recreate the metadata table.
    std::fs::remove_file(h.metadata_path()).unwrap();
    let state_before = std::fs::read(h.store.path()).unwrap();
    let metadata_calls = h.remote.metadata_calls();

    let second = h.poller.run_cycle(&cancel).await.unwrap();
    assert!(second.is_none());
    assert_eq!(h.poller.state(), PollerState::Unchanged);
    assert_eq!(h.remote.metadata_calls(), metadata_calls);
    assert_eq!(h.remote.content_calls(), 2);
    assert!(!h.metadata_path().exists());
    assert_eq!(std::fs::read(h.store.path()).unwrap(), state_before);
}

#[tokio::test]
async fn test_known_state_skips_pipeline() {
    let h = Harness::new(vec![
        FakeFile::new("1", "a.mcd", b"aaa"),
        FakeFile::new("2", "b.mcd", b"bbb"),
    ]);
    h.store
        .save(&SyncState::from_urls([common::url_for("2"), common::url_for("1")]))
        .await
        .unwrap();

    let report = h.poller.run_cycle(&CancellationToken::new()).await.unwrap();

    assert!(report.is_none());
    assert_eq!(h.remote.metadata_calls(), 0);
    assert_eq!(h.remote.content_calls(), 0);
    assert!(!h.metadata_path().exists());
}

#[tokio::test]
async fn test_new_file_reprocesses_whole_listing() {
    let h = Harness::new(vec![
        FakeFile::new("1", "a.mcd", b"aaa"),
        FakeFile::new("2", "b.mcd", b"bbb"),
    ]);
    let cancel = CancellationToken::new();
    h.poller.run_cycle(&cancel).await.unwrap();

    h.remote.push(FakeFile::new("3", "c.mcd", b"ccc"));
    let metadata_before = h.remote.metadata_calls();

    let report = h.poller.run_cycle(&cancel).await.unwrap().expect("changed");

    assert_eq!(report.listed, 3);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.up_to_date, 2);
    assert_eq!(h.remote.metadata_calls() - metadata_before, 3);

    let expected = SyncState::from_urls(["1", "2", "3"].map(common::url_for));
    assert!(h.saved_state().await.same_files(&expected));

    let csv = std::fs::read_to_string(h.metadata_path()).unwrap();
    assert_eq!(csv.lines().count(), 4);
}

#[tokio::test]
async fn test_removed_file_replaces_snapshot() {
    let h = Harness::new(vec![
        FakeFile::new("1", "a.mcd", b"aaa"),
        FakeFile::new("2", "b.mcd", b"bbb"),
    ]);
    let cancel = CancellationToken::new();
    h.poller.run_cycle(&cancel).await.unwrap();

    h.remote.set_files(vec![FakeFile::new("1", "a.mcd", b"aaa")]);
    let report = h.poller.run_cycle(&cancel).await.unwrap().expect("changed");

    assert_eq!(report.listed, 1);
    assert_eq!(h.saved_state().await.urls(), [common::url_for("1")]);
}

#[tokio::test]
async fn test_failed_file_is_retried_next_cycle() {
    let h = Harness::new(vec![
        FakeFile::new("1", "a.mcd", b"aaa"),
        FakeFile::new("2", "b.mcd", b"bbb").with_mode(ContentMode::Error),
    ]);
    let cancel = CancellationToken::new();

    let first = h.poller.run_cycle(&cancel).await.unwrap().expect("changed");
    assert_eq!(first.failed, 1);
    assert_eq!(h.saved_state().await.urls(), [common::url_for("1")]);

    // The remote recovers; the missing file is picked up again.
    h.remote.set_files(vec![
        FakeFile::new("1", "a.mcd", b"aaa"),
        FakeFile::new("2", "b.mcd", b"bbb"),
    ]);
    let second = h.poller.run_cycle(&cancel).await.unwrap().expect("changed");
    assert_eq!(second.failed, 0);
    assert_eq!(second.downloaded, 1);
    assert_eq!(second.up_to_date, 1);
    assert_eq!(h.saved_state().await.len(), 2);
}

#[tokio::test]
async fn test_rejected_file_does_not_keep_listing_changed() {
    let h = Harness::new(vec![
        FakeFile::new("1", "a.mcd", b"aaa"),
        FakeFile::new("2", "bad\\name.mcd", b"bbb"),
    ]);
    let cancel = CancellationToken::new();

    let first = h.poller.run_cycle(&cancel).await.unwrap().expect("changed");
    assert_eq!(first.downloaded, 1);
    assert_eq!(first.rejected, 1);
    assert_eq!(first.failed, 0);
    assert_eq!(h.saved_state().await.len(), 2);

    let csv = std::fs::read_to_string(h.metadata_path()).unwrap();
    assert_eq!(csv.lines().count(), 3);

    let modified = std::fs::metadata(h.metadata_path()).unwrap().modified().unwrap();
    let metadata_calls = h.remote.metadata_calls();

    let second = h.poller.run_cycle(&cancel).await.unwrap();
    assert!(second.is_none());
    assert_eq!(h.remote.metadata_calls(), metadata_calls);
    assert_eq!(h.remote.content_calls(), 1);
    assert_eq!(
        std::fs::metadata(h.metadata_path()).unwrap().modified().unwrap(),
        modified
    );
}

#[tokio::test]
async fn test_listing_failure_saves_nothing() {
    let h = Harness::new(vec![FakeFile::new("1", "a.mcd", b"aaa")]);
    h.remote.set_list_fails(true);

    let err = h
        .poller
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Remote(_)));
    assert!(!h.store.path().exists());
}

#[tokio::test]
async fn test_metadata_rows_sorted_and_verified() {
    let h = Harness::new(vec![
        FakeFile::new("1", "cohortX.mcd", b"undated"),
        FakeFile::new("2", "20230101_b.mcd", b"newer"),
        FakeFile::new("3", "20220505 a.mcd", b"older"),
    ]);
    h.poller
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap()
        .expect("changed");

    let mut reader = csv::Reader::from_path(h.metadata_path()).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        [
            "sample_name",
            "mcd_file",
            "created_by",
            "created_at",
            "url",
            "sha1",
            "downloaded",
            "written_to",
            "acquisition_date"
        ]
    );

    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    let samples: Vec<&str> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(samples, ["20220505_a", "20230101_b", "cohortX"]);
    assert_eq!(&rows[0][8], "2022-05-05");
    assert_eq!(&rows[2][8], "");

    for row in &rows {
        assert_eq!(&row[6], "true");
        let hash = hasher::digest_file(std::path::Path::new(&row[7]))
            .await
            .unwrap();
        assert_eq!(hash.as_str(), &row[5]);
    }
}

#[tokio::test]
async fn test_metadata_disabled_still_saves_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config_in(dir.path()).save_metadata(false).build();
    let h = Harness::with_config(dir, config, vec![FakeFile::new("1", "a.mcd", b"aaa")]);

    let report = h
        .poller
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap()
        .expect("changed");

    assert!(!report.metadata_written);
    assert!(!h.metadata_path().exists());
    assert_eq!(h.saved_state().await.len(), 1);
}

#[tokio::test]
async fn test_interrupt_mid_transfer_stops_loop() {
    let cancel = CancellationToken::new();
    let h = Harness::new(vec![FakeFile::new("1", "a.mcd", b"0123456789")
        .with_mode(ContentMode::CancelMidStream(cancel.clone()))]);

    let reason = tokio::time::timeout(Duration::from_secs(5), h.poller.run(cancel))
        .await
        .expect("poller should stop promptly");

    assert_eq!(reason, StopReason::Interrupted);
    assert_eq!(h.poller.state(), PollerState::Stopped);
    assert!(!h.dir.path().join("data/a/a.mcd").exists());
    assert!(!h.store.path().exists());
}

#[tokio::test]
async fn test_interrupt_during_sleep() {
    let h = Harness::new(vec![FakeFile::new("1", "a.mcd", b"aaa")]);
    let states = h.poller.subscribe();
    let state_file = h.store.path().to_path_buf();
    let cancel = CancellationToken::new();

    // Fire once the first cycle has been persisted and the poller sleeps.
    let trigger = cancel.clone();
    tokio::spawn(async move {
        loop {
            let idle = *states.borrow() == PollerState::Idle;
            if idle && state_file.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.cancel();
    });

    let reason = tokio::time::timeout(Duration::from_secs(5), h.poller.run(cancel))
        .await
        .expect("sleep must be cancellable");

    assert_eq!(reason, StopReason::Interrupted);
    assert_eq!(h.saved_state().await.len(), 1);
}

#[tokio::test]
async fn test_deadline_after_cycles() {
    let h = Harness::new(vec![FakeFile::new("1", "a.mcd", b"aaa")]);
    let poller = Poller::new(
        h.remote.clone(),
        h.store.clone(),
        &common::default_config(h.dir.path()),
    )
    .with_refresh_interval(Duration::from_millis(20))
    .with_max_run_duration(Some(Duration::from_millis(200)));

    let reason = tokio::time::timeout(Duration::from_secs(5), poller.run(CancellationToken::new()))
        .await
        .expect("poller should stop at its deadline");

    assert_eq!(reason, StopReason::DeadlineReached);
    assert!(h.remote.list_calls.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    assert_eq!(h.remote.content_calls(), 1);
}
