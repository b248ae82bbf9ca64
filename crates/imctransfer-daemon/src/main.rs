//! imctransfer - Box.com acquisition mirror
//!
//! This binary runs in the foreground (typically in a terminal next to the
//! acquisition machine's upload folder) and handles:
//! - Loading configuration and applying command-line overrides
//! - Establishing a Box session, authorizing interactively on first use
//! - Periodic polling, download and verification via the [`Poller`]
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Exit codes
//!
//! - `0`: the run limit was reached or the user interrupted
//! - `1`: Box rejected the credentials at startup
//! - `2`: any other startup failure (configuration, secrets file, directories)

mod cli;

use std::{process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use imctransfer_box::{
    auth, client::BoxClient, is_authentication_failure, provider::BoxRemoteDirectory,
};
use imctransfer_core::{
    config::Config,
    ports::{IRemoteDirectory, IStateStore},
};
use imctransfer_sync::{
    scheduler::{Poller, StopReason},
    state_store::JsonStateStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;

/// Box rejected the credentials
const EXIT_AUTH_FAILURE: u8 = 1;

/// Any other failure before the polling loop started
const EXIT_STARTUP_FAILURE: u8 = 2;

// ============================================================================
// DaemonService
// ============================================================================

/// Startup sequence and polling loop for one process
struct DaemonService {
    config: Config,
    shutdown: CancellationToken,
}

impl DaemonService {
    fn new(config: Config, shutdown: CancellationToken) -> Self {
        Self { config, shutdown }
    }

    /// Creates the download directory and the metadata file's parent
    async fn prepare_directories(&self) -> Result<()> {
        let data_dir = self.config.data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let metadata_file = self.config.metadata_file();
        if let Some(parent) = metadata_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create metadata directory {}", parent.display())
            })?;
        }

        Ok(())
    }

    /// Loads credentials, authorizes if needed and proves the session works
    async fn connect(&self) -> Result<Arc<dyn IRemoteDirectory>> {
        info!("Reading credentials and setting up connection with server");

        let tokens = auth::authenticate(&self.config.paths.secrets_file, &self.config.remote)
            .await
            .context("Failed to establish Box session")?;
        let client = BoxClient::from_config(Arc::new(tokens), &self.config.remote)?;

        let user = client
            .current_user()
            .await
            .context("Could not establish connection with server")?;
        info!(login = %user.login, name = %user.name, "Connected to Box");

        Ok(Arc::new(BoxRemoteDirectory::new(Arc::new(client))))
    }

    /// Runs startup, then the polling loop until deadline or interrupt
    async fn run(&self) -> Result<StopReason> {
        self.prepare_directories().await?;

        let state_store = Arc::new(JsonStateStore::new(self.config.paths.state_file.clone()));
        if self.config.sync.fresh_start {
            info!(path = %state_store.path().display(), "Starting fresh, forgetting previously seen files");
            state_store.reset().await?;
        }

        let remote = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                info!("Interrupted during startup");
                return Ok(StopReason::Interrupted);
            }
            remote = self.connect() => remote?,
        };

        info!("Starting daemon");
        let poller = Poller::new(remote, state_store, &self.config);
        Ok(poller.run(self.shutdown.clone()).await)
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Entry point
// ============================================================================

fn init_tracing(args: &Args, config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_filter(&config.logging.level)));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

/// Maps a startup failure onto the process exit code
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if is_authentication_failure(err) {
        EXIT_AUTH_FAILURE
    } else {
        EXIT_STARTUP_FAILURE
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => args.apply(config),
        Err(e) => {
            eprintln!("imctransfer: {e:#}");
            return ExitCode::from(EXIT_STARTUP_FAILURE);
        }
    };

    init_tracing(&args, &config);

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!(field = %problem.field, "{}", problem.message);
        }
        return ExitCode::from(EXIT_STARTUP_FAILURE);
    }

    info!("imctransfer starting");

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token);
    match service.run().await {
        Ok(StopReason::DeadlineReached) => {
            info!("Run limit reached, exiting");
            ExitCode::SUCCESS
        }
        Ok(StopReason::Interrupted) => {
            info!("User interrupted, terminating");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = exit_code_for(&e);
            if code == EXIT_AUTH_FAILURE {
                error!(error = %format!("{e:#}"), "Could not establish connection with server");
            } else {
                error!(error = %format!("{e:#}"), "Startup failed");
            }
            ExitCode::from(code)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
