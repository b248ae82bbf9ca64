//! Command-line surface of the daemon
//!
//! Every flag is optional and, when given, overrides the value from the
//! configuration file (or the built-in default).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use imctransfer_core::config::{Config, ConfigBuilder};

/// Overall run limit given with `-t`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunLimit {
    Hours(f64),
    Never,
}

fn parse_run_limit(value: &str) -> Result<RunLimit, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("never") || value.eq_ignore_ascii_case("false") {
        return Ok(RunLimit::Never);
    }
    let hours: f64 = value
        .parse()
        .map_err(|_| format!("expected a number of hours, 'never' or 'false', got '{value}'"))?;
    if !hours.is_finite() || hours <= 0.0 {
        return Err(format!("run limit must be a positive number of hours, got {hours}"));
    }
    Ok(RunLimit::Hours(hours))
}

#[derive(Debug, Parser)]
#[command(
    name = "imctransfer",
    version,
    about = "Poll Box.com for new IMC acquisitions, download and verify them, and keep a metadata table"
)]
pub struct Args {
    /// JSON file with client_id, client_secret and, once authorized, access_token and refresh_token
    #[arg(long = "secrets", value_name = "FILE")]
    pub secrets_file: Option<PathBuf>,

    /// File remembering which remote files were already seen
    #[arg(long = "db", value_name = "FILE")]
    pub db_file: Option<PathBuf>,

    /// Do not save the CSV metadata table
    #[arg(long = "no-metadata")]
    pub no_metadata: bool,

    /// Do not download files, only record their metadata
    #[arg(long = "no-mcd")]
    pub no_download: bool,

    /// Download files again even when a verified local copy exists
    #[arg(long)]
    pub overwrite: bool,

    /// Forget previously seen files and start anew
    #[arg(long)]
    pub fresh: bool,

    /// Search query used to restrict the listing (defaults to the file ending)
    #[arg(short = 'q', long = "query-string")]
    pub query_string: Option<String>,

    /// File ending to look for (default: mcd)
    #[arg(short = 'e', long = "file-ending")]
    pub file_type: Option<String>,

    /// Authenticate with a developer token instead of browser-based OAuth2
    #[arg(long = "token", alias = "use-access-token")]
    pub use_access_token: bool,

    /// Seconds between polls (default: 7200)
    #[arg(short = 'r', long = "refresh-time", value_name = "SECONDS")]
    pub refresh_time: Option<u64>,

    /// Hours until the daemon stops, or 'never' / 'false' to run until interrupted (default: 3)
    #[arg(
        short = 't',
        long = "timeout",
        alias = "timeout-delta",
        value_name = "HOURS",
        value_parser = parse_run_limit
    )]
    pub timeout: Option<RunLimit>,

    /// Output metadata file (default: <output-dir>/metadata/annotation.auto.csv)
    #[arg(short = 'm', long = "metadata-file", value_name = "FILE")]
    pub metadata_file: Option<PathBuf>,

    /// Directory to download files into (default: <output-dir>/data)
    #[arg(short = 'd', long = "data-dir", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Root project directory (default: current directory)
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    /// Number of files processed concurrently (default: 1)
    #[arg(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// YAML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Args {
    /// Loads the configuration file named by `--config`, else the default
    /// location if it exists, else built-in defaults
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display())),
            None => {
                let path = Config::default_path();
                if path.exists() {
                    Config::load(&path).with_context(|| {
                        format!("Failed to load configuration from {}", path.display())
                    })
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    /// Applies command-line overrides on top of `config`
    pub fn apply(&self, config: Config) -> Config {
        let mut builder = ConfigBuilder::from_config(config);

        if let Some(path) = &self.secrets_file {
            builder = builder.secrets_file(path.clone());
        }
        if let Some(path) = &self.db_file {
            builder = builder.state_file(path.clone());
        }
        if self.no_metadata {
            builder = builder.save_metadata(false);
        }
        if self.no_download {
            builder = builder.save_files(false);
        }
        if self.overwrite {
            builder = builder.overwrite(true);
        }
        if self.fresh {
            builder = builder.fresh_start(true);
        }
        if let Some(query) = &self.query_string {
            builder = builder.query_pattern(query.clone());
        }
        if let Some(file_type) = &self.file_type {
            builder = builder.file_type(file_type.clone());
        }
        if self.use_access_token {
            builder = builder.use_access_token(true);
        }
        if let Some(secs) = self.refresh_time {
            builder = builder.refresh_interval_secs(secs);
        }
        match self.timeout {
            Some(RunLimit::Hours(hours)) => builder = builder.max_run_duration_hours(Some(hours)),
            Some(RunLimit::Never) => builder = builder.max_run_duration_hours(None),
            None => {}
        }
        if let Some(path) = &self.metadata_file {
            builder = builder.metadata_file(path.clone());
        }
        if let Some(path) = &self.data_dir {
            builder = builder.data_dir(path.clone());
        }
        if let Some(path) = &self.project_dir {
            builder = builder.project_dir(path.clone());
        }
        if let Some(jobs) = self.jobs {
            builder = builder.max_concurrent_downloads(jobs);
        }

        builder.build()
    }

    /// Tracing filter directive: the configured level, raised by `-v`
    pub fn log_filter(&self, configured: &str) -> String {
        match self.verbose {
            0 => configured.to_string(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }
}
