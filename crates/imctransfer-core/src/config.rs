//! Configuration module for imctransfer.
//!
//! Provides typed configuration structs that map to an optional YAML file,
//! with loading, validation, defaults, and a builder pattern used by tests
//! and by the command-line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for imctransfer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub paths: PathsConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

/// Polling and download behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Free-text search query. `None` searches for the file type itself.
    pub query_pattern: Option<String>,
    /// File extension (without the dot) to look for.
    pub file_type: String,
    /// Seconds to sleep between polling cycles.
    pub refresh_interval_secs: u64,
    /// Hours after which the daemon stops. `None` runs until interrupted.
    pub max_run_duration_hours: Option<f64>,
    /// Download file content. When false only metadata is collected.
    pub save_files: bool,
    /// Write the metadata table.
    pub save_metadata: bool,
    /// Re-download files that already exist locally with a matching digest.
    pub overwrite: bool,
    /// Forget the persisted snapshot at startup.
    pub fresh_start: bool,
    /// Files processed concurrently within one cycle.
    pub max_concurrent_downloads: usize,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// JSON file holding client credentials and tokens.
    pub secrets_file: PathBuf,
    /// JSON file holding the snapshot of observed file URLs.
    pub state_file: PathBuf,
    /// Base directory for `data_dir` and `metadata_file` defaults.
    pub project_dir: PathBuf,
    /// Downloaded files land in `<data_dir>/<sample>/<file>`.
    pub data_dir: Option<PathBuf>,
    /// Location of the metadata CSV.
    pub metadata_file: Option<PathBuf>,
}

/// Remote host (Box.com) endpoints and HTTP behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_base_url: String,
    pub auth_url: String,
    pub token_url: String,
    /// Redirect URI registered with the OAuth application.
    pub redirect_uri: String,
    /// Upper bound on any single HTTP request, in seconds.
    pub request_timeout_secs: u64,
    /// Entries requested per search page.
    pub page_size: u32,
    /// Use the stored access token as a developer token, without OAuth refresh.
    pub use_access_token: bool,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Loading and derived values
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// The search query, defaulting to the file type.
    pub fn query_pattern(&self) -> &str {
        self.sync
            .query_pattern
            .as_deref()
            .unwrap_or(&self.sync.file_type)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.sync.refresh_interval_secs)
    }

    /// Overall run deadline measured from process start, if bounded.
    pub fn max_run_duration(&self) -> Option<Duration> {
        self.sync
            .max_run_duration_hours
            .and_then(|hours| Duration::try_from_secs_f64(hours * 3600.0).ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.request_timeout_secs)
    }

    /// Resolved data directory (`<project_dir>/data` unless set).
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(|| self.paths.project_dir.join("data"))
    }

    /// Resolved metadata file (`<project_dir>/metadata/annotation.auto.csv` unless set).
    pub fn metadata_file(&self) -> PathBuf {
        self.paths.metadata_file.clone().unwrap_or_else(|| {
            self.paths
                .project_dir
                .join("metadata")
                .join("annotation.auto.csv")
        })
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/imctransfer/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("imctransfer")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            query_pattern: None,
            file_type: "mcd".to_string(),
            refresh_interval_secs: 7200,
            max_run_duration_hours: Some(3.0),
            save_files: true,
            save_metadata: true,
            overwrite: false,
            fresh_start: false,
            max_concurrent_downloads: 1,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
        Self {
            secrets_file: home.join(".imctransfer.auth.json"),
            state_file: home.join(".imctransfer.urls.json"),
            project_dir: PathBuf::from("."),
            data_dir: None,
            metadata_file: None,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.box.com/2.0".to_string(),
            auth_url: "https://account.box.com/api/oauth2/authorize".to_string(),
            token_url: "https://api.box.com/oauth2/token".to_string(),
            redirect_uri: "https://imctransfer.herokuapp.com/".to_string(),
            request_timeout_secs: 300,
            page_size: 200,
            use_access_token: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.refresh_interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `sync.max_concurrent_downloads`.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 16;

/// Upper bound the search endpoint accepts for `limit`.
pub const MAX_PAGE_SIZE: u32 = 200;

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        if self.sync.refresh_interval_secs == 0 {
            errors.push(ValidationError {
                field: "sync.refresh_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if let Some(hours) = self.sync.max_run_duration_hours {
            if !hours.is_finite() || hours <= 0.0 {
                errors.push(ValidationError {
                    field: "sync.max_run_duration_hours".into(),
                    message: format!("must be a positive number of hours, got {hours}"),
                });
            }
        }
        let file_type = self.sync.file_type.trim();
        if file_type.is_empty() {
            errors.push(ValidationError {
                field: "sync.file_type".into(),
                message: "must not be empty".into(),
            });
        } else if file_type.starts_with('.') || file_type.contains(['/', '\\']) {
            errors.push(ValidationError {
                field: "sync.file_type".into(),
                message: format!("must be a bare extension, got '{}'", self.sync.file_type),
            });
        }
        if self.sync.max_concurrent_downloads == 0
            || self.sync.max_concurrent_downloads > MAX_CONCURRENT_DOWNLOADS
        {
            errors.push(ValidationError {
                field: "sync.max_concurrent_downloads".into(),
                message: format!("must be in range 1..={MAX_CONCURRENT_DOWNLOADS}"),
            });
        }

        // --- remote ---
        if self.remote.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "remote.request_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.remote.page_size == 0 || self.remote.page_size > MAX_PAGE_SIZE {
            errors.push(ValidationError {
                field: "remote.page_size".into(),
                message: format!("must be in range 1..={MAX_PAGE_SIZE}"),
            });
        }
        if self.remote.api_base_url.trim().is_empty() {
            errors.push(ValidationError {
                field: "remote.api_base_url".into(),
                message: "must not be empty".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use imctransfer_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .project_dir(PathBuf::from("/srv/imc"))
///     .refresh_interval_secs(600)
///     .max_run_duration_hours(None)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Start from an existing configuration, e.g. one loaded from YAML.
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    // --- sync ---

    pub fn query_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.sync.query_pattern = Some(pattern.into());
        self
    }

    pub fn file_type(mut self, file_type: impl Into<String>) -> Self {
        self.config.sync.file_type = file_type.into();
        self
    }

    pub fn refresh_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.refresh_interval_secs = seconds;
        self
    }

    pub fn max_run_duration_hours(mut self, hours: Option<f64>) -> Self {
        self.config.sync.max_run_duration_hours = hours;
        self
    }

    pub fn save_files(mut self, save: bool) -> Self {
        self.config.sync.save_files = save;
        self
    }

    pub fn save_metadata(mut self, save: bool) -> Self {
        self.config.sync.save_metadata = save;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.sync.overwrite = overwrite;
        self
    }

    pub fn fresh_start(mut self, fresh: bool) -> Self {
        self.config.sync.fresh_start = fresh;
        self
    }

    pub fn max_concurrent_downloads(mut self, n: usize) -> Self {
        self.config.sync.max_concurrent_downloads = n;
        self
    }

    // --- paths ---

    pub fn secrets_file(mut self, path: PathBuf) -> Self {
        self.config.paths.secrets_file = path;
        self
    }

    pub fn state_file(mut self, path: PathBuf) -> Self {
        self.config.paths.state_file = path;
        self
    }

    pub fn project_dir(mut self, path: PathBuf) -> Self {
        self.config.paths.project_dir = path;
        self
    }

    pub fn data_dir(mut self, path: PathBuf) -> Self {
        self.config.paths.data_dir = Some(path);
        self
    }

    pub fn metadata_file(mut self, path: PathBuf) -> Self {
        self.config.paths.metadata_file = Some(path);
        self
    }

    // --- remote ---

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.api_base_url = url.into();
        self
    }

    pub fn request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.remote.request_timeout_secs = seconds;
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.config.remote.page_size = size;
        self
    }

    pub fn use_access_token(mut self, enabled: bool) -> Self {
        self.config.remote.use_access_token = enabled;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
