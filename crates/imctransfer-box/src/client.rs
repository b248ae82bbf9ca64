//! Box Content API client
//!
//! Thin typed wrapper over `reqwest` for the handful of endpoints the daemon
//! needs: search, file info, file content and the current user.
//!
//! Every request carries the bearer token and goes through
//! [`BoxClient::execute`], which
//! - sleeps and resends on HTTP 429, honoring `Retry-After`, up to
//!   [`DEFAULT_MAX_RETRIES`] times;
//! - on HTTP 401 asks the [`TokenManager`] for a new token once and resends;
//! - maps every other failure status onto [`BoxError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use imctransfer_box::client::BoxClient;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = BoxClient::with_base_url("developer-token", "https://api.box.com/2.0");
//! let me = client.current_user().await?;
//! println!("Logged in as {}", me.login);
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use imctransfer_core::{
    config::RemoteConfig,
    domain::RemoteId,
    ports::{ContentStream, FileQuery},
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::TokenManager;
use crate::retry::{parse_retry_after, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_AFTER};
use crate::BoxError;

/// Base URL for the Box Content API
pub const BOX_API_BASE_URL: &str = "https://api.box.com/2.0";

/// Timeout for JSON calls when none is configured
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Search page size when none is configured (the API maximum)
const DEFAULT_PAGE_SIZE: u32 = 200;

/// Fields requested for file info
const FILE_FIELDS: &str = "name,created_at,created_by,file_version";

// ============================================================================
// Box API response types
// ============================================================================

/// One page of `GET /search`
#[derive(Debug, Deserialize)]
struct SearchPage {
    total_count: u64,
    #[serde(default)]
    entries: Vec<SearchEntry>,
}

/// A search hit
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `file`, `folder` or `web_link`
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: String,
}

fn default_item_type() -> String {
    "file".to_string()
}

/// Response of `GET /files/{id}` with the fields in [`FILE_FIELDS`]
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub created_at: Option<String>,
    pub created_by: Option<UserMini>,
    pub file_version: Option<FileVersion>,
}

/// Compact user object embedded in other resources
#[derive(Debug, Clone, Deserialize)]
pub struct UserMini {
    pub id: Option<String>,
    pub name: Option<String>,
    pub login: Option<String>,
}

/// Current version of a file
#[derive(Debug, Clone, Deserialize)]
pub struct FileVersion {
    pub id: Option<String>,
    /// SHA-1 of the version's content, lowercase hex
    pub sha1: Option<String>,
}

/// Response of `GET /users/me`
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub login: String,
}

/// Error body Box sends with failure statuses
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
}

// ============================================================================
// BoxClient
// ============================================================================

enum Credentials {
    /// Fixed token, never refreshed
    Static(String),
    /// Token owned by a manager that can refresh it
    Managed(Arc<TokenManager>),
}

/// HTTP client for Box API calls
pub struct BoxClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    timeout: Duration,
    page_size: u32,
    max_retries: u32,
}

impl BoxClient {
    /// Creates a client with a fixed access token against a custom base URL
    /// (useful for testing)
    pub fn with_base_url(access_token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: Credentials::Static(access_token.into()),
            timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Creates a client from configuration, taking tokens from `tokens`
    pub fn from_config(tokens: Arc<TokenManager>, remote: &RemoteConfig) -> Result<Self> {
        let timeout = Duration::from_secs(remote.request_timeout_secs);
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("imctransfer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: remote.api_base_url.trim_end_matches('/').to_string(),
            credentials: Credentials::Managed(tokens),
            timeout,
            page_size: remote.page_size,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Replaces the fixed token with a refreshing token manager
    pub fn with_token_manager(mut self, tokens: Arc<TokenManager>) -> Self {
        self.credentials = Credentials::Managed(tokens);
        self
    }

    /// Sets the per-request timeout (and the idle timeout of downloads)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how many results each search request asks for
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets how many times a throttled request is resent
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Canonical API URL of a file, the identity persisted in the snapshot
    pub fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.base_url, id)
    }

    /// Creates an authenticated request builder for the given method and path
    pub fn request(&self, method: Method, path: &str, access_token: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, &url).bearer_auth(access_token)
    }

    async fn current_token(&self) -> Result<String, BoxError> {
        match &self.credentials {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Managed(tokens) => tokens.access_token().await,
        }
    }

    /// Sends a request, handling throttling and token expiry
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - API path relative to the base URL
    /// * `query` - Query string parameters
    /// * `timeout` - Whole-request timeout; `None` for streaming responses
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<Response, BoxError> {
        let mut refreshed = false;
        let mut throttled = 0u32;

        loop {
            let token = self.current_token().await?;
            let mut request = self.request(method.clone(), path, &token).query(query);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            let response = request.send().await?;
            let status = response.status();

            if status.is_success() {
                if throttled > 0 {
                    info!(path, attempts = throttled + 1, "Request succeeded after retry");
                }
                return Ok(response);
            }

            match status {
                StatusCode::UNAUTHORIZED => {
                    let Credentials::Managed(tokens) = &self.credentials else {
                        return Err(BoxError::Unauthorized(format!("{path}: access token rejected")));
                    };
                    if refreshed || !tokens.can_refresh() {
                        return Err(BoxError::Unauthorized(format!("{path}: access token rejected")));
                    }
                    warn!(path, "Access token rejected, refreshing");
                    tokens.refresh(&token).await?;
                    refreshed = true;
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = retry_after(&response);
                    if throttled >= self.max_retries {
                        warn!(path, attempts = throttled + 1, "429 retry limit exhausted");
                        return Err(BoxError::TooManyRequests { retry_after });
                    }
                    throttled += 1;
                    info!(
                        path,
                        attempt = throttled,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Received 429, backing off"
                    );
                    tokio::time::sleep(retry_after).await;
                }
                _ => return Err(status_error(path, response).await),
            }
        }
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T, BoxError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .execute(Method::GET, path, query, Some(self.timeout))
            .await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BoxError::InvalidResponse(format!("{path}: {e}")))
    }

    /// Retrieves the authenticated user
    pub async fn current_user(&self) -> Result<UserInfo> {
        debug!("Fetching /users/me");
        let user = self
            .get_json::<UserInfo>("/users/me", &[("fields", "id,name,login".to_string())])
            .await
            .context("Failed to fetch /users/me")?;
        Ok(user)
    }

    /// Searches for files matching `query`, following offset pagination
    ///
    /// Folders and web links are dropped from the results.
    pub async fn search_files(&self, query: &FileQuery) -> Result<Vec<SearchEntry>> {
        let mut entries = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let params = [
                ("query", query.pattern.clone()),
                ("file_extensions", query.file_type.clone()),
                ("type", "file".to_string()),
                ("fields", "id,name".to_string()),
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ];
            let page: SearchPage = self
                .get_json("/search", &params)
                .await
                .with_context(|| format!("Failed to search Box at offset {offset}"))?;

            let received = page.entries.len() as u64;
            debug!(offset, received, total = page.total_count, "Search page");

            entries.extend(page.entries.into_iter().filter(|e| e.item_type == "file"));
            offset += received;

            if received == 0 || offset >= page.total_count {
                break;
            }
        }

        Ok(entries)
    }

    /// Fetches name, creation info and current version of a file
    pub async fn get_file(&self, id: &RemoteId) -> Result<FileInfo> {
        let path = format!("/files/{id}");
        let info = self
            .get_json::<FileInfo>(&path, &[("fields", FILE_FIELDS.to_string())])
            .await
            .with_context(|| format!("Failed to fetch file {id}"))?;
        Ok(info)
    }

    /// Opens the content of a file as a chunk stream
    ///
    /// The whole transfer has no deadline; instead each chunk must arrive
    /// within the client timeout. Box answers `202 Accepted` while a file
    /// is not yet downloadable; that is retried like a 429.
    pub async fn download(&self, id: &RemoteId) -> Result<ContentStream> {
        let path = format!("/files/{id}/content");
        let mut pending = 0u32;

        let response = loop {
            let response = self
                .execute(Method::GET, &path, &[], None)
                .await
                .with_context(|| format!("Failed to download file {id}"))?;

            if response.status() != StatusCode::ACCEPTED {
                break response;
            }
            if pending >= self.max_retries {
                anyhow::bail!("File {id} is still not ready for download");
            }
            pending += 1;
            let wait = retry_after(&response);
            info!(%id, wait_ms = wait.as_millis() as u64, "File not ready, waiting");
            tokio::time::sleep(wait).await;
        };

        let idle = self.timeout;
        let chunks = Box::pin(response.bytes_stream());
        let stream = futures_util::stream::unfold(Some(chunks), move |state| async move {
            let mut chunks = state?;
            match tokio::time::timeout(idle, chunks.next()).await {
                Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(chunks))),
                Ok(Some(Err(e))) => Some((Err(anyhow::Error::new(BoxError::NetworkError(e))), None)),
                Ok(None) => None,
                Err(_) => Some((
                    Err(anyhow::anyhow!("No data received for {}s", idle.as_secs())),
                    None,
                )),
            }
        });

        Ok(stream.boxed())
    }
}

fn retry_after(response: &Response) -> Duration {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

async fn status_error(path: &str, response: Response) -> BoxError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(ApiErrorBody {
            code: Some(code),
            message: Some(message),
        }) => format!("{path}: {code}: {message}"),
        Ok(ApiErrorBody {
            message: Some(message),
            ..
        }) => format!("{path}: {message}"),
        _ => format!("{path}: HTTP {status}"),
    };

    match status {
        StatusCode::FORBIDDEN => BoxError::Forbidden(detail),
        StatusCode::NOT_FOUND => BoxError::NotFound(detail),
        s if s.is_server_error() => BoxError::ServerError(detail),
        _ => BoxError::InvalidResponse(detail),
    }
}
