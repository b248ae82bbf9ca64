//! imctransfer Box - Box.com API adapter
//!
//! Provides:
//! - Credential handling against a JSON secrets file (developer token or
//!   OAuth2 authorization code flow with refresh)
//! - An async HTTP client for the Box Content API
//! - The [`provider::BoxRemoteDirectory`] implementation of the
//!   `IRemoteDirectory` port
//!
//! ## Modules
//!
//! - [`auth`] - Secrets file, OAuth2 flow and token refresh
//! - [`client`] - Box Content API HTTP client
//! - [`provider`] - `IRemoteDirectory` adapter over [`client::BoxClient`]
//! - [`retry`] - `Retry-After` parsing for throttled requests

pub mod auth;
pub mod client;
pub mod provider;
pub mod retry;

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when communicating with the Box API
#[derive(Debug, Error)]
pub enum BoxError {
    /// Credentials were rejected and could not be refreshed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient permissions for the requested operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded and the retry budget is spent
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration the server asked us to wait
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Token exchange or refresh against the OAuth2 endpoint failed
    #[error("Authentication failed: {0}")]
    Authentication(String),
}

impl BoxError {
    /// Returns true for errors that mean the credentials are unusable
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Authentication(_))
    }
}

/// Returns true if any error in the chain is a [`BoxError`] auth failure
pub fn is_authentication_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<BoxError>())
        .any(BoxError::is_auth_failure)
}
