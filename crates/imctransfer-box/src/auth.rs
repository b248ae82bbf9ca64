//! Credentials for the Box API
//!
//! Box apps authenticate with a client id and secret kept in a small JSON
//! secrets file, alongside the access and refresh tokens once the user has
//! authorized the app. Two modes are supported:
//!
//! - **Developer token**: the `access_token` in the secrets file is used
//!   as-is. It expires after an hour and is never refreshed.
//! - **OAuth2**: if either token is missing, the user authorizes the app once
//!   in a browser and pastes the code back; afterwards the refresh token keeps
//!   the session alive and every new token pair is written back to the file.
//!
//! ## Components
//!
//! - [`Secrets`] / [`SecretsFile`] - On-disk credential record
//! - [`OAuthEndpoints`] - Authorization, token and redirect URLs
//! - [`BoxOAuthFlow`] - Authorization code exchange and refresh
//! - [`TokenManager`] - Current token plus refresh-and-persist logic

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use imctransfer_core::config::RemoteConfig;
use oauth2::{
    basic::{BasicClient, BasicErrorResponse},
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, HttpClientError, RedirectUrl, RefreshToken, RequestTokenError, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::BoxError;

// ============================================================================
// Secrets
// ============================================================================

/// Contents of the secrets file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Secrets {
    /// True when both tokens of an OAuth2 session are present
    pub fn has_session(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    /// Drops any stored tokens, keeping the app credentials
    pub fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
    }

    fn apply(&mut self, tokens: &Tokens) {
        self.access_token = Some(tokens.access_token.clone());
        if let Some(refresh) = &tokens.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
    }
}

/// JSON secrets file on disk
#[derive(Debug, Clone)]
pub struct SecretsFile {
    path: PathBuf,
}

impl SecretsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the secrets file
    pub async fn load(&self) -> Result<Secrets> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read secrets file {}", self.path.display()))?;
        let secrets: Secrets = serde_json::from_str(&raw).with_context(|| {
            format!(
                "Secrets file {} must be a JSON object with client_id and client_secret",
                self.path.display()
            )
        })?;
        Ok(secrets)
    }

    /// Atomically replaces the secrets file with `secrets`, pretty-printed
    pub async fn save(&self, secrets: &Secrets) -> Result<()> {
        let json = serde_json::to_string_pretty(secrets).context("Failed to serialize secrets")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to restrict permissions on {}", tmp.display()))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!(path = %self.path.display(), "Saved secrets file");
        Ok(())
    }
}

// ============================================================================
// OAuth2 flow
// ============================================================================

/// Endpoints used by the authorization code flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    /// Page the user lands on after authorizing; it displays the code
    pub redirect_uri: String,
}

impl OAuthEndpoints {
    pub fn from_config(remote: &RemoteConfig) -> Self {
        Self {
            auth_url: remote.auth_url.clone(),
            token_url: remote.token_url.clone(),
            redirect_uri: remote.redirect_uri.clone(),
        }
    }
}

/// Token pair returned by an exchange or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Authorization code exchange and refresh against the Box token endpoint
pub struct BoxOAuthFlow {
    client: ConfiguredClient,
    http: reqwest::Client,
}

impl BoxOAuthFlow {
    /// Builds the flow for the app described by `secrets`
    pub fn new(secrets: &Secrets, endpoints: &OAuthEndpoints) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(secrets.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(endpoints.auth_url.clone()).context("Invalid authorization URL")?,
            )
            .set_token_uri(TokenUrl::new(endpoints.token_url.clone()).context("Invalid token URL")?)
            .set_redirect_uri(
                RedirectUrl::new(endpoints.redirect_uri.clone()).context("Invalid redirect URI")?,
            )
            // Box expects client credentials in the form body
            .set_auth_type(AuthType::RequestBody);

        // token requests carry the client secret and must not follow redirects
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build OAuth2 HTTP client")?;

        Ok(Self { client, http })
    }

    /// Generates the URL the user opens to authorize the app
    ///
    /// # Returns
    /// `(authorization_url, csrf_state)`
    pub fn authorize_url(&self) -> (String, CsrfToken) {
        let (url, csrf) = self.client.authorize_url(CsrfToken::new_random).url();
        (url.to_string(), csrf)
    }

    /// Exchanges an authorization code for a token pair
    pub async fn exchange_code(&self, code: String) -> Result<Tokens, BoxError> {
        info!("Exchanging authorization code for tokens");

        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(&self.http)
            .await
            .map_err(token_error)?;

        Ok(Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().to_string()),
        })
    }

    /// Trades a refresh token for a new token pair
    ///
    /// Box rotates refresh tokens; when the response carries none, the old
    /// one is kept.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Tokens, BoxError> {
        info!("Refreshing access token");

        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(token_error)?;

        Ok(Tokens {
            access_token: token_result.access_token().secret().to_string(),
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().to_string())
                .or_else(|| Some(refresh_token.to_string())),
        })
    }
}

type TokenRequestError = RequestTokenError<HttpClientError<reqwest::Error>, BasicErrorResponse>;

fn token_error(err: TokenRequestError) -> BoxError {
    match err {
        RequestTokenError::ServerResponse(response) => {
            let message = match response.error_description() {
                Some(description) => format!("{}: {}", response.error(), description),
                None => response.error().to_string(),
            };
            BoxError::Authentication(message)
        }
        other => BoxError::Authentication(format!("{:#}", anyhow::Error::new(other))),
    }
}

/// Extracts the authorization code from what the user pasted
///
/// Accepts either the bare code or the full redirect URL. When the URL
/// carries a `state` parameter it must match `expected_state`.
pub fn parse_authorization_input(input: &str, expected_state: &str) -> Result<String, BoxError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(BoxError::Authentication(
            "no authorization code entered".to_string(),
        ));
    }

    let Ok(url) = url::Url::parse(input) else {
        return Ok(input.to_string());
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.to_string()),
            "state" => state = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(state) = state {
        if state != expected_state {
            return Err(BoxError::Authentication(
                "authorization state does not match this login attempt".to_string(),
            ));
        }
    }

    code.filter(|c| !c.is_empty()).ok_or_else(|| {
        BoxError::Authentication("redirect URL does not contain a code".to_string())
    })
}

// ============================================================================
// TokenManager
// ============================================================================

/// Holds the current access token and renews it when the API rejects it
///
/// In developer-token mode there is no flow and [`TokenManager::refresh`]
/// always fails with [`BoxError::Unauthorized`].
pub struct TokenManager {
    store: SecretsFile,
    secrets: Mutex<Secrets>,
    flow: Option<BoxOAuthFlow>,
}

impl TokenManager {
    /// Uses the stored access token as-is, without refresh
    pub fn developer_token(store: SecretsFile, secrets: Secrets) -> Result<Self, BoxError> {
        if secrets.access_token.as_deref().map_or(true, str::is_empty) {
            return Err(BoxError::Authentication(format!(
                "secrets file {} has no access_token for developer-token mode",
                store.path().display()
            )));
        }
        Ok(Self {
            store,
            secrets: Mutex::new(secrets),
            flow: None,
        })
    }

    /// OAuth2 mode: tokens are refreshed and persisted to `store`
    pub fn oauth(store: SecretsFile, secrets: Secrets, endpoints: &OAuthEndpoints) -> Result<Self> {
        let flow = BoxOAuthFlow::new(&secrets, endpoints)?;
        Ok(Self {
            store,
            secrets: Mutex::new(secrets),
            flow: Some(flow),
        })
    }

    /// True if tokens can be renewed without user interaction
    pub fn can_refresh(&self) -> bool {
        self.flow.is_some()
    }

    /// True if the one-time interactive authorization is still needed
    pub async fn needs_login(&self) -> bool {
        self.flow.is_some() && !self.secrets.lock().await.has_session()
    }

    /// Current access token
    pub async fn access_token(&self) -> Result<String, BoxError> {
        self.secrets
            .lock()
            .await
            .access_token
            .clone()
            .ok_or_else(|| BoxError::Unauthorized("no access token available".to_string()))
    }

    /// Runs the one-time interactive authorization
    ///
    /// Prints the authorization URL, optionally opens it in the browser,
    /// reads the code (or the full redirect URL) from `input`, exchanges it
    /// and persists the new tokens.
    pub async fn login<R>(&self, mut input: R, open_browser: bool) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let flow = self.flow.as_ref().ok_or_else(|| {
            BoxError::Authentication("interactive login requires OAuth2 mode".to_string())
        })?;

        let (auth_url, csrf) = flow.authorize_url();

        eprintln!("Authorize imctransfer to access Box by opening:\n\n    {auth_url}\n");
        if open_browser {
            if let Err(e) = webbrowser::open(&auth_url) {
                warn!(error = %e, "Could not open a browser, open the URL manually");
            }
        }
        eprint!("Please enter the code here: ");

        let mut line = String::new();
        input
            .read_line(&mut line)
            .await
            .context("Failed to read authorization code")?;
        let code = parse_authorization_input(&line, csrf.secret())?;

        let tokens = flow.exchange_code(code).await?;

        let mut secrets = self.secrets.lock().await;
        secrets.clear_tokens();
        secrets.apply(&tokens);
        self.store.save(&secrets).await?;

        info!(path = %self.store.path().display(), "Stored new Box session");
        Ok(())
    }

    /// Renews the access token after `stale` was rejected
    ///
    /// If another task already replaced `stale`, the newer token is returned
    /// without a second refresh.
    pub async fn refresh(&self, stale: &str) -> Result<String, BoxError> {
        let Some(flow) = &self.flow else {
            return Err(BoxError::Unauthorized(
                "developer token rejected; generate a new one".to_string(),
            ));
        };

        let mut secrets = self.secrets.lock().await;
        if let Some(current) = secrets.access_token.as_deref() {
            if current != stale {
                debug!("Access token already refreshed by another request");
                return Ok(current.to_string());
            }
        }

        let refresh_token = secrets.refresh_token.clone().ok_or_else(|| {
            BoxError::Unauthorized("no refresh token available".to_string())
        })?;
        let tokens = flow.refresh(&refresh_token).await?;
        secrets.apply(&tokens);

        if let Err(e) = self.store.save(&secrets).await {
            warn!(error = %format!("{e:#}"), "Refreshed tokens could not be persisted");
        }

        Ok(tokens.access_token)
    }
}

/// Loads credentials and establishes a usable session
///
/// In OAuth2 mode this runs the interactive authorization on stdin when the
/// secrets file has no session yet.
pub async fn authenticate(secrets_path: &Path, remote: &RemoteConfig) -> Result<TokenManager> {
    let store = SecretsFile::new(secrets_path);
    let secrets = store.load().await?;

    if remote.use_access_token {
        info!("Authenticating with developer token");
        return Ok(TokenManager::developer_token(store, secrets)?);
    }

    let manager = TokenManager::oauth(store, secrets, &OAuthEndpoints::from_config(remote))?;
    if manager.needs_login().await {
        info!("No stored Box session, starting interactive authorization");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        manager.login(stdin, true).await?;
    }
    Ok(manager)
}
