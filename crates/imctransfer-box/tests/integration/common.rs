//! Shared test helpers for Box API integration tests
//!
//! Each helper mounts mock endpoints on a wiremock server; clients are
//! pointed at the server's URI.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use imctransfer_box::auth::{OAuthEndpoints, Secrets, SecretsFile, TokenManager};
use imctransfer_box::client::BoxClient;
use imctransfer_box::provider::BoxRemoteDirectory;

/// SHA-1 of `b"abc"`
pub const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

/// Starts a mock server and returns a fixed-token client pointed at it
pub async fn setup_box_mock() -> (MockServer, BoxClient) {
    let server = MockServer::start().await;
    let client = BoxClient::with_base_url("test-access-token", server.uri());
    (server, client)
}

/// Same as [`setup_box_mock`] but wrapped in the port adapter
pub async fn setup_directory_mock() -> (MockServer, BoxRemoteDirectory) {
    let (server, client) = setup_box_mock().await;
    (server, BoxRemoteDirectory::new(Arc::new(client)))
}

/// JSON for one search hit
pub fn search_entry(id: &str, name: &str) -> serde_json::Value {
    json!({ "type": "file", "id": id, "name": name })
}

/// JSON for `GET /files/{id}` with the requested fields
pub fn file_json(id: &str, name: &str, sha1: &str) -> serde_json::Value {
    json!({
        "type": "file",
        "id": id,
        "name": name,
        "created_at": "2023-06-15T10:12:13-07:00",
        "created_by": { "type": "user", "id": "11", "name": "Jane Doe", "login": "jane@example.org" },
        "file_version": { "type": "file_version", "id": "v-1", "sha1": sha1 }
    })
}

/// Mounts `GET /users/me`
pub async fn mount_current_user(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "user",
            "id": "11",
            "name": "Jane Doe",
            "login": "jane@example.org"
        })))
        .mount(server)
        .await;
}

/// Token endpoint success body
pub fn token_json(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": refresh
    })
}

/// Writes a secrets file and builds an OAuth2 token manager whose token
/// endpoint is `<server>/oauth2/token`
pub async fn oauth_manager(
    server: &MockServer,
    secrets_path: &Path,
    access: Option<&str>,
    refresh: Option<&str>,
) -> TokenManager {
    let secrets = Secrets {
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        access_token: access.map(str::to_string),
        refresh_token: refresh.map(str::to_string),
    };
    let store = SecretsFile::new(secrets_path);
    store.save(&secrets).await.expect("write secrets");

    let endpoints = OAuthEndpoints {
        auth_url: "https://account.box.com/api/oauth2/authorize".into(),
        token_url: format!("{}/oauth2/token", server.uri()),
        redirect_uri: "https://imctransfer.herokuapp.com/".into(),
    };
    TokenManager::oauth(store, secrets, &endpoints).expect("oauth manager")
}
