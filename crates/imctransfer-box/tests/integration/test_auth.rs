//! Token refresh and one-time authorization against a mock token endpoint

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use imctransfer_box::auth::SecretsFile;
use imctransfer_box::client::BoxClient;
use imctransfer_box::BoxError;

use crate::common;

#[tokio::test]
async fn test_expired_token_is_refreshed_and_persisted() {
    let (server, _) = common::setup_box_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("auth.json");
    let manager = common::oauth_manager(&server, &secrets_path, Some("old"), Some("r1")).await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .and(header("Authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    common::mount_current_user(&server).await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=r1"))
        .and(body_string_contains("client_secret=client-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_json("new", "r2")))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        BoxClient::with_base_url("unused", server.uri()).with_token_manager(Arc::new(manager));
    let user = client.current_user().await.expect("refresh should recover");
    assert_eq!(user.id, "11");

    let stored = SecretsFile::new(&secrets_path).load().await.unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("new"));
    assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
    assert_eq!(stored.client_id, "client-id");
}

#[tokio::test]
async fn test_rejected_refresh_is_auth_failure() {
    let (server, _) = common::setup_box_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("auth.json");
    let manager = common::oauth_manager(&server, &secrets_path, Some("old"), Some("r1")).await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Refresh token has expired"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        BoxClient::with_base_url("unused", server.uri()).with_token_manager(Arc::new(manager));
    let err = client.current_user().await.expect_err("refresh rejected");

    assert!(imctransfer_box::is_authentication_failure(&err));
    match err.downcast_ref::<BoxError>() {
        Some(BoxError::Authentication(message)) => {
            assert!(message.contains("invalid_grant"), "{message}")
        }
        other => panic!("expected Authentication, got {other:?}"),
    }

    // tokens on disk untouched
    let stored = SecretsFile::new(&secrets_path).load().await.unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("old"));
}

#[tokio::test]
async fn test_second_unauthorized_does_not_refresh_again() {
    let (server, _) = common::setup_box_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let manager =
        common::oauth_manager(&server, &dir.path().join("auth.json"), Some("old"), Some("r1"))
            .await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_json("new", "r2")))
        .expect(1)
        .mount(&server)
        .await;

    let client =
        BoxClient::with_base_url("unused", server.uri()).with_token_manager(Arc::new(manager));
    let err = client.current_user().await.expect_err("still unauthorized");

    assert!(matches!(
        err.downcast_ref::<BoxError>(),
        Some(BoxError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_login_exchanges_pasted_code() {
    let (server, _) = common::setup_box_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let secrets_path = dir.path().join("auth.json");
    let manager = common::oauth_manager(&server, &secrets_path, None, None).await;
    assert!(manager.needs_login().await);

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=pasted-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::token_json("a1", "r1")))
        .expect(1)
        .mount(&server)
        .await;

    manager
        .login(&b"pasted-code\n"[..], false)
        .await
        .expect("login failed");

    assert!(!manager.needs_login().await);
    assert_eq!(manager.access_token().await.unwrap(), "a1");

    let stored = SecretsFile::new(&secrets_path).load().await.unwrap();
    assert_eq!(stored.access_token.as_deref(), Some("a1"));
    assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
    assert_eq!(stored.client_secret, "client-secret");
}

#[tokio::test]
async fn test_login_with_empty_input_fails() {
    let (server, _) = common::setup_box_mock().await;
    let dir = tempfile::tempdir().unwrap();
    let manager = common::oauth_manager(&server, &dir.path().join("auth.json"), None, None).await;

    let err = manager
        .login(&b"\n"[..], false)
        .await
        .expect_err("no code");

    assert!(imctransfer_box::is_authentication_failure(&err));
    assert!(manager.needs_login().await);
}
