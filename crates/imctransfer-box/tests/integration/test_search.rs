//! Search listing through the remote directory adapter

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use imctransfer_box::client::BoxClient;
use imctransfer_box::BoxError;
use imctransfer_core::ports::{FileQuery, IRemoteDirectory};

use crate::common;

#[tokio::test]
async fn test_list_files_maps_entries_to_urls() {
    let (server, directory) = common::setup_directory_mock().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("query", "mcd"))
        .and(query_param("file_extensions", "mcd"))
        .and(query_param("type", "file"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "entries": [
                common::search_entry("101", "20230615_a.mcd"),
                { "type": "folder", "id": "5", "name": "mcd archive" },
                common::search_entry("102", "b.mcd")
            ],
            "limit": 200,
            "offset": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refs = directory
        .list_files(&FileQuery::new("mcd", "mcd"))
        .await
        .expect("list_files failed");

    let urls: Vec<_> = refs.iter().map(|r| r.url.clone()).collect();
    assert_eq!(
        urls,
        vec![
            format!("{}/files/101", server.uri()),
            format!("{}/files/102", server.uri()),
        ]
    );
    assert_eq!(refs[0].id.as_str(), "101");
}

#[tokio::test]
async fn test_search_follows_offset_pagination() {
    let server = wiremock::MockServer::start().await;
    let client = BoxClient::with_base_url("t", server.uri()).with_page_size(2);

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "entries": [common::search_entry("1", "a.mcd"), common::search_entry("2", "b.mcd")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "entries": [common::search_entry("3", "c.mcd")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client
        .search_files(&FileQuery::new("mcd", "mcd"))
        .await
        .expect("search failed");

    let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_search_stops_on_empty_page() {
    let (server, client) = common::setup_box_mock().await;

    // total_count overstates what the API will actually return
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 50,
            "entries": [common::search_entry("1", "a.mcd")]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("offset", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 50,
            "entries": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client
        .search_files(&FileQuery::new("mcd", "mcd"))
        .await
        .expect("search failed");
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_search_retries_after_throttling() {
    let (server, client) = common::setup_box_mock().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "entries": [common::search_entry("1", "a.mcd")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = client
        .search_files(&FileQuery::new("mcd", "mcd"))
        .await
        .expect("search should succeed after 429s");
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_search_gives_up_after_retry_budget() {
    let server = wiremock::MockServer::start().await;
    let client = BoxClient::with_base_url("t", server.uri()).with_max_retries(1);

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(2)
        .mount(&server)
        .await;

    let err = client
        .search_files(&FileQuery::new("mcd", "mcd"))
        .await
        .expect_err("throttling never ends");

    match err.downcast_ref::<BoxError>() {
        Some(BoxError::TooManyRequests { retry_after }) => {
            assert_eq!(*retry_after, Duration::ZERO)
        }
        other => panic!("expected TooManyRequests, got {other:?}"),
    }
}

#[tokio::test]
async fn test_search_server_error_is_classified() {
    let (server, directory) = common::setup_directory_mock().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "type": "error",
            "status": 503,
            "code": "unavailable",
            "message": "Box is down"
        })))
        .mount(&server)
        .await;

    let err = directory
        .list_files(&FileQuery::new("mcd", "mcd"))
        .await
        .expect_err("503 must fail the listing");

    match err.downcast_ref::<BoxError>() {
        Some(BoxError::ServerError(message)) => assert!(message.contains("Box is down")),
        other => panic!("expected ServerError, got {other:?}"),
    }
}
