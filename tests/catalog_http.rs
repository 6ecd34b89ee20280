//! Catalog client against a mock Kaggle API.
//!
//! The client is blocking, so every call runs on a blocking thread of the
//! test runtime.

use std::io::Read;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{basic_auth, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kaggle_datasets::catalog::{CatalogClient, KaggleHttpClient};
use kaggle_datasets::domain::{CatalogEntry, Credential, FileEntry, ListQuery, SortBy};
use kaggle_datasets::error::KaggleError;

fn credential() -> Credential {
    Credential::new("alice", "abc123")
}

fn entry() -> CatalogEntry {
    CatalogEntry::from_ref("ownerA/ds1".parse().unwrap())
}

fn api_url(server: &MockServer) -> String {
    format!("{}/api/v1", server.uri())
}

async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn probe_accepts_valid_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hello"))
        .and(basic_auth("alice", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 200})))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let accepted = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        client.probe(&credential())
    })
    .await;
    assert!(accepted);
}

#[tokio::test(flavor = "multi_thread")]
async fn probe_rejects_unauthorized_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/hello"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let accepted = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        client.probe(&credential())
    })
    .await;
    assert!(!accepted);
}

#[tokio::test(flavor = "multi_thread")]
async fn probe_is_false_when_unreachable() {
    let accepted = blocking(|| {
        let client = KaggleHttpClient::with_base_url("http://127.0.0.1:1/api/v1").unwrap();
        client.probe(&credential())
    })
    .await;
    assert!(!accepted);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_sends_only_set_filters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"ref": "ownerA/ds1", "title": "Dataset One", "totalBytes": 10},
            {"ref": "ownerB/ds2", "title": "Dataset Two"}
        ])))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let entries = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        let query = ListQuery {
            sort_by: Some(SortBy::Votes),
            ..ListQuery::page(0).with_search("titanic")
        };
        client.list_datasets(&credential(), &query)
    })
    .await;

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].title, "Dataset One");
    assert_eq!(entries[1].reference.to_string(), "ownerB/ds2");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].url.query(),
        Some("search=titanic&page=1&sortBy=votes")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn list_without_filters_has_no_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let entries = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        client.list_datasets(&credential(), &ListQuery::default())
    })
    .await;

    assert!(entries.is_empty());
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn list_failure_degrades_to_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/list"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let entries = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        client.list_datasets(&credential(), &ListQuery::page(2))
    })
    .await;
    assert!(entries.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn file_listing_maps_manifest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/list/ownerA/ds1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "datasetFiles": [
                {"ref": "a.csv", "fileType": ".csv", "totalBytes": 5},
                {"ref": "sub/b.csv", "fileType": ".csv", "totalBytes": 7}
            ],
            "errorMessage": null
        })))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let files = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        client.list_dataset_files(&credential(), &entry())
    })
    .await;

    assert_eq!(
        files,
        vec![
            FileEntry {
                reference: "a.csv".to_string(),
                kind: ".csv".to_string(),
                size_bytes: 5,
            },
            FileEntry {
                reference: "sub/b.csv".to_string(),
                kind: ".csv".to_string(),
                size_bytes: 7,
            },
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn file_listing_failure_degrades_to_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/list/ownerA/ds1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let files = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        client.list_dataset_files(&credential(), &entry())
    })
    .await;
    assert!(files.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn download_follows_signed_location_without_credentials() {
    let server = MockServer::start().await;
    let location = format!("{}/storage/a.csv?sig=xyz", server.uri());
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/download-raw/ownerA/ds1/a.csv"))
        .and(query_param("noRedirect", "true"))
        .and(basic_auth("alice", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(location)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/a.csv"))
        .and(query_param("sig", "xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"id,value\n1,2\n".to_vec()))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let body = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        let file = FileEntry {
            reference: "a.csv".to_string(),
            kind: ".csv".to_string(),
            size_bytes: 13,
        };
        let mut stream = client
            .download_dataset_file(&credential(), &entry(), &file)
            .unwrap();
        let mut body = Vec::new();
        stream.read_to_end(&mut body).unwrap();
        body
    })
    .await;
    assert_eq!(body, b"id,value\n1,2\n");

    let requests = server.received_requests().await.unwrap();
    let transfer = requests
        .iter()
        .find(|request| request.url.path() == "/storage/a.csv")
        .unwrap();
    assert!(!transfer.headers.contains_key("authorization"));
}

#[tokio::test(flavor = "multi_thread")]
async fn archive_files_use_packaged_endpoint() {
    let server = MockServer::start().await;
    let location = format!("{}/storage/all.zip", server.uri());
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/download/ownerA/ds1/all.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(location)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/all.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x50, 0x4b, 0x03, 0x04]))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let body = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        let file = FileEntry {
            reference: "all.zip".to_string(),
            kind: ".zip".to_string(),
            size_bytes: 4,
        };
        let mut body = Vec::new();
        client
            .download_dataset_file(&credential(), &entry(), &file)
            .unwrap()
            .read_to_end(&mut body)
            .unwrap();
        body
    })
    .await;
    assert_eq!(body, vec![0x50, 0x4b, 0x03, 0x04]);
}

#[tokio::test(flavor = "multi_thread")]
async fn download_rejection_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/download-raw/ownerA/ds1/a.csv"))
        .respond_with(ResponseTemplate::new(403).set_body_string("accept the rules first"))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let result = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        let file = FileEntry {
            reference: "a.csv".to_string(),
            kind: ".csv".to_string(),
            size_bytes: 1,
        };
        client
            .download_dataset_file(&credential(), &entry(), &file)
            .map(|_| ())
    })
    .await;
    assert_matches!(result, Err(KaggleError::CatalogStatus { status: 403, .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn download_location_must_be_a_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/download/ownerA/ds1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("not a url")))
        .mount(&server)
        .await;

    let url = api_url(&server);
    let result = blocking(move || {
        let client = KaggleHttpClient::with_base_url(&url).unwrap();
        client.download_dataset(&credential(), &entry()).map(|_| ())
    })
    .await;
    assert_matches!(result, Err(KaggleError::InvalidRedirect(_)));
}
