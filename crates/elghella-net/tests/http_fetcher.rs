//! HttpFetcher against a local mock server

use std::time::Duration;

use bytes::Bytes;
use elghella_net::{Fetcher, FetcherConfig, HttpFetcher, NetError, Request};
use http::StatusCode;
use url::Url;
use wiremock::matchers::{body_string, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(timeout: Option<Duration>) -> HttpFetcher {
    HttpFetcher::new(FetcherConfig {
        timeout,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_get_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/assets/app.js"))
        .and(header_exists("accept-language"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/javascript")
                .set_body_string("console.log('ok')"),
        )
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/assets/app.js", server.uri())).unwrap();
    let response = fetcher(None).fetch(&Request::get(url)).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.ok());
    assert_eq!(
        response.content_type().unwrap().essence_str(),
        "application/javascript"
    );
    assert_eq!(response.text().unwrap(), "console.log('ok')");
    assert!(!response.from_cache);
}

#[tokio::test]
async fn test_non_success_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();
    let response = fetcher(None).fetch(&Request::get(url)).await.unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(!response.ok());
}

#[tokio::test]
async fn test_post_sends_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .and(body_string("{\"qty\":3}"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/api/orders", server.uri())).unwrap();
    let request = Request::post(url, Bytes::from_static(b"{\"qty\":3}"));
    let response = fetcher(None).fetch(&request).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_client_timeout_maps_to_timeout_error() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/slow", server.uri())).unwrap();
    let result = fetcher(Some(Duration::from_millis(50)))
        .fetch(&Request::get(url))
        .await;
    assert!(matches!(result, Err(NetError::Timeout(_))));
}

#[tokio::test]
async fn test_unreachable_host_is_an_error() {
    let url = Url::parse("http://127.0.0.1:9/unreachable").unwrap();
    let result = fetcher(Some(Duration::from_secs(2)))
        .fetch(&Request::get(url))
        .await;
    assert!(result.is_err());
}
