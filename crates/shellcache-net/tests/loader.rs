//! Integration tests for ResourceLoader.
//!
//! Uses wiremock for HTTP mocking.

use std::time::Duration;

use shellcache_net::{
    CacheMode, Fetch, LoaderConfig, NetError, RedirectMode, Request, ResourceLoader,
    ResponseSource, Url,
};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn loader() -> ResourceLoader {
    ResourceLoader::new(LoaderConfig::default()).expect("failed to build loader")
}

fn url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
}

#[tokio::test]
async fn test_fetch_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/app/index.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html></html>", "text/html")
        )
        .mount(&server)
        .await;

    let response = loader()
        .fetch(Request::get(url(&server, "/app/index.html")))
        .await
        .expect("fetch failed");

    assert!(response.ok());
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.text().unwrap(), "<html></html>");
    assert_eq!(response.content_type().unwrap().subtype(), mime::HTML);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = loader()
        .fetch(Request::get(url(&server, "/missing.png")))
        .await
        .expect("404 should not be a transport error");

    assert_eq!(response.status, 404);
    assert!(!response.ok());
}

#[tokio::test]
async fn test_query_and_cache_headers_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data.json"))
        .and(query_param("v", "7"))
        .and(header("cache-control", "no-cache"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let request = Request::get(url(&server, "/data.json?v=7")).cache(CacheMode::Reload);
    let response = loader().fetch(request).await.expect("fetch failed");

    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_post_body_forwarded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/submit"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::post(url(&server, "/api/submit"), "a=1".into());
    let response = loader().fetch(request).await.expect("fetch failed");

    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_redirect_error_mode_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&server)
        .await;

    let mut request = Request::get(url(&server, "/old"));
    request.redirect = RedirectMode::Error;

    let result = loader().fetch(request).await;
    assert!(matches!(result, Err(NetError::RequestFailed(_))));
}

#[tokio::test]
async fn test_timeout_maps_to_timeout_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let loader = ResourceLoader::new(LoaderConfig {
        timeout: Duration::from_millis(100),
        ..Default::default()
    })
    .unwrap();

    let result = loader.fetch(Request::get(url(&server, "/slow"))).await;
    assert!(matches!(result, Err(NetError::Timeout(_))));
}

#[tokio::test]
async fn test_unreachable_host_is_error() {
    // Port 9 (discard) on localhost is not listening in test environments.
    let request = Request::parse("http://127.0.0.1:9/").unwrap();
    assert!(loader().fetch(request).await.is_err());
}
