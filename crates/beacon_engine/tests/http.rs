use std::time::Duration;

use beacon_core::{Method, RequestConfig};
use beacon_engine::{FailureKind, HttpClient, HttpSettings, ReqwestClient};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ReqwestClient {
    ReqwestClient::new(HttpSettings::default().with_base_url(server.uri())).expect("client")
}

#[tokio::test]
async fn client_returns_json_body_for_relative_locator() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "a"}])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client
        .request("/posts", &RequestConfig::new(), CancellationToken::new())
        .await
        .expect("request ok");

    assert_eq!(response.status, 200);
    assert_eq!(response.final_url, format!("{}/posts", server.uri()));
    assert!(response
        .content_type
        .as_deref()
        .unwrap()
        .starts_with("application/json"));
    let body: Value = response.json().unwrap();
    assert_eq!(body, json!([{"id": 1, "title": "a"}]));
}

#[tokio::test]
async fn client_passes_method_query_headers_and_body_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(query_param("q", "rust"))
        .and(header("x-trace", "abc"))
        .and(body_string("{\"limit\":3}"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let config = RequestConfig::new()
        .with_method(Method::Post)
        .with_query("q", "rust")
        .with_header("x-trace", "abc")
        .with_header("Content-Type", "application/json")
        .with_body("{\"limit\":3}");

    let response = client
        .request("/search", &config, CancellationToken::new())
        .await
        .expect("request ok");
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn client_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/posts/999"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .request("/posts/999", &RequestConfig::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert_eq!(err.status(), Some(404));
    assert!(!err.is_cancelled());
}

#[tokio::test]
async fn client_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_string("slow"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let config = RequestConfig::new().with_timeout(Duration::from_millis(50));
    let err = client
        .request("/slow", &config, CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn client_rejects_too_large_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/large"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/json")
                .set_body_string("01234567890"),
        )
        .mount(&server)
        .await;

    let settings = HttpSettings {
        max_bytes: 10,
        ..HttpSettings::default().with_base_url(server.uri())
    };
    let client = ReqwestClient::new(settings).unwrap();
    let err = client
        .request("/large", &RequestConfig::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err.kind,
        FailureKind::TooLarge {
            max_bytes: 10,
            actual: Some(11)
        }
    );
}

#[tokio::test]
async fn cancelled_token_aborts_pending_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(5))
                .set_body_json(json!([])),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = client
        .request("/slow", &RequestConfig::new(), token)
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Cancelled);
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn relative_locator_without_base_is_invalid() {
    let client = ReqwestClient::new(HttpSettings::default()).unwrap();
    let err = client
        .request("/posts", &RequestConfig::new(), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::InvalidLocator);
}

#[tokio::test]
async fn undecodable_body_is_a_decode_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/text"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client
        .request("/text", &RequestConfig::new(), CancellationToken::new())
        .await
        .unwrap();
    let err = response.json::<Value>().unwrap_err();

    assert_eq!(err.kind, FailureKind::Decode);
}
