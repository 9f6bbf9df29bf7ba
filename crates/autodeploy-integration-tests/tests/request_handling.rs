//! Integration tests for request validation on the webhook endpoint

#![cfg(unix)]

mod common;

use autodeploy_api::{handle_webhook, WebhookHandlerError, WebhookResponse, INFO_MESSAGE};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
};
use bytes::Bytes;
use common::{body_text, push_payload, request_builder, signed_request, TestHarness, SECRET};
use tower::ServiceExt;

fn harness() -> TestHarness {
    TestHarness::new(&[("push", "exit 0", None)], 0).unwrap()
}

#[tokio::test]
async fn test_root_get_is_informational() {
    let harness = harness();

    let response = harness
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    assert_eq!(body, INFO_MESSAGE);
    assert!(!body.contains(SECRET));
}

#[tokio::test]
async fn test_missing_headers_are_named() {
    let harness = harness();

    let without_event = Request::builder()
        .method("POST")
        .uri("/")
        .header("x-github-delivery", "d-1")
        .body(Body::from(push_payload("refs/heads/main")))
        .unwrap();
    let response = harness.app.clone().oneshot(without_event).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("x-github-event"));

    let without_delivery = Request::builder()
        .method("POST")
        .uri("/")
        .header("x-github-event", "push")
        .body(Body::from(push_payload("refs/heads/main")))
        .unwrap();
    let response = harness.app.clone().oneshot(without_delivery).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("x-github-delivery"));

    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let harness = harness();

    let response = harness
        .app
        .clone()
        .oneshot(signed_request("push", "d-1", "{\"repository\":"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn test_unknown_repository_is_bad_request() {
    let harness = harness();
    let body = r#"{"ref":"refs/heads/main","repository":{"full_name":"someone/else"}}"#;

    let response = harness
        .app
        .clone()
        .oneshot(request_builder("push", "d-1").body(Body::from(body)).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("someone/else"));
}

#[tokio::test]
async fn test_tampered_body_is_forbidden() {
    let harness = harness();
    let signed = push_payload("refs/heads/main");
    let tampered = signed.replace("octocat", "mallory");
    let signature = autodeploy_core::compute_signature(signed.as_bytes(), SECRET).unwrap();

    let request = request_builder("push", "d-1")
        .header("x-hub-signature-256", signature)
        .body(Body::from(tampered))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(harness.queue.is_empty());
}

/// Calls the handler directly, without the HTTP layer.
#[tokio::test]
async fn test_handler_returns_typed_outcomes() {
    let deploy_config = std::sync::Arc::new(
        autodeploy_core::DeployConfig::from_json_str(r#"{"repos":{}}"#).unwrap(),
    );
    let (queue, _receiver) = autodeploy_core::TaskQueue::new(None);
    let state = autodeploy_api::AppState::new(Default::default(), deploy_config, queue);

    let mut headers = HeaderMap::new();
    headers.insert("x-github-event", HeaderValue::from_static("push"));
    headers.insert("x-github-delivery", HeaderValue::from_static("d-1"));
    let body = Bytes::from(push_payload("refs/heads/main"));

    let result = handle_webhook(State(state), headers, body).await;

    match result {
        Err(WebhookHandlerError::Route(e)) => assert!(!e.is_informational()),
        other => panic!("Expected routing error, got {:?}", other.map(|r| r.to_string())),
    }
}

#[tokio::test]
async fn test_handler_accepts_signed_delivery() {
    let harness = harness();
    let body = push_payload("refs/heads/main");

    let response = harness
        .app
        .clone()
        .oneshot(signed_request("push", "d-9", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let expected = WebhookResponse::Accepted {
        delivery_id: "d-9".parse().unwrap(),
        repository: common::REPO.to_string(),
    };
    assert_eq!(body_text(response).await, expected.to_string());
}
