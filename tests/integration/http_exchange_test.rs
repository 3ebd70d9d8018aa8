//! Integration tests for the HTTP exchange endpoints

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use async_trait::async_trait;
use axum::Router;
use fingerprint_auth::exchange::{ErrorResponse, TokenResponse};
use fingerprint_auth::issuer::{Credential, IssuerError};
use fingerprint_auth::mapping::{AccountIdentity, InMemoryMappingStore, MappingStore, StoreError};
use fingerprint_auth::web::create_router;
use fingerprint_auth::{AppState, TokenIssuer};
use pretty_assertions::assert_eq;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tower::ServiceExt;

#[path = "../common/mod.rs"]
mod common;

fn app() -> Router {
    create_router(common::test_app_state(&[("dev-abc", "uid-789")]))
}

struct RejectingIssuer;

#[async_trait]
impl TokenIssuer for RejectingIssuer {
    async fn create_custom_token(&self, _account: &AccountIdentity) -> Result<Credential, IssuerError> {
        Err(IssuerError::InvalidKey("provider rejected the service account".to_string()))
    }
}

struct OfflineStore;

#[async_trait]
impl MappingStore for OfflineStore {
    async fn lookup(&self, _identifier: &str) -> Result<Option<AccountIdentity>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_identifier_is_400() {
    let response = app().oneshot(post_json("/exchange", "{}")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = read_json(response).await;
    assert_eq!(body.error, "Missing identifier");
}

#[tokio::test]
async fn test_unreadable_body_is_400() {
    let request = Request::builder()
        .method("POST")
        .uri("/exchange")
        .body(Body::from("identifier=dev-abc"))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_identifier_is_404() {
    let response = app()
        .oneshot(post_json("/exchange", r#"{"identifier":"unknown-123"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ErrorResponse = read_json(response).await;
    assert_eq!(body.error, "No user for identifier");
}

#[tokio::test]
async fn test_mapped_identifier_is_200() {
    let response = app()
        .oneshot(post_json("/exchange", r#"{"identifier":"dev-abc"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let body: TokenResponse = read_json(response).await;
    assert!(!body.token.is_empty());
}

#[tokio::test]
async fn test_legacy_route_and_field() {
    let response = app()
        .oneshot(post_json("/getCustomToken", r#"{"fingerprintId":"dev-abc"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: TokenResponse = read_json(response).await;
    assert!(!body.token.is_empty());
}

#[tokio::test]
async fn test_reachability_probe() {
    let request = Request::builder()
        .uri("/test")
        .body(Body::empty())
        .unwrap();

    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Backend is reachable!");
}

#[tokio::test]
async fn test_rate_limit_applies_per_client() {
    let mut config = common::test_config();
    config.rate_limit.max_requests = 2;
    let state = fingerprint_auth::AppState::with_parts(
        config.clone(),
        std::sync::Arc::new(fingerprint_auth::mapping::InMemoryMappingStore::new()),
        std::sync::Arc::new(fingerprint_auth::CustomTokenIssuer::new(&config.provider).unwrap()),
    );
    let app = create_router(state);

    let request = |ip: &str| {
        Request::builder()
            .method("POST")
            .uri("/exchange")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(r#"{"identifier":"unknown-123"}"#))
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(request("203.0.113.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    let limited = app.clone().oneshot(request("203.0.113.7")).await.unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(limited.headers().contains_key("retry-after"));

    let other = app.oneshot(request("198.51.100.1")).await.unwrap();
    assert_eq!(other.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_issuance_failure_is_500_with_provider_message() {
    let config = common::test_config();
    let state = AppState::with_parts(
        config,
        Arc::new(InMemoryMappingStore::with_mappings([("dev-abc", "uid-789")])),
        Arc::new(RejectingIssuer),
    );

    let response = create_router(state)
        .oneshot(post_json("/exchange", r#"{"identifier":"dev-abc"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorResponse = read_json(response).await;
    assert_eq!(
        body.error,
        IssuerError::InvalidKey("provider rejected the service account".to_string()).to_string()
    );
}

#[tokio::test]
async fn test_store_failure_is_500_with_store_message() {
    let config = common::test_config();
    let issuer = fingerprint_auth::CustomTokenIssuer::new(&config.provider).unwrap();
    let state = AppState::with_parts(config, Arc::new(OfflineStore), Arc::new(issuer));

    let response = create_router(state)
        .oneshot(post_json("/exchange", r#"{"identifier":"dev-abc"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: ErrorResponse = read_json(response).await;
    assert_eq!(
        body.error,
        StoreError::Unavailable("connection refused".to_string()).to_string()
    );
}
