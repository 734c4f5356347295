//! Integration Tests for the Admin API
//!
//! Tests the full request/response cycle of each admin endpoint.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use memcache_layer::{
    api::create_router, AppState, CacheCall, CacheSettings, CacheStore, MemoryBackend,
    StoreOptions,
};
use serde_json::Value;
use tower::ServiceExt;

// == Helper Functions ==

fn create_state(settings: CacheSettings) -> AppState {
    let backend = MemoryBackend::new(100);
    let cache = CacheStore::new(settings, Arc::new(backend.clone()));
    AppState::new(cache, backend)
}

fn create_test_app() -> (Router, AppState) {
    let state = create_state(CacheSettings::default());
    (create_router(state.clone()), state)
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = create_test_app();

    let response = app.oneshot(request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["caching_enabled"], true);
    assert!(json.get("timestamp").is_some());
}

#[tokio::test]
async fn test_health_reports_disabled_caching() {
    let app = create_router(create_state(CacheSettings {
        enabled: false,
        ..CacheSettings::default()
    }));

    let response = app.oneshot(request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["caching_enabled"], false);
}

// == Stats Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint_counts_engine_traffic() {
    let (app, state) = create_test_app();
    let call = CacheCall::method("NS", "Svc", "Get", &["id=7"]);
    state
        .cache
        .store(&call, "hello", &StoreOptions::default())
        .await;
    state.cache.get(&call).await;

    let response = app.oneshot(request("GET", "/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["curr_items"], 1);
    assert_eq!(json["get_hits"], 1);
    assert!(json.get("hit_rate").is_some());
}

#[tokio::test]
async fn test_stats_endpoint_backend_offline() {
    let (app, state) = create_test_app();
    state.backend.set_offline(true);

    let response = app.oneshot(request("GET", "/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("Backend unavailable"));
}

#[tokio::test]
async fn test_stats_endpoint_disabled() {
    let app = create_router(create_state(CacheSettings {
        enabled: false,
        ..CacheSettings::default()
    }));

    let response = app.oneshot(request("GET", "/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// == Repository Flush Endpoint Tests ==

#[tokio::test]
async fn test_flush_repository_endpoint() {
    let (app, state) = create_test_app();
    let first = CacheCall::method("NS", "Orders", "Get", &1);
    let second = CacheCall::method("NS", "Orders", "Get", &2);
    let options = StoreOptions::default().in_repository("orders");
    assert!(state.cache.store(&first, "one", &options).await);
    assert!(state.cache.store(&second, "two", &options).await);

    let response = app
        .oneshot(request("DELETE", "/repository/Orders"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["repository"], "ORDERS");
    assert_eq!(json["flushed"], true);

    assert!(!state.cache.get(&first).await.has_data);
    assert!(!state.cache.get(&second).await.has_data);
}

#[tokio::test]
async fn test_flush_unknown_repository_succeeds() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(request("DELETE", "/repository/nothing-here"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_flush_repository_backend_offline_conflicts() {
    let (app, state) = create_test_app();
    state.backend.set_offline(true);

    let response = app
        .oneshot(request("DELETE", "/repository/orders"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

// == Flush All Endpoint Tests ==

#[tokio::test]
async fn test_flush_all_endpoint() {
    let (app, state) = create_test_app();
    let call = CacheCall::procedure("NS", "pr_read", &["a", "b"]);
    state
        .cache
        .store(&call, "value", &StoreOptions::default())
        .await;

    let response = app.oneshot(request("DELETE", "/flush")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["flushed"], true);
    assert!(state.backend.is_empty().await);
}

#[tokio::test]
async fn test_flush_all_disabled() {
    let app = create_router(create_state(CacheSettings {
        enabled: false,
        ..CacheSettings::default()
    }));

    let response = app.oneshot(request("DELETE", "/flush")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// == Routing Tests ==

#[tokio::test]
async fn test_wrong_method_rejected() {
    let (app, _) = create_test_app();

    let response = app.oneshot(request("GET", "/flush")).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
