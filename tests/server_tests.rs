//! HTTP API tests driven through the router without a listening socket.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use prometheus::Registry;
use serde_json::{json, Value};
use tower::ServiceExt;

use paged_entity_cache::backend::{Capabilities, InMemoryBackend};
use paged_entity_cache::config::StoreConfig;
use paged_entity_cache::metrics::CacheMetrics;
use paged_entity_cache::models::{sample_users, User};
use paged_entity_cache::server::api::{build_router, AppState};
use paged_entity_cache::store::EntityStore;

fn app_with(capabilities: Capabilities) -> Router {
    let config = User::store_config(
        StoreConfig::default()
            .with_block_size(10)
            .with_max_cacheable_total(100),
    );
    let backend = Arc::new(
        InMemoryBackend::new("users", 1, &config)
            .with_items(sample_users(42))
            .with_capabilities(capabilities),
    );
    let registry = Registry::new();
    let metrics = Arc::new(CacheMetrics::register(&registry).unwrap());
    let users = EntityStore::new("users", backend, config)
        .unwrap()
        .with_metrics(metrics);

    build_router(Arc::new(AppState {
        users,
        registry,
        start_time: Instant::now(),
    }))
}

fn app() -> Router {
    app_with(Capabilities::full())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn item_ids(view: &Value) -> Vec<i64> {
    view["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["id"].as_i64().unwrap())
        .collect()
}

fn new_user(id: i64) -> Value {
    json!({
        "id": id,
        "email": format!("new{id}@example.com"),
        "display_name": "New User",
        "roles": ["basic"],
    })
}

#[tokio::test]
async fn test_list_users_page() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/v1/users?page=2&page_size=5", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(item_ids(&body), vec![6, 7, 8, 9, 10]);
    assert_eq!(body["total"], 42);
    assert_eq!(body["pageSize"], 5);
    assert_eq!(body["totalPages"], 9);
    assert_eq!(body["hasNext"], true);
    assert_eq!(body["hasPrev"], true);
}

#[tokio::test]
async fn test_list_users_filter_and_sort() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::GET,
        "/v1/users?roles=admin&sort=id&order=desc&page_size=50",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 10);
    assert_eq!(item_ids(&body), vec![39, 35, 31, 27, 23, 19, 15, 11, 7, 3]);
}

#[tokio::test]
async fn test_list_users_rejects_bad_params() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/v1/users?page=first", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(&app, Method::GET, "/v1/users?sort=id&order=up", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_users_extreme_page_is_empty() {
    let app = app();
    let max = usize::MAX;
    let (status, body) = send(&app, Method::GET, &format!("/v1/users?page={max}&page_size={max}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(item_ids(&body).is_empty());
    assert_eq!(body["total"], 42);
    assert_eq!(body["hasNext"], false);

    let (status, body) = send(&app, Method::GET, &format!("/v1/users?page=2&page_size={max}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(item_ids(&body).is_empty());
}

#[tokio::test]
async fn test_create_user_then_list_last_page() {
    let app = app();
    send(&app, Method::GET, "/v1/users?page=1&page_size=10", None).await;

    let (status, body) = send(&app, Method::POST, "/v1/users", Some(new_user(100))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["kind"], "create");
    assert_eq!(body["count"], 1);
    assert_eq!(body["created"][0]["status"], "active");
    assert_eq!(body["view"]["total"], 43);

    let (_, body) = send(&app, Method::GET, "/v1/users?page=5&page_size=10", None).await;
    assert_eq!(item_ids(&body), vec![41, 42, 100]);
}

#[tokio::test]
async fn test_create_duplicate_is_conflict() {
    let app = app();
    let (status, body) = send(&app, Method::POST, "/v1/users", Some(json!([new_user(7)]))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_KEY");
}

#[tokio::test]
async fn test_update_user_returns_active_page() {
    let app = app();
    send(&app, Method::GET, "/v1/users?page=1&page_size=10", None).await;

    let mut renamed = new_user(4);
    renamed["display_name"] = json!("Renamed");
    let (status, body) = send(&app, Method::PUT, "/v1/users", Some(renamed)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "update");
    assert_eq!(body["metadata"]["count"], 1);
    assert_eq!(body["view"]["items"][3]["display_name"], "Renamed");
}

#[tokio::test]
async fn test_delete_users() {
    let app = app();
    send(&app, Method::GET, "/v1/users?page=1&page_size=10", None).await;

    let (status, body) = send(&app, Method::DELETE, "/v1/users/5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["view"]["total"], 41);
    assert!(!item_ids(&body["view"]).contains(&5));

    let (status, body) = send(&app, Method::DELETE, "/v1/users", Some(json!({ "ids": [1, 2] }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert_eq!(body["view"]["total"], 39);

    let (status, body) = send(&app, Method::DELETE, "/v1/users/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, Method::DELETE, "/v1/users", Some(json!({ "ids": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_only_backend_rejects_mutations() {
    let app = app_with(Capabilities::read_only());
    let (status, body) = send(&app, Method::POST, "/v1/users", Some(new_user(100))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"]["code"], "OPERATION_NOT_SUPPORTED");

    let (status, _) = send(&app, Method::GET, "/v1/users", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cache_stats_and_invalidate() {
    let app = app();
    send(&app, Method::GET, "/v1/users?page=1&page_size=20", None).await;

    let (status, stats) = send(&app, Method::GET, "/v1/cache/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["store"], "users");
    assert_eq!(stats["mode"], "fully_cached");
    assert_eq!(stats["collection_total"], 42);
    assert_eq!(stats["cache"]["resident_blocks"], 2);

    let (status, body) = send(&app, Method::POST, "/v1/cache/invalidate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared_blocks"], 2);

    let (_, stats) = send(&app, Method::GET, "/v1/cache/stats", None).await;
    assert_eq!(stats["cache"]["resident_blocks"], 0);
    assert_eq!(stats["fingerprint"], Value::Null);
}

#[tokio::test]
async fn test_metrics_and_health() {
    let app = app();
    send(&app, Method::GET, "/v1/users", None).await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("entity_cache_fetches_total"));
    assert!(text.contains("entity_cache_resident_blocks"));

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"]["mode"], "fully_cached");
}
