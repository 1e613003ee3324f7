//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Query,
    http::{Request, StatusCode},
    routing::get as get_route,
    Json, Router,
};
use serde_json::{json, Value};
use stream_cache::{
    api::create_router,
    cache::SharedCache,
    clock::ManualClock,
    stream::{FixedDelay, StreamClient},
    upstream, AppState, Dispatcher, UpstreamClient,
};
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_state() -> (AppState, ManualClock) {
    let clock = ManualClock::default();
    let cache = SharedCache::with_clock(Duration::from_secs(300), Arc::new(clock.clone()));
    (AppState::new(cache, None), clock)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Serves `GET /orders` from a local REST backend, counting requests.
async fn spawn_orders_backend() -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let backend = Router::new()
        .route(
            "/orders",
            get_route(move |Query(query): Query<upstream::Query>| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Json(json!({"fetch": n, "side": query.get("side")})) }
            }),
        )
        .route("/broken", get_route(|| async { StatusCode::INTERNAL_SERVER_ERROR }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, backend).await.unwrap();
    });
    (format!("http://{addr}"), hits)
}

// == Invalidate Endpoint Tests ==

#[tokio::test]
async fn test_invalidate_endpoint_success() {
    let (state, _) = create_test_state();
    state
        .cache
        .set("quote:[\"AAPL\"]", json!({"price": 190.5}), None)
        .unwrap();
    let app: Router = create_router(state.clone());

    let response = app
        .oneshot(delete("/cache/quote:%5B%22AAPL%22%5D"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["key"], "quote:[\"AAPL\"]");
    assert!(!state.cache.contains("quote:[\"AAPL\"]"));
}

#[tokio::test]
async fn test_invalidate_endpoint_not_found() {
    let (state, _) = create_test_state();
    let app = create_router(state);

    let response = app.oneshot(delete("/cache/nonexistent")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("nonexistent"));
}

#[tokio::test]
async fn test_invalidate_expired_entry_is_not_found() {
    let (state, clock) = create_test_state();
    state
        .cache
        .set("orders:null", json!([]), Some(Duration::from_secs(5)))
        .unwrap();
    clock.advance(Duration::from_secs(5));

    let response = create_router(state)
        .oneshot(delete("/cache/orders:null"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// == Clear Endpoint Tests ==

#[tokio::test]
async fn test_clear_endpoint() {
    let (state, _) = create_test_state();
    state.cache.set_unbounded("a", json!(1));
    state.cache.set_unbounded("b", json!(2));
    let app = create_router(state.clone());

    let response = app.oneshot(delete("/cache")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["removed"], 2);
    assert!(state.cache.is_empty());
}

// == Stats Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let (state, clock) = create_test_state();
    state
        .cache
        .set("ticker:\"BTC\"", json!(1), Some(Duration::from_secs(1)))
        .unwrap();
    state.cache.get("ticker:\"BTC\"");
    state.cache.get("missing");
    clock.advance(Duration::from_secs(2));
    state.cache.get("ticker:\"BTC\"");

    let response = create_router(state).oneshot(get("/stats")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["cache"]["hits"], 1);
    assert_eq!(json["cache"]["misses"], 2);
    assert_eq!(json["cache"]["expirations"], 1);
    assert_eq!(json["cache"]["total_entries"], 0);
    assert!(json["stream"].is_null());
}

#[tokio::test]
async fn test_stats_endpoint_with_stream() {
    let (state, _) = create_test_state();
    let stream = StreamClient::builder("wss://stream.example.com/ws", Dispatcher::new())
        .policy(FixedDelay::new(Duration::from_secs(1)))
        .build();
    let state = AppState::new(state.cache, Some(stream));

    let response = create_router(state).oneshot(get("/stats")).await.unwrap();

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["stream"]["state"], "idle");
    assert_eq!(json["stream"]["endpoint_address"], "wss://stream.example.com/ws");
    assert_eq!(json["stream"]["retry_pending"], false);
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let (state, _) = create_test_state();

    let response = create_router(state).oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "healthy");
    assert!(json.get("timestamp").is_some());
}

#[tokio::test]
async fn test_wrong_method_rejected() {
    let (state, _) = create_test_state();
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cache")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// == Upstream Endpoint Tests ==

#[tokio::test]
async fn test_upstream_reads_are_memoized_until_order_update() {
    let (base_url, hits) = spawn_orders_backend().await;
    let (state, _) = create_test_state();
    let upstream = UpstreamClient::new(base_url, state.cache.clone());
    let dispatcher = Dispatcher::new();
    upstream.invalidate_on(&dispatcher, "order_update", "orders");
    let app = create_router(state.clone().with_upstream(upstream));

    let first = app.clone().oneshot(get("/upstream/orders")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_to_json(first.into_body()).await["fetch"], 1);

    let second = app.clone().oneshot(get("/upstream/orders")).await.unwrap();
    assert_eq!(body_to_json(second.into_body()).await["fetch"], 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let filtered = app
        .clone()
        .oneshot(get("/upstream/orders?side=buy"))
        .await
        .unwrap();
    let filtered = body_to_json(filtered.into_body()).await;
    assert_eq!(filtered["side"], "buy");
    assert_eq!(state.cache.len(), 2);

    dispatcher.publish("order_update", &json!({"id": "o1", "status": "filled"}));
    assert!(state.cache.is_empty());

    let third = app.oneshot(get("/upstream/orders")).await.unwrap();
    assert_eq!(body_to_json(third.into_body()).await["fetch"], 3);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway_and_not_cached() {
    let (base_url, _) = spawn_orders_backend().await;
    let (state, _) = create_test_state();
    let app = create_router(
        state
            .clone()
            .with_upstream(UpstreamClient::new(base_url, state.cache.clone())),
    );

    let response = app.oneshot(get("/upstream/broken")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["error"], "Upstream returned status 500");
    assert!(state.cache.is_empty());
}

#[tokio::test]
async fn test_upstream_not_configured() {
    let (state, _) = create_test_state();
    let app = create_router(state);

    let response = app.oneshot(get("/upstream/orders")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
