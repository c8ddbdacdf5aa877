//! # Tests for Handlers
//!
//! Router-level tests driven through `tower::ServiceExt::oneshot` against an
//! in-memory SQLite store.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use sea_orm::Database;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::config::{AppConfig, SnapshotStrategy};
use crate::db;
use crate::monitor::records::Snapshot;
use crate::monitor::{CorrelationTracker, Monitor, TrackerSettings, spawn_dispatcher};
use crate::replay::ReplayService;
use crate::server::{AppState, create_app, create_root_app};
use crate::store::{DirectStore, MonitorStore};

async fn test_app(strategy: SnapshotStrategy) -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db::migrate(&db).await.unwrap();
    let store: Arc<dyn MonitorStore> = Arc::new(DirectStore::with_connection(db, strategy));

    let mut config = AppConfig::default();
    config.monitor.snapshot_strategy = strategy;

    let tracker = CorrelationTracker::new(TrackerSettings::from(&config.monitor));
    let monitor = Arc::new(Monitor::new(tracker, store.clone()));
    let (handle, _workers) = spawn_dispatcher(monitor, 2, 16, CancellationToken::new());
    let replay = Arc::new(ReplayService::from_config(&config.admin).unwrap());

    create_app(AppState {
        config: Arc::new(config),
        store,
        monitor: handle,
        replay,
    })
}

fn delivery(msg: Value, source: (&str, &str), dest: (&str, &str), wire_count: usize) -> Value {
    json!({
        "source": { "node": { "id": source.0, "type": source.1 }, "port": 0 },
        "destination": { "node": { "id": dest.0, "type": dest.1 }, "wire_count": wire_count },
        "msg": msg
    })
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn run_linear_flow(app: &Router) {
    let first = delivery(
        json!({ "_msgid": "m1", "topic": "orders", "sender": "shop", "payload": { "sku": "A-1" } }),
        ("A", "http in"),
        ("B", "function"),
        1,
    );
    let (status, body) = call(app, post_json("/monitor/deliveries", &first)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["_msgid"], "m1");

    let last = delivery(
        json!({ "_msgid": "m1", "topic": "orders", "receiver": "billing", "log": "enriched", "payload": { "sku": "A-1" } }),
        ("B", "function"),
        ("C", "http response"),
        0,
    );
    let (status, body) = call(app, post_json("/monitor/deliveries", &last)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["log"], Value::Null);
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let app = test_app(SnapshotStrategy::Collection).await;
    let (status, body) = call(&app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "flow-monitor");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_root_app_without_monitor_routes() {
    let app = create_root_app();
    let (status, _) = call(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);

    let response = app.oneshot(get("/monitor/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_monitor_root_reports_connection() {
    let app = test_app(SnapshotStrategy::Collection).await;

    let (status, body) = call(&app, get("/monitor")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connection"]["connected"], true);
    assert!(body["connection"]["connectedSince"].is_i64());

    let (status, body) = call(&app, get("/monitor/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);
}

#[tokio::test]
async fn test_deliveries_build_a_searchable_transaction() {
    let app = test_app(SnapshotStrategy::Collection).await;
    run_linear_flow(&app).await;

    let (status, tx) = call(&app, get("/monitor/transactions/m1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tx["sender"], "shop");
    assert_eq!(tx["receivers"], json!(["billing"]));
    assert!(tx["end"].is_i64());
    let mut step_ids: Vec<&str> = tx["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    step_ids.sort();
    assert_eq!(step_ids, vec!["A-0", "B-0"]);
    assert_eq!(tx["logs"][0]["text"], "enriched");
    assert_eq!(tx["snapshots"].as_array().unwrap().len(), 2);

    let (status, page) = call(&app, get("/monitor/transactions?q=ENRICHED")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page.as_array().unwrap().len(), 1);
    assert!(page[0].get("snapshots").is_none());

    let (_, page) = call(&app, get("/monitor/transactions?q=A-1")).await;
    assert!(page.as_array().unwrap().is_empty());

    let (_, page) = call(&app, get("/monitor/transactions?q=A-1&a=true")).await;
    assert_eq!(page.as_array().unwrap().len(), 1);

    let (status, snapshots) = call(&app, get("/monitor/transactions/m1/snapshots")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshots.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_transaction_is_not_found() {
    let app = test_app(SnapshotStrategy::Collection).await;
    let (status, body) = call(&app, get("/monitor/transactions/missing")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(body["trace_id"].is_string());
}

#[tokio::test]
async fn test_invalid_search_pattern_is_internal_error() {
    let app = test_app(SnapshotStrategy::Collection).await;
    let (status, body) = call(&app, get("/monitor/transactions?q=%28unclosed")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["msg"].as_str().unwrap().contains("invalid search pattern"));
}

#[tokio::test]
async fn test_replay_rejects_missing_fields_before_calling_admin_api() {
    let app = test_app(SnapshotStrategy::Collection).await;
    let (status, body) = call(
        &app,
        post_json("/monitor/replay/", &json!({ "last_node": "B", "input_type": "json" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["msg"],
        "Payload is missing one or more mandatory fields: first_node,payload"
    );
}

#[tokio::test]
async fn test_intake_routes_accept_forwarded_records() {
    let app = test_app(SnapshotStrategy::Collection).await;

    let transaction = json!({
        "id": "m9", "start": 100, "end": 200, "sender": "Unknown", "receivers": []
    });
    let (status, _) = call(&app, post_json("/monitor/transactions", &transaction)).await;
    assert_eq!(status, StatusCode::CREATED);

    let logs = json!([{
        "level": "info", "node": "worker", "text": "forwarded", "transaction": "m9", "createdAt": 150
    }]);
    let (status, _) = call(&app, post_json("/monitor/logs", &logs)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = call(&app, post_json("/monitor/steps", &json!({ "id": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, tx) = call(&app, get("/monitor/transactions/m9")).await;
    assert_eq!(tx["logs"][0]["text"], "forwarded");
}

#[tokio::test]
async fn test_bucket_snapshot_is_streamed_as_json() {
    let app = test_app(SnapshotStrategy::Bucket).await;
    run_linear_flow(&app).await;

    let response = app.clone().oneshot(get("/monitor/snapshots/m1-A-0")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let snapshot: Snapshot = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot.transaction, "m1");
    assert_eq!(snapshot.msg["payload"]["sku"], "A-1");

    // Snapshot contents are not searchable in blob storage.
    let (_, page) = call(&app, get("/monitor/transactions?q=A-1&a=true")).await;
    assert!(page.as_array().unwrap().is_empty());

    let (status, _) = call(&app, get("/monitor/snapshots/m1-Z-0")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
