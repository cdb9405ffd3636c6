//! Fake backend API served by axum on a free local port

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::config::BackendConfig;
use anyhow::Result;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

/// A request as seen by the fake API
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub accept: Option<String>,
}

/// Scriptable backend state
#[derive(Default)]
pub struct FakeApi {
    pub datasets: Mutex<Vec<Value>>,
    pub reboot_marker: Mutex<Option<String>>,
    pub fail_devices: AtomicBool,
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub refreshed_tokens: Mutex<Vec<String>>,
    pub maps: Mutex<Vec<Value>>,
    pub pings: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_datasets(&self, datasets: Vec<Value>) {
        *self.datasets.lock() = datasets;
    }

    pub fn set_reboot_marker(&self, marker: Option<&str>) {
        *self.reboot_marker.lock() = marker.map(str::to_string);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

/// Dataset record in the backend's wire format
pub fn dataset(id: &str, endpoint: &str, observe_through: Option<String>) -> Value {
    json!({
        "id": id,
        "name": format!("dataset {}", id),
        "model_updates_topic": format!("realtime/updates/{}", id),
        "model_updates_endpoint": endpoint,
        "observe_through": observe_through,
    })
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn record(State(api): State<Arc<FakeApi>>, req: Request, next: Next) -> Response {
    api.requests.lock().push(RecordedRequest {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
        authorization: header(req.headers(), "authorization"),
        accept: header(req.headers(), "accept"),
    });
    next.run(req).await
}

async fn get_device(
    State(api): State<Arc<FakeApi>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    if api.fail_devices.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    if query.get("with_realtime_datasets").map(String::as_str) != Some("true") {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(json!({
        "id": id,
        "name": "bench rig",
        "realtime_datasets": api.datasets.lock().clone(),
    })))
}

async fn refresh_token(State(api): State<Arc<FakeApi>>, Json(body): Json<Value>) -> Json<Value> {
    let token = body["token"].as_str().unwrap_or_default().to_string();
    api.refreshed_tokens.lock().push(token.clone());
    Json(json!({ "token": format!("{}-next", token) }))
}

async fn ping(State(api): State<Arc<FakeApi>>, Path(id): Path<String>) -> Json<Value> {
    api.pings.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "id": id,
        "reboot_request": api.reboot_marker.lock().clone(),
    }))
}

async fn write_map(
    State(api): State<Arc<FakeApi>>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    api.maps.lock().push(body);
    StatusCode::NO_CONTENT
}

async fn get_dataset(Path(id): Path<String>) -> Json<Value> {
    if id == "slow" {
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    Json(json!({ "id": id, "status": "collecting" }))
}

async fn update_state(Path(id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({ "id": id, "state": body }))
}

async fn abort_upload(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id, "upload": "aborted" }))
}

async fn attach_data(Path(id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "id": id,
        "attached": body["data"].as_str().map(str::len),
        "extension": body["extension"],
    }))
}

async fn generate_credentials(Path(id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    Json(json!({
        "device_id": id,
        "dataset_id": body["dataset_id"],
        "access_key": "AKIA-test",
    }))
}

async fn analysis_index() -> Json<Value> {
    Json(json!([{ "id": "qa-1" }, { "id": "qa-2" }]))
}

async fn analysis(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id }))
}

async fn analysis_started(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id, "started": true }))
}

async fn analysis_ended(Path(id): Path<String>) -> Json<Value> {
    Json(json!({ "id": id, "ended": true }))
}

fn router(api: Arc<FakeApi>) -> Router {
    Router::new()
        .route("/devices/:id", get(get_device))
        .route("/devices/:id/ping", put(ping))
        .route("/devices/:id/map", put(write_map))
        .route(
            "/devices/:id/generate_dataset_credentials",
            post(generate_credentials),
        )
        .route("/device-token-refresh/", post(refresh_token))
        .route("/datasets/:id", get(get_dataset))
        .route("/datasets/:id/update_state", put(update_state))
        .route("/datasets/:id/abort_upload", put(abort_upload))
        .route("/datasets/:id/attach_data", put(attach_data))
        .route("/queuedanalysis", get(analysis_index))
        .route("/queuedanalysis/:id", get(analysis))
        .route("/queuedanalysis/:id/mark_started", put(analysis_started))
        .route("/queuedanalysis/:id/mark_ended", put(analysis_ended))
        .layer(middleware::from_fn_with_state(api.clone(), record))
        .with_state(api)
}

/// Route agent logs to the test harness; `RUST_LOG` filters them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serve the fake API; returns a backend config pointing at it
pub async fn start_backend(api: Arc<FakeApi>) -> Result<BackendConfig> {
    init_tracing();
    let port = portpicker::pick_unused_port().expect("No ports free");
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::spawn(async move {
        axum::serve(listener, router(api)).await.ok();
    });

    Ok(BackendConfig {
        host: addr.to_string(),
        scheme: "http".to_string(),
        token: "token-0".to_string(),
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    })
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
