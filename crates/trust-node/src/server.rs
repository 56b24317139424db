//! Read API over the published documents.
//!
//! `GET /{contract}/{purpose}` answers with the latest published document for
//! that contract. Bodies are cached per path for the configured TTL so a busy
//! client does not turn into a file read per request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};
use trust_indexer::{metrics, DocumentStore, PollerHandle, Purpose, WorkerSnapshot};

#[derive(Clone)]
pub struct ApiState {
    store: DocumentStore,
    contracts: Arc<Vec<String>>,
    workers: Arc<Vec<PollerHandle>>,
    cache: Arc<ResponseCache>,
    started: Instant,
}

impl ApiState {
    /// `contracts` is the list of names the API answers for, in the order they
    /// are listed back to clients.
    pub fn new(store: DocumentStore, contracts: Vec<String>, cache_ttl: Duration) -> Self {
        Self {
            store,
            contracts: Arc::new(contracts),
            workers: Arc::new(Vec::new()),
            cache: Arc::new(ResponseCache::new(cache_ttl)),
            started: Instant::now(),
        }
    }

    /// Pollers reported on `/status`.
    pub fn with_workers(mut self, workers: Vec<PollerHandle>) -> Self {
        self.workers = Arc::new(workers);
        self
    }
}

struct CachedBody {
    body: Arc<str>,
    loaded_at: Instant,
}

/// Per-(contract, purpose) bodies. Misses are never cached, so a document
/// shows up as soon as it is first published.
struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, Purpose), CachedBody>>,
}

impl ResponseCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, contract: &str, purpose: Purpose) -> Option<Arc<str>> {
        if self.ttl.is_zero() {
            return None;
        }
        let entries = self.entries.lock().await;
        entries
            .get(&(contract.to_string(), purpose))
            .filter(|cached| cached.loaded_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.body))
    }

    async fn put(&self, contract: &str, purpose: Purpose, body: Arc<str>) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.lock().await.insert(
            (contract.to_string(), purpose),
            CachedBody {
                body,
                loaded_at: Instant::now(),
            },
        );
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics_handler))
        .route("/:contract/:purpose", get(document))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, message).into_response()
}

fn json_body(body: Arc<str>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn document(
    State(state): State<ApiState>,
    Path((contract, purpose)): Path<(String, String)>,
) -> Response {
    if !state.contracts.iter().any(|c| *c == contract) {
        return not_found(format!(
            "Unknown contract name '{contract}', choose one of [{}]",
            state.contracts.join(", ")
        ));
    }
    let Ok(purpose) = purpose.parse::<Purpose>() else {
        let known: Vec<&str> = Purpose::ALL.iter().map(|p| p.as_str()).collect();
        return not_found(format!(
            "Unknown request format '{purpose}', choose one of [{}]",
            known.join(", ")
        ));
    };

    if let Some(body) = state.cache.get(&contract, purpose).await {
        debug!(contract = %contract, %purpose, "served from cache");
        return json_body(body);
    }

    let store = state.store.clone();
    let name = contract.clone();
    let read = tokio::task::spawn_blocking(move || store.read(&name, purpose)).await;
    match read {
        Ok(Ok(Some(body))) => {
            let body: Arc<str> = Arc::from(body);
            state.cache.put(&contract, purpose, Arc::clone(&body)).await;
            json_body(body)
        }
        Ok(Ok(None)) => not_found(format!(
            "The {purpose} document for '{contract}' has not been published yet"
        )),
        Ok(Err(err)) => {
            warn!(contract = %contract, %purpose, error = %err, "document read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "document unavailable").into_response()
        }
        Err(err) => {
            warn!(contract = %contract, %purpose, error = %err, "document read task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "document unavailable").into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    "ok"
}

#[derive(Serialize)]
struct StatusResponse {
    service: ServiceInfo,
    uptime_ms: u64,
    contracts: Vec<String>,
    workers: Vec<WorkerSnapshot>,
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
}

async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let uptime_ms = u64::try_from(state.started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut workers = Vec::with_capacity(state.workers.len());
    for handle in state.workers.iter() {
        workers.push(handle.snapshot().await);
    }
    Json(StatusResponse {
        service: ServiceInfo {
            name: "trust-node",
            version: env!("CARGO_PKG_VERSION"),
        },
        uptime_ms,
        contracts: state.contracts.as_ref().clone(),
        workers,
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_text(),
    )
}
