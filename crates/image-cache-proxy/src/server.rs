//! HTTP server for the image cache
//!
//! Provides /health, /image, /placeholders, /cache/clear and /cache/evict.

use crate::types::{
    placeholder_urls, ClearResponse, HealthResponse, ImageQuery, PlaceholderQuery,
    MAX_PLACEHOLDERS,
};
use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use image_cache::{
    CacheConfig, DiskStore, EvictionOutcome, FetchError, ImageGateway, ImageSource,
    PressureMonitor, SizeBoundedEvictor,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub gateway: ImageGateway,
    pub evictor: SizeBoundedEvictor,
    pub monitor: PressureMonitor,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(gateway: ImageGateway, evictor: SizeBoundedEvictor, monitor: PressureMonitor) -> Self {
        Self {
            gateway,
            evictor,
            monitor,
            started_at: Utc::now(),
        }
    }

    /// Wire one store into a gateway, evictor and monitor
    pub fn from_config(config: &CacheConfig, source: Arc<dyn ImageSource>) -> Self {
        let store = Arc::new(DiskStore::from_config(config));
        let gateway = ImageGateway::from_config(config, store.clone(), source);
        let evictor = SizeBoundedEvictor::new(store.clone(), config.max_cache_size);
        let monitor = PressureMonitor::from_config(config, store);
        Self::new(gateway, evictor, monitor)
    }

    pub fn store(&self) -> &DiskStore {
        self.gateway.store()
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/image", get(get_image))
        .route("/placeholders", get(get_placeholders))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/evict", post(evict_cache))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Log every purge the pressure monitor reports
pub fn spawn_pressure_logger(state: &ServerState) -> tokio::task::JoinHandle<()> {
    let mut events = state.monitor.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(event = ?event, "Cache cleared due to memory pressure"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed pressure events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Whole seconds since `started_at`, zero if the clock stepped backwards
fn uptime_secs(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started_at).num_seconds().max(0) as u64
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache = state.store().stats().await;

    // Memory sampling reads /proc; keep it off the async workers
    let sampler = state.clone();
    let memory = tokio::task::spawn_blocking(move || sampler.monitor.current_memory_info())
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Memory sampling task failed");
            Default::default()
        });

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: uptime_secs(state.started_at, Utc::now()),
        cache,
        memory,
        monitoring: state.monitor.is_monitoring(),
    })
}

/// Fetch an image through the cache
async fn get_image(State(state): State<SharedState>, Query(query): Query<ImageQuery>) -> Response {
    let Some(url) = query.url.filter(|u| !u.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing url parameter");
    };

    match state.gateway.fetch(&url).await {
        Ok(image) => {
            let cache_header = if image.from_cache { "HIT" } else { "MISS" };
            (
                [
                    (header::CONTENT_TYPE, image.content_type()),
                    (header::CACHE_CONTROL, "public, max-age=86400"),
                    (HeaderName::from_static("x-cache"), cache_header),
                ],
                image.data,
            )
                .into_response()
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to fetch image");
            let status = match &e {
                FetchError::Network(_) => StatusCode::BAD_GATEWAY,
                FetchError::InvalidData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            };
            error_response(status, e.to_string())
        }
    }
}

async fn get_placeholders(Query(query): Query<PlaceholderQuery>) -> Json<Vec<String>> {
    Json(placeholder_urls(query.count.unwrap_or(MAX_PLACEHOLDERS)))
}

async fn clear_cache(State(state): State<SharedState>) -> Json<ClearResponse> {
    let report = state.store().clear().await;
    let cache = state.store().stats().await;
    Json(ClearResponse { report, cache })
}

async fn evict_cache(State(state): State<SharedState>) -> Json<EvictionOutcome> {
    Json(state.evictor.enforce().await)
}
