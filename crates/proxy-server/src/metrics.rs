use crate::proxy::AppState;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strainer_cache::{CacheKey, Directive, Event, Hooks};

/// Hooks that count every pipeline event as `strainer_events_total{event}`.
pub fn event_hooks() -> Hooks {
    Event::ALL.into_iter().fold(Hooks::new(), |hooks, event| {
        hooks.on(event, move |_| {
            metrics::counter!("strainer_events_total", "event" => event.as_str()).increment(1);
            Ok(Directive::Continue)
        })
    })
}

/// Per-request counter and latency histogram, labelled by `X-Cache` status.
pub fn record_request(cache: &'static str, latency: Duration) {
    metrics::counter!("strainer_requests_total", "cache" => cache).increment(1);
    metrics::histogram!("strainer_request_duration_seconds", "cache" => cache)
        .record(latency.as_secs_f64());
}

pub fn admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/stats", get(stats_handler))
        .route("/api/purge", post(purge_handler))
        .with_state(state)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub buckets: usize,
    pub bodies: usize,
    pub default_ttl_seconds: Option<u64>,
}

/// GET /api/stats: store sizes and the active default TTL.
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let engine = state.engine.load_full();
    let counts = async {
        let buckets = engine.meta_store().len().await?;
        let bodies = engine.entity_store().len().await?;
        Ok::<_, strainer_cache::StoreError>((buckets, bodies))
    };

    match counts.await {
        Ok((buckets, bodies)) => (
            StatusCode::OK,
            Json(serde_json::json!(StatsSnapshot {
                buckets,
                bodies,
                default_ttl_seconds: engine.config().default_ttl.map(|ttl| ttl.as_secs()),
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to read store sizes");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

/// POST /api/purge body: `{ "url": "http://host/path" }`.
#[derive(Deserialize)]
pub struct PurgeRequest {
    pub url: String,
}

pub async fn purge_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PurgeRequest>,
) -> impl IntoResponse {
    let key = match body.url.parse::<Uri>() {
        Ok(uri) if uri.host().is_some() => CacheKey::from_uri(&uri),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("not an absolute url: {}", body.url)})),
            );
        }
    };

    match state.engine.load_full().purge(&key).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"purged": key.as_str()})),
        ),
        Err(e) => {
            tracing::error!(error = %e, key = %key, "purge failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}
