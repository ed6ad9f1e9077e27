use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::sync::Arc;
use std::time::Instant;
use strainer_cache::{
    CacheEngine, CacheError, EngineConfig, EntityStore, Event, MetaStore, Origin, Trace,
};

use crate::metrics;
use crate::upstream::strip_hop_by_hop;

/// Shared application state passed to all handlers.
pub struct AppState {
    /// Swapped wholesale on config reload; the stores inside are shared.
    pub engine: ArcSwap<CacheEngine>,
    pub max_body_size: usize,
}

/// Build an engine that reports every pipeline event to the metrics recorder.
pub fn build_engine(
    origin: impl Origin + 'static,
    config: EngineConfig,
    meta: Arc<dyn MetaStore>,
    entities: Arc<dyn EntityStore>,
) -> CacheEngine {
    CacheEngine::builder(origin)
        .meta_store(meta)
        .entity_store(entities)
        .hooks(metrics::event_hooks())
        .config(config)
        .build()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state)
}

/// How the cache answered, for the `X-Cache` header and request metrics.
pub fn cache_status(trace: &Trace) -> &'static str {
    if trace.performed(Event::Error) {
        "ERROR"
    } else if trace.performed(Event::Pass) {
        "PASS"
    } else if trace.performed(Event::Hit) {
        "HIT"
    } else if trace.validated() {
        "REVALIDATED"
    } else {
        "MISS"
    }
}

/// Main proxy handler. Buffers the request body and runs it through the cache.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let uri = parts.uri.clone();

    let body = match Limited::new(body, state.max_body_size).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            tracing::warn!(%method, %uri, limit = state.max_body_size, "request body too large");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
        }
    };

    let mut request = Request::from_parts(parts, body);
    strip_hop_by_hop(request.headers_mut());

    let engine = state.engine.load_full();
    let response = match engine.call(request).await {
        Ok(response) => response,
        Err(CacheError::Origin(e)) => {
            tracing::error!(error = %e, %method, %uri, "upstream request failed");
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
        Err(e) => {
            tracing::error!(error = %e, %method, %uri, "cache failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let status = response
        .extensions()
        .get::<Trace>()
        .map(cache_status)
        .unwrap_or("MISS");
    let elapsed = start.elapsed();
    metrics::record_request(status, elapsed);

    tracing::debug!(
        %method,
        %uri,
        status = response.status().as_u16(),
        cache = status,
        latency_us = elapsed.as_micros(),
        "request served"
    );

    let (mut parts, body) = response.into_parts();
    parts
        .headers
        .insert("x-cache", HeaderValue::from_static(status));
    Response::from_parts(parts, Body::from(body))
}
