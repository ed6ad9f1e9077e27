use axum::extract::Path;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rand::Rng;
use serde_json::json;
use std::time::{Duration, SystemTime};
use tracing_subscriber::EnvFilter;

/// Sleep 5-20ms to stand in for real upstream work, returning the delay.
async fn simulate_latency() -> u64 {
    let delay = rand::thread_rng().gen_range(5..=20);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    delay
}

fn item_etag(id: u64) -> String {
    format!("\"item-{id}-v1\"")
}

fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|tag| tag.trim().trim_start_matches("W/"))
        .any(|tag| tag == "*" || tag == etag)
}

/// Fresh for 30s, then revalidated by ETag.
async fn get_item(Path(id): Path<u64>, headers: HeaderMap) -> Response {
    let delay = simulate_latency().await;
    let etag = item_etag(id);

    if etag_matches(&headers, &etag) {
        tracing::debug!(id, "item not modified");
        return (
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag),
                (header::CACHE_CONTROL, "max-age=30".to_string()),
            ],
        )
            .into_response();
    }

    (
        [
            (header::ETAG, etag),
            (header::CACHE_CONTROL, "max-age=30".to_string()),
        ],
        Json(json!({
            "id": id,
            "name": format!("Item {}", id),
            "data": "x".repeat(256),
            "latency_ms": delay,
        })),
    )
        .into_response()
}

/// One representation per `Accept` value.
async fn negotiated(headers: HeaderMap) -> Response {
    simulate_latency().await;
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    let mut res = if wants_json {
        Json(json!({ "greeting": "hello" })).into_response()
    } else {
        "hello".into_response()
    };
    let h = res.headers_mut();
    h.insert(header::VARY, HeaderValue::from_static("Accept"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
    res
}

/// No explicit lifetime; served with `Last-Modified` so caches revalidate by date.
async fn validated(headers: HeaderMap) -> Response {
    simulate_latency().await;
    let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let last_modified = httpdate::fmt_http_date(modified);

    let unchanged = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok())
        .is_some_and(|since| since >= modified);

    let status = if unchanged {
        StatusCode::NOT_MODIFIED
    } else {
        StatusCode::OK
    };
    let body = if unchanged { "" } else { "validated body" };
    (
        status,
        [
            (header::LAST_MODIFIED, last_modified),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

fn app() -> Router {
    Router::new()
        .route("/items/{id}", get(get_item))
        .route("/negotiated", get(negotiated))
        .route("/validated", get(validated))
        .route("/health", get(health))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = "0.0.0.0:3000";
    tracing::info!(addr, "demo backend starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, addr, "failed to bind");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app()).await {
        tracing::error!(error = %e, "demo backend error");
    }
}
