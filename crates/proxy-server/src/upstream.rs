use async_trait::async_trait;
use axum::http::{HeaderMap, Request, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use strainer_cache::{BoxError, Origin};

use crate::config::UpstreamConfig;

pub type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// The configured upstream as a cache [`Origin`].
pub struct UpstreamOrigin {
    client: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl UpstreamOrigin {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    fn upstream_uri(&self, request: &Request<Bytes>) -> String {
        format!(
            "{}{}",
            self.base_url,
            request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
        )
    }
}

#[async_trait]
impl Origin for UpstreamOrigin {
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
        let upstream_uri = self.upstream_uri(&request);
        let (mut parts, body) = request.into_parts();
        parts.uri = upstream_uri.parse()?;
        // Let the client derive Host from the upstream URI.
        parts.headers.remove(axum::http::header::HOST);
        strip_hop_by_hop(&mut parts.headers);

        let upstream_req = Request::from_parts(parts, Full::new(body));
        let upstream_resp = tokio::time::timeout(self.timeout, self.client.request(upstream_req))
            .await
            .map_err(|_| format!("upstream {upstream_uri} timed out after {:?}", self.timeout))??;

        let (mut parts, body) = upstream_resp.into_parts();
        let body = body.collect().await?.to_bytes();
        strip_hop_by_hop(&mut parts.headers);

        tracing::debug!(
            upstream = %upstream_uri,
            status = parts.status.as_u16(),
            bytes = body.len(),
            "upstream responded"
        );
        Ok(Response::from_parts(parts, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("cache-control", "max-age=5".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("cache-control"));
    }

    #[tokio::test]
    async fn joins_base_url_and_path() {
        let origin = UpstreamOrigin::new(&UpstreamConfig {
            url: "http://backend:3000/".to_string(),
            timeout_ms: 100,
        });
        let req = Request::get("http://proxy.local/items/7?x=1")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(origin.upstream_uri(&req), "http://backend:3000/items/7?x=1");
    }
}
