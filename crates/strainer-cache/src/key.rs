use http::{header, Request, Uri};
use std::fmt;

/// Address of a meta store bucket: `<scheme>://<host><path>[?<query>]`.
///
/// Built only from the request target, so header order and every header
/// other than `Host` are irrelevant. Query parameters are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let host_header = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok());
        Self::build(request.uri(), host_header)
    }

    /// Key for an absolute URL, e.g. from an admin purge request.
    pub fn from_uri(uri: &Uri) -> Self {
        Self::build(uri, None)
    }

    fn build(uri: &Uri, host_header: Option<&str>) -> Self {
        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();

        let host = match uri.host() {
            Some(host) => match uri.port_u16() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            },
            None => host_header.unwrap_or_default().to_string(),
        };
        let host = strip_default_port(&scheme, &host.to_ascii_lowercase()).to_string();

        let mut key = format!("{scheme}://{host}{}", uri.path());
        if let Some(query) = uri.query().map(sort_query).filter(|q| !q.is_empty()) {
            key.push('?');
            key.push_str(&query);
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_default_port<'a>(scheme: &str, host: &'a str) -> &'a str {
    let default = match scheme {
        "http" => ":80",
        "https" => ":443",
        _ => return host,
    };
    host.strip_suffix(default).unwrap_or(host)
}

fn sort_query(query: &str) -> String {
    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_unstable();
    pairs.join("&")
}
