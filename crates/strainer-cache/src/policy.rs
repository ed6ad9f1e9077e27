//! What may be stored, and the header rewrites applied before deciding.

use http::header::{self, HeaderMap};
use http::{Method, Request, Response, StatusCode};
use std::time::Duration;

use crate::headers::HeaderMapExt;

/// Statuses a shared cache may store.
pub const CACHEABLE_STATUSES: [u16; 7] = [200, 203, 300, 301, 302, 404, 410];

pub fn is_cacheable_method(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

pub fn is_cacheable_status(status: StatusCode) -> bool {
    CACHEABLE_STATUSES.contains(&status.as_u16())
}

/// `Expires`, `max-age` or `s-maxage` present.
pub fn has_explicit_freshness(headers: &HeaderMap) -> bool {
    let cc = headers.cache_control();
    headers.contains_key(header::EXPIRES) || cc.max_age().is_some() || cc.s_maxage().is_some()
}

pub fn has_validator(headers: &HeaderMap) -> bool {
    headers.contains_key(header::ETAG) || headers.contains_key(header::LAST_MODIFIED)
}

pub fn carries_credentials(headers: &HeaderMap) -> bool {
    headers.contains_key(header::AUTHORIZATION) || headers.contains_key(header::COOKIE)
}

/// Request asked to bypass stored responses.
pub fn wants_reload(headers: &HeaderMap) -> bool {
    headers.cache_control().no_cache()
        || headers
            .get_all(header::PRAGMA)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.split(',').any(|d| d.trim().eq_ignore_ascii_case("no-cache")))
}

pub fn is_storable<B, C>(request: &Request<B>, response: &Response<C>) -> bool {
    let res = response.headers();
    let res_cc = res.cache_control();

    is_cacheable_method(request.method())
        && is_cacheable_status(response.status())
        && !request.headers().cache_control().no_store()
        && !res_cc.no_store()
        && !res_cc.private()
        && (has_explicit_freshness(res) || has_validator(res))
}

/// Mark a response to a credentialed request `private` unless the origin
/// explicitly made it `public`. Returns whether the headers changed.
pub fn privatize_unless_public(headers: &mut HeaderMap) -> bool {
    let mut cc = headers.cache_control();
    if cc.public() {
        return false;
    }
    cc.set("private", None);
    headers.set_cache_control(&cc);
    true
}

/// Grant `s-maxage=<ttl>` to a response that carries no lifetime of its own.
/// `must-revalidate` opts out. Returns whether the headers changed.
pub fn apply_default_ttl(status: StatusCode, headers: &mut HeaderMap, ttl: Duration) -> bool {
    if !is_cacheable_status(status) || has_explicit_freshness(headers) {
        return false;
    }
    let mut cc = headers.cache_control();
    if cc.must_revalidate() {
        return false;
    }
    cc.set("s-maxage", Some(ttl.as_secs().to_string()));
    headers.set_cache_control(&cc);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn request(method: Method) -> Request<()> {
        Request::builder().method(method).uri("/").body(()).unwrap()
    }

    fn response(status: u16, pairs: &[(header::HeaderName, &'static str)]) -> Response<()> {
        let mut res = Response::builder().status(status).body(()).unwrap();
        for (name, value) in pairs {
            res.headers_mut()
                .append(name.clone(), HeaderValue::from_static(value));
        }
        res
    }

    const EXPIRES: (header::HeaderName, &str) = (header::EXPIRES, "Sun, 06 Nov 2094 08:49:37 GMT");

    #[test]
    fn allow_listed_statuses_store() {
        for status in CACHEABLE_STATUSES {
            assert!(
                is_storable(&request(Method::GET), &response(status, &[EXPIRES])),
                "{status} should be storable"
            );
        }
    }

    #[test]
    fn other_statuses_never_store() {
        let ranges = [201..=202, 204..=206, 303..=305, 400..=403, 405..=409, 411..=417, 500..=505];
        for status in ranges.into_iter().flatten() {
            assert!(
                !is_storable(&request(Method::GET), &response(status, &[EXPIRES])),
                "{status} must not be storable"
            );
        }
    }

    #[test]
    fn only_get_and_head() {
        let res = response(200, &[EXPIRES]);
        assert!(is_storable(&request(Method::HEAD), &res));
        assert!(!is_storable(&request(Method::POST), &res));
        assert!(!is_storable(&request(Method::PUT), &res));
    }

    #[test]
    fn needs_freshness_or_validator() {
        let req = request(Method::GET);
        assert!(!is_storable(&req, &response(200, &[])));
        assert!(is_storable(&req, &response(200, &[(header::ETAG, "\"1\"")])));
        assert!(is_storable(
            &req,
            &response(200, &[(header::LAST_MODIFIED, "Sun, 06 Nov 1994 08:49:37 GMT")])
        ));
        assert!(is_storable(&req, &response(200, &[(header::CACHE_CONTROL, "max-age=5")])));
        assert!(is_storable(&req, &response(200, &[(header::CACHE_CONTROL, "s-maxage=5")])));
    }

    #[test]
    fn no_store_on_either_side_wins() {
        let res = response(200, &[EXPIRES, (header::CACHE_CONTROL, "no-store")]);
        assert!(!is_storable(&request(Method::GET), &res));

        let mut req = request(Method::GET);
        req.headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert!(!is_storable(&req, &response(200, &[EXPIRES])));
    }

    #[test]
    fn private_and_no_cache_responses() {
        let req = request(Method::GET);
        assert!(!is_storable(&req, &response(200, &[EXPIRES, (header::CACHE_CONTROL, "private")])));
        assert!(is_storable(&req, &response(200, &[EXPIRES, (header::CACHE_CONTROL, "no-cache")])));
    }

    #[test]
    fn privatize_leaves_public_alone() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public"));
        assert!(!privatize_unless_public(&mut headers));
        assert_eq!(headers.text(&header::CACHE_CONTROL), Some("public"));

        let mut headers = HeaderMap::new();
        assert!(privatize_unless_public(&mut headers));
        assert_eq!(headers.text(&header::CACHE_CONTROL), Some("private"));

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=5"));
        privatize_unless_public(&mut headers);
        assert_eq!(headers.text(&header::CACHE_CONTROL), Some("max-age=5, private"));
    }

    #[test]
    fn default_ttl_injection() {
        let ttl = Duration::from_secs(10);

        let mut headers = HeaderMap::new();
        assert!(apply_default_ttl(StatusCode::OK, &mut headers, ttl));
        assert_eq!(headers.text(&header::CACHE_CONTROL), Some("s-maxage=10"));

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("must-revalidate"));
        assert!(!apply_default_ttl(StatusCode::OK, &mut headers, ttl));
        assert_eq!(headers.text(&header::CACHE_CONTROL), Some("must-revalidate"));

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=1"));
        assert!(!apply_default_ttl(StatusCode::OK, &mut headers, ttl));

        let mut headers = HeaderMap::new();
        assert!(!apply_default_ttl(StatusCode::INTERNAL_SERVER_ERROR, &mut headers, ttl));
        assert!(headers.is_empty());
    }

    #[test]
    fn reload_detection() {
        let mut headers = HeaderMap::new();
        assert!(!wants_reload(&headers));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        assert!(wants_reload(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert!(wants_reload(&headers));
    }
}
