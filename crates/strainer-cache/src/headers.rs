//! Typed accessors for the headers the engine reasons about.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::time::SystemTime;

use crate::cache_control::CacheControl;
use crate::digest::ContentDigest;

/// Points a stored response at its body in the entity store.
pub const X_CONTENT_DIGEST: HeaderName = HeaderName::from_static("x-content-digest");

/// Set on responses confirmed by a 304 from the origin.
pub const X_ORIGIN_STATUS: HeaderName = HeaderName::from_static("x-origin-status");

pub trait HeaderMapExt {
    /// First value of `name` as text, if it is valid visible ASCII.
    fn text(&self, name: &HeaderName) -> Option<&str>;

    /// All `Cache-Control` lines parsed as one list (empty if absent).
    fn cache_control(&self) -> CacheControl;

    fn set_cache_control(&mut self, cc: &CacheControl);

    /// Parse an HTTP-date header. Unparseable dates read as absent.
    fn http_date(&self, name: &HeaderName) -> Option<SystemTime>;

    fn set_http_date(&mut self, name: HeaderName, time: SystemTime);

    fn date(&self) -> Option<SystemTime> {
        self.http_date(&header::DATE)
    }

    fn expires(&self) -> Option<SystemTime> {
        self.http_date(&header::EXPIRES)
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.http_date(&header::LAST_MODIFIED)
    }

    fn etag(&self) -> Option<&str> {
        self.text(&header::ETAG)
    }

    /// `Age` in whole seconds; malformed values read as absent.
    fn age(&self) -> Option<u64> {
        self.text(&header::AGE).and_then(|v| v.trim().parse().ok())
    }

    fn set_age(&mut self, seconds: u64);

    fn content_digest(&self) -> Option<ContentDigest> {
        self.text(&X_CONTENT_DIGEST).and_then(ContentDigest::parse)
    }

    fn set_content_digest(&mut self, digest: &ContentDigest);
}

impl HeaderMapExt for HeaderMap {
    fn text(&self, name: &HeaderName) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    fn cache_control(&self) -> CacheControl {
        CacheControl::from_values(
            self.get_all(header::CACHE_CONTROL)
                .iter()
                .filter_map(|v| v.to_str().ok()),
        )
    }

    fn set_cache_control(&mut self, cc: &CacheControl) {
        if cc.is_empty() {
            self.remove(header::CACHE_CONTROL);
            return;
        }
        if let Ok(value) = HeaderValue::from_str(&cc.to_string()) {
            self.insert(header::CACHE_CONTROL, value);
        }
    }

    fn http_date(&self, name: &HeaderName) -> Option<SystemTime> {
        self.text(name)
            .and_then(|v| httpdate::parse_http_date(v.trim()).ok())
    }

    fn set_http_date(&mut self, name: HeaderName, time: SystemTime) {
        let formatted = httpdate::fmt_http_date(time);
        if let Ok(value) = HeaderValue::from_str(&formatted) {
            self.insert(name, value);
        }
    }

    fn set_age(&mut self, seconds: u64) {
        self.insert(header::AGE, HeaderValue::from(seconds));
    }

    fn set_content_digest(&mut self, digest: &ContentDigest) {
        if let Ok(value) = HeaderValue::from_str(digest.as_str()) {
            self.insert(X_CONTENT_DIGEST, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn dates_round_trip_at_second_precision() {
        let mut headers = HeaderMap::new();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);

        headers.set_http_date(header::DATE, when);

        assert_eq!(headers.text(&header::DATE), Some("Sun, 06 Nov 1994 08:49:37 GMT"));
        assert_eq!(headers.date(), Some(when));
    }

    #[test]
    fn bad_dates_read_as_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        headers.insert(header::LAST_MODIFIED, HeaderValue::from_static("yesterday"));

        assert_eq!(headers.expires(), None);
        assert_eq!(headers.last_modified(), None);
    }

    #[test]
    fn age_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(headers.age(), None);

        headers.set_age(42);
        assert_eq!(headers.age(), Some(42));

        headers.insert(header::AGE, HeaderValue::from_static("-3"));
        assert_eq!(headers.age(), None);
    }

    #[test]
    fn cache_control_joins_lines_and_writes_back() {
        let mut headers = HeaderMap::new();
        headers.append(header::CACHE_CONTROL, HeaderValue::from_static("public"));
        headers.append(header::CACHE_CONTROL, HeaderValue::from_static("max-age=3"));

        let mut cc = headers.cache_control();
        assert!(cc.public());
        assert_eq!(cc.max_age(), Some(3));

        cc.set("s-maxage", Some("9".into()));
        headers.set_cache_control(&cc);
        assert_eq!(headers.get_all(header::CACHE_CONTROL).iter().count(), 1);
        assert_eq!(
            headers.text(&header::CACHE_CONTROL),
            Some("public, max-age=3, s-maxage=9")
        );
    }

    #[test]
    fn empty_cache_control_removes_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public"));
        headers.set_cache_control(&CacheControl::default());
        assert!(!headers.contains_key(header::CACHE_CONTROL));
    }

    #[test]
    fn content_digest_header() {
        let mut headers = HeaderMap::new();
        let digest = ContentDigest::of(b"abc");
        headers.set_content_digest(&digest);
        assert_eq!(headers.content_digest(), Some(digest));
    }
}
