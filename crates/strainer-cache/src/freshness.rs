use http::HeaderMap;
use std::time::SystemTime;

use crate::headers::HeaderMapExt;

/// Freshness of a response at a given instant, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    /// Lifetime granted by the response's own headers.
    pub ttl: u64,
    /// How long the response has existed, from `Date` plus any stored `Age`.
    pub age: u64,
    /// `no-cache` on the response: every reuse needs validation.
    pub must_validate: bool,
}

impl Freshness {
    pub fn evaluate(headers: &HeaderMap, now: SystemTime) -> Self {
        let cc = headers.cache_control();
        let date = headers.date().unwrap_or(now);

        // s-maxage > max-age > Expires - Date; no heuristic lifetime.
        let ttl = cc
            .s_maxage()
            .or_else(|| cc.max_age())
            .or_else(|| {
                let expires = headers.expires()?;
                Some(seconds_between(date, expires))
            })
            .unwrap_or(0);

        let age = headers
            .age()
            .unwrap_or(0)
            .saturating_add(seconds_between(date, now));

        Self {
            ttl,
            age,
            must_validate: cc.no_cache(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        !self.must_validate && self.ttl > self.age
    }

    /// Seconds of life left; zero once stale.
    pub fn remaining(&self) -> u64 {
        self.ttl.saturating_sub(self.age)
    }
}

fn seconds_between(earlier: SystemTime, later: SystemTime) -> u64 {
    later
        .duration_since(earlier)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{self, HeaderValue};
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn date(t: SystemTime) -> String {
        httpdate::fmt_http_date(t)
    }

    #[test]
    fn s_maxage_beats_max_age() {
        let h = headers(&[
            (header::DATE, date(at(0)).as_str()),
            (header::CACHE_CONTROL, "s-maxage=10, max-age=0"),
        ]);
        let f = Freshness::evaluate(&h, at(5));
        assert_eq!(f.ttl, 10);
        assert_eq!(f.age, 5);
        assert!(f.is_fresh());
        assert_eq!(f.remaining(), 5);
    }

    #[test]
    fn max_age_beats_expires() {
        let h = headers(&[
            (header::DATE, date(at(0)).as_str()),
            (header::EXPIRES, date(at(100)).as_str()),
            (header::CACHE_CONTROL, "max-age=3"),
        ]);
        assert_eq!(Freshness::evaluate(&h, at(0)).ttl, 3);
    }

    #[test]
    fn expires_is_relative_to_response_date() {
        let h = headers(&[
            (header::DATE, date(at(0)).as_str()),
            (header::EXPIRES, date(at(10)).as_str()),
        ]);
        let f = Freshness::evaluate(&h, at(5));
        assert_eq!(f.ttl, 10);
        assert!(f.is_fresh());
        assert!(!Freshness::evaluate(&h, at(10)).is_fresh());
    }

    #[test]
    fn expires_without_date_uses_now() {
        let h = headers(&[(header::EXPIRES, date(at(30)).as_str())]);
        let f = Freshness::evaluate(&h, at(0));
        assert_eq!(f.ttl, 30);
        assert_eq!(f.age, 0);
    }

    #[test]
    fn expires_in_the_past_has_no_lifetime() {
        let h = headers(&[
            (header::DATE, date(at(10)).as_str()),
            (header::EXPIRES, date(at(0)).as_str()),
        ]);
        assert_eq!(Freshness::evaluate(&h, at(10)).ttl, 0);
    }

    #[test]
    fn no_freshness_info_means_stale() {
        let h = headers(&[
            (header::DATE, date(at(0)).as_str()),
            (header::LAST_MODIFIED, date(at(0)).as_str()),
        ]);
        let f = Freshness::evaluate(&h, at(0));
        assert_eq!(f.ttl, 0);
        assert!(!f.is_fresh());
    }

    #[test]
    fn stored_age_is_added() {
        let h = headers(&[
            (header::DATE, date(at(0)).as_str()),
            (header::AGE, "7"),
            (header::CACHE_CONTROL, "max-age=10"),
        ]);
        let f = Freshness::evaluate(&h, at(2));
        assert_eq!(f.age, 9);
        assert!(f.is_fresh());
        assert!(!Freshness::evaluate(&h, at(3)).is_fresh());
    }

    #[test]
    fn date_in_the_future_counts_as_zero_age() {
        let h = headers(&[
            (header::DATE, date(at(60)).as_str()),
            (header::CACHE_CONTROL, "max-age=1"),
        ]);
        assert_eq!(Freshness::evaluate(&h, at(0)).age, 0);
    }

    #[test]
    fn no_cache_is_never_fresh() {
        let h = headers(&[
            (header::DATE, date(at(0)).as_str()),
            (header::CACHE_CONTROL, "no-cache, max-age=60"),
        ]);
        let f = Freshness::evaluate(&h, at(1));
        assert_eq!(f.ttl, 60);
        assert!(!f.is_fresh());
    }

    #[test]
    fn malformed_dates_are_ignored() {
        let h = headers(&[
            (header::DATE, "not a date"),
            (header::EXPIRES, "-1"),
            (header::CACHE_CONTROL, "max-age=5"),
        ]);
        let f = Freshness::evaluate(&h, at(0));
        assert_eq!(f.ttl, 5);
        assert_eq!(f.age, 0);
    }
}
