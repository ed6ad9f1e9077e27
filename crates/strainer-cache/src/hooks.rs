//! Per-event handler registry.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};
use http::StatusCode;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;

/// Pipeline stages a handler can attach to, in the order they can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Receive,
    Pass,
    Miss,
    Fetch,
    Store,
    Hit,
    Deliver,
    Error,
}

impl Event {
    pub const ALL: [Event; 8] = [
        Event::Receive,
        Event::Pass,
        Event::Miss,
        Event::Fetch,
        Event::Store,
        Event::Hit,
        Event::Deliver,
        Event::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Receive => "receive",
            Event::Pass => "pass",
            Event::Miss => "miss",
            Event::Fetch => "fetch",
            Event::Store => "store",
            Event::Hit => "hit",
            Event::Deliver => "deliver",
            Event::Error => "error",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response to synthesise when the pipeline enters the error state.
#[derive(Debug, Clone)]
pub struct ErrorSignal {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for ErrorSignal {
    fn default() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl ErrorSignal {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Out-of-range codes fall back to 500.
fn status_or_500(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

impl From<StatusCode> for ErrorSignal {
    fn from(status: StatusCode) -> Self {
        Self::new(status)
    }
}

impl From<u16> for ErrorSignal {
    fn from(code: u16) -> Self {
        Self::new(status_or_500(code))
    }
}

impl From<(u16, HeaderMap)> for ErrorSignal {
    fn from((code, headers): (u16, HeaderMap)) -> Self {
        Self::from(code).with_headers(headers)
    }
}

impl From<(u16, &'static str)> for ErrorSignal {
    fn from((code, body): (u16, &'static str)) -> Self {
        Self::from(code).with_body(body)
    }
}

impl From<(u16, String)> for ErrorSignal {
    fn from((code, body): (u16, String)) -> Self {
        Self::from(code).with_body(body)
    }
}

/// Body given as chunks, concatenated in order.
impl From<(u16, Vec<&str>)> for ErrorSignal {
    fn from((code, chunks): (u16, Vec<&str>)) -> Self {
        Self::from(code).with_body(chunks.concat())
    }
}

impl From<(u16, HeaderMap, &'static str)> for ErrorSignal {
    fn from((code, headers, body): (u16, HeaderMap, &'static str)) -> Self {
        Self::from(code).with_headers(headers).with_body(body)
    }
}

/// What a handler wants the pipeline to do next.
#[derive(Debug, Clone, Default)]
pub enum Directive {
    #[default]
    Continue,
    /// Forward the request uncached. Honoured only during `receive`.
    Pass,
    /// Abort into the error state. Ignored during `error` itself.
    Error(ErrorSignal),
}

impl Directive {
    pub fn error(signal: impl Into<ErrorSignal>) -> Self {
        Directive::Error(signal.into())
    }
}

pub type Handler = Arc<dyn Fn(&mut Context) -> Result<Directive, BoxError> + Send + Sync>;

/// Ordered handlers for each [`Event`].
#[derive(Clone, Default)]
pub struct Hooks {
    handlers: [Vec<Handler>; 8],
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `event`. Handlers run in registration order.
    pub fn on<F>(mut self, event: Event, handler: F) -> Self
    where
        F: Fn(&mut Context) -> Result<Directive, BoxError> + Send + Sync + 'static,
    {
        self.handlers[event.index()].push(Arc::new(handler));
        self
    }

    pub fn handlers(&self, event: Event) -> &[Handler] {
        &self.handlers[event.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(Vec::is_empty)
    }

    /// Run every handler for `event`, stopping at the first non-`Continue`
    /// directive or failure.
    pub fn run(&self, event: Event, ctx: &mut Context) -> Result<Directive, BoxError> {
        for handler in self.handlers(event) {
            match handler(ctx)? {
                Directive::Continue => {}
                other => return Ok(other),
            }
        }
        Ok(Directive::Continue)
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for event in Event::ALL {
            map.entry(&event.as_str(), &self.handlers(event).len());
        }
        map.finish()
    }
}

/// `Content-Type` for a synthesised error body that lacks one.
pub(crate) fn default_content_type() -> HeaderValue {
    HeaderValue::from_static("text/plain")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    #[test]
    fn error_signal_conversions() {
        let s = ErrorSignal::default();
        assert_eq!(s.status, 500);
        assert!(s.body.is_empty());

        assert_eq!(ErrorSignal::from(504).status, 504);

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let s = ErrorSignal::from((504, headers));
        assert_eq!(s.headers[header::CONTENT_TYPE], "application/json");

        let s = ErrorSignal::from((503, "Be right back..."));
        assert_eq!(s.status, 503);
        assert_eq!(&s.body[..], b"Be right back...");

        let s = ErrorSignal::from((503, vec!["Be ", "right back..."]));
        assert_eq!(&s.body[..], b"Be right back...");

        assert_eq!(ErrorSignal::from(42).status, 500);
    }

    #[test]
    fn event_names() {
        let names: Vec<_> = Event::ALL.iter().map(Event::to_string).collect();
        assert_eq!(
            names,
            ["receive", "pass", "miss", "fetch", "store", "hit", "deliver", "error"]
        );
    }

    #[test]
    fn registration_is_per_event_and_ordered() {
        let hooks = Hooks::new()
            .on(Event::Miss, |_| Ok(Directive::Continue))
            .on(Event::Miss, |_| Ok(Directive::Pass));

        assert_eq!(hooks.handlers(Event::Miss).len(), 2);
        assert!(hooks.handlers(Event::Hit).is_empty());
        assert!(!hooks.is_empty());
        assert!(Hooks::new().is_empty());
    }
}
