use bytes::Bytes;
use http::{Request, Response};

use crate::hooks::Event;
use crate::key::CacheKey;
use crate::store::StoredEntry;

/// Events fired while handling one request, in order.
///
/// Attached to every response the engine returns, readable with
/// `response.extensions().get::<Trace>()`.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<Event>,
    origin_invoked: bool,
    validated: bool,
}

impl Trace {
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn performed(&self, event: Event) -> bool {
        self.events.contains(&event)
    }

    /// Whether the origin was contacted at all.
    pub fn origin_invoked(&self) -> bool {
        self.origin_invoked
    }

    /// Whether a stale entry was confirmed by a 304 from the origin.
    pub fn validated(&self) -> bool {
        self.validated
    }

    pub(crate) fn record(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// Per-request state handed to every hook.
#[derive(Debug)]
pub struct Context {
    pub(crate) request: Request<Bytes>,
    pub(crate) key: CacheKey,
    pub(crate) entry: Option<StoredEntry>,
    pub(crate) response: Option<Response<Bytes>>,
    pub(crate) trace: Trace,
}

impl Context {
    pub(crate) fn new(request: Request<Bytes>) -> Self {
        let key = CacheKey::from_request(&request);
        Self {
            request,
            key,
            entry: None,
            response: None,
            trace: Trace::default(),
        }
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Changes made during `receive` are seen by the origin.
    pub fn request_mut(&mut self) -> &mut Request<Bytes> {
        &mut self.request
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The stored entry selected by lookup, if any.
    pub fn entry(&self) -> Option<&StoredEntry> {
        self.entry.as_ref()
    }

    /// The response being assembled. `None` before fetch or hit.
    pub fn response(&self) -> Option<&Response<Bytes>> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response<Bytes>> {
        self.response.as_mut()
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn origin_invoked(&self) -> bool {
        self.trace.origin_invoked
    }

    pub(crate) fn mark_origin_invoked(&mut self) {
        self.trace.origin_invoked = true;
    }

    pub(crate) fn mark_validated(&mut self) {
        self.trace.validated = true;
    }

    /// Hand the finished response back with the trace attached.
    pub(crate) fn finish(self) -> Response<Bytes> {
        let Context {
            response, trace, ..
        } = self;
        let mut response = response.unwrap_or_default();
        response.extensions_mut().insert(trace);
        response
    }
}
