//! The request pipeline.
//!
//! Every request walks a small state machine:
//!
//! ```text
//! receive ─┬─> pass ──────────────────────────────> (origin response, untouched)
//!          └─> lookup ─┬─> miss ──> fetch ─┬─> store ─> deliver
//!                      ├─> (stale) fetch ──┘        └─> deliver
//!                      └─> hit ─────────────────────────> deliver
//! any stage ──> error
//! ```
//!
//! Origin failures escape [`CacheEngine::call`] as [`CacheError::Origin`].
//! Store and hook failures are logged and turned into a 500 by the error
//! stage, whose own hooks may still rewrite the response.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::context::Context;
use crate::digest::ContentDigest;
use crate::error::{CacheError, Result, StoreError};
use crate::freshness::Freshness;
use crate::headers::{HeaderMapExt, X_CONTENT_DIGEST, X_ORIGIN_STATUS};
use crate::hooks::{default_content_type, Directive, ErrorSignal, Event, Hooks};
use crate::key::CacheKey;
use crate::memory::{MemoryEntityStore, MemoryMetaStore};
use crate::origin::Origin;
use crate::policy;
use crate::store::{EntityStore, MetaStore, StoredEntry, WriteOutcome};

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lifetime granted to cacheable responses that carry none of their own.
    pub default_ttl: Option<Duration>,
    /// Compare-and-swap attempts per bucket write before giving up.
    pub max_store_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_ttl: None,
            max_store_attempts: 16,
        }
    }
}

/// Request extension overriding [`EngineConfig::default_ttl`] for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultTtl(pub Duration);

/// Headers from a 304 that describe the message, not the stored representation.
const FRAMING: [HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

enum Step {
    Receive,
    Pass,
    Lookup,
    Miss,
    Fetch,
    Store,
    Hit,
    Deliver,
    Error(ErrorSignal),
    Done,
}

/// An RFC 7234 shared cache in front of an [`Origin`].
pub struct CacheEngine {
    origin: Arc<dyn Origin>,
    meta: Arc<dyn MetaStore>,
    entities: Arc<dyn EntityStore>,
    hooks: Hooks,
    config: EngineConfig,
}

/// Assembles a [`CacheEngine`]; see [`CacheEngine::builder`].
pub struct CacheEngineBuilder {
    origin: Arc<dyn Origin>,
    meta: Option<Arc<dyn MetaStore>>,
    entities: Option<Arc<dyn EntityStore>>,
    hooks: Hooks,
    config: EngineConfig,
}

impl CacheEngineBuilder {
    /// Use `store` for bucket metadata instead of a fresh [`MemoryMetaStore`].
    pub fn meta_store(mut self, store: Arc<dyn MetaStore>) -> Self {
        self.meta = Some(store);
        self
    }

    /// Use `store` for bodies instead of a fresh [`MemoryEntityStore`].
    pub fn entity_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.entities = Some(store);
        self
    }

    /// Replace the event hooks.
    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the whole engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for setting [`EngineConfig::default_ttl`].
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    /// Finish, filling in the in-memory stores where none were given.
    pub fn build(self) -> CacheEngine {
        CacheEngine {
            origin: self.origin,
            meta: self
                .meta
                .unwrap_or_else(|| Arc::new(MemoryMetaStore::new())),
            entities: self
                .entities
                .unwrap_or_else(|| Arc::new(MemoryEntityStore::new())),
            hooks: self.hooks,
            config: self.config,
        }
    }
}

impl CacheEngine {
    /// Start building an engine. Stores default to the in-memory ones.
    pub fn builder(origin: impl Origin + 'static) -> CacheEngineBuilder {
        CacheEngineBuilder {
            origin: Arc::new(origin),
            meta: None,
            entities: None,
            hooks: Hooks::new(),
            config: EngineConfig::default(),
        }
    }

    /// The bucket store this engine reads and writes.
    pub fn meta_store(&self) -> &Arc<dyn MetaStore> {
        &self.meta
    }

    /// The body store this engine reads and writes.
    pub fn entity_store(&self) -> &Arc<dyn EntityStore> {
        &self.entities
    }

    /// Settings this engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Forget every stored variant of `key`.
    pub async fn purge(&self, key: &CacheKey) -> Result<()> {
        self.meta.purge(key).await?;
        tracing::info!(key = %key, "purged");
        Ok(())
    }

    /// Run `request` through the cache. The returned response carries a
    /// [`Trace`](crate::Trace) extension.
    pub async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        let mut ctx = Context::new(request);
        let mut step = Step::Receive;

        loop {
            let next = match step {
                Step::Error(signal) => return self.fail(ctx, signal),
                Step::Done if ctx.response.is_some() => return Ok(ctx.finish()),
                Step::Done => Ok(Step::Error(ErrorSignal::default())),
                step => self.advance(step, &mut ctx).await,
            };

            step = match next {
                Ok(next) => next,
                Err(err @ CacheError::Origin(_)) => return Err(err),
                Err(err) => {
                    tracing::error!(key = %ctx.key, error = %err, "cache pipeline failed");
                    Step::Error(ErrorSignal::default())
                }
            };
        }
    }

    async fn advance(&self, step: Step, ctx: &mut Context) -> Result<Step> {
        match step {
            Step::Receive => self.receive(ctx),
            Step::Pass => self.pass(ctx).await,
            Step::Lookup => self.lookup(ctx).await,
            Step::Miss => self.miss(ctx),
            Step::Fetch => self.fetch(ctx).await,
            Step::Store => self.store(ctx).await,
            Step::Hit => self.hit(ctx).await,
            Step::Deliver => self.deliver(ctx),
            terminal @ (Step::Error(_) | Step::Done) => Ok(terminal),
        }
    }

    /// Record `event`, run its hooks and translate the directive.
    fn fire(&self, event: Event, ctx: &mut Context) -> Result<Option<Step>> {
        ctx.trace.record(event);
        tracing::debug!(key = %ctx.key, event = %event, "cache event");

        let directive = self
            .hooks
            .run(event, ctx)
            .map_err(|source| CacheError::Hook { event, source })?;

        Ok(match directive {
            Directive::Continue => None,
            Directive::Pass if event == Event::Receive => Some(Step::Pass),
            Directive::Pass => {
                tracing::debug!(event = %event, "pass directive ignored after receive");
                None
            }
            Directive::Error(signal) => Some(Step::Error(signal)),
        })
    }

    fn receive(&self, ctx: &mut Context) -> Result<Step> {
        if let Some(diverted) = self.fire(Event::Receive, ctx)? {
            return Ok(diverted);
        }
        // Hooks may have rewritten the target.
        ctx.key = CacheKey::from_request(&ctx.request);
        if !policy::is_cacheable_method(ctx.request.method()) {
            return Ok(Step::Pass);
        }
        if policy::wants_reload(ctx.request.headers()) {
            return Ok(self.miss_or_pass(ctx));
        }
        Ok(Step::Lookup)
    }

    /// HEAD is only answered from a fresh entry; anything else goes upstream as is.
    fn miss_or_pass(&self, ctx: &Context) -> Step {
        if ctx.request.method() == Method::HEAD {
            Step::Pass
        } else {
            Step::Miss
        }
    }

    async fn pass(&self, ctx: &mut Context) -> Result<Step> {
        if let Some(diverted) = self.fire(Event::Pass, ctx)? {
            return Ok(diverted);
        }
        let response = self
            .origin
            .call(clone_request(&ctx.request))
            .await
            .map_err(CacheError::Origin)?;
        ctx.mark_origin_invoked();
        ctx.response = Some(response);
        Ok(Step::Done)
    }

    async fn lookup(&self, ctx: &mut Context) -> Result<Step> {
        let bucket = self.meta.read(&ctx.key).await?;
        let Some(entry) = bucket.resolve(ctx.request.headers()).cloned() else {
            tracing::debug!(key = %ctx.key, variants = bucket.entries.len(), "no matching variant");
            return Ok(self.miss_or_pass(ctx));
        };

        let freshness = Freshness::evaluate(&entry.response.headers, SystemTime::now());
        ctx.entry = Some(entry);

        if freshness.is_fresh() {
            return Ok(Step::Hit);
        }
        tracing::debug!(
            key = %ctx.key,
            ttl = freshness.ttl,
            age = freshness.age,
            "stored entry is stale"
        );
        if ctx.request.method() == Method::HEAD {
            return Ok(Step::Pass);
        }
        Ok(Step::Fetch)
    }

    fn miss(&self, ctx: &mut Context) -> Result<Step> {
        if let Some(diverted) = self.fire(Event::Miss, ctx)? {
            return Ok(diverted);
        }
        Ok(Step::Fetch)
    }

    async fn fetch(&self, ctx: &mut Context) -> Result<Step> {
        let mut outbound = clone_request(&ctx.request);
        let headers = outbound.headers_mut();
        headers.remove(header::IF_NONE_MATCH);
        headers.remove(header::IF_MODIFIED_SINCE);
        if let Some(stale) = &ctx.entry {
            copy_validators(&stale.response.headers, headers);
        }

        let response = self
            .origin
            .call(outbound)
            .await
            .map_err(CacheError::Origin)?;
        ctx.mark_origin_invoked();

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(stale) = ctx.entry.clone() {
                return self.revalidated(ctx, stale, response.into_parts().0.headers).await;
            }
        }

        let (mut parts, body) = response.into_parts();
        if !parts.headers.contains_key(header::DATE) {
            parts.headers.set_http_date(header::DATE, SystemTime::now());
        }
        self.apply_policy(&ctx.request, parts.status, &mut parts.headers);
        ctx.response = Some(Response::from_parts(parts, body));

        if let Some(diverted) = self.fire(Event::Fetch, ctx)? {
            return Ok(diverted);
        }

        match &ctx.response {
            Some(response) if policy::is_storable(&ctx.request, response) => Ok(Step::Store),
            _ => Ok(Step::Deliver),
        }
    }

    /// Fold a 304 into the stale entry it confirms.
    async fn revalidated(
        &self,
        ctx: &mut Context,
        stale: StoredEntry,
        not_modified: HeaderMap,
    ) -> Result<Step> {
        let digest = stale.digest().ok_or_else(|| {
            StoreError::Backend(format!("entry under {} has no content digest", ctx.key))
        })?;
        let body = self
            .entities
            .get(&digest)
            .await?
            .ok_or(StoreError::MissingBody(digest))?;

        let mut headers = stale.response.headers;
        headers.remove(header::AGE);
        for name in not_modified.keys() {
            if FRAMING.contains(name) || *name == X_CONTENT_DIGEST {
                continue;
            }
            headers.remove(name);
            for value in not_modified.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        if !not_modified.contains_key(header::DATE) {
            headers.set_http_date(header::DATE, SystemTime::now());
        }
        headers.insert(X_ORIGIN_STATUS, HeaderValue::from_static("304"));
        self.apply_policy(&ctx.request, stale.response.status, &mut headers);

        ctx.response = Some(build_response(stale.response.status, headers, body));
        ctx.mark_validated();
        tracing::debug!(key = %ctx.key, "stored entry revalidated");

        if let Some(diverted) = self.fire(Event::Fetch, ctx)? {
            return Ok(diverted);
        }

        match ctx.response.as_mut() {
            Some(response) if policy::is_storable(&ctx.request, &*response) => Ok(Step::Store),
            Some(response) => {
                // The stale row keeps its old headers; this copy is not stored.
                response.headers_mut().remove(X_CONTENT_DIGEST);
                tracing::debug!(key = %ctx.key, "revalidated response is not storable");
                Ok(Step::Deliver)
            }
            None => Ok(Step::Deliver),
        }
    }

    /// Header rewrites every origin response gets before the storability check.
    fn apply_policy(&self, request: &Request<Bytes>, status: StatusCode, headers: &mut HeaderMap) {
        if let Some(ttl) = self.default_ttl(request) {
            policy::apply_default_ttl(status, headers, ttl);
        }
        if policy::carries_credentials(request.headers()) {
            policy::privatize_unless_public(headers);
        }
    }

    async fn store(&self, ctx: &mut Context) -> Result<Step> {
        let Some(response) = ctx.response.as_mut() else {
            return Ok(Step::Error(ErrorSignal::default()));
        };

        let digest = ContentDigest::of(response.body());
        self.entities.put(&digest, response.body().clone()).await?;
        response.headers_mut().set_content_digest(&digest);

        let entry = StoredEntry::new(
            ctx.request.headers(),
            response.status(),
            response.headers().clone(),
        );
        self.write_entry(&ctx.key, entry).await?;

        let age = Freshness::evaluate(response.headers(), SystemTime::now()).age;
        response.headers_mut().set_age(age);
        tracing::debug!(key = %ctx.key, digest = %digest, "stored");

        if let Some(diverted) = self.fire(Event::Store, ctx)? {
            return Ok(diverted);
        }
        Ok(Step::Deliver)
    }

    /// Compare-and-swap `entry` into its bucket, re-reading on conflict.
    async fn write_entry(&self, key: &CacheKey, entry: StoredEntry) -> Result<()> {
        let attempts = self.config.max_store_attempts.max(1);
        for attempt in 1..=attempts {
            let bucket = self.meta.read(key).await?;
            match self.meta.write(key, bucket.version, entry.clone()).await? {
                WriteOutcome::Written => return Ok(()),
                WriteOutcome::Conflict => {
                    tracing::debug!(key = %key, attempt, "bucket changed during write, retrying");
                }
            }
        }
        tracing::warn!(key = %key, attempts, "giving up on contended bucket");
        Err(StoreError::Contention {
            key: key.clone(),
            attempts,
        }
        .into())
    }

    async fn hit(&self, ctx: &mut Context) -> Result<Step> {
        let Some(entry) = ctx.entry.clone() else {
            return Ok(self.miss_or_pass(ctx));
        };

        let body = match entry.digest() {
            Some(digest) => self.entities.get(&digest).await?,
            None => None,
        };
        let Some(body) = body else {
            tracing::warn!(key = %ctx.key, "stored entry has lost its body, refetching");
            ctx.entry = None;
            return Ok(self.miss_or_pass(ctx));
        };

        let mut headers = entry.response.headers;
        let age = Freshness::evaluate(&headers, SystemTime::now()).age;
        headers.set_age(age);
        ctx.response = Some(build_response(entry.response.status, headers, body));

        if let Some(diverted) = self.fire(Event::Hit, ctx)? {
            return Ok(diverted);
        }
        Ok(Step::Deliver)
    }

    fn deliver(&self, ctx: &mut Context) -> Result<Step> {
        if let Some(diverted) = self.fire(Event::Deliver, ctx)? {
            return Ok(diverted);
        }
        let is_head = ctx.request.method() == Method::HEAD;
        if let Some(response) = ctx.response.as_mut() {
            if not_modified_for(ctx.request.headers(), response) {
                *response.status_mut() = StatusCode::NOT_MODIFIED;
                *response.body_mut() = Bytes::new();
                response.headers_mut().remove(header::CONTENT_LENGTH);
                response.headers_mut().remove(header::CONTENT_TYPE);
            } else if is_head {
                let len = response.body().len();
                response
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
                *response.body_mut() = Bytes::new();
            }
        }
        Ok(Step::Done)
    }

    /// Terminal error stage. Hook failures here have nowhere left to go.
    fn fail(&self, mut ctx: Context, signal: ErrorSignal) -> Result<Response<Bytes>> {
        ctx.trace.record(Event::Error);
        tracing::debug!(key = %ctx.key, status = signal.status.as_u16(), "cache event error");

        let ErrorSignal {
            status,
            mut headers,
            body,
        } = signal;
        if !body.is_empty() && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, default_content_type());
        }
        ctx.response = Some(build_response(status, headers, body));

        self.hooks
            .run(Event::Error, &mut ctx)
            .map_err(|source| CacheError::Hook {
                event: Event::Error,
                source,
            })?;

        Ok(ctx.finish())
    }

    fn default_ttl(&self, request: &Request<Bytes>) -> Option<Duration> {
        request
            .extensions()
            .get::<DefaultTtl>()
            .map(|ttl| ttl.0)
            .or(self.config.default_ttl)
    }
}

fn clone_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut out = Request::new(request.body().clone());
    *out.method_mut() = request.method().clone();
    *out.uri_mut() = request.uri().clone();
    *out.version_mut() = request.version();
    *out.headers_mut() = request.headers().clone();
    *out.extensions_mut() = request.extensions().clone();
    out
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Bytes) -> Response<Bytes> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn copy_validators(stored: &HeaderMap, outbound: &mut HeaderMap) {
    if let Some(etag) = stored.get(header::ETAG) {
        outbound.insert(header::IF_NONE_MATCH, etag.clone());
    }
    if let Some(last_modified) = stored.get(header::LAST_MODIFIED) {
        outbound.insert(header::IF_MODIFIED_SINCE, last_modified.clone());
    }
}

/// Whether the client's own conditional headers are satisfied by a 200.
/// `If-None-Match` takes precedence over `If-Modified-Since`.
fn not_modified_for(request: &HeaderMap, response: &Response<Bytes>) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    let mut tags = request
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .peekable();
    if tags.peek().is_some() {
        let etag = response.headers().etag().map(opaque_tag);
        return tags.any(|tag| tag == "*" || Some(opaque_tag(tag)) == etag);
    }

    match (
        request.http_date(&header::IF_MODIFIED_SINCE),
        response.headers().last_modified(),
    ) {
        (Some(since), Some(modified)) => modified <= since,
        _ => false,
    }
}

/// Weak comparison: `W/"x"` and `"x"` name the same representation.
fn opaque_tag(tag: &str) -> &str {
    tag.trim().trim_start_matches("W/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(pairs: &[(HeaderName, &'static str)]) -> Response<Bytes> {
        let mut res = Response::new(Bytes::from_static(b"body"));
        for (name, value) in pairs {
            res.headers_mut()
                .append(name.clone(), HeaderValue::from_static(value));
        }
        res
    }

    fn request_with(pairs: &[(HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    const LM: &str = "Sun, 06 Nov 1994 08:49:37 GMT";
    const LATER: &str = "Mon, 07 Nov 1994 08:49:37 GMT";

    #[test]
    fn if_none_match_lists_and_star() {
        let res = response_with(&[(header::ETAG, "\"b\"")]);
        assert!(not_modified_for(&request_with(&[(header::IF_NONE_MATCH, "\"a\", \"b\"")]), &res));
        assert!(not_modified_for(&request_with(&[(header::IF_NONE_MATCH, "*")]), &res));
        assert!(not_modified_for(&request_with(&[(header::IF_NONE_MATCH, "W/\"b\"")]), &res));
        assert!(!not_modified_for(&request_with(&[(header::IF_NONE_MATCH, "\"c\"")]), &res));
    }

    #[test]
    fn if_none_match_beats_if_modified_since() {
        let res = response_with(&[(header::ETAG, "\"b\""), (header::LAST_MODIFIED, LM)]);
        let req = request_with(&[
            (header::IF_NONE_MATCH, "\"nope\""),
            (header::IF_MODIFIED_SINCE, LATER),
        ]);
        assert!(!not_modified_for(&req, &res));
    }

    #[test]
    fn if_modified_since_compares_dates() {
        let res = response_with(&[(header::LAST_MODIFIED, LM)]);
        assert!(not_modified_for(&request_with(&[(header::IF_MODIFIED_SINCE, LM)]), &res));
        assert!(not_modified_for(&request_with(&[(header::IF_MODIFIED_SINCE, LATER)]), &res));

        let newer = response_with(&[(header::LAST_MODIFIED, LATER)]);
        assert!(!not_modified_for(&request_with(&[(header::IF_MODIFIED_SINCE, LM)]), &newer));
    }

    #[test]
    fn only_200_short_circuits() {
        let mut res = response_with(&[(header::ETAG, "\"b\"")]);
        *res.status_mut() = StatusCode::NOT_FOUND;
        assert!(!not_modified_for(&request_with(&[(header::IF_NONE_MATCH, "*")]), &res));
    }

    #[test]
    fn validators_go_on_the_outbound_request() {
        let stored = request_with(&[(header::ETAG, "\"v1\""), (header::LAST_MODIFIED, LM)]);
        let mut outbound = HeaderMap::new();
        copy_validators(&stored, &mut outbound);
        assert_eq!(outbound[header::IF_NONE_MATCH], "\"v1\"");
        assert_eq!(outbound[header::IF_MODIFIED_SINCE], LM);
    }

    #[test]
    fn request_clone_keeps_extensions() {
        let mut req = Request::builder()
            .method(Method::HEAD)
            .uri("http://example.org/x")
            .header(header::ACCEPT, "text/html")
            .body(Bytes::from_static(b"payload"))
            .unwrap();
        req.extensions_mut().insert(DefaultTtl(Duration::from_secs(3)));

        let copy = clone_request(&req);
        assert_eq!(copy.method(), Method::HEAD);
        assert_eq!(copy.uri(), req.uri());
        assert_eq!(copy.headers(), req.headers());
        assert_eq!(copy.body(), req.body());
        assert_eq!(
            copy.extensions().get::<DefaultTtl>(),
            Some(&DefaultTtl(Duration::from_secs(3)))
        );
    }
}
