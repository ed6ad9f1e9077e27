//! An RFC 7234 shared HTTP cache that sits in front of any async origin.
//!
//! ```no_run
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use strainer_cache::{origin_fn, BoxError, CacheEngine, Event, Trace};
//!
//! # async fn demo() -> strainer_cache::Result<()> {
//! let engine = CacheEngine::builder(origin_fn(|_req| async {
//!     let mut res = Response::new(Bytes::from_static(b"Hello World"));
//!     res.headers_mut()
//!         .insert("cache-control", "max-age=5".parse().unwrap());
//!     Ok::<_, BoxError>(res)
//! }))
//! .build();
//!
//! let req = Request::get("http://example.org/").body(Bytes::new()).unwrap();
//! let res = engine.call(req).await?;
//! assert!(res.extensions().get::<Trace>().unwrap().performed(Event::Store));
//! # Ok(())
//! # }
//! ```

pub mod cache_control;
pub mod context;
pub mod digest;
pub mod engine;
pub mod error;
pub mod freshness;
pub mod headers;
pub mod hooks;
pub mod key;
pub mod memory;
pub mod origin;
pub mod policy;
pub mod store;
pub mod variant;

pub use cache_control::CacheControl;
pub use context::{Context, Trace};
pub use digest::ContentDigest;
pub use engine::{CacheEngine, CacheEngineBuilder, DefaultTtl, EngineConfig};
pub use error::{BoxError, CacheError, Result, StoreError};
pub use freshness::Freshness;
pub use headers::{HeaderMapExt, X_CONTENT_DIGEST, X_ORIGIN_STATUS};
pub use hooks::{Directive, ErrorSignal, Event, Handler, Hooks};
pub use key::CacheKey;
pub use memory::{MemoryEntityStore, MemoryMetaStore};
pub use origin::{origin_fn, Origin, OriginFn};
pub use store::{EntityStore, MetaBucket, MetaStore, StoredEntry, StoredResponse, WriteOutcome};
pub use variant::Vary;
