use thiserror::Error;

use crate::digest::ContentDigest;
use crate::hooks::Event;
use crate::key::CacheKey;

/// Error type used across the origin and hook seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by meta or entity store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend could not complete the operation
    #[error("store backend failure: {0}")]
    Backend(String),

    /// An entry points at a body the entity store does not have
    #[error("body {0} is referenced but missing from the entity store")]
    MissingBody(ContentDigest),

    /// Every compare-and-swap attempt lost to a concurrent writer
    #[error("gave up writing {key} after {attempts} conflicting attempts")]
    Contention { key: CacheKey, attempts: usize },
}

/// Errors surfaced by [`CacheEngine::call`](crate::CacheEngine::call).
///
/// Store and hook failures are normally absorbed into a 500 response by the
/// error state; they only escape when the `error` hooks themselves fail.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("origin request failed: {0}")]
    Origin(#[source] BoxError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{event} hook failed: {source}")]
    Hook {
        event: Event,
        #[source]
        source: BoxError,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;
