use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::digest::ContentDigest;
use crate::error::StoreError;
use crate::headers::{HeaderMapExt, X_ORIGIN_STATUS};
use crate::key::CacheKey;
use crate::variant::Vary;

/// Stored status and headers of a cached response. The body lives in the
/// entity store under the digest named by `X-Content-Digest`.
#[derive(Clone, Debug)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// One row of a [`MetaBucket`].
#[derive(Clone, Debug)]
pub struct StoredEntry {
    /// The request headers named by the response's `Vary`, captured at
    /// store time.
    pub fingerprint: HeaderMap,
    pub response: StoredResponse,
}

impl StoredEntry {
    /// Capture the vary-relevant subset of `request_headers` for a response.
    pub fn new(request_headers: &HeaderMap, status: StatusCode, mut headers: HeaderMap) -> Self {
        headers.remove(X_ORIGIN_STATUS);
        let fingerprint = Vary::from_headers(&headers).fingerprint(request_headers);
        Self {
            fingerprint,
            response: StoredResponse { status, headers },
        }
    }

    pub fn vary(&self) -> Vary {
        Vary::from_headers(&self.response.headers)
    }

    pub fn digest(&self) -> Option<ContentDigest> {
        self.response.headers.content_digest()
    }

    /// Whether `request_headers` select this entry.
    pub fn matches(&self, request_headers: &HeaderMap) -> bool {
        self.vary().matches(&self.fingerprint, request_headers)
    }

    /// Same `Vary` and same fingerprint: `other` supersedes `self`.
    pub fn same_variant(&self, other: &StoredEntry) -> bool {
        let vary = self.vary();
        vary == other.vary() && vary.same_fingerprint(&self.fingerprint, &other.fingerprint)
    }
}

/// All entries stored under one [`CacheKey`], newest first.
///
/// `version` increases on every successful write and is the token for
/// [`MetaStore::write`]'s compare-and-swap. A missing key reads as an empty
/// bucket at version 0.
#[derive(Clone, Debug, Default)]
pub struct MetaBucket {
    pub version: u64,
    pub entries: Vec<StoredEntry>,
}

impl MetaBucket {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry whose fingerprint matches the request.
    pub fn resolve(&self, request_headers: &HeaderMap) -> Option<&StoredEntry> {
        self.entries.iter().find(|e| e.matches(request_headers))
    }

    /// Drop the entry `entry` supersedes, put `entry` first, bump the version.
    pub fn upsert(&mut self, entry: StoredEntry) {
        self.entries.retain(|existing| !existing.same_variant(&entry));
        self.entries.insert(0, entry);
        self.version += 1;
    }
}

/// Result of a conditional bucket write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The bucket moved past the expected version; re-read and retry.
    Conflict,
}

/// Cache key → bucket of stored entries.
///
/// Implementations must make [`write`](MetaStore::write) atomic with respect
/// to other writers of the same key.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Current bucket for `key`, empty if none.
    async fn read(&self, key: &CacheKey) -> Result<MetaBucket, StoreError>;

    /// Upsert `entry` (see [`MetaBucket::upsert`]) if the bucket is still at
    /// `expected_version`.
    async fn write(
        &self,
        key: &CacheKey,
        expected_version: u64,
        entry: StoredEntry,
    ) -> Result<WriteOutcome, StoreError>;

    /// Forget every entry under `key`. Purging a missing key is not an error.
    async fn purge(&self, key: &CacheKey) -> Result<(), StoreError>;

    /// Number of non-empty buckets.
    async fn len(&self) -> Result<usize, StoreError>;
}

/// Content-addressed body storage.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Store `body` under `digest`. Storing the same digest twice is a no-op.
    async fn put(&self, digest: &ContentDigest, body: Bytes) -> Result<(), StoreError>;

    async fn get(&self, digest: &ContentDigest) -> Result<Option<Bytes>, StoreError>;

    async fn contains(&self, digest: &ContentDigest) -> Result<bool, StoreError>;

    /// Number of stored bodies.
    async fn len(&self) -> Result<usize, StoreError>;
}
