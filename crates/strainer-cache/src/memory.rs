//! In-process [`MetaStore`] and [`EntityStore`].
//!
//! Both spread their maps over 64 independent shards, each behind its own
//! `RwLock`, so concurrent requests for different keys rarely contend.
//! Shard selection hashes the key with `ahash`.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

use crate::digest::ContentDigest;
use crate::error::StoreError;
use crate::key::CacheKey;
use crate::store::{EntityStore, MetaBucket, MetaStore, StoredEntry, WriteOutcome};

/// Must be a power of two for the bitmask below.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

struct Shards<K, V> {
    shards: Box<[RwLock<HashMap<K, V>>]>,
}

impl<K: Hash + Eq, V> Shards<K, V> {
    fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    #[inline]
    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        &self.shards[(hash & SHARD_MASK) as usize]
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

/// Reference [`MetaStore`]: a sharded map from [`CacheKey`] to [`MetaBucket`].
pub struct MemoryMetaStore {
    buckets: Shards<CacheKey, MetaBucket>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self {
            buckets: Shards::new(),
        }
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn read(&self, key: &CacheKey) -> Result<MetaBucket, StoreError> {
        let shard = self.buckets.shard(key).read();
        Ok(shard.get(key).cloned().unwrap_or_default())
    }

    async fn write(
        &self,
        key: &CacheKey,
        expected_version: u64,
        entry: StoredEntry,
    ) -> Result<WriteOutcome, StoreError> {
        let mut shard = self.buckets.shard(key).write();
        let bucket = shard.entry(key.clone()).or_default();
        if bucket.version != expected_version {
            return Ok(WriteOutcome::Conflict);
        }
        bucket.upsert(entry);
        Ok(WriteOutcome::Written)
    }

    async fn purge(&self, key: &CacheKey) -> Result<(), StoreError> {
        // Keep the version moving so a writer that read before the purge
        // cannot resurrect the old bucket.
        let mut shard = self.buckets.shard(key).write();
        if let Some(bucket) = shard.get_mut(key) {
            bucket.entries.clear();
            bucket.version += 1;
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self
            .buckets
            .shards
            .iter()
            .map(|s| s.read().values().filter(|b| !b.is_empty()).count())
            .sum())
    }
}

/// Reference [`EntityStore`]: bodies keyed by their SHA-256 digest.
pub struct MemoryEntityStore {
    bodies: Shards<ContentDigest, Bytes>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self {
            bodies: Shards::new(),
        }
    }
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn put(&self, digest: &ContentDigest, body: Bytes) -> Result<(), StoreError> {
        let mut shard = self.bodies.shard(digest).write();
        shard.entry(digest.clone()).or_insert(body);
        Ok(())
    }

    async fn get(&self, digest: &ContentDigest) -> Result<Option<Bytes>, StoreError> {
        Ok(self.bodies.shard(digest).read().get(digest).cloned())
    }

    async fn contains(&self, digest: &ContentDigest) -> Result<bool, StoreError> {
        Ok(self.bodies.shard(digest).read().contains_key(digest))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.bodies.len())
    }
}
