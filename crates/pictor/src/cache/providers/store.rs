//! # Cache Store
//!
//! The storage interface both cache layers implement.

use async_trait::async_trait;
use bytes::Bytes;

use crate::cache::types::{CacheMetadata, CacheResult};

/// One layer of byte storage keyed by entry key.
///
/// Keys arriving here already include the processor identity; stores treat
/// them as opaque strings.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Check whether the store holds an entry for the key.
    async fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Fetch an entry and its metadata.
    async fn get(&self, key: &str) -> CacheResult<Option<(Bytes, CacheMetadata)>>;

    /// Insert or replace an entry.
    async fn put(&self, key: String, data: Bytes, metadata: CacheMetadata) -> CacheResult<()>;

    /// Remove an entry, succeeding if it was absent.
    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Remove every entry.
    async fn clear(&self) -> CacheResult<()>;
}
