//! # Memory Store
//!
//! In-memory cache layer built on Moka, evicting by total payload size.

use bytes::Bytes;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use crate::cache::providers::CacheStore;
use crate::cache::types::{CacheMetadata, CacheResult};

/// Entry in the memory store
#[derive(Clone)]
struct MemoryEntry {
    data: Bytes,
    metadata: CacheMetadata,
}

/// Size-bounded in-memory store.
pub struct MemoryStore {
    cache: MokaCache<String, MemoryEntry>,
    max_size: u64,
}

impl MemoryStore {
    /// Create a memory store with the given size limit and optional TTL.
    pub fn new(max_size_bytes: u64, ttl: Option<std::time::Duration>) -> Self {
        assert!(max_size_bytes > 0, "memory cache size must be greater than zero");

        // Size based eviction
        let mut builder = MokaCache::builder()
            .weigher(|_k, v: &MemoryEntry| v.data.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes);

        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }

        let cache = builder.build();

        debug!(
            max_size = max_size_bytes,
            ttl = ?ttl,
            "Memory store created"
        );

        Self {
            cache,
            max_size: max_size_bytes,
        }
    }

    #[cfg(test)]
    pub(crate) async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(self.cache.contains_key(key))
    }

    async fn get(&self, key: &str) -> CacheResult<Option<(Bytes, CacheMetadata)>> {
        if let Some(entry) = self.cache.get(key).await {
            return Ok(Some((entry.data.clone(), entry.metadata.clone())));
        }
        Ok(None)
    }

    async fn put(&self, key: String, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        // A single entry larger than the whole store can never be admitted
        if metadata.size > self.max_size {
            warn!(
                key = %key,
                size = metadata.size,
                max_size = self.max_size,
                "Entry too large for memory store, skipping"
            );
            return Ok(());
        }

        let entry = MemoryEntry { data, metadata };
        self.cache.insert(key, entry).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.cache.invalidate_all();
        debug!("Memory store cleared");
        Ok(())
    }
}
