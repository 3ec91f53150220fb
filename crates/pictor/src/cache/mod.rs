//! # Cache System
//!
//! Caching for retrieved images: the facade the retrieval manager talks
//! to, and a default engine composing an in-memory layer with a disk
//! layer. Eviction policy and disk quota are best-effort concerns of the
//! individual stores.

use async_trait::async_trait;
use bytes::Bytes;

use crate::image::{Image, ImageSerializer};
use crate::options::RetrieveOptions;
use crate::resource::ImageResource;

// Module declarations
mod manager;
pub mod providers;
mod types;

// Re-export primary types from our various modules
pub use manager::DefaultImageCache;
pub use types::{CacheConfig, CacheMetadata, CacheResult, CacheType};

pub use providers::{CacheStore, DiskStore, MemoryStore};

/// The cache facade consumed by the retrieval manager.
///
/// Implementations decide layering and persistence; the manager only relies
/// on `lookup` reporting where a hit came from and `store` writing an entry
/// it can later look up under the same key and processor identity.
#[async_trait]
pub trait ImageCache: Send + Sync {
    /// Look up a cached image for the resource.
    async fn lookup(
        &self,
        resource: &ImageResource,
        options: &RetrieveOptions,
    ) -> CacheResult<Option<(Image, CacheType)>>;

    /// Store a freshly retrieved image.
    ///
    /// `raw` holds the bytes as they arrived from the network; when empty,
    /// the serializer is asked to encode the image instead. `to_disk`
    /// controls whether the entry is persisted beyond the memory layer.
    async fn store(
        &self,
        image: &Image,
        raw: Bytes,
        cache_key: &str,
        processor_ident: Option<&str>,
        serializer: &dyn ImageSerializer,
        to_disk: bool,
    ) -> CacheResult<()>;

    /// Remove the entry for a key, succeeding if it was absent.
    async fn remove(&self, cache_key: &str, processor_ident: Option<&str>) -> CacheResult<()>;

    /// Remove every entry.
    async fn clear(&self) -> CacheResult<()>;
}
