//! # Default Cache Engine
//!
//! Two-layer cache: Moka-backed memory in front of a disk store. Disk
//! hits are promoted into memory so repeated lookups stay cheap.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io;
use tracing::warn;

use crate::cache::providers::{CacheStore, DiskStore, MemoryStore};
use crate::cache::types::{entry_key, CacheConfig, CacheMetadata, CacheResult, CacheType};
use crate::cache::ImageCache;
use crate::image::{Image, ImageSerializer, PassthroughSerializer};
use crate::options::RetrieveOptions;
use crate::resource::ImageResource;

/// The default [`ImageCache`]: memory and disk layers behind one facade.
#[derive(Clone)]
pub struct DefaultImageCache {
    memory: Arc<MemoryStore>,
    disk: Arc<DiskStore>,
    serializer: Arc<dyn ImageSerializer>,
    config: Arc<CacheConfig>,
}

impl DefaultImageCache {
    /// Create a cache engine with the specified configuration.
    pub async fn new(mut config: CacheConfig) -> io::Result<Self> {
        // If no disk cache path provided, use the system temp dir
        if config.disk_cache_path.is_none() {
            config.disk_cache_path = Some(std::env::temp_dir().join("pictor-cache"));
        }

        let cache_dir = config
            .disk_cache_path
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let config = Arc::new(config);

        let memory = Arc::new(MemoryStore::new(
            config.max_memory_cache_size,
            config.memory_ttl,
        ));

        let disk = Arc::new(DiskStore::new(
            cache_dir,
            config.disk_enabled && config.enabled,
        ));

        if config.enabled && config.disk_enabled {
            disk.ensure_initialized().await?;
        }

        Ok(Self {
            memory,
            disk,
            serializer: Arc::new(PassthroughSerializer),
            config,
        })
    }

    /// Replace the serializer used when a request does not supply one.
    pub fn with_serializer(mut self, serializer: Arc<dyn ImageSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Configuration reference.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn request_serializer(&self, options: &RetrieveOptions) -> Arc<dyn ImageSerializer> {
        options
            .serializer
            .clone()
            .unwrap_or_else(|| self.serializer.clone())
    }

    fn decode_entry(
        serializer: &dyn ImageSerializer,
        key: &str,
        data: &Bytes,
        metadata: &CacheMetadata,
    ) -> Option<Image> {
        let image = serializer.decode(data, metadata.content_type.as_deref());
        if image.is_none() {
            warn!(key = %key, "Cached bytes failed to decode, treating as miss");
        }
        image
    }
}

#[async_trait::async_trait]
impl ImageCache for DefaultImageCache {
    async fn lookup(
        &self,
        resource: &ImageResource,
        options: &RetrieveOptions,
    ) -> CacheResult<Option<(Image, CacheType)>> {
        if !self.config.enabled {
            return Ok(None);
        }

        let key = entry_key(resource.cache_key(), options.processor_ident.as_deref());
        let serializer = self.request_serializer(options);

        // Check the memory layer first
        if let Some((data, metadata)) = self.memory.get(&key).await? {
            if let Some(image) = Self::decode_entry(serializer.as_ref(), &key, &data, &metadata) {
                return Ok(Some((image, CacheType::Memory)));
            }
            return Ok(None);
        }

        // Fall back to disk and promote the entry into memory
        if let Some((data, metadata)) = self.disk.get(&key).await? {
            let _ = self
                .memory
                .put(key.clone(), data.clone(), metadata.clone())
                .await;

            if let Some(image) = Self::decode_entry(serializer.as_ref(), &key, &data, &metadata) {
                return Ok(Some((image, CacheType::Disk)));
            }
            return Ok(None);
        }

        Ok(None)
    }

    async fn store(
        &self,
        image: &Image,
        raw: Bytes,
        cache_key: &str,
        processor_ident: Option<&str>,
        serializer: &dyn ImageSerializer,
        to_disk: bool,
    ) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let key = entry_key(cache_key, processor_ident);

        let data = if raw.is_empty() {
            match serializer.encode(image) {
                Some(encoded) => encoded,
                None => {
                    warn!(key = %key, "Serializer produced no bytes, skipping store");
                    return Ok(());
                }
            }
        } else {
            raw
        };

        let metadata = CacheMetadata::new(data.len() as u64)
            .with_content_type(image.content_type().map(str::to_owned));

        let _ = self
            .memory
            .put(key.clone(), data.clone(), metadata.clone())
            .await;

        if to_disk && self.config.disk_enabled {
            self.disk.put(key, data, metadata).await
        } else {
            Ok(())
        }
    }

    async fn remove(&self, cache_key: &str, processor_ident: Option<&str>) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let key = entry_key(cache_key, processor_ident);
        let mem_result = self.memory.remove(&key).await;
        let disk_result = self.disk.remove(&key).await;

        disk_result.or(mem_result)
    }

    async fn clear(&self) -> CacheResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mem_result = self.memory.clear().await;
        let disk_result = self.disk.clear().await;

        disk_result.or(mem_result)
    }
}
