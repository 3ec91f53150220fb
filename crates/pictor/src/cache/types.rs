//! # Cache Types
//!
//! Common types shared across the caching system.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheType {
    /// Not served from cache (freshly downloaded, or no image at all).
    #[default]
    None,
    /// Served from the in-memory cache.
    Memory,
    /// Served from the disk cache.
    Disk,
}

impl CacheType {
    /// Whether the image was served from any cache layer.
    pub fn is_cached(&self) -> bool {
        !matches!(self, CacheType::None)
    }
}

/// Metadata persisted alongside a cached entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was cached (seconds since the Unix epoch).
    pub cached_at: u64,
    /// Size of the cached payload in bytes.
    pub size: u64,
    /// Content type of the payload, if known.
    pub content_type: Option<String>,
}

impl CacheMetadata {
    pub fn new(size: u64) -> Self {
        Self {
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            size,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}

/// Configuration for the default cache engine.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled at all.
    pub enabled: bool,
    /// Whether entries are persisted to disk in addition to memory.
    pub disk_enabled: bool,
    /// Directory for the disk cache. `None` uses a subdirectory of the
    /// system temp directory.
    pub disk_cache_path: Option<PathBuf>,
    /// Maximum size of the in-memory cache in bytes.
    pub max_memory_cache_size: u64,
    /// Time-to-live for in-memory entries. `None` keeps entries until
    /// evicted by size pressure.
    pub memory_ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            disk_enabled: true,
            disk_cache_path: None, // If None, we'll use the system temp dir
            max_memory_cache_size: 64 * 1024 * 1024, // 64MB
            memory_ttl: Some(Duration::from_secs(300)), // 5 minutes
        }
    }
}

/// Result of a cache operation.
pub type CacheResult<T> = std::result::Result<T, std::io::Error>;

/// Combine a cache key with the processor identity that produced the
/// cached variant.
///
/// Two processors applied to the same source image must not collide on
/// one entry, so the identity participates in the key.
pub(crate) fn entry_key(cache_key: &str, processor_ident: Option<&str>) -> String {
    match processor_ident {
        Some(ident) if !ident.is_empty() => format!("{cache_key}#{ident}"),
        _ => cache_key.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_type_is_cached() {
        assert!(!CacheType::None.is_cached());
        assert!(CacheType::Memory.is_cached());
        assert!(CacheType::Disk.is_cached());
    }

    #[test]
    fn test_entry_key_with_processor() {
        assert_eq!(entry_key("https://e.com/a.png", None), "https://e.com/a.png");
        assert_eq!(
            entry_key("https://e.com/a.png", Some("thumb-64")),
            "https://e.com/a.png#thumb-64"
        );
        assert_eq!(entry_key("k", Some("")), "k");
    }

    #[test]
    fn test_metadata_builder() {
        let meta = CacheMetadata::new(128).with_content_type(Some("image/webp".into()));
        assert_eq!(meta.size, 128);
        assert_eq!(meta.content_type.as_deref(), Some("image/webp"));
        assert!(meta.cached_at > 0);
    }
}
