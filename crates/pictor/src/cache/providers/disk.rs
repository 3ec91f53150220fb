//! # Disk Store
//!
//! Persistent cache layer: one data file per entry plus a JSON sidecar
//! holding its metadata. Writes go through a temporary file and a rename
//! so a crash never leaves a half-written entry behind.

use std::path::PathBuf;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::cache::providers::CacheStore;
use crate::cache::types::{CacheMetadata, CacheResult};

#[derive(Debug, Clone)]
pub struct DiskStore {
    cache_dir: PathBuf,
    initialized: std::sync::Arc<std::sync::atomic::AtomicBool>,
    enabled: bool,
}

impl DiskStore {
    /// Create a disk store rooted at the given directory.
    pub fn new(cache_dir: PathBuf, enabled: bool) -> Self {
        Self {
            cache_dir,
            initialized: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            enabled,
        }
    }

    /// Initialize the cache directory.
    pub(crate) async fn ensure_initialized(&self) -> io::Result<()> {
        use std::sync::atomic::Ordering;

        // Fast path - already initialized
        if self.initialized.load(Ordering::Relaxed) {
            return Ok(());
        }

        if !self.enabled {
            return Ok(());
        }

        // Only one task performs the initialization
        if self
            .initialized
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            fs::create_dir_all(&self.cache_dir).await?;
            self.initialized.store(true, Ordering::Release);
        } else {
            while !self.initialized.load(Ordering::Acquire) {
                tokio::task::yield_now().await;
            }
        }

        Ok(())
    }

    /// Filename-safe stem for an entry key.
    fn file_stem(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let hash = hasher.finalize();
        format!("{hash:x}")
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(Self::file_stem(key))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        let mut path = self.data_path(key);
        path.set_extension("meta");
        path
    }
}

#[async_trait::async_trait]
impl CacheStore for DiskStore {
    async fn contains(&self, key: &str) -> CacheResult<bool> {
        if !self.enabled {
            return Ok(false);
        }

        self.ensure_initialized().await?;

        let data_exists = fs::try_exists(&self.data_path(key)).await?;
        let meta_exists = fs::try_exists(&self.metadata_path(key)).await?;

        Ok(data_exists && meta_exists)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<(Bytes, CacheMetadata)>> {
        if !self.enabled {
            return Ok(None);
        }

        self.ensure_initialized().await?;

        let data_path = self.data_path(key);
        let meta_path = self.metadata_path(key);

        if !fs::try_exists(&data_path).await? || !fs::try_exists(&meta_path).await? {
            return Ok(None);
        }

        let metadata_bytes = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to read cache metadata file");
                return Ok(None);
            }
        };

        let metadata: CacheMetadata = match serde_json::from_slice(&metadata_bytes) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = ?meta_path, error = %e, "Failed to parse cache metadata");

                // Drop the corrupt entry in the background
                let data_path = data_path.clone();
                let meta_path = meta_path.clone();
                tokio::spawn(async move {
                    let _ = fs::remove_file(&data_path).await;
                    let _ = fs::remove_file(&meta_path).await;
                });

                return Ok(None);
            }
        };

        let data = match fs::read(&data_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = ?data_path, error = %e, "Failed to read cache data file");
                return Ok(None);
            }
        };

        Ok(Some((Bytes::from(data), metadata)))
    }

    async fn put(&self, key: String, data: Bytes, metadata: CacheMetadata) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        self.ensure_initialized().await?;

        let data_path = self.data_path(&key);
        let meta_path = self.metadata_path(&key);

        let metadata_json = serde_json::to_vec(&metadata).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize cache metadata: {e}"),
            )
        })?;

        // Write to temporary files, then rename into place
        let temp_data_path = data_path.with_extension("tmp");
        let temp_meta_path = meta_path.with_extension("tmp-meta");

        if let Err(e) = fs::write(&temp_data_path, &data).await {
            warn!(path = ?temp_data_path, error = %e, "Failed to write cache data file");
            return Err(e);
        }

        if let Err(e) = fs::write(&temp_meta_path, &metadata_json).await {
            warn!(path = ?temp_meta_path, error = %e, "Failed to write cache metadata file");
            let _ = fs::remove_file(&temp_data_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_data_path, &data_path).await {
            warn!(
                from = ?temp_data_path,
                to = ?data_path,
                error = %e,
                "Failed to rename temporary data file"
            );
            let _ = fs::remove_file(&temp_data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_meta_path, &meta_path).await {
            warn!(
                from = ?temp_meta_path,
                to = ?meta_path,
                error = %e,
                "Failed to rename temporary metadata file"
            );
            // The data file made it but the metadata did not; remove both
            // so the entry reads as absent rather than torn.
            let _ = fs::remove_file(&data_path).await;
            let _ = fs::remove_file(&temp_meta_path).await;
            return Err(e);
        }

        debug!(key = %key, size = metadata.size, "Cached entry to disk");
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        self.ensure_initialized().await?;

        let data_path = self.data_path(key);
        let meta_path = self.metadata_path(key);

        let data_result = fs::remove_file(&data_path).await;
        let meta_result = fs::remove_file(&meta_path).await;

        match (data_result, meta_result) {
            (Err(e), _) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?data_path, error = %e, "Failed to remove cache data file");
                Err(e)
            }
            (_, Err(e)) if e.kind() != io::ErrorKind::NotFound => {
                warn!(path = ?meta_path, error = %e, "Failed to remove cache metadata file");
                Err(e)
            }
            _ => Ok(()),
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }

        self.ensure_initialized().await?;

        let mut entries = fs::read_dir(&self.cache_dir).await?;
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %e, "Failed to remove cache file");
            } else {
                removed += 1;
            }
        }

        debug!(count = removed, "Cleared disk cache entries");
        Ok(())
    }
}
