//! # Pictor
//!
//! An image retrieval and caching engine. Callers ask for an image by
//! location (URL or local path) and receive it through a callback,
//! served transparently from an in-memory/disk cache when present or
//! fetched over the network otherwise, with fetched results written back
//! to the cache.
//!
//! ## Features
//!
//! - Cache-first retrieval with per-request policy (force refresh,
//!   cache only, memory only)
//! - Cancellable retrieval tasks with exactly-once completion delivery
//! - Stale-result guarding for view-like consumers that get reused
//! - Two-layer default cache (memory + disk) and a streaming HTTP
//!   downloader with conditional revalidation

pub mod binding;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod error;
pub mod image;
pub mod manager;
pub mod options;
pub mod resource;
pub mod task;

pub use cache::{
    CacheConfig, CacheMetadata, CacheResult, CacheType, DefaultImageCache, ImageCache,
};
pub use config::{DownloaderConfig, DownloaderConfigBuilder, create_client};
pub use error::RetrieveError;
pub use image::{Image, ImageSerializer, PassthroughSerializer};
pub use options::{RetrieveOptions, Transition};
pub use resource::{ImageResource, ResourceKind};

// Re-export the retrieval pipeline types
pub use manager::{CompletionFn, RetrieveManager, RetrieveResult, RetrievedImage};
pub use task::{RetrievalTask, TaskPhase};

// Re-export the binding guard
pub use binding::{BindingTable, ConsumerId};

// Re-export downloader types
pub use downloader::{DownloadError, DownloadPayload, Downloader, HttpDownloader, ProgressFn};
