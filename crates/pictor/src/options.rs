//! # Retrieval Options
//!
//! Read-only per-request policy. Options are evaluated once per call by
//! the manager; the presentation hints are carried through untouched for
//! the binding layer to consume.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::ImageCache;
use crate::downloader::Downloader;
use crate::image::ImageSerializer;

/// How a newly delivered image should be presented by the consumer.
///
/// Purely a hint for the binding layer; the retrieval manager never reads
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transition {
    /// Swap the image in immediately.
    #[default]
    None,
    /// Cross-fade over the given duration.
    Fade(Duration),
}

/// Per-request policy options.
#[derive(Clone, Default)]
pub struct RetrieveOptions {
    /// Skip the cache lookup and download anew. Only effective for
    /// network resources; combined with `only_from_cache` on anything
    /// else, normal lookup order applies.
    pub force_refresh: bool,

    /// Never contact the network; a cache miss reports not-cached.
    pub only_from_cache: bool,

    /// Keep the fetched result out of the disk cache.
    pub cache_memory_only: bool,

    /// Cache to use instead of the manager's default.
    pub target_cache: Option<Arc<dyn ImageCache>>,

    /// Downloader to use instead of the manager's default.
    pub downloader: Option<Arc<dyn Downloader>>,

    /// Serializer to use instead of the manager's default.
    pub serializer: Option<Arc<dyn ImageSerializer>>,

    /// Identity of the processing applied to the image, part of the
    /// effective cache key.
    pub processor_ident: Option<String>,

    /// `ETag` validator for conditional requests.
    pub etag: Option<String>,

    /// `Last-Modified` validator for conditional requests.
    pub last_modified: Option<String>,

    /// Presentation hint consumed by the binding layer.
    pub transition: Transition,

    /// Presentation hint: keep showing the current image while the new
    /// one loads instead of a placeholder.
    pub keep_current_image_while_loading: bool,
}

impl RetrieveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn with_only_from_cache(mut self, only_from_cache: bool) -> Self {
        self.only_from_cache = only_from_cache;
        self
    }

    pub fn with_cache_memory_only(mut self, cache_memory_only: bool) -> Self {
        self.cache_memory_only = cache_memory_only;
        self
    }

    pub fn with_target_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.target_cache = Some(cache);
        self
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn ImageSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn with_processor_ident(mut self, ident: impl Into<String>) -> Self {
        self.processor_ident = Some(ident.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = transition;
        self
    }

    pub fn with_keep_current_image_while_loading(mut self, keep: bool) -> Self {
        self.keep_current_image_while_loading = keep;
        self
    }
}

impl std::fmt::Debug for RetrieveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrieveOptions")
            .field("force_refresh", &self.force_refresh)
            .field("only_from_cache", &self.only_from_cache)
            .field("cache_memory_only", &self.cache_memory_only)
            .field("has_target_cache", &self.target_cache.is_some())
            .field("has_downloader", &self.downloader.is_some())
            .field("has_serializer", &self.serializer.is_some())
            .field("processor_ident", &self.processor_ident)
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .field("transition", &self.transition)
            .field(
                "keep_current_image_while_loading",
                &self.keep_current_image_while_loading,
            )
            .finish()
    }
}
