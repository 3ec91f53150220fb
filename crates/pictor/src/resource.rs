//! # Image Resources
//!
//! This module defines the value type that identifies what to fetch and
//! under which cache key, together with the closed classification of
//! fetch locations (network URL, local file, named asset).

use std::path::PathBuf;

use url::Url;

use crate::downloader::DownloadError;

/// Classification of a resource location.
///
/// The kind is determined once, when the resource is constructed, by
/// inspecting the location prefix. It is never re-derived afterwards, so
/// every component of the engine agrees on how a given resource is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// An `http://` or `https://` URL fetched over the network.
    Network,
    /// A local file, given either as a `file://` URL or an absolute path.
    File,
    /// A named asset resolved by the caller's own lookup (bundle name,
    /// embedded resource identifier, and so on). Never fetched over the
    /// network.
    Named,
}

impl ResourceKind {
    /// Classify a location string by prefix.
    fn from_location(location: &str) -> Self {
        if location.starts_with("http://") || location.starts_with("https://") {
            ResourceKind::Network
        } else if location.starts_with("file://") || location.starts_with('/') {
            ResourceKind::File
        } else {
            ResourceKind::Named
        }
    }
}

/// Identity of one image to retrieve: a fetch location plus the cache key
/// it is stored under.
///
/// Both fields are immutable once constructed. The cache key defaults to
/// the location itself, which is the common case; an explicit key is only
/// needed when several locations should share one cached entry (mirrors,
/// signed URLs with rotating query strings).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageResource {
    cache_key: String,
    location: String,
    kind: ResourceKind,
}

impl ImageResource {
    /// Create a resource whose cache key is its location.
    pub fn new(location: impl Into<String>) -> Self {
        let location = location.into();
        let kind = ResourceKind::from_location(&location);
        Self {
            cache_key: location.clone(),
            location,
            kind,
        }
    }

    /// Create a resource with an explicit cache key.
    pub fn with_cache_key(location: impl Into<String>, cache_key: impl Into<String>) -> Self {
        let location = location.into();
        let kind = ResourceKind::from_location(&location);
        Self {
            cache_key: cache_key.into(),
            location,
            kind,
        }
    }

    /// The key this resource is cached under.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// The location the image is fetched from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The classification computed at construction.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Whether this resource is fetched over the network.
    pub fn is_network(&self) -> bool {
        self.kind == ResourceKind::Network
    }

    /// Parse the location as a network URL.
    ///
    /// Only meaningful for [`ResourceKind::Network`] resources; other kinds
    /// report an invalid-URL error.
    pub fn network_url(&self) -> Result<Url, DownloadError> {
        if self.kind != ResourceKind::Network {
            return Err(DownloadError::InvalidUrl(self.location.clone()));
        }
        self.location
            .parse::<Url>()
            .map_err(|_| DownloadError::InvalidUrl(self.location.clone()))
    }

    /// The local path for a file resource, stripping any `file://` prefix.
    pub fn file_path(&self) -> Option<PathBuf> {
        match self.kind {
            ResourceKind::File => {
                let path = self
                    .location
                    .strip_prefix("file://")
                    .unwrap_or(&self.location);
                Some(PathBuf::from(path))
            }
            _ => None,
        }
    }
}
