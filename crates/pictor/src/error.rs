//! # Retrieval Errors
//!
//! The error surface reported through completion callbacks. Every failure
//! branch terminates its request; the engine never retries on its own.

use crate::downloader::DownloadError;

/// Terminal error of one retrieval request.
#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    /// The cache held no entry and policy (or resource kind) forbade a
    /// network fetch.
    #[error("No cached entry for {0}")]
    NotCached(String),

    /// The server reported the cached copy still valid, but re-reading the
    /// cache found nothing. The caller's cache and validators disagree.
    #[error("Server reported not modified but no cached copy exists for {0}")]
    RevalidatedWithoutCache(String),

    /// The download failed.
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// The task was cancelled before or during its download.
    #[error("Retrieval cancelled")]
    Cancelled,
}

impl RetrieveError {
    pub fn is_not_cached(&self) -> bool {
        matches!(self, RetrieveError::NotCached(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetrieveError::Cancelled)
    }
}
