//! # Downloader
//!
//! The download facade consumed by the retrieval manager: zero or more
//! progress events, then exactly one terminal result. Cancellation is
//! signalled through a [`CancellationToken`]; a downloader observing the
//! token must stop and report [`DownloadError::Cancelled`] rather than a
//! misleading success.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::options::RetrieveOptions;

mod http;

pub use http::HttpDownloader;

/// Progress callback: `(received_bytes, expected_total_bytes)`.
///
/// The total is `None` when the server does not announce a content length.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Custom error type for download operations
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server returned status code {0}")]
    StatusCode(StatusCode),

    #[error("Content not modified")]
    NotModified,

    #[error("Download cancelled")]
    Cancelled,

    #[error("Failed to decode image data from {0}")]
    Decode(String),

    #[error("Invalid proxy configuration: {0}")]
    Proxy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Whether this is the well-known "content not modified" signal.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, DownloadError::NotModified)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

/// Terminal result of a successful download.
#[derive(Debug, Clone)]
pub struct DownloadPayload {
    /// The downloaded bytes.
    pub data: Bytes,
    /// Content type reported by the server, if any.
    pub content_type: Option<String>,
    /// The URL the payload was ultimately served from, after redirects.
    pub final_url: Url,
}

/// The downloader facade.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download the resource at `url`.
    ///
    /// Progress ticks are forwarded to `progress` as data arrives. A
    /// request carrying validators in its options may terminate with
    /// [`DownloadError::NotModified`] instead of a payload.
    async fn fetch(
        &self,
        url: &Url,
        options: &RetrieveOptions,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<DownloadPayload, DownloadError>;
}
