//! # HTTP Downloader
//!
//! Streaming reqwest implementation of the download facade. Bytes are
//! accumulated chunk by chunk so progress can be reported as they arrive
//! and cancellation is observed between chunks.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::{DownloadError, DownloadPayload, Downloader, ProgressFn};
use crate::config::{DownloaderConfig, create_client};
use crate::options::RetrieveOptions;

/// Downloader for fetching image data over HTTP(S)
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// Create a new HttpDownloader with default configuration
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_config(DownloaderConfig::default())
    }

    /// Create a new HttpDownloader with custom configuration
    pub fn with_config(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = create_client(&config)?;
        Ok(Self { client })
    }

    /// Create a downloader around an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Downloader for HttpDownloader {
    #[instrument(skip(self, options, progress, cancel), level = "debug")]
    async fn fetch(
        &self,
        url: &Url,
        options: &RetrieveOptions,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<DownloadPayload, DownloadError> {
        info!(url = %url, "Starting image download");

        let mut request = self.client.get(url.clone());

        // Conditional request headers let the server answer 304 when the
        // caller already holds a valid cached copy.
        if let Some(etag) = &options.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &options.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response?,
        };

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(url = %url, "Content not modified");
            return Err(DownloadError::NotModified);
        }

        if !response.status().is_success() {
            return Err(DownloadError::StatusCode(response.status()));
        }

        let total = response.content_length();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let final_url = response.url().clone();

        if let Some(content_length) = total {
            debug!(url = %url, size = content_length, "Download size information available");
        } else {
            debug!(url = %url, "Content length not available");
        }

        let mut stream = response.bytes_stream();
        let mut buffer = BytesMut::with_capacity(total.unwrap_or(64 * 1024).min(8 * 1024 * 1024) as usize);
        let mut received: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        received += bytes.len() as u64;
                        buffer.extend_from_slice(&bytes);
                        if let Some(progress) = &progress {
                            progress(received, total);
                        }
                    }
                    Some(Err(e)) => return Err(DownloadError::Http(e)),
                    None => break,
                },
            }
        }

        debug!(url = %url, size = received, "Image download finished");

        Ok(DownloadPayload {
            data: Bytes::from(buffer),
            content_type,
            final_url,
        })
    }
}
