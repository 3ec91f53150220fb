//! # Downloader Configuration
//!
//! HTTP client options for the default downloader, a fluent builder for
//! them, and the shared reqwest client constructor.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info};

use crate::downloader::DownloadError;

const DEFAULT_USER_AGENT: &str = concat!("pictor/", env!("CARGO_PKG_VERSION"));

/// Configurable options for the HTTP downloader
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for the entire HTTP request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Proxy server URL (optional)
    pub proxy_url: Option<String>,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: DownloaderConfig::get_default_headers(),
            proxy_url: None,
            use_system_proxy: true,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> DownloaderConfigBuilder {
        DownloaderConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("image/avif,image/webp,image/png,image/svg+xml,image/*;q=0.8,*/*;q=0.5"),
        );

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    // Create the crypto provider
    let provider = Arc::new(aws_lc_rs::default_provider());

    // Build platform default TLS configuration
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("Failed to configure default TLS protocol versions")
        .with_platform_verifier()
        .expect("Failed to build platform certificate verifier")
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5) // Allow multiple connections to the same host
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    // Set up proxy configuration
    if let Some(proxy_url) = &config.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| DownloadError::Proxy(format!("{proxy_url}: {e}")))?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_url, "Using explicitly configured proxy for image downloads");
    } else if config.use_system_proxy {
        // reqwest picks up system proxy settings when no_proxy() is not called
        info!("Using system proxy settings for image downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for image downloads");
    }

    client_builder.build().map_err(DownloadError::from)
}

/// Builder for creating DownloaderConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    /// Set the overall timeout for the entire HTTP request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all HTTP headers, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Set an explicit proxy URL, disabling system proxy settings
    pub fn with_proxy_url(mut self, url: impl Into<String>) -> Self {
        self.config.proxy_url = Some(url.into());
        self.config.use_system_proxy = false;
        self
    }

    /// Set whether to use system proxy settings if available
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        if self.config.proxy_url.is_none() {
            self.config.use_system_proxy = use_system_proxy;
        }
        self
    }

    /// Build the DownloaderConfig instance
    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = DownloaderConfigBuilder::new().build();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.follow_redirects);
        assert!(config.use_system_proxy);
        assert!(config.proxy_url.is_none());
        assert!(config.user_agent.starts_with("pictor/"));
    }

    #[test]
    fn test_builder_customization() {
        let config = DownloaderConfigBuilder::new()
            .with_timeout(Duration::from_secs(60))
            .with_connect_timeout(Duration::from_secs(20))
            .with_follow_redirects(false)
            .with_user_agent("Gallery/2.0")
            .with_header("X-Api-Key", "secret")
            .with_system_proxy(false)
            .build();

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert!(!config.follow_redirects);
        assert_eq!(config.user_agent, "Gallery/2.0");
        assert!(!config.use_system_proxy);

        let header_value = config.headers.get("X-Api-Key").unwrap();
        assert_eq!(header_value.to_str().unwrap(), "secret");
    }

    #[test]
    fn test_explicit_proxy_disables_system_proxy() {
        let config = DownloaderConfigBuilder::new()
            .with_proxy_url("http://proxy.example.com:8080")
            .with_system_proxy(true)
            .build();

        assert_eq!(
            config.proxy_url.as_deref(),
            Some("http://proxy.example.com:8080")
        );
        assert!(!config.use_system_proxy);
    }

    #[test]
    fn test_default_accept_prefers_images() {
        let headers = DownloaderConfig::get_default_headers();
        let accept = headers.get(reqwest::header::ACCEPT).unwrap();
        assert!(accept.to_str().unwrap().starts_with("image/"));
    }
}
