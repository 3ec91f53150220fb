use clap::Parser;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Image fetching and caching tool",
    long_about = "Fetch images by URL through a local image cache.\n\
                  \n\
                  Images already present in the cache are served from disk or memory\n\
                  without touching the network; fresh downloads are written back to\n\
                  the cache for next time. Cache policy can be adjusted per run."
)]
pub struct CliArgs {
    /// Image URL(s) to fetch
    #[arg(required = true, help = "Image URL(s) to fetch")]
    pub inputs: Vec<String>,

    /// Output directory for fetched images
    #[arg(
        short,
        long,
        help = "Directory where fetched images will be saved (default: current directory)"
    )]
    pub output_dir: Option<PathBuf>,

    /// Skip the cache lookup and download anew
    #[arg(long, help = "Ignore cached entries and download fresh copies")]
    pub force_refresh: bool,

    /// Never contact the network
    #[arg(
        long,
        conflicts_with = "force_refresh",
        help = "Serve only from cache; fail on a cache miss instead of downloading"
    )]
    pub cache_only: bool,

    /// Keep fetched images out of the disk cache
    #[arg(long, help = "Cache fetched images in memory only, skipping disk persistence")]
    pub memory_only: bool,

    /// Disable caching entirely
    #[arg(long, help = "Disable the image cache for this run")]
    pub no_cache: bool,

    /// Cache directory
    #[arg(long, help = "Directory for the disk cache (default: system temp)")]
    pub cache_dir: Option<PathBuf>,

    /// Overall timeout in seconds
    #[arg(long, default_value = "30", help = "Overall timeout in seconds for HTTP requests")]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Custom HTTP headers for download requests
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Custom user agent string
    #[arg(long, help = "User agent string for download requests")]
    pub user_agent: Option<String>,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(long, help = "Proxy server URL for downloads")]
    pub proxy: Option<String>,

    /// Disable all proxy settings
    #[arg(long, help = "Disable all proxy settings (including system proxy) for downloads")]
    pub no_proxy: bool,

    /// Show progress bars
    #[arg(
        short = 'P',
        long = "progress",
        help = "Show a progress bar for each download"
    )]
    pub show_progress: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,
}

/// Parse 'Name: Value' header arguments into a header map, skipping
/// entries that do not parse.
pub fn parse_headers(raw: &[String]) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for entry in raw {
        let Some((name, value)) = entry.split_once(':') else {
            tracing::warn!(header = %entry, "Ignoring malformed header argument");
            continue;
        };

        match (
            name.trim().parse::<HeaderName>(),
            HeaderValue::from_str(value.trim()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => {
                tracing::warn!(header = %entry, "Ignoring invalid header argument");
            }
        }
    }

    headers
}
