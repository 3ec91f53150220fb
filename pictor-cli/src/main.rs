use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pictor_engine::{
    CacheConfig, DownloaderConfig, ImageResource, ProgressFn, RetrieveManager, RetrieveOptions,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

mod cli;
mod error;

use cli::CliArgs;
use error::AppError;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let cache_config = CacheConfig {
        enabled: !args.no_cache,
        disk_cache_path: args.cache_dir.clone(),
        ..CacheConfig::default()
    };

    let download_config = {
        let mut builder = DownloaderConfig::builder()
            .with_timeout(Duration::from_secs(args.timeout))
            .with_connect_timeout(Duration::from_secs(args.connect_timeout));

        for (name, value) in cli::parse_headers(&args.headers).iter() {
            if let Ok(value) = value.to_str() {
                builder = builder.with_header(name.as_str(), value);
            }
        }

        if let Some(user_agent) = &args.user_agent {
            builder = builder.with_user_agent(user_agent);
        }

        if args.no_proxy {
            info!("All proxy settings disabled (--no-proxy flag)");
            builder = builder.with_system_proxy(false);
        } else if let Some(proxy_url) = &args.proxy {
            builder = builder.with_proxy_url(proxy_url);
        }

        builder.build()
    };

    let manager = RetrieveManager::with_config(cache_config, download_config).await?;

    let options = RetrieveOptions::new()
        .with_force_refresh(args.force_refresh)
        .with_only_from_cache(args.cache_only)
        .with_cache_memory_only(args.memory_only);

    let output_dir = args.output_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    tokio::fs::create_dir_all(&output_dir).await?;

    let total = args.inputs.len();
    let mut failed = 0usize;

    for input in &args.inputs {
        match fetch_one(&manager, input, &options, &output_dir, args.show_progress).await {
            Ok(path) => {
                info!(input = %input, path = %path.display(), "Fetched image");
            }
            Err(e) => {
                error!(input = %input, error = %e, "Fetch failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(AppError::PartialFailure { failed, total });
    }
    Ok(())
}

async fn fetch_one(
    manager: &RetrieveManager,
    input: &str,
    options: &RetrieveOptions,
    output_dir: &Path,
    show_progress: bool,
) -> Result<PathBuf, AppError> {
    let resource = ImageResource::new(input);

    let bar = if show_progress {
        ProgressBar::new(0)
    } else {
        ProgressBar::hidden()
    };
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let progress: ProgressFn = {
        let bar = bar.clone();
        Arc::new(move |received, expected| {
            if let Some(expected) = expected {
                bar.set_length(expected);
            }
            bar.set_position(received);
        })
    };

    let retrieved = manager
        .retrieve_async(resource, options.clone(), Some(progress))
        .await;
    bar.finish_and_clear();
    let retrieved = retrieved?;

    debug!(
        input = %input,
        cache = ?retrieved.cache_type,
        size = retrieved.image.size(),
        "Retrieval finished"
    );

    let path = output_dir.join(output_file_name(input));
    tokio::fs::write(&path, retrieved.image.as_bytes()).await?;

    Ok(path)
}

/// Derive an output filename from the fetch location: the last URL path
/// segment when there is one, a generic name otherwise.
fn output_file_name(input: &str) -> String {
    if let Ok(url) = input.parse::<Url>() {
        if let Some(segment) = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
        {
            return segment.to_owned();
        }
    }

    "image.bin".to_owned()
}
