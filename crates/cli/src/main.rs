use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardcache_core::jobs::run_worker;
use cardcache_core::{
    load_config_or_default, validate_config, BulkProgress, DataReadiness, EnsureOptions,
    ImageCache, ImageEvent, ImageRequest, ImageService, ImageSize,
};

/// Config file used when neither `--config` nor `CARDCACHE_CONFIG` is set.
const DEFAULT_CONFIG_FILE: &str = "cardcache.toml";

#[derive(Parser, Debug)]
#[command(name = "cardcache")]
#[command(author, version, about = "Card image cache and downloader", long_about = None)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Make sure the bulk snapshot is current and the printing index is loaded
    Ensure {
        /// Use the snapshot on disk without contacting the remote API
        #[arg(long)]
        cached_only: bool,

        /// Download the snapshot even if it looks current
        #[arg(long)]
        force: bool,
    },

    /// Download one card image through the queue and print its path
    Fetch {
        /// Card name
        name: String,

        /// Set code
        #[arg(long)]
        set: Option<String>,

        /// Collector number (requires --set)
        #[arg(long)]
        collector: Option<String>,

        /// Remote identity of the printing
        #[arg(long)]
        id: Option<String>,

        /// Image size (small, normal, large, png)
        #[arg(long, default_value = "normal")]
        size: ImageSize,
    },

    /// List every printing of a card, newest first
    Printings {
        /// Card name
        name: String,
    },

    /// Show cache statistics as JSON
    Stats,

    /// Download images for every card in the bulk snapshot
    BulkImages {
        /// Image size (small, normal, large, png)
        #[arg(long, default_value = "normal")]
        size: ImageSize,

        /// Stop after this many cards
        #[arg(long)]
        max: Option<usize>,
    },

    /// Run a background job; spawned by the job runner
    #[command(hide = true)]
    Worker {
        /// JSON-encoded job
        job: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output and worker results.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Commands::Worker { job } = &cli.command {
        let outcome = run_worker(job).await;
        println!("{}", serde_json::to_string(&outcome)?);
        if !outcome.ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("CARDCACHE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config_or_default(Some(&config_path))
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Invalid configuration")?;

    let service = ImageService::new(config).context("Failed to start image service")?;
    let result = dispatch(&service, cli.command).await;
    service.shutdown().await;
    result
}

async fn dispatch(service: &ImageService, command: Commands) -> Result<()> {
    match command {
        Commands::Ensure { cached_only, force } => {
            let readiness = service
                .ensure_data_ready(EnsureOptions {
                    cached_only,
                    force_download: force,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&readiness)?);
            if let DataReadiness::NeedsDownload { reason } = readiness {
                bail!("bulk data unavailable: {}", reason);
            }
        }
        Commands::Fetch {
            name,
            set,
            collector,
            id,
            size,
        } => {
            let mut request = ImageRequest::new(name).with_size(size);
            if let Some(set) = set {
                request = request.with_set(set);
            }
            if let Some(collector) = collector {
                request = request.with_collector_number(collector);
            }
            if let Some(id) = id {
                request = request.with_identity(id);
            }
            let path = fetch_image(service, request).await?;
            println!("{}", path.display());
        }
        Commands::Printings { name } => {
            let printings = if service.check_bulk_data_exists() {
                service.load_printing_index(false).await?;
                service
                    .printing_index()
                    .and_then(|index| index.lookup(&name).map(<[_]>::to_vec))
                    .unwrap_or_default()
            } else {
                info!("No bulk snapshot; asking the remote API");
                service.fetch_printings(&name).await?
            };
            println!("{}", serde_json::to_string_pretty(&printings)?);
        }
        Commands::Stats => {
            let stats = service.cache_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::BulkImages { size, max } => {
            let report = |progress: BulkProgress| {
                info!(
                    completed = progress.completed,
                    downloaded = progress.stats.downloaded,
                    skipped = progress.stats.skipped,
                    failed = progress.stats.failed,
                    "Bulk image progress"
                );
            };
            let stats = service
                .downloader()
                .download_all_images(size, max, Some(&report))
                .await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Worker { .. } => unreachable!("worker handled before service start"),
    }
    Ok(())
}

/// Queue a request and wait for its terminal event.
async fn fetch_image(service: &ImageService, request: ImageRequest) -> Result<PathBuf> {
    let mut events = service.subscribe();
    let key = request.queue_key();

    if !service.queue_download(request.clone(), true) {
        if let Some(path) = cached_path(service, &request)? {
            return Ok(path);
        }
        bail!("{} was rejected (unfetchable or marked not found)", request);
    }

    loop {
        match events.recv().await {
            Ok(ImageEvent::ImageDownloaded(done)) if done.queue_key() == key => break,
            Ok(ImageEvent::ImageFailed { request: failed, reason }) if failed.queue_key() == key => {
                bail!("{} failed: {}", failed, reason);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event receiver lagged"),
            Err(RecvError::Closed) => bail!("image service stopped before {} finished", request),
        }
    }

    cached_path(service, &request)?
        .with_context(|| format!("{} downloaded but not found in the cache", request))
}

fn cached_path(service: &ImageService, request: &ImageRequest) -> Result<Option<PathBuf>> {
    let cache = service.cache();
    let path = if let Some(identity) = request.identity() {
        cache
            .get_image_paths_by_identity(identity, request.size)?
            .into_iter()
            .next()
    } else if let Some(set) = request.set_code() {
        cache.get_image_path_for_printing(&request.card_name, set, request.size)?
    } else {
        cache.get_image_path(&request.card_name, request.size)?
    };
    Ok(path.filter(|p| Path::exists(p)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from([
            "cardcache",
            "fetch",
            "Lightning Bolt",
            "--set",
            "m11",
            "--collector",
            "146",
            "--size",
            "large",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch {
                name,
                set,
                collector,
                id,
                size,
            } => {
                assert_eq!(name, "Lightning Bolt");
                assert_eq!(set.as_deref(), Some("m11"));
                assert_eq!(collector.as_deref(), Some("146"));
                assert!(id.is_none());
                assert_eq!(size, ImageSize::Large);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_config_and_ensure_flags() {
        let cli = Cli::try_parse_from([
            "cardcache",
            "ensure",
            "--cached-only",
            "--config",
            "/tmp/cardcache.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cardcache.toml")));
        assert!(matches!(
            cli.command,
            Commands::Ensure {
                cached_only: true,
                force: false
            }
        ));
    }

    #[test]
    fn test_rejects_unknown_size() {
        assert!(Cli::try_parse_from(["cardcache", "bulk-images", "--size", "huge"]).is_err());
    }

    #[test]
    fn test_worker_subcommand_is_hidden_but_parses() {
        let cli = Cli::try_parse_from(["cardcache", "worker", "{}"]).unwrap();
        assert!(matches!(cli.command, Commands::Worker { ref job } if job == "{}"));
    }
}
