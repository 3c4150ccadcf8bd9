use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use releasesync::{
    GitHubAssetStore, HashAlgorithm, LocalCache, Operation, SyncConfig, SyncEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Command {
    /// Add every file in INCOMING to the release(s)
    Upload,
    /// Fetch every file listed in the release manifest into DOWNLOAD
    Download,
}

impl From<Command> for Operation {
    fn from(cmd: Command) -> Self {
        match cmd {
            Command::Upload => Operation::Upload,
            Command::Download => Operation::Download,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "releasesync")]
#[command(about = "Upload test data files as content-addressed release assets, or download them back", long_about = None)]
#[command(version)]
struct Args {
    /// Operation to perform
    #[arg(value_enum)]
    command: Command,

    /// Hash algorithms (comma-separated: MD5, SHA224, SHA256, SHA384, SHA512).
    /// Defaults to MD5,SHA256 for upload and MD5 for download.
    #[arg(long = "hash-algo", value_delimiter = ',')]
    hash_algos: Vec<HashAlgorithm>,

    /// GitHub personal access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// GitHub repository holding the releases
    #[arg(long, default_value = "Slicer/SlicerTestingData")]
    github_repo: String,

    /// Root directory; per-algorithm caches live in <ROOT>/<ALGO>
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory of files to upload (default: <ROOT>/INCOMING)
    #[arg(long)]
    incoming: Option<PathBuf>,

    /// Directory receiving downloaded files (default: <ROOT>/DOWNLOAD)
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Maximum number of concurrent downloads
    #[arg(long, default_value_t = 4)]
    max_concurrent_downloads: usize,

    /// Hard-link downloaded files from the cache instead of copying them
    #[arg(long)]
    link: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let operation = Operation::from(args.command);
    let algos = if args.hash_algos.is_empty() {
        operation.default_algorithms()
    } else {
        args.hash_algos.clone()
    };

    let config = SyncConfig {
        incoming_dir: args.incoming.unwrap_or_else(|| args.root.join("INCOMING")),
        download_dir: args.download_dir.unwrap_or_else(|| args.root.join("DOWNLOAD")),
        root_dir: args.root,
        max_concurrent_downloads: args.max_concurrent_downloads,
        link_outputs: args.link,
    };

    if args.github_token.is_none() && operation == Operation::Upload {
        bail!("A GitHub token is required for upload (--github-token or GITHUB_TOKEN)");
    }
    let store = Arc::new(
        GitHubAssetStore::new(&args.github_repo, args.github_token)
            .context("Invalid GitHub repository")?,
    );

    for algo in algos {
        let started = Instant::now();
        let cache = LocalCache::open(config.cache_dir(algo), algo)
            .with_context(|| format!("Opening cache for {}", algo))?;
        let engine = SyncEngine::new(cache, store.clone());
        match operation {
            Operation::Upload => {
                let mut manifest = engine
                    .load_remote_manifest()
                    .await
                    .with_context(|| format!("Loading {} manifest", algo))?;
                info!("Uploading {}", algo);
                engine
                    .update(&config.incoming_dir, &mut manifest)
                    .await
                    .with_context(|| format!("Uploading {}", algo))?;
            }
            Operation::Download => {
                let manifest = engine
                    .require_remote_manifest()
                    .await
                    .with_context(|| format!("Failed to download {}", algo.manifest_asset()))?;
                info!("Downloading {}", algo);
                let report = engine
                    .fetch(
                        &manifest,
                        &config.download_dir,
                        config.max_concurrent_downloads,
                        config.link_outputs,
                    )
                    .await
                    .with_context(|| format!("Downloading {}", algo))?;
                if !report.is_complete() {
                    for entry in &report.missing {
                        error!("{}: missing {} ({})", algo, entry.filename, entry.checksum);
                    }
                    bail!(
                        "{} of {} {} files could not be downloaded",
                        report.missing.len(),
                        manifest.len(),
                        algo
                    );
                }
            }
        }

        info!(
            "{} finished in {}",
            algo,
            humantime::format_duration(std::time::Duration::from_secs(
                started.elapsed().as_secs()
            ))
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("releasesync={}", log_level))
        .init();

    info!("🚀 releasesync");
    info!("Repository: {}", args.github_repo);
    info!("Root directory: {:?}", args.root);

    match run(args).await {
        Ok(()) => info!("✅ All operations completed successfully!"),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
