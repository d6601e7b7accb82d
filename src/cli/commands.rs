//! CLI command definitions for episode-forge.
//!
//! `serve` runs the dataset service; `convert` is the conversion worker the
//! service launches (and can be run by hand); `inspect` and `health` are
//! operator diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::api;
use crate::app;
use crate::bag::{classify, discover_episodes, Db3Log, MessageLog};
use crate::config::ServiceConfig;
use crate::convert::{run_conversion, ConversionOptions, DEFAULT_FPS};
use crate::storage::HttpBlobStore;

/// Episode forge: ROS 2 bag captures to frame-synchronized training datasets.
#[derive(Parser)]
#[command(name = "episode-forge")]
#[command(about = "Turn ROS 2 bag captures into frame-synchronized training datasets")]
#[command(version)]
#[command(
    long_about = "episode-forge ingests ROS 2 bag episodes, converts them into LeRobot-style datasets\nin supervised worker processes, and runs training jobs on stored datasets.\n\nExample usage:\n  episode-forge serve --root ./forge\n  episode-forge convert ./bags/demo --output ./demo/lerobot --json ./demo/ros2bag_msg.json --images ./demo/frames"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the HTTP dataset service.
    Serve(ServeArgs),

    /// Convert a bag root into synchronized manifests and a LeRobot dataset.
    Convert(ConvertArgs),

    /// Show episodes and topic classification of a bag root.
    Inspect(InspectArgs),

    /// Probe a remote blob store's health endpoint.
    Health(HealthArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind; overrides FORGE_BIND.
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Place database, blobs, state and job directories under this root.
    #[arg(long, env = "FORGE_ROOT")]
    pub root: Option<PathBuf>,

    /// SQLite URL; overrides DATABASE_URL.
    #[arg(long)]
    pub database_url: Option<String>,

    /// Remote blob store used for training; overrides FORGE_REMOTE_BLOB_URL.
    #[arg(long)]
    pub remote_blob_url: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ConvertArgs {
    /// Directory whose subdirectories hold one episode's `.db3` files each.
    pub bag_root: PathBuf,

    /// LeRobot dataset output directory (an existing one is moved aside).
    #[arg(short, long)]
    pub output: PathBuf,

    /// Raw extraction JSON path.
    #[arg(long)]
    pub json: PathBuf,

    /// Directory for extracted PNG frames.
    #[arg(long)]
    pub images: PathBuf,

    /// Synchronized manifest path (default: `<json stem>_synced.json`).
    #[arg(long)]
    pub synced: Option<PathBuf>,

    /// Frame rate used when the estimate is unusable.
    #[arg(long, default_value_t = DEFAULT_FPS)]
    pub default_fps: f64,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Bag root to inspect.
    pub bag_root: PathBuf,
}

#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Blob store base URL.
    #[arg(long, env = "FORGE_REMOTE_BLOB_URL")]
    pub url: String,

    /// Attempts before giving up.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Base backoff between attempts in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub backoff_ms: u64,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Convert(args) => run_convert_command(args).await,
        Commands::Inspect(args) => run_inspect_command(args).await,
        Commands::Health(args) => run_health_command(args).await,
    }
}

fn serve_config(args: ServeArgs) -> anyhow::Result<ServiceConfig> {
    let mut config = ServiceConfig::from_env()?;
    if let Some(root) = args.root {
        config = config.rooted_at(root);
    }
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    if let Some(url) = args.database_url {
        config = config.with_database_url(url);
    }
    if let Some(url) = args.remote_blob_url {
        config = config.with_remote_blob_url(url);
    }
    Ok(config)
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let config = serve_config(args)?;
    let service = app::start(&config).await?;
    info!(
        reclaimed = service.reconcile.reclaimed.len(),
        adopted = service.reconcile.adopted.len(),
        rolled_back = service.reconcile.rolled_back.len(),
        recovered_jobs = service.recovered_jobs,
        "Service started"
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    api::serve(listener, service.state, api::shutdown_signal()).await
}

impl From<ConvertArgs> for ConversionOptions {
    fn from(args: ConvertArgs) -> Self {
        Self {
            bag_root: args.bag_root,
            output: args.output,
            json: args.json,
            images: args.images,
            synced: args.synced,
            default_fps: args.default_fps,
        }
    }
}

async fn run_convert_command(args: ConvertArgs) -> anyhow::Result<()> {
    let opts = ConversionOptions::from(args);
    info!(bag_root = %opts.bag_root.display(), output = %opts.output.display(), "Starting conversion");

    let report = run_conversion(&opts).await?;

    println!("Episodes:        {}", report.episodes);
    println!("Cameras:         {}", report.cameras.join(", "));
    println!("Estimated FPS:   {:.3}", report.estimated_fps);
    println!("Synced frames:   {}", report.synced_frames);
    println!("Dataset FPS:     {:.3}", report.dataset.fps);
    println!("Decode failures: {}", report.decode_failures);
    if let Some(previous) = &report.rotated_output {
        println!("Previous output: {}", previous.display());
    }
    println!("Manifest:        {}", report.synced_manifest.display());
    Ok(())
}

async fn run_inspect_command(args: InspectArgs) -> anyhow::Result<()> {
    let episodes = discover_episodes(&args.bag_root)?;
    println!("Bag root: {} ({} episodes)", args.bag_root.display(), episodes.len());

    for (index, dir) in episodes.iter().enumerate() {
        let log = Db3Log::open(dir).await?;
        let active = log.active_topics().await?;
        println!();
        println!("[{}] {}", index, dir.display());
        for topic in log.topics() {
            let marker = if active.contains(&topic.name) { "*" } else { " " };
            println!("  {} {:<40} {}", marker, topic.name, topic.msg_type);
        }
        match classify(log.topics(), &active) {
            Ok(c) => {
                println!("  joint topic: {}", c.joint_topic);
                println!("  cameras:     {}", c.camera_names().join(", "));
            }
            Err(e) => println!("  not convertible: {}", e),
        }
        log.close().await;
    }
    Ok(())
}

async fn run_health_command(args: HealthArgs) -> anyhow::Result<()> {
    let store = HttpBlobStore::new(args.url.as_str(), Duration::from_secs(args.timeout_secs))?;
    store
        .check_health(args.retries, Duration::from_millis(args.backoff_ms))
        .await
        .with_context(|| format!("Blob store at {} is unhealthy", args.url))?;
    println!("{} is healthy", store.base_url());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_convert_defaults() {
        let cli = Cli::try_parse_from([
            "episode-forge",
            "convert",
            "./bags",
            "--output",
            "./out",
            "--json",
            "./raw.json",
            "--images",
            "./frames",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Convert(args) => {
                let opts = ConversionOptions::from(args);
                assert_eq!(opts.bag_root, PathBuf::from("./bags"));
                assert_eq!(opts.default_fps, DEFAULT_FPS);
                assert_eq!(opts.synced_path(), PathBuf::from("./raw_synced.json"));
            }
            _ => panic!("Expected convert command"),
        }
    }

    #[test]
    fn test_convert_requires_outputs() {
        assert!(Cli::try_parse_from(["episode-forge", "convert", "./bags"]).is_err());
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(["episode-forge", "inspect", "./bags", "-l", "debug"])
            .expect("should parse");
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::Inspect(_)));
    }

    #[test]
    fn test_serve_overrides() {
        let cli = Cli::try_parse_from([
            "episode-forge",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--root",
            "/tmp/forge",
        ])
        .expect("should parse");
        let Commands::Serve(args) = cli.command else {
            panic!("Expected serve command");
        };
        let config = serve_config(args).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.storage_root, PathBuf::from("/tmp/forge/data"));
    }
}
