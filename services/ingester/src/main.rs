//! Tile pyramid ingester.
//!
//! Publishes tile pyramids to local disk or object storage, either for a
//! batch of files, for a multi-part mosaic, or continuously from the
//! Redis notification stream.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use ingestion::config::MOSAIC_CACHE_FRACTION;
use ingestion::{
    BlobSourceResolver, IngestDaemon, LocalFileResolver, PyramidBuilder, RedisEventSource,
    SourceResolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{IngestQueue, ObjectStoreBlobs};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use ingester::{
    inspect, open_sink, parse_image_key, run_batch, run_mosaic, BatchOptions, IngesterConfig,
    OutputTarget,
};

#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(about = "Tile pyramid builder for imagery ingest")]
struct Args {
    /// Configuration file path (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the pyramid of each file
    Batch {
        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Publish under this directory instead of object storage
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Collection id to use instead of the file name
        #[arg(long)]
        collection: Option<String>,

        /// Publish metadata only
        #[arg(long)]
        metadata_only: bool,
    },

    /// Assemble a multi-part mosaic from its manifest
    Mosaic {
        /// JSON manifest or DigitalGlobe .XML metadata
        manifest: PathBuf,

        /// Directory holding the part files
        #[arg(long)]
        parts_dir: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Consume new-image notifications until interrupted
    Daemon {
        /// Consumer name within the group
        #[arg(long, env = "INGEST_CONSUMER", default_value = "ingester-1")]
        consumer: String,

        /// Read sources from the bucket instead of the local source root
        #[arg(long)]
        sources_in_bucket: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait when the stream is empty
        #[arg(long, default_value = "1")]
        idle_backoff_secs: u64,
    },

    /// Summarize a pyramid published to a local directory
    Inspect {
        /// Output root the pyramid was published under
        root: PathBuf,

        collection: String,

        /// Collect time as YYYYMMDDHHMMSS
        collect_time: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);
    if args.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    let config = match &args.config {
        Some(path) => IngesterConfig::from_yaml(path)?,
        None => IngesterConfig::from_env()?,
    };
    info!(
        tile_size = config.pyramid.tile_size,
        workers = config.pyramid.worker_threads,
        downsample = %config.pyramid.downsample_method,
        "Loaded configuration"
    );

    match args.command {
        Command::Batch {
            files,
            output,
            collection,
            metadata_only,
        } => {
            let target = OutputTarget::resolve(output, &config);
            let sink = open_sink(&target, &config, tokio::runtime::Handle::current())?;
            let builder = PyramidBuilder::new(config.pyramid.clone(), sink)?;
            let options = BatchOptions {
                collection,
                metadata_only,
            };

            let summary =
                tokio::task::spawn_blocking(move || run_batch(&builder, &files, &options)).await?;
            info!(
                built = summary.built.len(),
                failed = summary.failed.len(),
                "Batch complete"
            );
            if !summary.is_success() {
                for (path, reason) in &summary.failed {
                    error!(file = %path.display(), reason = %reason, "Not ingested");
                }
                std::process::exit(1);
            }
        }

        Command::Mosaic {
            manifest,
            parts_dir,
            output,
        } => {
            let target = OutputTarget::resolve(output, &config);
            let sink = open_sink(&target, &config, tokio::runtime::Handle::current())?;
            let mut pyramid = config.pyramid.clone();
            if std::env::var_os("PYRAMID_CACHE_FRACTION").is_none() {
                pyramid.cache_memory_fraction = MOSAIC_CACHE_FRACTION;
            }

            let report = tokio::task::spawn_blocking(move || {
                run_mosaic(pyramid, sink, &manifest, &parts_dir)
            })
            .await??;
            info!(
                image = %report.image,
                parts = report.parts.len(),
                skipped = report.skipped.len(),
                last_rset_processed = ?report.last_rset_processed,
                tiles = report.tiles_published(),
                "Mosaic complete"
            );
        }

        Command::Daemon {
            consumer,
            sources_in_bucket,
            output,
            idle_backoff_secs,
        } => {
            let runtime = tokio::runtime::Handle::current();
            let target = OutputTarget::resolve(output, &config);
            let sink = open_sink(&target, &config, runtime.clone())?;
            let builder = Arc::new(PyramidBuilder::new(config.pyramid.clone(), sink)?);

            let resolver: Arc<dyn SourceResolver> = if sources_in_bucket {
                Arc::new(BlobSourceResolver::new(ObjectStoreBlobs::new(
                    &config.storage,
                    runtime,
                )?))
            } else {
                Arc::new(LocalFileResolver::new(&config.source_root))
            };

            let queue =
                IngestQueue::connect(&config.redis_url, &config.stream_key, &config.consumer_group)
                    .await?
                    .with_reclaim_idle_ms(config.reclaim_idle_ms);
            info!(
                stream = %config.stream_key,
                group = %config.consumer_group,
                consumer = %consumer,
                reclaim_idle_ms = config.reclaim_idle_ms,
                "Connected to notification stream"
            );

            let events = RedisEventSource::new(queue, consumer);
            let mut daemon = IngestDaemon::new(events, builder, resolver)
                .with_idle_backoff(Duration::from_secs(idle_backoff_secs));
            daemon
                .run(async {
                    tokio::signal::ctrl_c().await.ok();
                })
                .await?;
        }

        Command::Inspect {
            root,
            collection,
            collect_time,
        } => {
            let key = parse_image_key(&collection, &collect_time)?;
            let summary = inspect(&root, &key)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.is_complete() {
                bail!(
                    "{} of {} tiles present",
                    summary.indexed_tiles,
                    summary.expected_tiles
                );
            }
        }
    }

    Ok(())
}
