//! s3up - chunked multipart uploads to S3-compatible storage

use anyhow::Context;
use clap::{Parser, Subcommand};
use s3up_cli::config::{DEFAULT_ACL, DEFAULT_PART_RETRIES};
use s3up_cli::{parse_size, BatchUploader, ShutdownSignal, Target, UploadSettings};
use s3up_client::{
    ChunkPolicy, Credentials, PutOptions, S3Store, StoreConfig, DEFAULT_MAX_CHUNK_SIZE,
    DEFAULT_MAX_PARTS, DEFAULT_MIN_TRAILING_SIZE,
};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "s3up")]
#[command(about = "Upload files to S3-compatible storage with parallel multipart uploads")]
#[command(version)]
struct Args {
    /// S3 endpoint URL
    #[arg(long, global = true, default_value = "https://s3.amazonaws.com", env = "S3UP_ENDPOINT")]
    endpoint: String,

    /// Signing region
    #[arg(long, global = true, default_value = "us-east-1", env = "S3UP_REGION")]
    region: String,

    /// Access key id
    #[arg(long, global = true, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key: Option<String>,

    /// Secret access key
    #[arg(long, global = true, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Per-request timeout in seconds (none by default)
    #[arg(long, global = true, env = "S3UP_TIMEOUT")]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true, env = "S3UP_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file or the files of a directory
    Upload(UploadArgs),
    /// Delete objects older than a number of days
    Tmpwatch(TmpwatchArgs),
}

#[derive(clap::Args, Debug)]
struct UploadArgs {
    /// File or directory to upload
    source: PathBuf,

    /// Destination as bucket[/prefix]
    target: Target,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Upload even if the key already exists
    #[arg(long)]
    overwrite: bool,

    /// Canned ACL for new objects
    #[arg(long, default_value = DEFAULT_ACL)]
    acl: String,

    /// Cache-Control header for new objects
    #[arg(long)]
    cache_control: Option<String>,

    /// Expires header for new objects (HTTP date)
    #[arg(long)]
    expires: Option<String>,

    /// Largest part size, e.g. 4GiB
    #[arg(long, value_parser = parse_size, env = "S3UP_MAX_CHUNK_SIZE")]
    max_chunk_size: Option<u64>,

    /// Smallest part size the store accepts, e.g. 5MiB
    #[arg(long, value_parser = parse_size, env = "S3UP_MIN_TRAILING_SIZE")]
    min_trailing_size: Option<u64>,

    /// Files at least this large use multipart upload (defaults to the chunk size)
    #[arg(long, value_parser = parse_size, env = "S3UP_MULTIPART_THRESHOLD")]
    multipart_threshold: Option<u64>,

    /// Most parts a single file may be split into
    #[arg(long, env = "S3UP_MAX_PARTS", default_value_t = DEFAULT_MAX_PARTS)]
    max_parts: u32,

    /// Parts in flight per file (unbounded by default)
    #[arg(short = 'j', long, env = "S3UP_CONCURRENCY")]
    concurrency: Option<NonZeroUsize>,

    /// Extra attempts for failed parts before the upload is aborted
    #[arg(long, default_value_t = DEFAULT_PART_RETRIES)]
    part_retries: u32,
}

#[derive(clap::Args, Debug)]
struct TmpwatchArgs {
    /// Age in days
    days: u32,

    /// Bucket and optional prefix to expire
    target: Target,

    /// Only report what would be deleted
    #[arg(long)]
    dry_run: bool,
}

impl UploadArgs {
    fn settings(&self) -> anyhow::Result<UploadSettings> {
        let mut policy = ChunkPolicy::new(
            self.max_chunk_size.unwrap_or(DEFAULT_MAX_CHUNK_SIZE),
            self.min_trailing_size.unwrap_or(DEFAULT_MIN_TRAILING_SIZE),
        )?
        .with_max_parts(self.max_parts);
        if let Some(threshold) = self.multipart_threshold {
            policy = policy.with_threshold(threshold);
        }
        policy.validate()?;

        let mut put = PutOptions::new().with_acl(&self.acl);
        if let Some(cache_control) = &self.cache_control {
            put = put.with_cache_control(cache_control);
        }
        if let Some(expires) = &self.expires {
            put = put.with_expires(expires);
        }

        Ok(UploadSettings {
            policy,
            concurrency: self.concurrency,
            put,
            recursive: self.recursive,
            overwrite: self.overwrite,
            part_retries: self.part_retries,
        })
    }
}

impl Args {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let mut config = StoreConfig::new(&self.endpoint).with_region(&self.region);
        match (&self.access_key, &self.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                config = config.with_credentials(Credentials::new(access_key, secret_key));
            }
            (None, None) => tracing::warn!("No credentials configured, sending unsigned requests"),
            _ => anyhow::bail!("both an access key and a secret key are required"),
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("s3up_cli={0},s3up_client={0},s3up={0}", log_level).into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.store_config()?;
    let code = match &args.command {
        Command::Upload(upload) => {
            let settings = upload.settings()?;
            let store = S3Store::new(config, &upload.target.bucket)
                .context("failed to create S3 client")?;

            let shutdown = ShutdownSignal::new();
            tokio::spawn({
                let shutdown = shutdown.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("Interrupted, aborting in-flight uploads");
                        shutdown.shutdown();
                    }
                }
            });

            let uploader = BatchUploader::new(Arc::new(store), settings, shutdown);
            let report = uploader
                .run(&upload.source, &upload.target)
                .await
                .with_context(|| format!("cannot read {}", upload.source.display()))?;
            report.exit_code()
        }
        Command::Tmpwatch(expire) => {
            let store = S3Store::new(config, &expire.target.bucket)
                .context("failed to create S3 client")?;
            let cutoff = s3up_cli::cutoff(chrono::Utc::now(), expire.days);
            let report = s3up_cli::tmpwatch(&store, expire.target.prefix(), cutoff, expire.dry_run)
                .await
                .context("listing failed")?;
            report.exit_code()
        }
    };

    std::process::exit(code)
}
