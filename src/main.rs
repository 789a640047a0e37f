//! CLI entry point for the GTFS-RT stop ETL.
//!
//! Provides subcommands for running one ETL cycle, running cycles on an
//! interval, and inspecting a feed without touching the store.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use gtfs_stop_etl::{
    config::{
        DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_BATCH_SIZE, DEFAULT_POOL_SIZE, RunConfig, StoreConfig,
    },
    coordinator::RunCoordinator,
    feed::{DEFAULT_FEED_URL, GtfsRtFeed, TripFeed},
    fetch::auth::FeedAuth,
    normalize::{TripFilter, normalize_all},
    output::{append_summary, log_json},
    store::RedisStore,
    summary::RunSummary,
};
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_stop_etl")]
#[command(about = "Merge GTFS-RT stop updates into a Redis trip store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single ETL cycle
    Run {
        #[command(flatten)]
        etl: EtlArgs,
    },
    /// Run ETL cycles on a fixed interval
    Watch {
        #[command(flatten)]
        etl: EtlArgs,

        /// Seconds between the start of consecutive cycles
        #[arg(short, long, env = "RUN_INTERVAL_SECONDS", default_value_t = 60)]
        interval: u64,

        /// Number of cycles to run (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        iterations: usize,
    },
    /// Fetch and normalize a feed, logging the records without writing them
    Inspect {
        #[command(flatten)]
        feed: FeedArgs,

        /// Only keep trips whose id contains one of these comma-separated patterns
        #[arg(long, env = "TRIP_ID_FILTER")]
        trip_filter: Option<String>,
    },
}

#[derive(Args)]
struct FeedArgs {
    /// Path to file or URL to fetch
    #[arg(long = "feed", value_name = "FILE_OR_URL", env = "FEED_URL", default_value = DEFAULT_FEED_URL)]
    source: String,

    /// API key for feeds that require one
    #[arg(long, env = "FEED_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Header carrying the API key (default: Authorization bearer)
    #[arg(long, env = "FEED_API_KEY_HEADER")]
    api_key_header: Option<String>,

    /// Query parameter carrying the API key, instead of a header
    #[arg(long, env = "FEED_API_KEY_PARAM", conflicts_with = "api_key_header")]
    api_key_param: Option<String>,

    /// HTTP timeout for the feed request
    #[arg(long, env = "FEED_TIMEOUT_SECS", default_value_t = 30)]
    feed_timeout_secs: u64,
}

impl FeedArgs {
    fn build(&self) -> Result<GtfsRtFeed> {
        let auth = FeedAuth::from_settings(
            self.api_key.clone(),
            self.api_key_header.clone(),
            self.api_key_param.clone(),
        );
        debug!(requires_auth = auth.requires_auth(), "Feed auth resolved");
        let client = auth.client(Duration::from_secs(self.feed_timeout_secs))?;
        Ok(GtfsRtFeed::new(&self.source, client))
    }
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long, env = "REDIS_HOST", default_value = "127.0.0.1")]
    redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    #[arg(long, env = "REDIS_USERNAME")]
    redis_username: Option<String>,

    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    redis_password: Option<String>,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    /// Connect with TLS (rediss://)
    #[arg(long, env = "REDIS_TLS", default_value_t = false)]
    redis_tls: bool,

    /// Maximum pooled connections
    #[arg(long, env = "REDIS_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    redis_pool_size: usize,

    /// Seconds before a single round trip counts as failed
    #[arg(long, env = "REDIS_TIMEOUT_SECS", default_value_t = DEFAULT_COMMAND_TIMEOUT.as_secs())]
    redis_timeout_secs: u64,
}

impl StoreArgs {
    fn config(&self) -> StoreConfig {
        StoreConfig {
            host: self.redis_host.clone(),
            port: self.redis_port,
            username: self.redis_username.clone(),
            password: self.redis_password.clone(),
            db: self.redis_db,
            tls: self.redis_tls,
            pool_size: self.redis_pool_size,
            command_timeout: Duration::from_secs(self.redis_timeout_secs),
        }
    }
}

#[derive(Args)]
struct EtlArgs {
    #[command(flatten)]
    feed: FeedArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// Hours a trip entry lives after its last write
    #[arg(long, env = "RETENTION_HOURS")]
    retention_hours: u64,

    /// Largest number of writes per pipelined round trip
    #[arg(long, env = "MAX_BATCH_SIZE", default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    max_batch_size: usize,

    /// Only keep trips whose id contains one of these comma-separated patterns
    #[arg(long, env = "TRIP_ID_FILTER")]
    trip_filter: Option<String>,

    /// CSV file to append run summaries to
    #[arg(short, long, env = "SUMMARY_CSV")]
    summary_csv: Option<String>,
}

/// Everything a cycle needs, built once per process.
struct Etl {
    feed: GtfsRtFeed,
    store: RedisStore,
    config: RunConfig,
    filter: TripFilter,
    summary_csv: Option<String>,
}

impl Etl {
    async fn connect(args: &EtlArgs) -> Result<Self> {
        let config = RunConfig::new(args.retention_hours, args.max_batch_size)?;
        let feed = args.feed.build()?;
        let store_config = args.store.config();
        info!(url = %store_config.redacted_url(), "Connecting to store");
        let store = RedisStore::open(&store_config)
            .await
            .context("Invalid store settings")?;

        Ok(Self {
            feed,
            store,
            config,
            filter: trip_filter(args.trip_filter.as_deref()),
            summary_csv: args.summary_csv.clone(),
        })
    }

    async fn cycle(&self) -> RunSummary {
        let summary = RunCoordinator::new(&self.feed, &self.store, &self.config, self.filter.clone())
            .run_cycle()
            .await;

        if let Err(e) = log_json(&summary) {
            warn!(error = %e, "Failed to log run summary");
        }
        if let Some(path) = &self.summary_csv {
            if let Err(e) = append_summary(path, &summary) {
                error!(path = %path, error = %e, "Failed to write run summary");
            }
        }
        summary
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_stop_etl.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_stop_etl.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { etl } => {
            let etl = Etl::connect(&etl).await?;
            let summary = etl.cycle().await;
            if let Some(message) = summary.error_message {
                bail!(message);
            }
        }
        Commands::Watch {
            etl,
            interval,
            iterations,
        } => {
            let etl = Etl::connect(&etl).await?;
            watch(&etl, Duration::from_secs(interval), iterations).await;
        }
        Commands::Inspect { feed, trip_filter: filter } => {
            inspect(&feed, trip_filter(filter.as_deref())).await?;
        }
    }

    Ok(())
}

fn trip_filter(list: Option<&str>) -> TripFilter {
    list.map(TripFilter::parse).unwrap_or_default()
}

/// Runs cycles until the iteration limit or Ctrl+C, starting one every `interval`.
#[tracing::instrument(skip(etl, interval), fields(interval_secs = interval.as_secs()))]
async fn watch(etl: &Etl, interval: Duration, iterations: usize) {
    if iterations == 0 {
        info!("Running until Ctrl+C");
    } else {
        info!(iterations, "Starting cycles");
    }

    let mut cycle_count = 0;
    loop {
        if iterations > 0 && cycle_count >= iterations {
            break;
        }
        cycle_count += 1;

        let started = Instant::now();
        let summary = etl.cycle().await;
        if !summary.is_success() {
            warn!(cycle = cycle_count, "Cycle ended without touching the store");
        }

        if iterations > 0 && cycle_count >= iterations {
            break;
        }

        let elapsed = started.elapsed();
        let wait = match interval.checked_sub(elapsed) {
            Some(wait) => wait,
            None => {
                warn!(
                    elapsed_secs = elapsed.as_secs(),
                    interval_secs = interval.as_secs(),
                    "Cycle overran its interval"
                );
                Duration::ZERO
            }
        };

        debug!(wait_secs = wait.as_secs(), "Waiting before next cycle");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, stopping");
                break;
            }
        }
    }

    info!(cycles = cycle_count, "Finished running cycles");
}

/// Fetches and normalizes a feed, logging what a cycle would plan from it.
#[tracing::instrument(skip_all, fields(source = %args.source))]
async fn inspect(args: &FeedArgs, filter: TripFilter) -> Result<()> {
    let feed = args.build()?;
    let trips = feed.fetch_trips().await?;
    let normalized = normalize_all(&trips, &filter);

    for record in &normalized.records {
        log_json(record)?;
    }
    for rejection in &normalized.rejected {
        info!(reason = %rejection, "Trip rejected");
    }

    info!(
        trips = trips.len(),
        records = normalized.records.len(),
        rejected = normalized.rejected.len(),
        filtered = normalized.filtered,
        "Feed inspected"
    );
    Ok(())
}
