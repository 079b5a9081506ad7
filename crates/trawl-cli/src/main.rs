use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use trawl_client::ReqwestFetcher;
use trawl_core::extract::MismatchPolicy;
use trawl_core::pagination::PaginationConfig;
use trawl_core::sink::{prepare_output, write_outputs};
use trawl_core::{
    FailureKind, IdentityPool, Lane, Pipeline, PipelineConfig, RetryPolicy, RunOutput,
    SchemaResolver, ThrottleConfig, TracingReporter,
};

#[derive(Parser)]
#[command(
    name = "trawl",
    version,
    about = "Rate-limited, paginated job-listing crawler"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every listing page, enrich from detail pages, write CSV
    Scrape {
        #[command(flatten)]
        source: SourceArgs,

        /// Output CSV path. The failure log is written next to it.
        #[arg(short, long, env = "TRAWL_OUTPUT", default_value = "jobs.csv")]
        output: PathBuf,

        /// First listing page to visit (resume point)
        #[arg(long, env = "TRAWL_START_PAGE", default_value_t = 1)]
        start_page: u32,

        /// Last listing page to visit, capped at the discovered last page
        #[arg(long, env = "TRAWL_END_PAGE")]
        end_page: Option<u32>,

        /// Minimum delay between requests, in milliseconds
        #[arg(long, env = "TRAWL_DELAY_MS", default_value_t = 1000)]
        delay_ms: u64,

        /// Maximum random jitter added to each delay, in milliseconds
        #[arg(long, env = "TRAWL_JITTER_MS", default_value_t = 500)]
        jitter_ms: u64,

        /// Pace each host separately instead of all requests together
        #[arg(long, default_value_t = false)]
        per_host: bool,

        /// Retries per request after the first attempt
        #[arg(long, env = "TRAWL_MAX_RETRIES", default_value_t = 3)]
        max_retries: u32,

        /// Concurrent detail-page fetches
        #[arg(short, long, env = "TRAWL_WORKERS", default_value_t = 1)]
        workers: usize,

        /// What to do with listing pages whose field lists disagree (discard, zip)
        #[arg(long, env = "TRAWL_ON_MISMATCH", default_value = "discard")]
        on_mismatch: MismatchPolicy,

        /// File with one User-Agent per line (defaults to a built-in pool)
        #[arg(long, env = "TRAWL_USER_AGENTS")]
        user_agents: Option<PathBuf>,

        /// Only crawl listing pages, skip detail pages
        #[arg(long, default_value_t = false)]
        no_details: bool,
    },

    /// Print the last page number declared by the listing root
    Discover {
        #[command(flatten)]
        source: SourceArgs,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Listing root; its pager declares the last page
    #[arg(long, env = "TRAWL_LISTING_URL", default_value = "https://pinoyjobs.ph/jobs/")]
    listing_url: String,

    /// Listing page URL, with {page} replaced by the page number
    #[arg(
        long,
        env = "TRAWL_PAGE_URL",
        default_value = "https://pinoyjobs.ph/jobs/page/{page}/"
    )]
    page_url: String,

    /// Selector schema: file path, name@version, or name@latest
    #[arg(short, long, env = "TRAWL_SCHEMA", default_value = "pinoyjobs@latest")]
    schema: String,

    /// Directory holding versioned schemas and registry.json
    #[arg(long, env = "TRAWL_SCHEMAS_DIR", default_value = "schemas")]
    schemas_dir: PathBuf,

    /// Per-request timeout in seconds
    #[arg(long, env = "TRAWL_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trawl=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    match cli.command {
        Commands::Scrape {
            source,
            output,
            start_page,
            end_page,
            delay_ms,
            jitter_ms,
            per_host,
            max_retries,
            workers,
            on_mismatch,
            user_agents,
            no_details,
        } => {
            let mut pagination = PaginationConfig::new(&source.listing_url, &source.page_url)
                .with_start_page(start_page);
            if let Some(end) = end_page {
                pagination = pagination.with_end_page(end);
            }
            let lane = if per_host { Lane::PerHost } else { Lane::Global };
            let config = PipelineConfig::new(pagination)
                .with_retry(RetryPolicy::default().with_max_retries(max_retries))
                .with_throttle(
                    ThrottleConfig::new(Duration::from_millis(delay_ms))
                        .with_jitter(Duration::from_millis(jitter_ms))
                        .with_lane(lane),
                )
                .with_workers(workers)
                .with_mismatch_policy(on_mismatch)
                .with_enrich_details(!no_details);

            let identities = match user_agents {
                Some(path) => IdentityPool::from_file(&path)
                    .with_context(|| format!("Failed to load user agents from {}", path.display()))?,
                None => IdentityPool::default(),
            };

            let pipeline = build_pipeline(&source, identities, config)?;
            cmd_scrape(&pipeline, &output, cancel).await?;
        }
        Commands::Discover { source } => {
            let config = PipelineConfig::new(PaginationConfig::new(
                &source.listing_url,
                &source.page_url,
            ));
            let pipeline = build_pipeline(&source, IdentityPool::default(), config)?;
            let last_page = pipeline.discover(&cancel).await?;
            println!("{last_page}");
        }
    }

    Ok(())
}

/// Cancel the run on the first Ctrl-C; partial results are still written.
fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight requests");
            cancel.cancel();
        }
    });
}

fn build_pipeline(
    source: &SourceArgs,
    identities: IdentityPool,
    config: PipelineConfig,
) -> Result<Pipeline<ReqwestFetcher>> {
    let resolved = SchemaResolver::new(&source.schemas_dir).resolve(&source.schema)?;
    match &resolved.path {
        Some(path) => tracing::info!(schema = %resolved.name, path = %path.display(), "Loaded schema"),
        None => tracing::info!(schema = %resolved.name, "Using built-in schema"),
    }

    let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(source.timeout_secs))?;
    let pipeline = Pipeline::new(fetcher, resolved.schema, identities, config)?;
    Ok(pipeline)
}

async fn cmd_scrape(
    pipeline: &Pipeline<ReqwestFetcher>,
    output: &std::path::Path,
    cancel: CancellationToken,
) -> Result<()> {
    prepare_output(output)
        .with_context(|| format!("Output path {} is not usable", output.display()))?;
    let run = pipeline.run(cancel, &TracingReporter).await?;

    let written = write_outputs(output, &run.dataset, &run.failures)?;
    print_summary(&run);
    println!("Dataset:    {}", written.dataset.display());
    println!("Log:        {}", written.failure_log.display());

    Ok(())
}

fn print_summary(run: &RunOutput) {
    let elapsed = run.finished_at - run.started_at;
    println!("Run:        {}", run.run_id);
    println!(
        "Pages:      {}/{} fetched (last page {})",
        run.pages_fetched, run.pages_attempted, run.last_page
    );
    println!("Records:    {}", run.dataset.len());
    println!("Failures:   {}", run.failures.len());
    for kind in [
        FailureKind::PageFetchFailed,
        FailureKind::DetailFetchFailed,
        FailureKind::FieldCountMismatch,
        FailureKind::EmptyPage,
    ] {
        let count = run.failures.count(kind);
        if count > 0 {
            println!("  {kind:?}: {count}");
        }
    }
    println!("Duration:   {}s", elapsed.num_seconds());

    if run.interrupted {
        tracing::warn!("Run was interrupted; output is partial");
    } else if run.is_degraded() {
        tracing::warn!("Run completed with failures; see the failure log");
    }
}
