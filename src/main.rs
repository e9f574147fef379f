//! # AI Fintech Weekly
//!
//! A weekly news pipeline that collects AI-in-finance stories in English and
//! Chinese, deduplicates them per ISO week, asks an OpenAI-compatible LLM for
//! a digest and publishes the archive as a static site.
//!
//! ## Usage
//!
//! ```sh
//! ai_fintech_weekly --data-dir ./data --site-dir ./docs
//! ai_fintech_weekly summarize --week 2024-W03
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: every query of the plan, sequentially; failures are
//!    isolated per query
//! 2. **Aggregation**: normalize, deduplicate and merge into the week's dataset
//! 3. **Summarization**: only when the week's item count changed
//! 4. **Site**: re-rendered from the full archive
//!
//! Source and LLM failures degrade the run (exit 0, `warn!` lines); storage
//! and configuration failures abort it with a non-zero exit.

use std::error::Error;

use chrono::Local;
use clap::Parser;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod archive;
mod cli;
mod config;
mod error;
mod models;
mod normalize;
mod orchestrator;
mod pipeline;
mod site;
mod sources;
mod summarize;
mod utils;
mod week;

use archive::FsArchive;
use cli::{Cli, Command};
use config::Config;
use orchestrator::{SummaryOutcome, local_now};
use pipeline::{FetchPlan, run, run_fetch, run_site, run_summarize};
use site::HtmlRenderer;
use sources::HttpFetcher;
use summarize::{OpenAiSummarizer, RetrySummarize};
use utils::ensure_writable_dir;
use week::WeekKey;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("ai_fintech_weekly starting up");

    let args = Cli::parse();
    debug!(data_dir = %args.data_dir.display(), site_dir = %args.site_dir.display(), command = ?args.command(), "Parsed CLI arguments");

    let mut config = Config::load(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate()?;

    let as_of = args.as_of.unwrap_or_else(|| Local::now().date_naive());
    let mut archive = FsArchive::new(&args.data_dir);
    let renderer = HtmlRenderer::new(&config.site);

    let plan = FetchPlan {
        as_of,
        lookback_days: config.lookback_days,
        queries: config.sources.clone(),
    };

    match args.command() {
        Command::Run => {
            check_writable(&args.data_dir).await?;
            check_writable(&args.site_dir).await?;
            let fetcher = HttpFetcher::new(config.request_timeout(), config.max_items_per_query)?;
            let summarizer = build_summarizer(&args, &config)?;
            let report = run(&mut archive, &fetcher, &summarizer, &renderer, &plan, &args.site_dir, &local_now).await?;
            if report.is_degraded() {
                warn!(week = %report.week, reasons = report.degradations().len(), "Run finished degraded");
            }
        }
        Command::Fetch => {
            check_writable(&args.data_dir).await?;
            let fetcher = HttpFetcher::new(config.request_timeout(), config.max_items_per_query)?;
            let report = run_fetch(&mut archive, &fetcher, &plan).await?;
            if report.is_degraded() {
                warn!(failed = report.sources_failed.len(), "Fetch finished degraded");
            }
        }
        Command::Summarize { week } => {
            let week = week.unwrap_or_else(|| WeekKey::from_date(as_of));
            let summarizer = build_summarizer(&args, &config)?;
            match run_summarize(&mut archive, &summarizer, &week, &local_now).await? {
                SummaryOutcome::Failed(e) => warn!(%week, error = %e, "Summary not refreshed"),
                SummaryOutcome::NoDataset => warn!(%week, "No dataset stored for this week"),
                outcome => info!(%week, ?outcome, "Summary step finished"),
            }
        }
        Command::Site => {
            check_writable(&args.site_dir).await?;
            let pages = run_site(&archive, &renderer, &args.site_dir).await?;
            info!(pages, "Site rebuilt");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Execution complete"
    );
    Ok(())
}

async fn check_writable(path: &std::path::Path) -> Result<(), Box<dyn Error>> {
    if let Err(e) = ensure_writable_dir(path).await {
        error!(
            path = %path.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e.into());
    }
    Ok(())
}

fn build_summarizer(args: &Cli, config: &Config) -> Result<RetrySummarize<OpenAiSummarizer>, Box<dyn Error>> {
    if args.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; summaries will not be generated");
    }
    let inner = OpenAiSummarizer::new(args.openai_api_key.clone(), &config.summarizer)?;
    Ok(RetrySummarize::new(
        inner,
        config.summarizer.max_retries,
        std::time::Duration::from_secs(1),
    ))
}
