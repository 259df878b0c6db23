//! # DJIA Headlines
//!
//! Builds a daily news + Dow Jones dataset in two steps:
//!
//! - `crawl`: walks a date range one day at a time, fetching the top posts
//!   of a subreddit and appending them to a CSV. Progress is checkpointed
//!   after every day so an interrupted run resumes where it stopped.
//! - `join`: pivots a headline CSV into `title N` columns per date and
//!   left-joins it onto a stock price CSV.
//!
//! ## Usage
//!
//! ```sh
//! djia_headlines crawl --subreddit worldnews --start 2016-01-01 --end 2016-12-31
//! djia_headlines join --news DJIA/data/news.csv --stock DJIA/data/dow_jones_data.csv
//! ```

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod crawler;
mod errors;
mod joiner;
mod models;
mod outputs;
mod sources;
mod utils;

use api::RetryFetch;
use cli::{Cli, Command, CrawlArgs, JoinArgs};
use config::{CrawlSettings, FileConfig, JoinSettings};
use crawler::{CrawlPlan, CrawlState};
use sources::reddit::RedditClient;
use utils::ensure_parent_writable;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "djia_headlines starting up");

    let args = Cli::parse();
    debug!(config = ?args.config, "Parsed CLI arguments");

    let file_config = match FileConfig::load(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    let result = match &args.command {
        Command::Crawl(crawl_args) => run_crawl(crawl_args, &file_config).await,
        Command::Join(join_args) => run_join(join_args, &file_config).await,
    };

    let elapsed = start_time.elapsed();
    match &result {
        Ok(()) => info!(?elapsed, secs = elapsed.as_secs(), "Execution complete"),
        Err(e) => error!(?elapsed, error = %e, "Execution failed"),
    }
    result
}

#[instrument(level = "info", skip_all)]
async fn run_crawl(args: &CrawlArgs, file: &FileConfig) -> Result<(), Box<dyn Error>> {
    let settings = CrawlSettings::resolve(args, file)?;
    info!(
        subreddit = %settings.subreddit,
        start = %settings.start,
        end = %settings.end,
        limit = settings.limit,
        aux_field = %settings.aux_field,
        output = %settings.output.display(),
        "Resolved crawl settings"
    );

    if let Err(e) = ensure_parent_writable(&settings.output).await {
        error!(
            path = %settings.output.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let client = RedditClient::new(settings.credentials.clone(), settings.timeout)?
        .with_endpoints(&settings.auth_url, &settings.api_base);
    let source = RetryFetch::new(client, settings.max_retries, settings.backoff_base)
        .with_max_delay(settings.backoff_max);

    let plan = CrawlPlan::from_settings(&settings);
    let mut state =
        CrawlState::open(&plan, &settings.output, &settings.checkpoint, settings.fresh).await?;
    let summary = crawler::crawl(&source, &plan, &mut state).await?;

    info!(
        resumed_from = ?summary.resumed_from,
        days_attempted = summary.days_attempted,
        days_succeeded = summary.days_succeeded,
        days_skipped = summary.days_skipped,
        records_written = summary.records_written,
        total_records = state.checkpoint.records_written,
        path = %state.writer.path().display(),
        "Crawl summary"
    );
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn run_join(args: &JoinArgs, file: &FileConfig) -> Result<(), Box<dyn Error>> {
    let settings = JoinSettings::resolve(args, file)?;

    if let Err(e) = ensure_parent_writable(&settings.output).await {
        error!(
            path = %settings.output.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let summary = tokio::task::spawn_blocking(move || joiner::run_join(&settings)).await??;
    info!(
        stock_rows = summary.stock_rows,
        news_rows = summary.news_rows,
        title_columns = summary.title_columns,
        matched_rows = summary.matched_rows,
        "Join summary"
    );
    Ok(())
}
