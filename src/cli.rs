//! Command-line interface definitions.
//!
//! Two subcommands share one binary: `crawl` collects daily top headlines
//! into a CSV, `join` merges a headline CSV with a stock price CSV.
//! Reddit credentials can come from flags, environment variables, or the
//! YAML config file; they are never compiled in.

use crate::api::TimeWindow;
use crate::models::AuxField;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
///
/// # Examples
///
/// ```sh
/// # Crawl r/worldnews for January 2016, resuming if interrupted
/// REDDIT_CLIENT_ID=... REDDIT_CLIENT_SECRET=... \
///   djia_headlines crawl --start 2016-01-01 --end 2016-01-31
///
/// # Join headlines with Dow Jones prices
/// djia_headlines join --news DJIA/data/news.csv --stock DJIA/data/dow_jones_data.csv
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a config.yaml file
    #[arg(short, long, global = true, env = "DJIA_HEADLINES_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Collect top posts day by day into a CSV
    Crawl(CrawlArgs),
    /// Join a headline CSV onto a stock price CSV by date
    Join(JoinArgs),
}

#[derive(Args, Debug)]
pub struct CrawlArgs {
    /// Reddit app client id
    #[arg(long, env = "REDDIT_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// Reddit app client secret
    #[arg(long, env = "REDDIT_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// User-Agent sent to Reddit
    #[arg(long, env = "REDDIT_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Subreddit to crawl (without the r/ prefix)
    #[arg(short, long)]
    pub subreddit: Option<String>,

    /// First day to crawl (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// Last day to crawl, inclusive (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Posts requested per day (max 100)
    #[arg(short, long)]
    pub limit: Option<u32>,

    /// Listing time window
    #[arg(long, value_enum)]
    pub window: Option<TimeWindow>,

    /// Fourth output column
    #[arg(long, value_enum)]
    pub aux_field: Option<AuxField>,

    /// Output CSV path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Checkpoint path (defaults to <output>.checkpoint.json)
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Pause after a successful day, in seconds
    #[arg(long)]
    pub delay_secs: Option<f64>,

    /// Pause after a skipped day, in seconds
    #[arg(long)]
    pub failure_delay_secs: Option<f64>,

    /// Retries of the same day on transient or rate-limit errors
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Ignore any existing checkpoint and start over
    #[arg(long)]
    pub fresh: bool,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// News CSV with at least `date` and `title` columns
    #[arg(short, long)]
    pub news: Option<PathBuf>,

    /// Stock CSV (date, close, high, low, open, volume)
    #[arg(short, long)]
    pub stock: Option<PathBuf>,

    /// Output CSV path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Lines skipped at the top of the stock file before its header line
    #[arg(long)]
    pub stock_skip_rows: Option<usize>,

    /// Keep at most this many titles per date
    #[arg(long)]
    pub max_titles: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_parsing() {
        let cli = Cli::parse_from([
            "djia_headlines",
            "crawl",
            "--subreddit",
            "news",
            "--start",
            "2016-01-01",
            "--end",
            "2016-01-31",
            "--aux-field",
            "timestamp",
            "--fresh",
        ]);
        match cli.command {
            Command::Crawl(args) => {
                assert_eq!(args.subreddit.as_deref(), Some("news"));
                assert_eq!(args.start, NaiveDate::from_ymd_opt(2016, 1, 1));
                assert_eq!(args.end, NaiveDate::from_ymd_opt(2016, 1, 31));
                assert_eq!(args.aux_field, Some(AuxField::Timestamp));
                assert!(args.fresh);
            }
            Command::Join(_) => panic!("expected crawl"),
        }
    }

    #[test]
    fn test_join_short_flags() {
        let cli = Cli::parse_from([
            "djia_headlines",
            "join",
            "-n",
            "/tmp/news.csv",
            "-s",
            "/tmp/dji.csv",
            "-o",
            "/tmp/out.csv",
        ]);
        match cli.command {
            Command::Join(args) => {
                assert_eq!(args.news, Some(PathBuf::from("/tmp/news.csv")));
                assert_eq!(args.stock, Some(PathBuf::from("/tmp/dji.csv")));
                assert_eq!(args.output, Some(PathBuf::from("/tmp/out.csv")));
            }
            Command::Crawl(_) => panic!("expected join"),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["djia_headlines", "join", "--config", "cfg.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("cfg.yaml")));
    }

    #[test]
    fn test_bad_date_rejected() {
        let res = Cli::try_parse_from(["djia_headlines", "crawl", "--start", "yesterday"]);
        assert!(res.is_err());
    }
}
