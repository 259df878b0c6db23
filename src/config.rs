//! Runtime configuration.
//!
//! Values are resolved in order: command-line flag (or its environment
//! variable), then the optional YAML file, then built-in defaults.
//!
//! ```yaml
//! reddit:
//!   user_agent: "script:worldnews_scraper:v1.0"
//! crawler:
//!   subreddit: worldnews
//!   start: 2016-01-01
//!   end: 2016-12-31
//!   limit: 25
//!   aux_field: timestamp
//!   delay_secs: 2
//!   failure_delay_secs: 5
//! join:
//!   news: DJIA/data/news.csv
//!   max_titles: 25
//! ```

use crate::api::TimeWindow;
use crate::cli::{CrawlArgs, JoinArgs};
use crate::errors::ConfigError;
use crate::models::AuxField;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

static SUBREDDIT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{2,21}$").expect("static regex"));

pub const MAX_LIMIT: u32 = 100;

/// Top-level layout of the YAML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub reddit: RedditSection,
    #[serde(default)]
    pub crawler: CrawlerSection,
    #[serde(default)]
    pub join: JoinSection,
}

/// `reddit:` section. Credentials here lose to flags and environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedditSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: Option<String>,
    pub auth_url: Option<String>,
    pub api_base: Option<String>,
}

/// `crawler:` section. Durations are in seconds and may be fractional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrawlerSection {
    pub subreddit: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub limit: Option<u32>,
    pub window: Option<TimeWindow>,
    pub aux_field: Option<AuxField>,
    pub output: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub delay_secs: Option<f64>,
    pub failure_delay_secs: Option<f64>,
    pub max_retries: Option<usize>,
    pub backoff_base_secs: Option<f64>,
    pub backoff_max_secs: Option<f64>,
    pub timeout_secs: Option<f64>,
}

/// `join:` section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSection {
    pub news: Option<PathBuf>,
    pub stock: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub stock_skip_rows: Option<usize>,
    pub max_titles: Option<usize>,
}

impl FileConfig {
    /// Load the YAML file at `path`, or defaults when no path is given.
    #[instrument(level = "info")]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg = Self::from_yaml(&text)?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(cfg)
    }

    /// Parse config text. Empty text yields the defaults.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Reddit app credentials. Never logged.
#[derive(Clone)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
}

impl fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Fully resolved settings for a crawl run.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub credentials: RedditCredentials,
    pub auth_url: String,
    pub api_base: String,
    pub subreddit: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub limit: u32,
    pub window: TimeWindow,
    pub aux_field: AuxField,
    pub output: PathBuf,
    pub checkpoint: PathBuf,
    pub delay: Duration,
    pub failure_delay: Duration,
    pub max_retries: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub timeout: Duration,
    pub fresh: bool,
}

impl CrawlSettings {
    /// Merge flags, the config file, and built-in defaults, in that order of
    /// precedence, and validate the result.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed `crawl` flags (environment fallbacks already applied)
    /// * `file` - The loaded config file, or its defaults
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingCredential`] when no client id or secret is
    /// given anywhere, and [`ConfigError::Invalid`] for a bad subreddit name,
    /// a limit outside `1..=100`, an inverted date range, or a negative or
    /// non-finite duration.
    pub fn resolve(args: &CrawlArgs, file: &FileConfig) -> Result<Self, ConfigError> {
        let c = &file.crawler;
        let r = &file.reddit;

        let credentials = RedditCredentials {
            client_id: pick_credential(&args.client_id, &r.client_id, "REDDIT_CLIENT_ID")?,
            client_secret: pick_credential(
                &args.client_secret,
                &r.client_secret,
                "REDDIT_CLIENT_SECRET",
            )?,
            user_agent: args
                .user_agent
                .clone()
                .or_else(|| r.user_agent.clone())
                .unwrap_or_else(|| {
                    format!("script:djia_headlines:v{}", env!("CARGO_PKG_VERSION"))
                }),
        };

        let subreddit = args
            .subreddit
            .clone()
            .or_else(|| c.subreddit.clone())
            .unwrap_or_else(|| "worldnews".to_string());
        if !SUBREDDIT_NAME.is_match(&subreddit) {
            return Err(invalid("subreddit", format!("'{}' is not a subreddit name", subreddit)));
        }

        let start = args.start.or(c.start).unwrap_or(default_start());
        let end = args.end.or(c.end).unwrap_or(default_end());
        if start > end {
            return Err(invalid("end", format!("{} is before start {}", end, start)));
        }

        let limit = args.limit.or(c.limit).unwrap_or(25);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(invalid("limit", format!("{} not in 1..={}", limit, MAX_LIMIT)));
        }

        let output = args
            .output
            .clone()
            .or_else(|| c.output.clone())
            .unwrap_or_else(|| PathBuf::from(format!("DJIA/reddit_{}_headlines.csv", subreddit)));
        let checkpoint = args
            .checkpoint
            .clone()
            .or_else(|| c.checkpoint.clone())
            .unwrap_or_else(|| default_checkpoint(&output));

        Ok(Self {
            credentials,
            auth_url: r
                .auth_url
                .clone()
                .unwrap_or_else(|| crate::sources::reddit::DEFAULT_AUTH_URL.to_string()),
            api_base: r
                .api_base
                .clone()
                .unwrap_or_else(|| crate::sources::reddit::DEFAULT_API_BASE.to_string()),
            subreddit,
            start,
            end,
            limit,
            window: args.window.or(c.window).unwrap_or_default(),
            aux_field: args.aux_field.or(c.aux_field).unwrap_or_default(),
            output,
            checkpoint,
            delay: secs("delay_secs", args.delay_secs.or(c.delay_secs), 2.0)?,
            failure_delay: secs(
                "failure_delay_secs",
                args.failure_delay_secs.or(c.failure_delay_secs),
                5.0,
            )?,
            max_retries: args.max_retries.or(c.max_retries).unwrap_or(3),
            backoff_base: secs("backoff_base_secs", c.backoff_base_secs, 1.0)?,
            backoff_max: secs("backoff_max_secs", c.backoff_max_secs, 30.0)?,
            timeout: secs("timeout_secs", c.timeout_secs, 30.0)?,
            fresh: args.fresh,
        })
    }
}

/// Fully resolved settings for a join run.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSettings {
    pub news: PathBuf,
    pub stock: PathBuf,
    pub output: PathBuf,
    pub stock_skip_rows: usize,
    pub max_titles: Option<usize>,
}

impl JoinSettings {
    /// Merge `join` flags with the config file and defaults.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed `join` flags
    /// * `file` - The loaded config file, or its defaults
    ///
    /// # Returns
    ///
    /// Paths default to the `DJIA/data/` layout, two preamble rows are
    /// skipped, and the title columns are uncapped.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when `max_titles` is zero.
    pub fn resolve(args: &JoinArgs, file: &FileConfig) -> Result<Self, ConfigError> {
        let j = &file.join;
        let max_titles = args.max_titles.or(j.max_titles);
        if max_titles == Some(0) {
            return Err(invalid("max_titles", "must be at least 1".to_string()));
        }
        Ok(Self {
            news: args
                .news
                .clone()
                .or_else(|| j.news.clone())
                .unwrap_or_else(|| PathBuf::from("DJIA/data/news.csv")),
            stock: args
                .stock
                .clone()
                .or_else(|| j.stock.clone())
                .unwrap_or_else(|| PathBuf::from("DJIA/data/dow_jones_data.csv")),
            output: args
                .output
                .clone()
                .or_else(|| j.output.clone())
                .unwrap_or_else(|| PathBuf::from("DJIA/data/combined_dataset.csv")),
            stock_skip_rows: args.stock_skip_rows.or(j.stock_skip_rows).unwrap_or(2),
            max_titles,
        })
    }
}

fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 1, 1).unwrap_or_default()
}

fn default_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or_default()
}

/// `<output>.checkpoint.json` next to the output file.
pub fn default_checkpoint(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "headlines.csv".into());
    name.push(".checkpoint.json");
    output.with_file_name(name)
}

fn pick_credential(
    flag: &Option<String>,
    file: &Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    flag.clone()
        .or_else(|| file.clone())
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingCredential(name))
}

fn secs(field: &'static str, value: Option<f64>, default: f64) -> Result<Duration, ConfigError> {
    let v = value.unwrap_or(default);
    Duration::try_from_secs_f64(v).map_err(|_| invalid(field, format!("{} is not a valid duration", v)))
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
