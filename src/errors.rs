//! Error types for the crawler, the joiner, and configuration loading.
//!
//! Fetch failures are classified so the crawl loop can decide per class
//! whether to retry the same day, skip it, or stop the run:
//!
//! | Class | Retried | Day outcome |
//! |-------|---------|-------------|
//! | [`FetchError::TransientNetwork`] | yes | skipped once retries run out |
//! | [`FetchError::RateLimited`] | yes | skipped once retries run out |
//! | [`FetchError::MalformedResponse`] | no | skipped |
//! | [`FetchError::Fatal`] | no | run stops |

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// A failed attempt to fetch one day's posts.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("rate limited by remote service")]
    RateLimited {
        /// Server-provided `Retry-After`, when present.
        retry_after: Option<Duration>,
    },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Whether the same day may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::TransientNetwork(_) | FetchError::RateLimited { .. }
        )
    }

    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::TransientNetwork(_) => "transient_network",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::MalformedResponse(_) => "malformed_response",
            FetchError::Fatal(_) => "fatal",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::MalformedResponse(e.to_string())
        } else if e.is_builder() {
            FetchError::Fatal(e.to_string())
        } else if let Some(status) = e.status() {
            crate::sources::reddit::classify_status(status, None)
        } else {
            // timeouts, connect failures, resets mid-body
            FetchError::TransientNetwork(e.to_string())
        }
    }
}

/// Errors that stop a crawl run.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("fetch for {date} failed fatally: {source}")]
    Fetch {
        date: NaiveDate,
        #[source]
        source: FetchError,
    },
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("{path} has header '{found}', expected '{expected}'; pass --fresh to overwrite")]
    OutputHeader {
        path: String,
        found: String,
        expected: String,
    },
}

/// Errors raised while joining the news and stock tables. All are fatal.
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing column '{0}' in news header")]
    MissingColumn(&'static str),
    #[error("stock file ended before its header line")]
    MissingStockHeader,
    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: u64,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: unparseable date '{value}'")]
    BadDate { line: u64, value: String },
}

/// Errors while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("missing credential {0} (set the flag or environment variable)")]
    MissingCredential(&'static str),
}
