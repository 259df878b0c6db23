//! Headline source abstraction with classified retry and exponential backoff.
//!
//! # Architecture
//!
//! - [`HeadlineSource`]: core trait, one call fetches one day's top posts
//! - [`RetryFetch`]: decorator that retries a day on retryable errors
//!
//! # Retry Strategy
//!
//! Only [`FetchError::TransientNetwork`] and [`FetchError::RateLimited`] are
//! retried. The delay before retry `n` is
//!
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=max_jitter)
//! ```
//!
//! raised to the server's `Retry-After` when a rate limit supplies one.

use crate::errors::FetchError;
use crate::models::Post;
use chrono::NaiveDate;
use clap::ValueEnum;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Listing window passed to the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }
}

/// Parameters of one day's fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct DayQuery {
    pub subreddit: String,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub limit: u32,
}

/// A source of top posts, queried once per crawl day.
pub trait HeadlineSource {
    async fn fetch_top(&self, query: &DayQuery) -> Result<Vec<Post>, FetchError>;
}

/// Wrapper that retries retryable failures of any [`HeadlineSource`].
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
}

impl<T> RetryFetch<T>
where
    T: HeadlineSource,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: usize, err: &FetchError) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let mut delay = self.base_delay.saturating_mul(1u32 << shift);
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        if let FetchError::RateLimited {
            retry_after: Some(after),
        } = err
        {
            delay = delay.max(*after);
        }
        let jitter_cap = self.max_jitter.as_millis() as u64;
        if jitter_cap > 0 {
            delay += Duration::from_millis(rng().random_range(0..=jitter_cap));
        }
        delay
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> HeadlineSource for RetryFetch<T>
where
    T: HeadlineSource,
{
    #[instrument(level = "debug", skip_all, fields(date = %query.date))]
    async fn fetch_top(&self, query: &DayQuery) -> Result<Vec<Post>, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch_top(query).await {
                Ok(posts) => return Ok(posts),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            kind = e.kind(),
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt, &e);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        kind = e.kind(),
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Source that replays a scripted sequence of outcomes and records calls.
    pub(crate) struct ScriptedSource {
        script: RefCell<VecDeque<Result<Vec<Post>, FetchError>>>,
        pub calls: RefCell<Vec<NaiveDate>>,
    }

    impl ScriptedSource {
        pub(crate) fn new(script: Vec<Result<Vec<Post>, FetchError>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl HeadlineSource for ScriptedSource {
        async fn fetch_top(&self, query: &DayQuery) -> Result<Vec<Post>, FetchError> {
            self.calls.borrow_mut().push(query.date);
            self.script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    pub(crate) fn post(title: &str) -> Post {
        Post {
            title: title.to_string(),
            score: 10,
            num_comments: 2,
            created_utc: None,
            url: None,
        }
    }

    fn query() -> DayQuery {
        DayQuery {
            subreddit: "worldnews".to_string(),
            date: NaiveDate::from_ymd_opt(2016, 1, 1).unwrap(),
            window: TimeWindow::Day,
            limit: 25,
        }
    }

    fn retrying(source: ScriptedSource, max_retries: usize) -> RetryFetch<ScriptedSource> {
        RetryFetch::new(source, max_retries, Duration::ZERO).with_max_jitter(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let api = retrying(
            ScriptedSource::new(vec![
                Err(FetchError::TransientNetwork("reset".into())),
                Err(FetchError::RateLimited { retry_after: None }),
                Ok(vec![post("a")]),
            ]),
            3,
        );
        let posts = api.fetch_top(&query()).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(api.inner().calls.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let api = retrying(
            ScriptedSource::new(vec![
                Err(FetchError::TransientNetwork("1".into())),
                Err(FetchError::TransientNetwork("2".into())),
                Err(FetchError::TransientNetwork("3".into())),
                Ok(vec![post("never")]),
            ]),
            2,
        );
        let err = api.fetch_top(&query()).await.unwrap_err();
        assert!(matches!(err, FetchError::TransientNetwork(ref m) if m == "3"));
        assert_eq!(api.inner().calls.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_is_not_retried() {
        let api = retrying(
            ScriptedSource::new(vec![
                Err(FetchError::MalformedResponse("bad".into())),
                Ok(vec![post("a")]),
            ]),
            5,
        );
        let err = api.fetch_top(&query()).await.unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
        assert_eq!(api.inner().calls.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let api = retrying(
            ScriptedSource::new(vec![Err(FetchError::Fatal("401".into()))]),
            5,
        );
        assert!(api.fetch_top(&query()).await.is_err());
        assert_eq!(api.inner().calls.borrow().len(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let api = RetryFetch::new(ScriptedSource::new(vec![]), 5, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_max_jitter(Duration::ZERO);
        let e = FetchError::TransientNetwork("x".into());
        assert_eq!(api.backoff(1, &e), Duration::from_secs(1));
        assert_eq!(api.backoff(2, &e), Duration::from_secs(2));
        assert_eq!(api.backoff(3, &e), Duration::from_secs(4));
        assert_eq!(api.backoff(4, &e), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_honours_retry_after() {
        let api = RetryFetch::new(ScriptedSource::new(vec![]), 5, Duration::from_secs(1))
            .with_max_jitter(Duration::ZERO);
        let e = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(api.backoff(1, &e), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let api = RetryFetch::new(ScriptedSource::new(vec![]), 5, Duration::from_secs(1));
        let e = FetchError::TransientNetwork("x".into());
        for _ in 0..20 {
            let d = api.backoff(1, &e);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_time_window_strings() {
        assert_eq!(TimeWindow::Day.as_str(), "day");
        assert_eq!(TimeWindow::default(), TimeWindow::Day);
        let w: TimeWindow = serde_yaml::from_str("week").unwrap();
        assert_eq!(w, TimeWindow::Week);
    }
}
