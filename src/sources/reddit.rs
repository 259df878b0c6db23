//! Reddit top-listing client.
//!
//! Authenticates app-only (`client_credentials` grant) against
//! `https://www.reddit.com/api/v1/access_token`, then reads
//! `/r/{subreddit}/top` from `https://oauth.reddit.com`. The bearer token is
//! cached until shortly before it expires and dropped on a 401.

use crate::api::{DayQuery, HeadlineSource};
use crate::config::RedditCredentials;
use crate::errors::FetchError;
use crate::models::Post;
use crate::utils::truncate_for_log;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const DEFAULT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";

/// Refresh this long before the advertised expiry.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    kind: String,
    data: RawPost,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    title: String,
    score: i64,
    #[serde(default)]
    num_comments: u64,
    created_utc: Option<f64>,
    url: Option<String>,
}

#[derive(Debug)]
struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Reddit API client implementing [`HeadlineSource`].
pub struct RedditClient {
    http: Client,
    credentials: RedditCredentials,
    auth_url: String,
    api_base: String,
    token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("auth_url", &self.auth_url)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl RedditClient {
    /// Build a client with the default Reddit endpoints.
    ///
    /// # Arguments
    ///
    /// * `credentials` - App id, secret, and the User-Agent sent on every request
    /// * `timeout` - Per-request timeout; an expired timeout is a transient error
    ///
    /// # Errors
    ///
    /// [`FetchError::Fatal`] if the HTTP client cannot be built.
    pub fn new(credentials: RedditCredentials, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(credentials.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Fatal(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            http,
            credentials,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: Mutex::new(None),
        })
    }

    /// Point the client at other token and API endpoints.
    pub fn with_endpoints(mut self, auth_url: &str, api_base: &str) -> Self {
        self.auth_url = auth_url.to_string();
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Build the listing URL for one day's query.
    pub fn listing_url(&self, query: &DayQuery) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/r/{}/top", self.api_base, query.subreddit))
            .map_err(|e| FetchError::Fatal(format!("invalid listing url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("t", query.window.as_str())
            .append_pair("limit", &query.limit.to_string())
            .append_pair("raw_json", "1");
        Ok(url)
    }

    /// Return a valid bearer token, requesting a new one if needed.
    async fn bearer(&self) -> Result<String, FetchError> {
        let mut guard = self.token.lock().await;
        if let Some(tok) = guard.as_ref() {
            if Instant::now() < tok.refresh_at {
                return Ok(tok.value.clone());
            }
        }

        debug!(auth_url = %self.auth_url, "Requesting access token");
        let resp = self
            .http
            .post(&self.auth_url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Fatal(format!(
                "client credentials rejected ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(classify_status(status, Some(resp.headers())));
        }

        let body = resp.text().await?;
        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            FetchError::MalformedResponse(format!(
                "token response: {} ({})",
                e,
                truncate_for_log(&body, 200)
            ))
        })?;

        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_SLACK);
        info!(expires_in = parsed.expires_in, "Obtained access token");
        let value = parsed.access_token;
        *guard = Some(AccessToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

impl HeadlineSource for RedditClient {
    #[instrument(level = "debug", skip_all, fields(subreddit = %query.subreddit, date = %query.date))]
    async fn fetch_top(&self, query: &DayQuery) -> Result<Vec<Post>, FetchError> {
        let token = self.bearer().await?;
        let url = self.listing_url(query)?;

        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!("Access token rejected; refreshing on next attempt");
            self.invalidate_token().await;
            return Err(FetchError::TransientNetwork(
                "access token expired".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(classify_status(status, Some(resp.headers())));
        }

        let body = resp.text().await?;
        let posts = parse_listing(&body)?;
        debug!(count = posts.len(), "Parsed listing");
        Ok(posts)
    }
}

/// Map a non-success HTTP status to a fetch error class.
pub fn classify_status(status: StatusCode, headers: Option<&HeaderMap>) -> FetchError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after: headers.and_then(retry_after),
        },
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => FetchError::TransientNetwork(format!("http {}", status)),
        s if s.is_server_error() => FetchError::TransientNetwork(format!("http {}", s)),
        s => FetchError::Fatal(format!("http {}", s)),
    }
}

/// Seconds to wait from `Retry-After`, falling back to `x-ratelimit-reset`.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["retry-after", "x-ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Parse a listing body into posts, ignoring non-post children.
pub fn parse_listing(body: &str) -> Result<Vec<Post>, FetchError> {
    let listing: Listing = serde_json::from_str(body).map_err(|e| {
        FetchError::MalformedResponse(format!("{} ({})", e, truncate_for_log(body, 200)))
    })?;

    Ok(listing
        .data
        .children
        .into_iter()
        .filter(|c| c.kind == "t3")
        .map(|c| Post {
            title: c.data.title,
            score: c.data.score,
            num_comments: c.data.num_comments,
            created_utc: c.data.created_utc.and_then(to_utc),
            url: c.data.url.filter(|u| !u.is_empty()),
        })
        .collect())
}

fn to_utc(secs: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs.trunc() as i64, 0).single()
}
