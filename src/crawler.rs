//! Day-by-day headline crawl.
//!
//! The loop has one state, "advance to the next day": for each day in the
//! closed range it issues one query, appends the normalized posts, moves the
//! checkpoint, and pauses before the next day. The cursor advances by exactly
//! one day whatever the outcome:
//!
//! | Outcome | Effect | Pause |
//! |---------|--------|-------|
//! | posts returned | appended, checkpoint advanced | `delay` |
//! | retryable error after retries / malformed response | day recorded as skipped | `failure_delay` |
//! | fatal error | run stops, persisted progress kept | — |

use crate::api::{DayQuery, HeadlineSource, TimeWindow};
use crate::config::CrawlSettings;
use crate::errors::{CrawlError, FetchError};
use crate::models::{AuxField, HeadlineRecord};
use crate::outputs::checkpoint::{Checkpoint, RunKey};
use crate::outputs::headlines::HeadlineWriter;
use crate::utils::days_inclusive;
use chrono::NaiveDate;
use itertools::Itertools;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// What to crawl and how to pace it.
#[derive(Debug, Clone)]
pub struct CrawlPlan {
    pub subreddit: String,
    /// First day, inclusive.
    pub start: NaiveDate,
    /// Last day, inclusive.
    pub end: NaiveDate,
    pub limit: u32,
    pub window: TimeWindow,
    pub aux_field: AuxField,
    /// Pause after a day that returned posts.
    pub delay: Duration,
    /// Pause after a skipped day.
    pub failure_delay: Duration,
}

impl CrawlPlan {
    /// Take the crawl-loop part of resolved settings.
    pub fn from_settings(s: &CrawlSettings) -> Self {
        Self {
            subreddit: s.subreddit.clone(),
            start: s.start,
            end: s.end,
            limit: s.limit,
            window: s.window,
            aux_field: s.aux_field,
            delay: s.delay,
            failure_delay: s.failure_delay,
        }
    }

    /// Key a checkpoint must carry to be resumed by this plan.
    pub fn run_key(&self) -> RunKey {
        RunKey {
            subreddit: self.subreddit.clone(),
            start: self.start,
            end: self.end,
            aux_field: self.aux_field,
        }
    }
}

/// Outcome of a crawl run (this invocation only).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlSummary {
    pub resumed_from: Option<NaiveDate>,
    pub days_attempted: u64,
    pub days_succeeded: u64,
    pub days_skipped: u64,
    pub records_written: u64,
}

/// Crawl progress on disk: the output CSV plus its checkpoint.
#[derive(Debug)]
pub struct CrawlState {
    /// Append-only headline CSV.
    pub writer: HeadlineWriter,
    /// In-memory copy of the checkpoint, saved after every day.
    pub checkpoint: Checkpoint,
    /// Where `checkpoint` is persisted.
    pub checkpoint_path: PathBuf,
}

impl CrawlState {
    /// Open or resume the state for `plan`.
    ///
    /// With `fresh`, the checkpoint is removed and the output truncated.
    /// Otherwise a checkpoint for the same run is resumed, a checkpoint for a
    /// different run is an error, and an output file without a checkpoint is
    /// refused rather than appended to blindly.
    ///
    /// A new run saves its empty checkpoint as soon as the output header is
    /// written, so a run that stops before its first day can be restarted
    /// without `--fresh`. On resume, bytes past the checkpoint's `output_len`
    /// are cut off: they belong to a day whose checkpoint was never written
    /// and that day is fetched again.
    ///
    /// # Errors
    ///
    /// [`CrawlError::Checkpoint`] for a foreign or unreadable checkpoint, an
    /// unknown output file, or an output shorter than the checkpoint records.
    #[instrument(level = "info", skip_all, fields(output = %output.display(), fresh = fresh))]
    pub async fn open(
        plan: &CrawlPlan,
        output: &Path,
        checkpoint_path: &Path,
        fresh: bool,
    ) -> Result<Self, CrawlError> {
        let key = plan.run_key();

        if fresh {
            Checkpoint::remove(checkpoint_path).await?;
            let writer = HeadlineWriter::open(output, plan.aux_field, true).await?;
            return Self::start_new(writer, key, checkpoint_path).await;
        }

        match Checkpoint::load(checkpoint_path).await? {
            Some(cp) if cp.run == key => {
                info!(
                    last_completed = ?cp.last_completed,
                    skipped = cp.skipped.len(),
                    records = cp.records_written,
                    "Resuming from checkpoint"
                );
                let writer = HeadlineWriter::open(output, plan.aux_field, false).await?;
                reconcile_output(&writer, &cp).await?;
                Ok(Self {
                    writer,
                    checkpoint: cp,
                    checkpoint_path: checkpoint_path.to_path_buf(),
                })
            }
            Some(cp) => Err(CrawlError::Checkpoint(format!(
                "{} belongs to r/{} {}..{} ({}); pass --fresh to start over",
                checkpoint_path.display(),
                cp.run.subreddit,
                cp.run.start,
                cp.run.end,
                cp.run.aux_field
            ))),
            None => {
                let has_rows = tokio::fs::metadata(output)
                    .await
                    .map(|m| m.len() > 0)
                    .unwrap_or(false);
                if has_rows {
                    return Err(CrawlError::Checkpoint(format!(
                        "{} exists but has no checkpoint; pass --fresh to overwrite",
                        output.display()
                    )));
                }
                let writer = HeadlineWriter::open(output, plan.aux_field, false).await?;
                Self::start_new(writer, key, checkpoint_path).await
            }
        }
    }

    async fn start_new(
        writer: HeadlineWriter,
        key: RunKey,
        checkpoint_path: &Path,
    ) -> Result<Self, CrawlError> {
        let mut checkpoint = Checkpoint::new(key);
        checkpoint.output_len = writer.byte_len().await?;
        checkpoint.save(checkpoint_path).await?;
        Ok(Self {
            writer,
            checkpoint,
            checkpoint_path: checkpoint_path.to_path_buf(),
        })
    }
}

/// Make the output length agree with the checkpoint before appending.
async fn reconcile_output(writer: &HeadlineWriter, cp: &Checkpoint) -> Result<(), CrawlError> {
    if cp.output_len == 0 {
        return Ok(());
    }
    let actual = writer.byte_len().await?;
    if actual > cp.output_len {
        warn!(
            expected = cp.output_len,
            actual = actual,
            "Output has rows past the checkpoint; dropping them"
        );
        writer.truncate_to(cp.output_len).await?;
    } else if actual < cp.output_len {
        return Err(CrawlError::Checkpoint(format!(
            "{} is {} bytes but the checkpoint covers {}; pass --fresh to start over",
            writer.path().display(),
            actual,
            cp.output_len
        )));
    }
    Ok(())
}

/// Run the crawl loop from the checkpoint's next day through `plan.end`.
///
/// # Arguments
///
/// * `source` - Where posts come from; usually a [`crate::api::RetryFetch`]
///   around the Reddit client.
/// * `plan` - Date range, query shape, and pacing.
/// * `state` - Output and checkpoint, opened with [`CrawlState::open`].
///
/// # Returns
///
/// A [`CrawlSummary`] for this invocation, or the first fatal error. Progress
/// made before a fatal error stays on disk.
#[instrument(level = "info", skip_all, fields(subreddit = %plan.subreddit, start = %plan.start, end = %plan.end))]
pub async fn crawl<S: HeadlineSource>(
    source: &S,
    plan: &CrawlPlan,
    state: &mut CrawlState,
) -> Result<CrawlSummary, CrawlError> {
    let t0 = Instant::now();
    let mut summary = CrawlSummary {
        resumed_from: state.checkpoint.last_completed,
        ..Default::default()
    };

    if state.checkpoint.is_finished() {
        info!(last_completed = ?state.checkpoint.last_completed, "Range already complete");
        return Ok(summary);
    }
    let Some(mut cursor) = state.checkpoint.next_day() else {
        return Ok(summary);
    };
    let remaining = days_inclusive(cursor, plan.end);
    info!(from = %cursor, days = remaining, "Starting crawl");

    while cursor <= plan.end {
        summary.days_attempted += 1;
        info!(date = %cursor, limit = plan.limit, "Fetching top posts");

        let query = DayQuery {
            subreddit: plan.subreddit.clone(),
            date: cursor,
            window: plan.window,
            limit: plan.limit,
        };

        let pause = match source.fetch_top(&query).await {
            Ok(posts) => {
                let records: Vec<HeadlineRecord> = posts
                    .into_iter()
                    .map(|p| HeadlineRecord::from_post(cursor, p, plan.aux_field))
                    .collect();
                let written = state.writer.append(&records).await?;
                let output_len = state.writer.byte_len().await?;
                state.checkpoint.complete(cursor, written, output_len);
                state.checkpoint.save(&state.checkpoint_path).await?;
                summary.days_succeeded += 1;
                summary.records_written += written as u64;
                info!(date = %cursor, count = written, "Day complete");
                plan.delay
            }
            Err(e @ FetchError::Fatal(_)) => {
                error!(date = %cursor, error = %e, "Fatal fetch error; stopping crawl");
                return Err(CrawlError::Fetch {
                    date: cursor,
                    source: e,
                });
            }
            Err(e) => {
                warn!(date = %cursor, kind = e.kind(), error = %e, "Skipping day");
                state.checkpoint.skip(cursor);
                state.checkpoint.save(&state.checkpoint_path).await?;
                summary.days_skipped += 1;
                plan.failure_delay
            }
        };

        match cursor.succ_opt() {
            Some(next) => cursor = next,
            None => break,
        }
        if cursor <= plan.end && !pause.is_zero() {
            sleep(pause).await;
        }
    }

    if !state.checkpoint.skipped.is_empty() {
        warn!(
            days = %state.checkpoint.skipped.iter().join(", "),
            "Some days were skipped and have no records"
        );
    }
    info!(
        attempted = summary.days_attempted,
        succeeded = summary.days_succeeded,
        skipped = summary.days_skipped,
        records = summary.records_written,
        elapsed_ms = t0.elapsed().as_millis(),
        "Crawl finished"
    );
    Ok(summary)
}
