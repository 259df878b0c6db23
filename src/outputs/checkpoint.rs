//! Crawl checkpoint persisted as JSON.
//!
//! The checkpoint names the run it belongs to (subreddit, date range, aux
//! column) and the last day the loop finished. It is rewritten after every
//! day through a temporary file and a rename, so readers see either the old
//! or the new state.
//!
//! `output_len` is the size of the headline CSV when the checkpoint was
//! written. Rows appended after it (a crash between the append and the
//! checkpoint rewrite) are cut off on resume, so no day is written twice.
//!
//! ```json
//! {
//!   "subreddit": "worldnews",
//!   "start": "2016-01-01",
//!   "end": "2016-12-31",
//!   "aux_field": "num_comments",
//!   "last_completed": "2016-03-14",
//!   "skipped": ["2016-02-02"],
//!   "records_written": 1825,
//!   "output_len": 241310,
//!   "updated_at": "2026-10-16T09:12:44Z"
//! }
//! ```

use crate::errors::CrawlError;
use crate::models::AuxField;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};

/// Identity of a crawl run; a checkpoint is only reused for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunKey {
    pub subreddit: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub aux_field: AuxField,
}

/// Progress of one crawl run.
///
/// `last_completed` is the cursor: the next day to crawl is the one after
/// it, or `run.start` when nothing has finished yet.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Checkpoint {
    #[serde(flatten)]
    pub run: RunKey,
    /// Last day the loop finished, whether fetched or skipped.
    pub last_completed: Option<NaiveDate>,
    /// Days given up on after their failure class or retries ran out.
    #[serde(default)]
    pub skipped: Vec<NaiveDate>,
    #[serde(default)]
    pub records_written: u64,
    /// Bytes of the headline CSV covered by this checkpoint. Zero when unknown.
    #[serde(default)]
    pub output_len: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Empty checkpoint for `run`, starting at `run.start`.
    pub fn new(run: RunKey) -> Self {
        Self {
            run,
            last_completed: None,
            skipped: Vec::new(),
            records_written: 0,
            output_len: 0,
            updated_at: Utc::now(),
        }
    }

    /// First day still to crawl.
    pub fn next_day(&self) -> Option<NaiveDate> {
        match self.last_completed {
            None => Some(self.run.start),
            Some(d) => d.succ_opt(),
        }
    }

    /// Whether every day of the range has been fetched or skipped.
    pub fn is_finished(&self) -> bool {
        self.next_day().is_none_or(|d| d > self.run.end)
    }

    /// Record a fetched day.
    ///
    /// # Arguments
    ///
    /// * `day` - The day that was fetched; becomes the cursor.
    /// * `records` - Rows appended for it.
    /// * `output_len` - Size of the headline CSV after the append.
    pub fn complete(&mut self, day: NaiveDate, records: usize, output_len: u64) {
        self.last_completed = Some(day);
        self.records_written += records as u64;
        self.output_len = output_len;
        self.updated_at = Utc::now();
    }

    /// Record a day given up on. The cursor still moves past it.
    pub fn skip(&mut self, day: NaiveDate) {
        self.last_completed = Some(day);
        self.skipped.push(day);
        self.updated_at = Utc::now();
    }

    /// Read a checkpoint, returning `None` when `path` does not exist.
    ///
    /// # Errors
    ///
    /// IO failures other than "not found", and unparseable JSON, which is
    /// reported as [`CrawlError::Checkpoint`] rather than silently restarting.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Option<Self>, CrawlError> {
        let text = match fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let cp: Checkpoint = serde_json::from_str(&text).map_err(|e| {
            CrawlError::Checkpoint(format!("cannot parse {}: {}", path.display(), e))
        })?;
        debug!(last_completed = ?cp.last_completed, "Loaded checkpoint");
        Ok(Some(cp))
    }

    /// Write the checkpoint to `<path>.tmp` and rename it over `path`.
    pub async fn save(&self, path: &Path) -> Result<(), CrawlError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CrawlError::Checkpoint(e.to_string()))?;
        let tmp = tmp_path(path);
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Delete the checkpoint; a missing file is not an error.
    pub async fn remove(path: &Path) -> Result<(), CrawlError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, m, day).unwrap()
    }

    fn key() -> RunKey {
        RunKey {
            subreddit: "worldnews".to_string(),
            start: d(1, 1),
            end: d(1, 3),
            aux_field: AuxField::NumComments,
        }
    }

    #[test]
    fn test_next_day_progression() {
        let mut cp = Checkpoint::new(key());
        assert_eq!(cp.next_day(), Some(d(1, 1)));
        assert!(!cp.is_finished());

        cp.complete(d(1, 1), 25, 900);
        cp.skip(d(1, 2));
        assert_eq!(cp.next_day(), Some(d(1, 3)));
        assert_eq!(cp.skipped, vec![d(1, 2)]);
        assert_eq!(cp.records_written, 25);
        assert_eq!(cp.output_len, 900);

        cp.complete(d(1, 3), 0, 900);
        assert!(cp.is_finished());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cp.json");
        assert_eq!(Checkpoint::load(&path).await.unwrap(), None);

        let mut cp = Checkpoint::new(key());
        cp.complete(d(1, 1), 3, 120);
        cp.save(&path).await.unwrap();
        assert!(!tmp.path().join("cp.json.tmp").exists());

        let loaded = Checkpoint::load(&path).await.unwrap().unwrap();
        assert_eq!(loaded, cp);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"subreddit\": \"worldnews\""));
        assert!(raw.contains("\"last_completed\": \"2016-01-01\""));
        assert!(raw.contains("\"output_len\": 120"));

        Checkpoint::remove(&path).await.unwrap();
        Checkpoint::remove(&path).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_load_without_output_len() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cp.json");
        std::fs::write(
            &path,
            r#"{"subreddit": "worldnews", "start": "2016-01-01", "end": "2016-01-03",
                "aux_field": "num_comments", "last_completed": "2016-01-01",
                "updated_at": "2026-10-16T09:12:44Z"}"#,
        )
        .unwrap();
        let cp = Checkpoint::load(&path).await.unwrap().unwrap();
        assert_eq!(cp.output_len, 0);
        assert_eq!(cp.records_written, 0);
        assert_eq!(cp.next_day(), Some(d(1, 2)));
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cp.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Checkpoint::load(&path).await,
            Err(CrawlError::Checkpoint(_))
        ));
    }
}
