//! Data models shared by the crawler and the joiner.
//!
//! - [`Post`]: one post as returned by the headline source
//! - [`HeadlineRecord`]: a normalized post tagged with the crawl day
//! - [`AuxField`]: which auxiliary column the crawler writes
//! - [`StockRecord`] / [`NewsRow`]: joiner inputs
//! - [`JoinedTable`]: joiner output

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A post as returned by the remote listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub title: String,
    pub score: i64,
    pub num_comments: u64,
    pub created_utc: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

/// The optional fourth column of the crawler output.
///
/// The two crawler variants differ only in this column: one records the
/// comment count, the other the post creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AuxField {
    #[default]
    NumComments,
    Timestamp,
}

impl AuxField {
    pub fn column_name(&self) -> &'static str {
        match self {
            AuxField::NumComments => "num_comments",
            AuxField::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for AuxField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// One headline collected for one crawl day.
///
/// No uniqueness is enforced: the same title may be recorded on several
/// days or across runs.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlineRecord {
    pub date: NaiveDate,
    pub title: String,
    pub score: i64,
    pub num_comments: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

impl HeadlineRecord {
    /// Normalize a post for the given crawl day, keeping only the
    /// auxiliary field selected by `aux`.
    pub fn from_post(date: NaiveDate, post: Post, aux: AuxField) -> Self {
        let (num_comments, timestamp) = match aux {
            AuxField::NumComments => (Some(post.num_comments), None),
            AuxField::Timestamp => (None, post.created_utc),
        };
        Self {
            date,
            title: post.title,
            score: post.score,
            num_comments,
            timestamp,
            url: post.url,
        }
    }

    /// Column order matches [`headline_header`].
    pub fn to_csv_fields(&self, aux: AuxField) -> [String; 5] {
        let aux_value = match aux {
            AuxField::NumComments => self.num_comments.map(|n| n.to_string()),
            AuxField::Timestamp => self
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        };
        [
            self.date.format("%Y-%m-%d").to_string(),
            self.title.clone(),
            self.score.to_string(),
            aux_value.unwrap_or_default(),
            self.url.clone().unwrap_or_default(),
        ]
    }
}

/// Header row of the crawler output CSV.
pub fn headline_header(aux: AuxField) -> [&'static str; 5] {
    ["date", "title", "score", aux.column_name(), "url"]
}

/// One row of the stock price file. Price and volume fields are kept
/// verbatim; only the date is parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct StockRecord {
    pub date: NaiveDate,
    pub close: String,
    pub high: String,
    pub low: String,
    pub open: String,
    pub volume: String,
}

pub const STOCK_COLUMNS: [&str; 6] = ["date", "close", "high", "low", "open", "volume"];

/// A `(date, title)` pair from the news file. An empty title is `None`
/// but still occupies a rank slot.
#[derive(Debug, Clone, PartialEq)]
pub struct NewsRow {
    pub date: NaiveDate,
    pub title: Option<String>,
}

/// A stock row with its ranked titles attached.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRow {
    pub stock: StockRecord,
    /// Exactly `title_columns` entries; missing ranks are `None`.
    pub titles: Vec<Option<String>>,
}

/// Output of the joiner: the header width plus one row per stock row.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedTable {
    pub title_columns: usize,
    pub rows: Vec<JoinedRow>,
}

impl JoinedTable {
    pub fn header(&self) -> Vec<String> {
        STOCK_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain((1..=self.title_columns).map(|n| format!("title {}", n)))
            .collect()
    }
}
