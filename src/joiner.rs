//! Stock / news dataset joiner.
//!
//! Ranks each date's headlines in file order, pivots the ranks into
//! `title N` columns, and left-joins them onto the stock rows by date:
//!
//! 1. **Rank**: the n-th row seen for a date gets rank n (identical titles
//!    are kept as separate ranks)
//! 2. **Pivot**: the column count K is the largest rank observed anywhere,
//!    optionally capped by `max_titles`
//! 3. **Join**: every stock row is kept, in input order; dates without news
//!    get K empty title fields
//!
//! Any unreadable file, malformed row, or unparseable date fails the run.

use crate::config::JoinSettings;
use crate::errors::JoinError;
use crate::models::{JoinedRow, JoinedTable, NewsRow, STOCK_COLUMNS, StockRecord};
use crate::outputs::combined::write_joined;
use crate::utils::parse_date;
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use itertools::Itertools;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Counts reported after a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSummary {
    pub stock_rows: usize,
    pub news_rows: usize,
    /// Width of the `title N` pivot.
    pub title_columns: usize,
    /// Stock rows that received at least one title.
    pub matched_rows: usize,
}

/// Read `(date, title)` pairs from a news CSV with a header row.
///
/// Columns are located by name; any other columns are ignored.
pub fn read_news<R: Read>(reader: R) -> Result<Vec<NewsRow>, JoinError> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = rdr.headers()?.clone();
    let date_idx = column_index(&headers, "date").ok_or(JoinError::MissingColumn("date"))?;
    let title_idx = column_index(&headers, "title").ok_or(JoinError::MissingColumn("title"))?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let line = line_of(&record);
        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = parse_date(raw_date).ok_or_else(|| JoinError::BadDate {
            line,
            value: raw_date.to_string(),
        })?;
        let title = record
            .get(title_idx)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        rows.push(NewsRow { date, title });
    }
    Ok(rows)
}

/// Read the stock CSV: skip `skip_rows` leading rows, ignore the next row
/// (column names), then parse six-column data rows.
pub fn read_stock<R: Read>(reader: R, skip_rows: usize) -> Result<Vec<StockRecord>, JoinError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = rdr.records().skip(skip_rows);

    match records.next() {
        Some(header) => {
            let header = header?;
            debug!(header = ?header, "Ignoring stock header line");
        }
        None => return Err(JoinError::MissingStockHeader),
    }

    let mut rows = Vec::new();
    for result in records {
        let record = result?;
        let line = line_of(&record);
        if record.len() != STOCK_COLUMNS.len() {
            return Err(JoinError::ColumnCount {
                line,
                expected: STOCK_COLUMNS.len(),
                found: record.len(),
            });
        }
        let date = parse_date(&record[0]).ok_or_else(|| JoinError::BadDate {
            line,
            value: record[0].to_string(),
        })?;
        rows.push(StockRecord {
            date,
            close: record[1].to_string(),
            high: record[2].to_string(),
            low: record[3].to_string(),
            open: record[4].to_string(),
            volume: record[5].to_string(),
        });
    }
    Ok(rows)
}

/// Group titles by date in file order, returning the groups and the pivot
/// width (largest group, capped by `max_titles`).
pub fn rank_titles(
    news: &[NewsRow],
    max_titles: Option<usize>,
) -> (HashMap<NaiveDate, Vec<Option<String>>>, usize) {
    let mut ranked: HashMap<NaiveDate, Vec<Option<String>>> = news
        .iter()
        .map(|row| (row.date, row.title.clone()))
        .into_group_map();

    if let Some(cap) = max_titles {
        for titles in ranked.values_mut() {
            titles.truncate(cap);
        }
    }
    let width = ranked.values().map(Vec::len).max().unwrap_or(0);
    (ranked, width)
}

/// Left-join ranked titles onto the stock rows.
///
/// Every stock row is kept, in input order. Rows whose date has no news get
/// `None` in every title column, and shorter groups are padded to the pivot
/// width.
///
/// # Examples
///
/// ```ignore
/// // news: 2016-01-04 x2, 2016-01-05 x1; stock: 01-04, 01-05, 01-06
/// let table = join(stock, &news, None);
/// assert_eq!(table.title_columns, 2);
/// assert_eq!(table.rows[2].titles, vec![None, None]);
/// ```
pub fn join(stock: Vec<StockRecord>, news: &[NewsRow], max_titles: Option<usize>) -> JoinedTable {
    let (ranked, title_columns) = rank_titles(news, max_titles);

    let rows = stock
        .into_iter()
        .map(|stock| {
            let mut titles = ranked.get(&stock.date).cloned().unwrap_or_default();
            titles.resize(title_columns, None);
            JoinedRow { stock, titles }
        })
        .collect();

    JoinedTable {
        title_columns,
        rows,
    }
}

/// Read both inputs, join them, and write the combined CSV.
///
/// # Errors
///
/// Any [`JoinError`]: a missing or unreadable file, a missing news column, a
/// malformed stock row, or a date that does not parse. Nothing is written
/// when an input fails to load.
#[instrument(level = "info", skip_all, fields(news = %settings.news.display(), stock = %settings.stock.display()))]
pub fn run_join(settings: &JoinSettings) -> Result<JoinSummary, JoinError> {
    let t0 = Instant::now();

    let news = read_news(open(&settings.news)?)?;
    info!(rows = news.len(), "Read news table");
    let stock = read_stock(open(&settings.stock)?, settings.stock_skip_rows)?;
    info!(rows = stock.len(), "Read stock table");

    let news_rows = news.len();
    let stock_rows = stock.len();
    let table = join(stock, &news, settings.max_titles);
    let matched_rows = table
        .rows
        .iter()
        .filter(|r| r.titles.iter().any(Option::is_some))
        .count();

    let file = File::create(&settings.output).map_err(|source| JoinError::Io {
        path: settings.output.display().to_string(),
        source,
    })?;
    write_joined(&table, file)?;

    let summary = JoinSummary {
        stock_rows,
        news_rows,
        title_columns: table.title_columns,
        matched_rows,
    };
    info!(
        output = %settings.output.display(),
        rows = summary.stock_rows,
        title_columns = summary.title_columns,
        matched = summary.matched_rows,
        elapsed_ms = t0.elapsed().as_millis(),
        "Wrote combined dataset"
    );
    Ok(summary)
}

fn open(path: &Path) -> Result<File, JoinError> {
    File::open(path).map_err(|source| JoinError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const STOCK: &str = "\
Price,Close,High,Low,Open,Volume
Ticker,^DJI,^DJI,^DJI,^DJI,^DJI
Date,,,,,
2016-01-04,17148.939453125,17405.48046875,16957.630859375,17405.48046875,148060000
2016-01-05,17158.66015625,17195.83984375,17038.609375,17147.5,105750000
";

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, m, day).unwrap()
    }

    #[test]
    fn test_read_stock_skips_preamble() {
        let rows = read_stock(STOCK.as_bytes(), 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, d(1, 4));
        assert_eq!(rows[0].close, "17148.939453125");
        assert_eq!(rows[1].volume, "105750000");
    }

    #[test]
    fn test_read_stock_bad_date_is_fatal() {
        let input = "a\nb\nDate,,,,,\nnot-a-date,1,2,3,4,5\n";
        let err = read_stock(input.as_bytes(), 2).unwrap_err();
        assert!(matches!(err, JoinError::BadDate { line: 4, .. }));
    }

    #[test]
    fn test_read_stock_wrong_width() {
        let input = "a\nb\nDate,,,,,\n2016-01-04,1,2,3\n";
        let err = read_stock(input.as_bytes(), 2).unwrap_err();
        assert!(matches!(
            err,
            JoinError::ColumnCount {
                expected: 6,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_read_stock_missing_header() {
        let err = read_stock("only\ntwo\n".as_bytes(), 2).unwrap_err();
        assert!(matches!(err, JoinError::MissingStockHeader));
    }

    #[test]
    fn test_read_news_by_column_name() {
        let input = "\
url,title,score,date
u1,First,3,2016-01-04
u2,,1,2016-01-04
u3,Third,9,2016-01-05 00:00:00
";
        let rows = read_news(input.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].title.as_deref(), Some("First"));
        assert_eq!(rows[1].title, None);
        assert_eq!(rows[2].date, d(1, 5));
    }

    #[test]
    fn test_read_news_missing_title_column() {
        let err = read_news("date,headline\n2016-01-04,x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, JoinError::MissingColumn("title")));
    }

    #[test]
    fn test_read_news_bad_date() {
        let err = read_news("date,title\nsoon,x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, JoinError::BadDate { line: 2, .. }));
    }

    fn news(rows: &[(NaiveDate, &str)]) -> Vec<NewsRow> {
        rows.iter()
            .map(|(date, t)| NewsRow {
                date: *date,
                title: Some(t.to_string()),
            })
            .collect()
    }

    #[test]
    fn test_join_example_two_titles_and_missing_day() {
        let stock = read_stock(STOCK.as_bytes(), 2).unwrap();
        let news = news(&[(d(1, 4), "A"), (d(1, 4), "B")]);
        let table = join(stock, &news, None);

        assert_eq!(
            table.header(),
            vec!["date", "close", "high", "low", "open", "volume", "title 1", "title 2"]
        );
        assert_eq!(table.rows.len(), 2);
        assert_eq!(
            table.rows[0].titles,
            vec![Some("A".to_string()), Some("B".to_string())]
        );
        assert_eq!(table.rows[1].titles, vec![None, None]);
    }

    #[test]
    fn test_join_preserves_stock_cardinality_and_order() {
        let stock: Vec<StockRecord> = [d(1, 6), d(1, 4), d(1, 5)]
            .iter()
            .map(|date| StockRecord {
                date: *date,
                close: "1".into(),
                high: "1".into(),
                low: "1".into(),
                open: "1".into(),
                volume: "1".into(),
            })
            .collect();
        let news = news(&[
            (d(1, 5), "x"),
            (d(2, 1), "not traded"),
            (d(2, 1), "still not traded"),
            (d(2, 1), "nor this"),
        ]);
        let table = join(stock, &news, None);
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.title_columns, 3);
        let dates: Vec<_> = table.rows.iter().map(|r| r.stock.date).collect();
        assert_eq!(dates, vec![d(1, 6), d(1, 4), d(1, 5)]);
        assert_eq!(
            table.rows[2].titles,
            vec![Some("x".to_string()), None, None]
        );
    }

    #[test]
    fn test_duplicate_titles_kept_in_file_order() {
        let news = news(&[
            (d(1, 4), "Same"),
            (d(1, 5), "Other"),
            (d(1, 4), "Same"),
            (d(1, 4), "Last"),
        ]);
        let (ranked, width) = rank_titles(&news, None);
        assert_eq!(width, 3);
        assert_eq!(
            ranked[&d(1, 4)],
            vec![
                Some("Same".to_string()),
                Some("Same".to_string()),
                Some("Last".to_string())
            ]
        );
    }

    #[test]
    fn test_max_titles_caps_width() {
        let news = news(&[(d(1, 4), "1"), (d(1, 4), "2"), (d(1, 4), "3")]);
        let (ranked, width) = rank_titles(&news, Some(2));
        assert_eq!(width, 2);
        assert_eq!(ranked[&d(1, 4)].len(), 2);

        let (_, width) = rank_titles(&news, Some(10));
        assert_eq!(width, 3);
    }

    #[test]
    fn test_empty_news_adds_no_title_columns() {
        let stock = read_stock(STOCK.as_bytes(), 2).unwrap();
        let table = join(stock, &[], None);
        assert_eq!(table.title_columns, 0);
        assert!(table.rows.iter().all(|r| r.titles.is_empty()));
    }

    #[test]
    fn test_run_join_writes_combined_file() {
        let tmp = tempfile::tempdir().unwrap();
        let news_path = tmp.path().join("news.csv");
        let stock_path = tmp.path().join("dow.csv");
        let out_path = tmp.path().join("combined.csv");
        std::fs::write(
            &news_path,
            "date,title\n2016-01-04,Oil slumps\n2016-01-04,\"Stocks fall, again\"\n",
        )
        .unwrap();
        std::fs::write(&stock_path, STOCK).unwrap();

        let settings = JoinSettings {
            news: news_path,
            stock: stock_path,
            output: out_path.clone(),
            stock_skip_rows: 2,
            max_titles: None,
        };
        let summary = run_join(&settings).unwrap();
        assert_eq!(
            summary,
            JoinSummary {
                stock_rows: 2,
                news_rows: 2,
                title_columns: 2,
                matched_rows: 1,
            }
        );

        let text = std::fs::read_to_string(&out_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "date,close,high,low,open,volume,title 1,title 2");
        assert_eq!(
            lines[1],
            "2016-01-04,17148.939453125,17405.48046875,16957.630859375,17405.48046875,148060000,Oil slumps,\"Stocks fall, again\""
        );
        assert_eq!(
            lines[2],
            "2016-01-05,17158.66015625,17195.83984375,17038.609375,17147.5,105750000,,"
        );
    }

    #[test]
    fn test_run_join_missing_input() {
        let settings = JoinSettings {
            news: PathBuf::from("/definitely/not/here.csv"),
            stock: PathBuf::from("/definitely/not/there.csv"),
            output: PathBuf::from("/tmp/unused.csv"),
            stock_skip_rows: 2,
            max_titles: None,
        };
        assert!(matches!(run_join(&settings), Err(JoinError::Io { .. })));
    }
}
