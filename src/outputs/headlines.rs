//! Append-only headline CSV.
//!
//! The header is written once when the file is created; every completed
//! crawl day is then appended and synced before the checkpoint moves, so a
//! crash loses at most the day in progress.

use crate::errors::CrawlError;
use crate::models::{AuxField, HeadlineRecord, headline_header};
use csv::WriterBuilder;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, instrument};

/// Appends [`HeadlineRecord`]s to a CSV whose header matches one
/// [`AuxField`] variant.
///
/// The file is reopened for each append, so a writer holds no handle between
/// crawl days.
#[derive(Debug)]
pub struct HeadlineWriter {
    path: PathBuf,
    aux: AuxField,
}

impl HeadlineWriter {
    /// Open `path` for appending, creating it with a header if it is
    /// missing or empty. With `truncate`, any existing content is dropped.
    ///
    /// An existing file whose header differs from the one for `aux` is
    /// rejected rather than mixed.
    #[instrument(level = "info", skip_all, fields(path = %path.display(), aux = %aux, truncate = truncate))]
    pub async fn open(path: &Path, aux: AuxField, truncate: bool) -> Result<Self, CrawlError> {
        let writer = Self {
            path: path.to_path_buf(),
            aux,
        };
        if truncate {
            fs::write(path, b"").await?;
        }

        match first_line(path).await? {
            None => {
                let header = encode_rows(std::iter::once(
                    headline_header(aux).map(str::to_string),
                ))?;
                fs::write(path, header).await?;
                info!("Created headline CSV");
            }
            Some(line) => {
                let expected = headline_header(aux).join(",");
                if line.trim_end() != expected {
                    return Err(CrawlError::OutputHeader {
                        path: path.display().to_string(),
                        found: line.trim_end().to_string(),
                        expected,
                    });
                }
                debug!("Appending to existing headline CSV");
            }
        }
        Ok(writer)
    }

    /// Append one day's records and sync them to disk.
    pub async fn append(&self, records: &[HeadlineRecord]) -> Result<usize, CrawlError> {
        if records.is_empty() {
            return Ok(0);
        }
        let bytes = encode_rows(records.iter().map(|r| r.to_csv_fields(self.aux)))?;
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(&bytes).await?;
        file.sync_data().await?;
        debug!(path = %self.path.display(), count = records.len(), "Appended records");
        Ok(records.len())
    }

    /// Current size of the file in bytes.
    ///
    /// Stored in the checkpoint after each completed day so a resumed run can
    /// drop rows appended after the last checkpoint.
    pub async fn byte_len(&self) -> Result<u64, CrawlError> {
        Ok(fs::metadata(&self.path).await?.len())
    }

    /// Cut the file back to `len` bytes and sync it.
    #[instrument(level = "info", skip(self), fields(path = %self.path.display()))]
    pub async fn truncate_to(&self, len: u64) -> Result<(), CrawlError> {
        let file = OpenOptions::new().write(true).open(&self.path).await?;
        file.set_len(len).await?;
        file.sync_data().await?;
        info!("Truncated headline CSV");
        Ok(())
    }

    /// Path of the CSV being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `None` when the file is missing or empty.
async fn first_line(path: &Path) -> Result<Option<String>, CrawlError> {
    let file = match fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut lines = BufReader::new(file).lines();
    Ok(lines.next_line().await?.filter(|l| !l.is_empty()))
}

fn encode_rows<I, R>(rows: I) -> Result<Vec<u8>, CrawlError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.into_inner()
        .map_err(|e| CrawlError::Io(e.into_error()))
}
