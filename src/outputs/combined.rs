//! Combined stock + headline CSV output.

use crate::errors::JoinError;
use crate::models::JoinedTable;
use csv::Writer;
use std::io::Write;

/// Write the joined table with its header. Null titles become empty fields
/// and dates are written as `YYYY-MM-DD`.
pub fn write_joined<W: Write>(table: &JoinedTable, out: W) -> Result<(), JoinError> {
    let mut wtr = Writer::from_writer(out);
    wtr.write_record(table.header())?;

    for row in &table.rows {
        let s = &row.stock;
        let date = s.date.format("%Y-%m-%d").to_string();
        let fixed = [
            date.as_str(),
            s.close.as_str(),
            s.high.as_str(),
            s.low.as_str(),
            s.open.as_str(),
            s.volume.as_str(),
        ];
        let titles = row.titles.iter().map(|t| t.as_deref().unwrap_or(""));
        wtr.write_record(fixed.into_iter().chain(titles))?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
