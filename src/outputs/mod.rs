//! Output files.
//!
//! - [`headlines`]: append-only crawler CSV
//! - [`checkpoint`]: crawl progress JSON used to resume
//! - [`combined`]: joined stock + headline CSV
//!
//! ```text
//! DJIA/
//! ├── reddit_worldnews_headlines.csv
//! ├── reddit_worldnews_headlines.csv.checkpoint.json
//! └── data/
//!     └── combined_dataset.csv
//! ```

pub mod checkpoint;
pub mod combined;
pub mod headlines;
