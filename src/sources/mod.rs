//! Headline sources.
//!
//! Each source implements [`crate::api::HeadlineSource`], answering one
//! "top posts for this day" query per call and classifying its failures
//! as [`crate::errors::FetchError`] values.
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Reddit | [`reddit`] | OAuth JSON API | App-only token; `top` listing per subreddit |

pub mod reddit;
