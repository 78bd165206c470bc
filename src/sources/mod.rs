//! Content sources producing the stories each poll observes.
//!
//! A source returns the full current front page on every call; the pipeline
//! diffs it against the watermark to find what is actually new. Sources do
//! not retry internally. A failed poll surfaces as `SourceError` and the
//! next poll is the retry.

pub mod hackernews;

use crate::error::SourceError;
use crate::models::StoryItem;

/// A point-in-time view of the aggregation site's front page.
pub trait ContentSource {
    /// Fetch the current front page as one unit, newest story first
    /// (descending id).
    async fn fetch_latest(&self) -> Result<Vec<StoryItem>, SourceError>;
}
