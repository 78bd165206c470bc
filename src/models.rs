//! Data models for stories and their enriched representations.
//!
//! - [`StoryItem`]: one story as observed on the front page, immutable,
//!   rebuilt fresh on every poll.
//! - [`EnrichedRecord`]: the four stage results assembled for one story,
//!   consumed exactly once by the sink.
//!
//! Every stage field of [`EnrichedRecord`] is independently optional. An
//! absent field means that stage failed or timed out for this story; the
//! sink row renders a fixed human-readable fallback in its place so the
//! sheet never contains an empty cell.

use serde::{Deserialize, Serialize};

/// Rendered in place of a missing summary.
pub const SUMMARY_FALLBACK: &str = "could not generate summary";
/// Rendered in place of a missing opinion.
pub const OPINION_FALLBACK: &str = "could not generate opinion";
/// Rendered in place of a missing lead.
pub const LEAD_FALLBACK: &str = "could not generate lead";
/// Rendered in place of missing categories.
pub const CATEGORIES_FALLBACK: &str = "could not generate categories";

/// One top-level story as observed on the front page at poll time.
///
/// The `id` is the site's native numeric identifier. Ids are assigned
/// monotonically by the site, so id ordering is publication ordering and
/// the watermark lives in the same id space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryItem {
    /// Site-native numeric story id.
    pub id: u64,
    /// Title line plus visible story metadata, as scraped.
    pub text: String,
}

/// The assembled output of all four enrichment stages for one story.
///
/// Built incrementally by the pipeline as stage results arrive and finalized
/// once all four stages resolve, whether they succeeded or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// Wall-clock time the record was assembled, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    /// Output of the summarize stage over the raw story text.
    pub summary: Option<String>,
    /// Output of the opinion stage over the summary.
    pub opinion: Option<String>,
    /// Topical categories extracted from the raw story text, at most three.
    pub categories: Option<Vec<String>>,
    /// Short lead paragraph generated from the summary.
    pub lead: Option<String>,
    /// Id of the story this record was derived from.
    pub source_id: u64,
}

impl EnrichedRecord {
    /// Render the record as one sheet row.
    ///
    /// Column order is fixed: timestamp, summary, opinion, categories
    /// (joined with `", "`), lead, source id. Absent stage results render as
    /// their fallback strings.
    pub fn row(&self) -> Vec<String> {
        vec![
            self.timestamp.clone(),
            self.summary
                .clone()
                .unwrap_or_else(|| SUMMARY_FALLBACK.to_string()),
            self.opinion
                .clone()
                .unwrap_or_else(|| OPINION_FALLBACK.to_string()),
            self.categories
                .as_ref()
                .map(|c| c.join(", "))
                .unwrap_or_else(|| CATEGORIES_FALLBACK.to_string()),
            self.lead
                .clone()
                .unwrap_or_else(|| LEAD_FALLBACK.to_string()),
            self.source_id.to_string(),
        ]
    }
}
