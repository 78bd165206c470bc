//! Hacker News front page source.
//!
//! Scrapes <https://news.ycombinator.com>. The page is a plain HTML table:
//! each story is a `tr.athing` row whose `id` attribute is the story's
//! numeric id, with the title in `span.titleline` and the score/author
//! metadata in the following row's `td.subtext`.
//!
//! The front page is ranked by the site's own scoring, not by recency, so
//! the parsed items are re-sorted by descending id to satisfy the
//! newest-first source contract.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::SourceError;
use crate::models::StoryItem;
use crate::sources::ContentSource;
use crate::utils::collapse_whitespace;

static STORY_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr.athing").unwrap());
static TITLE_LINE: Lazy<Selector> = Lazy::new(|| Selector::parse("span.titleline").unwrap());
static SUBTEXT: Lazy<Selector> = Lazy::new(|| Selector::parse("td.subtext").unwrap());
static SCORE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s+points?").unwrap());

const FRONT_PAGE_URL: &str = "https://news.ycombinator.com/";

/// Content source backed by the live Hacker News front page.
#[derive(Debug, Clone)]
pub struct HackerNewsSource {
    http: reqwest::Client,
    page_url: Url,
}

impl HackerNewsSource {
    pub fn new() -> Self {
        Self::with_url(Url::parse(FRONT_PAGE_URL).unwrap())
    }

    /// Point the source at a different page, e.g. a local fixture server.
    pub fn with_url(page_url: Url) -> Self {
        HackerNewsSource {
            http: reqwest::Client::new(),
            page_url,
        }
    }
}

impl Default for HackerNewsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentSource for HackerNewsSource {
    #[instrument(level = "info", skip_all, fields(url = %self.page_url))]
    async fn fetch_latest(&self) -> Result<Vec<StoryItem>, SourceError> {
        let html = self
            .http
            .get(self.page_url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let items = parse_front_page(&html);
        if items.is_empty() {
            return Err(SourceError::EmptyPage);
        }

        info!(count = items.len(), "Fetched front page stories");
        Ok(items)
    }
}

/// Extract story items from front page HTML, newest first.
///
/// Rows missing an id or a title are logged and skipped without failing the
/// rest of the page.
pub fn parse_front_page(html: &str) -> Vec<StoryItem> {
    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for row in document.select(&STORY_ROW) {
        let Some(id) = row.value().attr("id").and_then(|v| v.parse::<u64>().ok()) else {
            warn!("Story row without a numeric id attribute; skipping");
            continue;
        };

        let title = row
            .select(&TITLE_LINE)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default();
        if title.is_empty() {
            warn!(id, "Story row without a title; skipping");
            continue;
        }

        // Score/author/comment metadata lives in the next table row.
        let subtext = row
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .and_then(|tr| tr.select(&SUBTEXT).next())
            .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default();

        let score = SCORE.find(&subtext).map(|m| m.as_str().to_string());
        debug!(id, ?score, "Parsed story row");

        let text = if subtext.is_empty() {
            title
        } else {
            format!("{title}\n{subtext}")
        };
        items.push(StoryItem { id, text });
    }

    items.sort_by(|a, b| b.id.cmp(&a.id));
    items
}
