//! The pipeline coordinator: one polling cycle from fetch to watermark
//! advance.
//!
//! A cycle walks through fetch, diff, enrich, sink, advance:
//!
//! 1. **Fetch**: pull the full current front page from the source. A source
//!    failure aborts the cycle with nothing mutated.
//! 2. **Diff**: select stories with `id` strictly greater than the
//!    watermark. An uninitialized watermark is seeded with the newest
//!    fetched id and nothing is processed (a cold start must not replay the
//!    whole front page).
//! 3. **Enrich**: per story, Summarize and Categorize run concurrently over
//!    the raw text; once the summary lands, Opinion and Lead run
//!    concurrently over it. Stories are processed as independent task
//!    bundles keyed by story id, fanned out a few at a time.
//! 4. **Sink**: records are written in ascending id order, so replays and
//!    tests see a deterministic sequence. The first failed append abandons
//!    the remaining writes but keeps the rows already written.
//! 5. **Advance**: the watermark moves to the highest successfully sunk id,
//!    never past a row that failed to write, and never backwards.
//!
//! Stage failures are invisible at this level; they surface as absent fields
//! inside individual records. Only source and watermark failures escape as
//! [`CycleError`].

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::api::GenerateAsync;
use crate::error::CycleError;
use crate::models::{EnrichedRecord, StoryItem};
use crate::notify::Notifier;
use crate::sinks::Sink;
use crate::sources::ContentSource;
use crate::stages::{Stage, StageRunner};
use crate::utils::now_timestamp;
use crate::watermark::WatermarkStore;

/// Stories enriched concurrently within one cycle. The front page delta is
/// usually 0 or 1 stories, so this only matters after an outage backlog.
const PARALLEL_STORIES: usize = 4;

/// What one cycle did, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cold start: the watermark was uninitialized and has been seeded with
    /// the newest fetched id. No stories were processed.
    SeededWatermark { watermark: u64 },

    /// Nothing on the front page was newer than the watermark.
    NoNewItems,

    /// Every selected story was enriched and sunk; the watermark advanced.
    Completed { processed: usize, watermark: u64 },

    /// A sink failure cut the cycle short. Rows already written are kept and
    /// the watermark covers exactly those; the rest of the delta is
    /// reprocessed next cycle.
    Partial {
        sunk: usize,
        selected: usize,
        watermark: Option<u64>,
    },
}

/// Owns the collaborators and drives cycles against them.
///
/// The watermark store is the only cross-cycle mutable state; it is read
/// once at cycle start and written at most once at cycle end. No lock is
/// held across any await.
pub struct Pipeline<S, G, K, W> {
    source: S,
    stages: StageRunner<G>,
    sink: K,
    watermark: W,
    notifier: Notifier,
}

impl<S, G, K, W> Pipeline<S, G, K, W>
where
    S: ContentSource,
    G: GenerateAsync,
    K: Sink,
    W: WatermarkStore,
{
    pub fn new(source: S, stages: StageRunner<G>, sink: K, watermark: W, notifier: Notifier) -> Self {
        Pipeline {
            source,
            stages,
            sink,
            watermark,
            notifier,
        }
    }

    /// Run one full cycle.
    #[instrument(level = "info", skip_all)]
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        // FETCHING
        let items = self.source.fetch_latest().await?;
        let Some(newest) = items.iter().map(|i| i.id).max() else {
            debug!("Source returned no items");
            return Ok(CycleOutcome::NoNewItems);
        };

        // DIFFING
        let Some(last_processed) = self.watermark.read().await? else {
            self.watermark.write(newest).await?;
            info!(
                watermark = newest,
                "Cold start: seeded watermark from newest fetched story"
            );
            return Ok(CycleOutcome::SeededWatermark { watermark: newest });
        };

        let delta: Vec<StoryItem> = items
            .into_iter()
            .filter(|item| item.id > last_processed)
            .collect();
        if delta.is_empty() {
            debug!(watermark = last_processed, "No stories newer than watermark");
            return Ok(CycleOutcome::NoNewItems);
        }
        info!(
            count = delta.len(),
            watermark = last_processed,
            newest,
            "Selected new stories"
        );

        // ENRICHING
        let mut records: Vec<EnrichedRecord> = stream::iter(delta.iter())
            .map(|item| self.enrich_story(item))
            .buffer_unordered(PARALLEL_STORIES)
            .collect()
            .await;

        // SINKING, in ascending id order
        records.sort_by_key(|r| r.source_id);
        let selected = records.len();
        let mut sunk = 0usize;
        let mut last_sunk: Option<u64> = None;
        let mut sink_failed = false;

        for record in &records {
            match self.sink.append(record).await {
                Ok(()) => {
                    sunk += 1;
                    last_sunk = Some(record.source_id);
                    self.notifier.row_appended(record).await;
                }
                Err(e) => {
                    warn!(
                        id = record.source_id,
                        error = %e,
                        "Sink append failed; abandoning remaining writes for this cycle"
                    );
                    sink_failed = true;
                    break;
                }
            }
        }

        // ADVANCING: only past rows confirmed written.
        if let Some(top) = last_sunk {
            self.watermark.write(top).await?;
        }

        if sink_failed {
            warn!(
                sunk,
                selected, "Cycle completed partially; the rest of the delta is retried next cycle"
            );
            return Ok(CycleOutcome::Partial {
                sunk,
                selected,
                watermark: last_sunk,
            });
        }

        let watermark = last_sunk.unwrap_or(last_processed);
        info!(processed = sunk, watermark, "Cycle completed");
        Ok(CycleOutcome::Completed {
            processed: sunk,
            watermark,
        })
    }

    /// Enrich one story through the two-phase stage schedule.
    ///
    /// Phase one runs Summarize and Categorize concurrently over the raw
    /// text. Phase two runs Opinion and Lead concurrently over the summary,
    /// and is skipped outright when the summary is absent.
    async fn enrich_story(&self, item: &StoryItem) -> EnrichedRecord {
        debug!(id = item.id, "Enriching story");

        let (summary, categories) = tokio::join!(
            self.stages.run(Stage::Summarize, item.id, &item.text),
            self.stages.categories(item.id, &item.text),
        );

        let (opinion, lead) = match summary.as_deref() {
            Some(s) => {
                tokio::join!(
                    self.stages.run(Stage::Opinion, item.id, s),
                    self.stages.run(Stage::Lead, item.id, s),
                )
            }
            None => {
                warn!(id = item.id, "Summary absent; skipping opinion and lead");
                (None, None)
            }
        };

        EnrichedRecord {
            timestamp: now_timestamp(),
            summary,
            opinion,
            categories,
            lead,
            source_id: item.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use crate::api::ChatRequest;
    use crate::config::GenerationConfig;
    use crate::error::{SinkError, SourceError, StageError};
    use crate::watermark::MemoryWatermarkStore;

    // ---- scripted collaborators -------------------------------------------

    struct StaticSource {
        items: Vec<StoryItem>,
    }

    impl ContentSource for StaticSource {
        async fn fetch_latest(&self) -> Result<Vec<StoryItem>, SourceError> {
            Ok(self.items.clone())
        }
    }

    struct DownSource;

    impl ContentSource for DownSource {
        async fn fetch_latest(&self) -> Result<Vec<StoryItem>, SourceError> {
            Err(SourceError::EmptyPage)
        }
    }

    /// Deterministic backend: transforms input per stage, records every
    /// call, and fails on command.
    #[derive(Debug, Clone, Default)]
    struct ScriptedBackend {
        fail_stages: HashSet<Stage>,
        calls: Arc<Mutex<Vec<(Stage, String)>>>,
    }

    fn stage_of(system: &str) -> Stage {
        [Stage::Summarize, Stage::Opinion, Stage::Lead, Stage::Categorize]
            .into_iter()
            .find(|s| s.role_prompt() == system)
            .expect("unknown role prompt")
    }

    impl GenerateAsync for ScriptedBackend {
        async fn generate(&self, req: &ChatRequest<'_>) -> Result<String, StageError> {
            let stage = stage_of(req.system);
            self.calls
                .lock()
                .unwrap()
                .push((stage, req.input.to_string()));
            if self.fail_stages.contains(&stage) {
                return Err(StageError::Backend("scripted failure".to_string()));
            }
            Ok(match stage {
                Stage::Summarize => format!("summary of {}", req.input),
                Stage::Opinion => format!("opinion on {}", req.input),
                Stage::Lead => format!("lead for {}", req.input),
                Stage::Categorize => r#"["tech"]"#.to_string(),
            })
        }
    }

    /// Records appended ids; fails every append past `fail_after`.
    #[derive(Debug, Clone, Default)]
    struct RecordingSink {
        rows: Arc<Mutex<Vec<EnrichedRecord>>>,
        fail_after: Option<usize>,
    }

    impl Sink for RecordingSink {
        async fn append(&self, record: &EnrichedRecord) -> Result<(), SinkError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(limit) = self.fail_after {
                if rows.len() >= limit {
                    return Err(SinkError::Rejected {
                        status: 503,
                        body: "scripted outage".to_string(),
                    });
                }
            }
            rows.push(record.clone());
            Ok(())
        }
    }

    fn story(id: u64, text: &str) -> StoryItem {
        StoryItem {
            id,
            text: text.to_string(),
        }
    }

    struct Fixture {
        backend: ScriptedBackend,
        sink: RecordingSink,
        watermark: MemoryWatermarkStore,
    }

    impl Fixture {
        fn new(watermark: Option<u64>) -> Self {
            Fixture {
                backend: ScriptedBackend::default(),
                sink: RecordingSink::default(),
                watermark: MemoryWatermarkStore::new(watermark),
            }
        }

        fn pipeline(
            &self,
            items: Vec<StoryItem>,
        ) -> Pipeline<StaticSource, ScriptedBackend, RecordingSink, MemoryWatermarkStore> {
            Pipeline::new(
                StaticSource { items },
                StageRunner::new(self.backend.clone(), GenerationConfig::default()),
                self.sink.clone(),
                self.watermark.clone(),
                Notifier::new(None),
            )
        }
    }

    // ---- cycle behavior ----------------------------------------------------

    #[tokio::test]
    async fn cold_start_seeds_watermark_and_sinks_nothing() {
        let fx = Fixture::new(None);
        let items = (101..=105).map(|id| story(id, "t")).collect();
        let outcome = fx.pipeline(items).run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::SeededWatermark { watermark: 105 });
        assert!(fx.sink.rows.lock().unwrap().is_empty());
        assert_eq!(fx.watermark.read().await.unwrap(), Some(105));
        // No generation calls were made at all.
        assert!(fx.backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn repoll_with_unchanged_front_page_is_a_noop() {
        let fx = Fixture::new(Some(105));
        let items = vec![story(105, "A"), story(104, "B")];

        let outcome = fx.pipeline(items.clone()).run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoNewItems);

        let outcome = fx.pipeline(items).run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoNewItems);

        assert!(fx.sink.rows.lock().unwrap().is_empty());
        assert_eq!(fx.watermark.read().await.unwrap(), Some(105));
    }

    #[tokio::test]
    async fn one_new_story_flows_through_all_four_stages() {
        let fx = Fixture::new(Some(104));
        let items = vec![story(105, "A"), story(104, "B")];
        let outcome = fx.pipeline(items).run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                processed: 1,
                watermark: 105
            }
        );

        let rows = fx.sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.source_id, 105);
        assert_eq!(r.summary.as_deref(), Some("summary of A"));
        assert_eq!(r.opinion.as_deref(), Some("opinion on summary of A"));
        assert_eq!(r.lead.as_deref(), Some("lead for summary of A"));
        assert_eq!(r.categories, Some(vec!["tech".to_string()]));

        assert_eq!(fx.watermark.read().await.unwrap(), Some(105));
    }

    #[tokio::test]
    async fn opinion_and_lead_consume_the_summary_not_the_raw_text() {
        let fx = Fixture::new(Some(10));
        fx.pipeline(vec![story(11, "raw story")])
            .run_cycle()
            .await
            .unwrap();

        let calls = fx.backend.calls.lock().unwrap();
        for (stage, input) in calls.iter() {
            match stage {
                Stage::Summarize | Stage::Categorize => assert_eq!(input, "raw story"),
                Stage::Opinion | Stage::Lead => assert_eq!(input, "summary of raw story"),
            }
        }
    }

    #[tokio::test]
    async fn failed_summary_skips_opinion_and_lead_entirely() {
        let mut fx = Fixture::new(Some(10));
        fx.backend.fail_stages = HashSet::from([Stage::Summarize]);

        let outcome = fx
            .pipeline(vec![story(11, "raw story")])
            .run_cycle()
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                processed: 1,
                watermark: 11
            }
        );

        // Opinion and Lead were never invoked, not even with empty input.
        let calls = fx.backend.calls.lock().unwrap();
        assert!(calls
            .iter()
            .all(|(s, _)| !matches!(s, Stage::Opinion | Stage::Lead)));

        // The record still sinks, with categories intact.
        let rows = fx.sink.rows.lock().unwrap();
        assert_eq!(rows[0].summary, None);
        assert_eq!(rows[0].opinion, None);
        assert_eq!(rows[0].lead, None);
        assert_eq!(rows[0].categories, Some(vec!["tech".to_string()]));
    }

    #[tokio::test]
    async fn failing_opinion_stage_is_isolated_from_everything_else() {
        let mut fx = Fixture::new(Some(100));
        fx.backend.fail_stages = HashSet::from([Stage::Opinion]);

        let items = vec![story(102, "X"), story(101, "Y")];
        let outcome = fx.pipeline(items).run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Completed {
                processed: 2,
                watermark: 102
            }
        );

        let rows = fx.sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 2);
        for r in rows.iter() {
            assert!(r.summary.is_some());
            assert!(r.lead.is_some());
            assert!(r.categories.is_some());
            assert_eq!(r.opinion, None);
            // The rendered row carries the fallback, not an empty cell.
            assert_eq!(r.row()[2], crate::models::OPINION_FALLBACK);
        }
    }

    #[tokio::test]
    async fn records_sink_in_ascending_id_order() {
        let fx = Fixture::new(Some(0));
        let items = vec![story(7, "a"), story(9, "b"), story(8, "c")];
        fx.pipeline(items).run_cycle().await.unwrap();

        let ids: Vec<u64> = fx.sink.rows.lock().unwrap().iter().map(|r| r.source_id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn partial_sink_failure_keeps_watermark_at_last_written_row() {
        let mut fx = Fixture::new(Some(10));
        fx.sink.fail_after = Some(2);

        let items = vec![story(11, "a"), story(12, "b"), story(13, "c")];
        let outcome = fx.pipeline(items).run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Partial {
                sunk: 2,
                selected: 3,
                watermark: Some(12)
            }
        );
        assert_eq!(fx.watermark.read().await.unwrap(), Some(12));

        let ids: Vec<u64> = fx.sink.rows.lock().unwrap().iter().map(|r| r.source_id).collect();
        assert_eq!(ids, vec![11, 12]);
    }

    #[tokio::test]
    async fn first_sink_failure_leaves_watermark_untouched() {
        let mut fx = Fixture::new(Some(10));
        fx.sink.fail_after = Some(0);

        let outcome = fx
            .pipeline(vec![story(11, "a")])
            .run_cycle()
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Partial {
                sunk: 0,
                selected: 1,
                watermark: None
            }
        );
        assert_eq!(fx.watermark.read().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn source_outage_aborts_with_no_mutation() {
        let fx = Fixture::new(Some(10));
        let pipeline = Pipeline::new(
            DownSource,
            StageRunner::new(fx.backend.clone(), GenerationConfig::default()),
            fx.sink.clone(),
            fx.watermark.clone(),
            Notifier::new(None),
        );

        let err = pipeline.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Source(_)));
        assert!(fx.sink.rows.lock().unwrap().is_empty());
        assert_eq!(fx.watermark.read().await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn watermark_is_monotonic_across_cycles() {
        let fx = Fixture::new(None);
        let mut observed = Vec::new();

        // Cold start on a page topping out at 105.
        fx.pipeline(vec![story(105, "a"), story(104, "b")])
            .run_cycle()
            .await
            .unwrap();
        observed.push(fx.watermark.read().await.unwrap().unwrap());

        // Front page churns but nothing new appears.
        fx.pipeline(vec![story(103, "c"), story(99, "d")])
            .run_cycle()
            .await
            .unwrap();
        observed.push(fx.watermark.read().await.unwrap().unwrap());

        // Two genuinely new stories arrive.
        fx.pipeline(vec![story(107, "e"), story(106, "f"), story(105, "a")])
            .run_cycle()
            .await
            .unwrap();
        observed.push(fx.watermark.read().await.unwrap().unwrap());

        assert_eq!(observed, vec![105, 105, 107]);
        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    }
}
