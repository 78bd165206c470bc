//! The four enrichment stages and their shared executor.
//!
//! Each stage is the same mechanism with different parameters: a fixed role
//! instruction, a model, and a temperature. [`StageRunner`] is the single
//! parameterized executor for all of them; there are no per-stage code
//! paths.
//!
//! # Failure containment
//!
//! `run` never returns an error. A timeout, a backend failure, or an
//! unusable response all resolve the stage's slot to `None`, logged with the
//! story id and stage name. One story's one stage failing must never abort
//! sibling stages, sibling stories, or the watermark advance of stories that
//! did process.

use std::time::Duration;

use itertools::Itertools;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::api::{ChatRequest, GenerateAsync};
use crate::config::{GenerationConfig, ModelParams};
use crate::error::StageError;
use crate::utils::truncate_for_log;

/// Categories kept per story; the tail is discarded.
const MAX_CATEGORIES: usize = 3;

/// One of the four text transformations applied to a story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Condense the raw story text. Runs first, concurrently with Categorize.
    Summarize,
    /// React to the summary. Skipped when the summary is absent.
    Opinion,
    /// Write a short lead paragraph from the summary. Skipped when the
    /// summary is absent.
    Lead,
    /// Tag the raw story text with topical categories.
    Categorize,
}

impl Stage {
    /// Stable lowercase name used in log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Summarize => "summarize",
            Stage::Opinion => "opinion",
            Stage::Lead => "lead",
            Stage::Categorize => "categorize",
        }
    }

    /// The fixed system instruction sent with every call for this stage.
    pub fn role_prompt(&self) -> &'static str {
        match self {
            Stage::Summarize => {
                "You are an expert summarization assistant. Summarize the provided text, \
                 staying as faithful to its actual content as possible."
            }
            Stage::Opinion => {
                "You are an expert commentary assistant. Write your impressions and \
                 opinions about the provided text."
            }
            Stage::Lead => {
                "You are an expert lead-writing assistant. Write a short lead paragraph \
                 introducing the provided text."
            }
            Stage::Categorize => {
                "You are an expert category-tagging assistant. Reply with a JSON array \
                 of two or three short topical categories for the provided text. Reply \
                 with the JSON array only, nothing else."
            }
        }
    }
}

/// Shared executor for all four stages.
///
/// Holds the backend client, the per-stage model parameters, and the one
/// deadline every stage call runs under.
#[derive(Debug)]
pub struct StageRunner<G> {
    backend: G,
    config: GenerationConfig,
    deadline: Duration,
}

impl<G: GenerateAsync> StageRunner<G> {
    pub fn new(backend: G, config: GenerationConfig) -> Self {
        let deadline = Duration::from_secs(config.timeout_secs);
        StageRunner {
            backend,
            config,
            deadline,
        }
    }

    fn params_for(&self, stage: Stage) -> &ModelParams {
        match stage {
            Stage::Summarize => &self.config.summarize,
            Stage::Opinion => &self.config.opinion,
            Stage::Lead => &self.config.lead,
            Stage::Categorize => &self.config.categorize,
        }
    }

    /// Run one stage over `input` for the story `source_id`.
    ///
    /// Resolves to `None` on timeout, backend error, or an effectively empty
    /// response. The failure is logged here with enough context to diagnose;
    /// callers only see the absent slot.
    pub async fn run(&self, stage: Stage, source_id: u64, input: &str) -> Option<String> {
        let req = ChatRequest {
            system: stage.role_prompt(),
            input,
            params: self.params_for(stage),
        };

        let result = match timeout(self.deadline, self.backend.generate(&req)).await {
            Err(_) => Err(StageError::Timeout(self.deadline)),
            Ok(r) => r,
        };

        match result {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    warn!(
                        id = source_id,
                        stage = stage.label(),
                        "Stage produced empty output; recording as absent"
                    );
                    return None;
                }
                debug!(
                    id = source_id,
                    stage = stage.label(),
                    bytes = text.len(),
                    "Stage completed"
                );
                Some(text)
            }
            Err(e) => {
                warn!(
                    id = source_id,
                    stage = stage.label(),
                    error = %e,
                    "Stage failed; recording as absent"
                );
                None
            }
        }
    }

    /// Run the categorize stage and parse its output into category strings.
    pub async fn categories(&self, source_id: u64, input: &str) -> Option<Vec<String>> {
        let raw = self.run(Stage::Categorize, source_id, input).await?;
        let parsed = parse_categories(&raw);
        if parsed.is_empty() {
            warn!(
                id = source_id,
                stage = Stage::Categorize.label(),
                raw = %truncate_for_log(&raw, 200),
                "No categories could be parsed from stage output"
            );
            None
        } else {
            Some(parsed)
        }
    }
}

/// Parse the categorize stage's output into at most [`MAX_CATEGORIES`]
/// distinct category strings.
///
/// Models are asked for a bare JSON array but don't always comply, so the
/// parse is lenient: a JSON array anywhere in the text wins, otherwise the
/// text is split on commas and newlines. Duplicates are dropped keeping
/// first occurrence.
pub fn parse_categories(raw: &str) -> Vec<String> {
    let candidates: Vec<String> = match extract_json_array(raw) {
        Some(list) => list,
        None => raw
            .split([',', '\n'])
            .map(|s| s.trim_matches(|c: char| c.is_whitespace() || "\"'`-*[]".contains(c)))
            .map(str::to_string)
            .collect(),
    };

    candidates
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .unique()
        .take(MAX_CATEGORIES)
        .collect()
}

/// Find and parse the first JSON string array embedded in `raw`.
fn extract_json_array(raw: &str) -> Option<Vec<String>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&raw[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every request; optionally sleeps to trigger the deadline.
    #[derive(Debug, Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<(String, String)>>,
        delay: Option<Duration>,
    }

    impl GenerateAsync for RecordingBackend {
        async fn generate(&self, req: &ChatRequest<'_>) -> Result<String, StageError> {
            self.calls
                .lock()
                .unwrap()
                .push((req.system.to_string(), req.input.to_string()));
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            Ok(format!("echo: {}", req.input))
        }
    }

    fn runner(backend: RecordingBackend) -> StageRunner<RecordingBackend> {
        StageRunner::new(backend, GenerationConfig::default())
    }

    #[tokio::test]
    async fn run_sends_stage_role_and_input() {
        let r = runner(RecordingBackend::default());
        let out = r.run(Stage::Summarize, 7, "story text").await;
        assert_eq!(out.as_deref(), Some("echo: story text"));

        let calls = r.backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Stage::Summarize.role_prompt());
        assert_eq!(calls[0].1, "story text");
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_to_absent() {
        let backend = RecordingBackend {
            delay: Some(Duration::from_secs(600)),
            ..Default::default()
        };
        let r = runner(backend);
        let out = r.run(Stage::Opinion, 7, "slow").await;
        assert!(out.is_none());
        // The call was made, it just never came back in time.
        assert_eq!(r.backend.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn categories_parses_echoed_array() {
        let r = runner(RecordingBackend::default());
        let out = r.categories(7, r#"["tech", "ai"]"#).await;
        assert_eq!(
            out,
            Some(vec!["tech".to_string(), "ai".to_string()])
        );
    }

    #[test]
    fn parse_categories_json_array() {
        assert_eq!(
            parse_categories(r#"["tech", "security", "rust"]"#),
            vec!["tech", "security", "rust"]
        );
    }

    #[test]
    fn parse_categories_fenced_json() {
        let raw = "```json\n[\"startups\", \"hardware\"]\n```";
        assert_eq!(parse_categories(raw), vec!["startups", "hardware"]);
    }

    #[test]
    fn parse_categories_plain_list_fallback() {
        assert_eq!(
            parse_categories("tech, open source, databases"),
            vec!["tech", "open source", "databases"]
        );
        assert_eq!(
            parse_categories("- tech\n- \"ai\"\n"),
            vec!["tech", "ai"]
        );
    }

    #[test]
    fn parse_categories_dedupes_and_caps_at_three() {
        assert_eq!(
            parse_categories("tech, tech, ai, ml, web"),
            vec!["tech", "ai", "ml"]
        );
    }

    #[test]
    fn parse_categories_empty_input() {
        assert!(parse_categories("").is_empty());
        assert!(parse_categories("[]").is_empty());
    }
}
