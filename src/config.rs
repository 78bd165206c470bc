//! YAML configuration for the pipeline.
//!
//! Everything tunable lives here: the generation backend endpoint, the
//! per-stage model parameters, the stage deadline and retry policy, the
//! target sheet, and the optional notification webhook. Secrets (API keys,
//! tokens) are deliberately NOT part of the file; they come in through the
//! environment via the CLI.
//!
//! Every knob has a default, so an empty `config.yaml` is a valid starting
//! point when running with the local JSONL sink.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Generation backend endpoint, models, deadline, and retry policy.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Target spreadsheet. Required only when running with the sheets sink.
    #[serde(default)]
    pub sheet: Option<SheetConfig>,

    /// Directory for the local JSONL sink's date-stamped row files.
    #[serde(default = "default_jsonl_dir")]
    pub jsonl_output_dir: String,

    /// Optional webhook notified once per appended row.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            generation: GenerationConfig::default(),
            sheet: None,
            jsonl_output_dir: default_jsonl_dir(),
            webhook_url: None,
        }
    }
}

impl Config {
    /// Load and parse the YAML config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Generation backend settings shared by all four stages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,

    /// Upper bound on one stage call, including its internal retries.
    pub timeout_secs: u64,

    /// Retry attempts per stage call before giving up.
    pub max_retries: usize,

    /// Initial backoff delay; doubles per attempt.
    pub base_delay_ms: u64,

    /// Model parameters for the summarize stage (raw story text in).
    pub summarize: ModelParams,
    /// Model parameters for the opinion stage (summary in).
    pub opinion: ModelParams,
    /// Model parameters for the lead stage (summary in).
    pub lead: ModelParams,
    /// Model parameters for the categorize stage (raw story text in).
    pub categorize: ModelParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 10,
            max_retries: 2,
            base_delay_ms: 500,
            summarize: ModelParams {
                model: "gpt-3.5-turbo-16k".to_string(),
                temperature: 0.0,
            },
            opinion: ModelParams {
                model: "gpt-4".to_string(),
                temperature: 0.6,
            },
            lead: ModelParams {
                model: "gpt-3.5-turbo".to_string(),
                temperature: 0.6,
            },
            categorize: ModelParams {
                model: "gpt-3.5-turbo".to_string(),
                temperature: 0.0,
            },
        }
    }
}

/// Model name and sampling temperature for one stage.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelParams {
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
}

/// Target spreadsheet for the sheets sink.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    /// Spreadsheet document id, as it appears in the sheet URL.
    pub spreadsheet_id: String,

    /// A1-notation range the append call anchors to.
    #[serde(default = "default_range")]
    pub range: String,
}

fn default_jsonl_dir() -> String {
    "./rows".to_string()
}

fn default_range() -> String {
    "A1".to_string()
}
