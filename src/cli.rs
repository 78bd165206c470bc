//! Command-line interface definitions for the digest pipeline.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Secrets are taken from the environment rather than flags so they stay out
//! of shell history and process listings.

use clap::{Parser, ValueEnum};

/// Command-line arguments for the digest pipeline.
///
/// # Examples
///
/// ```sh
/// # One cycle against the configured sheet, e.g. from cron
/// hn_sheet_digest --once
///
/// # Persistent loop, polling every five minutes, writing local JSONL rows
/// hn_sheet_digest --sink jsonl --interval-secs 300
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: String,

    /// Path to the watermark state file
    #[arg(short, long, default_value = "hn_watermark.json")]
    pub state_path: String,

    /// Where enriched rows are appended
    #[arg(long, value_enum, default_value_t = SinkChoice::Sheets)]
    pub sink: SinkChoice,

    /// Run a single cycle and exit (for external schedulers)
    #[arg(long)]
    pub once: bool,

    /// Seconds to sleep between cycles when running as a persistent loop
    #[arg(long, default_value_t = 300)]
    pub interval_secs: u64,

    /// API key for the generation backend
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// OAuth access token for the Google Sheets API (required for the
    /// sheets sink; provisioning and refresh happen outside this process)
    #[arg(long, env = "SHEETS_ACCESS_TOKEN", hide_env_values = true)]
    pub sheets_token: Option<String>,
}

/// Which sink backend receives the enriched rows.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkChoice {
    /// Append rows to the configured Google Sheets spreadsheet
    Sheets,
    /// Append rows to local date-stamped JSONL files
    Jsonl,
}
