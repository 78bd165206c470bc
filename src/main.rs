//! # HN Sheet Digest
//!
//! A polling pipeline that watches the Hacker News front page for new
//! top-level stories, runs each story through four text-generation stages
//! (summary, opinion, short lead, topical categories), and appends the
//! results as rows to a spreadsheet, with a durable watermark so stories
//! are never reprocessed.
//!
//! ## Usage
//!
//! ```sh
//! # One cycle, e.g. from cron
//! hn_sheet_digest --once
//!
//! # Persistent loop, local JSONL rows instead of a sheet
//! hn_sheet_digest --sink jsonl --interval-secs 300
//! ```
//!
//! ## Architecture
//!
//! Each cycle is a fixed sequence:
//! 1. **Fetch**: scrape the current front page
//! 2. **Diff**: keep stories with ids above the persisted watermark
//! 3. **Enrich**: run the stage schedule per story (summarize+categorize,
//!    then opinion+lead over the summary), stories in parallel
//! 4. **Sink**: append one row per story in ascending id order
//! 5. **Advance**: persist the watermark over the rows actually written
//!
//! Stage failures degrade single fields to fallback strings; only a source
//! outage or a watermark store failure aborts a cycle, and neither
//! terminates the process.

use std::error::Error;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

mod api;
mod cli;
mod config;
mod error;
mod models;
mod notify;
mod pipeline;
mod sinks;
mod sources;
mod stages;
mod utils;
mod watermark;

use api::{ChatClient, RetryGenerate};
use cli::{Cli, SinkChoice};
use config::Config;
use error::{ConfigError, CycleError};
use notify::Notifier;
use pipeline::{CycleOutcome, Pipeline};
use sinks::{jsonl::JsonlSink, sheets::SheetsSink, AnySink};
use sources::hackernews::HackerNewsSource;
use stages::StageRunner;
use utils::ensure_writable_dir;
use watermark::FileWatermarkStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!("hn_sheet_digest starting up");

    // Parse CLI and load config
    let args = Cli::parse();
    debug!(?args.config, ?args.state_path, ?args.sink, "Parsed CLI arguments");
    let config = Config::load(&args.config)?;
    info!(config_path = %args.config, "Loaded configuration");

    // --- Assemble collaborators ---
    let backend = RetryGenerate::new(
        ChatClient::new(&config.generation.base_url, args.api_key.clone()),
        config.generation.max_retries,
        Duration::from_millis(config.generation.base_delay_ms),
    );
    let stages = StageRunner::new(backend, config.generation.clone());

    let sink = match args.sink {
        SinkChoice::Sheets => {
            let sheet = config.sheet.as_ref().ok_or_else(|| {
                ConfigError::Invalid(
                    "the sheets sink needs a `sheet:` section in the config file".to_string(),
                )
            })?;
            let token = args.sheets_token.clone().ok_or_else(|| {
                ConfigError::Invalid(
                    "the sheets sink needs SHEETS_ACCESS_TOKEN in the environment".to_string(),
                )
            })?;
            AnySink::Sheets(SheetsSink::new(sheet, token))
        }
        SinkChoice::Jsonl => {
            // Early check so a bad output dir fails at startup, not mid-cycle
            if let Err(e) = ensure_writable_dir(&config.jsonl_output_dir).await {
                error!(
                    path = %config.jsonl_output_dir,
                    error = %e,
                    "JSONL output directory is not writable (fix perms or choose a different path)"
                );
                return Err(e);
            }
            AnySink::Jsonl(JsonlSink::new(config.jsonl_output_dir.clone()))
        }
    };

    let pipeline = Pipeline::new(
        HackerNewsSource::new(),
        stages,
        sink,
        FileWatermarkStore::new(&args.state_path),
        Notifier::new(config.webhook_url.as_deref()),
    );

    // --- Drive cycles ---
    if args.once {
        log_outcome(pipeline.run_cycle().await);
        return Ok(());
    }

    let interval = Duration::from_secs(args.interval_secs);
    info!(interval_secs = args.interval_secs, "Entering polling loop");
    loop {
        log_outcome(pipeline.run_cycle().await);
        tokio::time::sleep(interval).await;
    }
}

/// Log one cycle's result. No cycle failure terminates the process; the
/// next poll is always the retry.
fn log_outcome(result: Result<CycleOutcome, CycleError>) {
    match result {
        Ok(CycleOutcome::SeededWatermark { watermark }) => {
            info!(watermark, "Cold start: watermark initialized, nothing processed");
        }
        Ok(CycleOutcome::NoNewItems) => {
            info!("No new stories this cycle");
        }
        Ok(CycleOutcome::Completed {
            processed,
            watermark,
        }) => {
            info!(processed, watermark, "Cycle completed");
        }
        Ok(CycleOutcome::Partial {
            sunk,
            selected,
            watermark,
        }) => {
            warn!(
                sunk,
                selected,
                ?watermark,
                "Cycle completed partially; unwritten stories will be retried next cycle"
            );
        }
        Err(CycleError::Source(e)) => {
            warn!(error = %e, "Content source unavailable; skipping this cycle");
        }
        Err(CycleError::Watermark(e)) => {
            warn!(
                error = %e,
                "Watermark store failure; the same stories may be reprocessed and appended again next cycle"
            );
        }
    }
}
