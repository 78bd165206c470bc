//! Sinks receiving enriched rows.
//!
//! A sink appends exactly one row per record. Append semantics are additive:
//! replaying a record after a partial cycle produces a duplicate row, so
//! downstream consumers that need exactly-once must dedupe by `source_id`.
//!
//! # Submodules
//!
//! - [`sheets`]: appends rows to a Google Sheets spreadsheet over REST
//! - [`jsonl`]: appends rows to local date-stamped JSONL files

pub mod jsonl;
pub mod sheets;

use crate::error::SinkError;
use crate::models::EnrichedRecord;

use jsonl::JsonlSink;
use sheets::SheetsSink;

/// Append-only destination for enriched records.
pub trait Sink {
    async fn append(&self, record: &EnrichedRecord) -> Result<(), SinkError>;
}

/// Runtime-selected sink backend.
#[derive(Debug)]
pub enum AnySink {
    Sheets(SheetsSink),
    Jsonl(JsonlSink),
}

impl Sink for AnySink {
    async fn append(&self, record: &EnrichedRecord) -> Result<(), SinkError> {
        match self {
            AnySink::Sheets(s) => s.append(record).await,
            AnySink::Jsonl(s) => s.append(record).await,
        }
    }
}
