//! Local JSONL append sink.
//!
//! One JSON line per record, appended to a date-stamped file under the
//! configured directory:
//!
//! ```text
//! rows/
//! ├── 2026-08-06.jsonl
//! └── 2026-08-07.jsonl
//! ```
//!
//! This is the deployment shape for running without sheet credentials, and
//! what the integration-style pipeline tests write against.

use std::path::PathBuf;

use chrono::Local;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::SinkError;
use crate::models::EnrichedRecord;
use crate::sinks::Sink;

/// Sink appending records to `{dir}/{YYYY-MM-DD}.jsonl`.
#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonlSink { dir: dir.into() }
    }

    fn file_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", Local::now().date_naive()))
    }
}

impl Sink for JsonlSink {
    #[instrument(level = "info", skip_all, fields(id = record.source_id))]
    async fn append(&self, record: &EnrichedRecord) -> Result<(), SinkError> {
        fs::create_dir_all(&self.dir).await.map_err(|e| SinkError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = self.file_path();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| SinkError::Io {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SinkError::Io {
                path: path.clone(),
                source: e,
            })?;

        debug!(path = %path.display(), "Appended row");
        Ok(())
    }
}
