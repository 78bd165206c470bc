//! Error types for the digest pipeline.
//!
//! Each external collaborator gets its own error enum so the coordinator can
//! apply the right containment policy per failure class:
//!
//! - [`SourceError`]: the front page could not be fetched or parsed. The
//!   whole cycle is aborted with no state mutated; the next poll is the retry.
//! - [`StageError`]: one generation call failed or timed out. Contained to a
//!   single field of a single record; never aborts sibling stages or stories.
//! - [`SinkError`]: a row append failed. Remaining writes for the cycle are
//!   abandoned, rows already written are kept.
//! - [`WatermarkError`]: the state file could not be read or written. Fatal
//!   to the cycle; the delta is reprocessed on the next poll.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The content source could not produce a usable front page.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network failure while fetching the front page.
    #[error("front page fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The page downloaded but no story rows could be extracted from it.
    #[error("front page parse produced no stories")]
    EmptyPage,
}

/// A single enrichment stage call failed.
#[derive(Debug, Error)]
pub enum StageError {
    /// The stage call did not complete within its deadline.
    #[error("stage call exceeded its {0:?} deadline")]
    Timeout(Duration),

    /// The generation backend rejected the request or was unreachable.
    #[error("generation backend error: {0}")]
    Backend(String),

    /// The backend answered but the response body was not usable.
    #[error("generation backend returned a malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for StageError {
    fn from(e: reqwest::Error) -> Self {
        StageError::Backend(e.to_string())
    }
}

/// A row append to the external store failed.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Network failure while talking to the sheet API.
    #[error("sheet append failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sheet API answered with a non-success status.
    #[error("sheet append rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Local filesystem failure while appending a row.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The record could not be serialized for the sink.
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The watermark state could not be read or durably written.
#[derive(Debug, Error)]
pub enum WatermarkError {
    /// Filesystem failure on the state file.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The state file exists but does not hold a valid watermark.
    #[error("state file {path:?} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl WatermarkError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WatermarkError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The only failures visible at cycle granularity.
///
/// Stage and sink failures are absorbed into the cycle outcome instead; see
/// [`crate::pipeline::CycleOutcome`].
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("content source unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("watermark store failure: {0}")]
    Watermark(#[from] WatermarkError),
}

/// Startup-time configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_display() {
        let e = StageError::Timeout(Duration::from_secs(10));
        assert!(e.to_string().contains("10s"));

        let e = StageError::Backend("quota exhausted".to_string());
        assert_eq!(e.to_string(), "generation backend error: quota exhausted");
    }

    #[test]
    fn sink_rejection_display() {
        let e = SinkError::Rejected {
            status: 403,
            body: "PERMISSION_DENIED".to_string(),
        };
        assert!(e.to_string().contains("403"));
        assert!(e.to_string().contains("PERMISSION_DENIED"));
    }

    #[test]
    fn cycle_error_wraps_source() {
        let e = CycleError::from(SourceError::EmptyPage);
        assert!(matches!(e, CycleError::Source(_)));
        assert!(e.to_string().contains("content source unavailable"));
    }
}
