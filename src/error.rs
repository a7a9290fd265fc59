//! Error taxonomy
//!
//! Two tiers:
//!
//! - **Fatal** ([`IngestError`], [`SinkError`]): the run cannot produce a
//!   consistent table. Only configuration problems and persistence failures
//!   land here.
//! - **Row-level** ([`RowIssue`]): something about one video could not be
//!   resolved. These are recorded on the row and counted in the summary; they
//!   never abort a batch.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::db::DbError;

pub type IngestResult<T> = Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("input directory not found: `{0}`")]
    InputMissing(PathBuf),

    #[error("table persistence failed: {0}")]
    Persistence(#[from] SinkError),

    #[error("no row id left after {0}")]
    IdsExhausted(i32),
}

/// Failure of a table backend. Always fatal for the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("i/o failure on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv failure on `{path}`: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("could not replace `{path}`: {reason}")]
    Persist { path: PathBuf, reason: String },

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Why a video's container metadata could not be read.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VideoError {
    #[error("video file not found")]
    Missing,

    #[error("video file is empty")]
    Empty,

    #[error("no readable video stream")]
    NoVideoStream,

    #[error("probe tool `{0}` could not be started")]
    ProbeUnavailable(String),

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("unreadable probe output: {0}")]
    Malformed(String),
}

/// Coarse category of a [`RowIssue`], used for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ParseFailure,
    VideoUnreadable,
    CsvNotFound,
    AmbiguousCsvMatch,
}

/// A non-fatal problem attached to one trial row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowIssue {
    /// Filename fields that no rule could fill.
    ParseFailure { fields: Vec<&'static str> },
    VideoUnreadable { reason: String },
    CsvNotFound,
    /// Several tracking CSVs matched equally well; `chosen` was kept.
    AmbiguousCsvMatch { candidates: usize, chosen: PathBuf },
}

impl RowIssue {
    pub fn kind(&self) -> IssueKind {
        match self {
            RowIssue::ParseFailure { .. } => IssueKind::ParseFailure,
            RowIssue::VideoUnreadable { .. } => IssueKind::VideoUnreadable,
            RowIssue::CsvNotFound => IssueKind::CsvNotFound,
            RowIssue::AmbiguousCsvMatch { .. } => IssueKind::AmbiguousCsvMatch,
        }
    }
}

impl From<VideoError> for RowIssue {
    fn from(e: VideoError) -> Self {
        RowIssue::VideoUnreadable {
            reason: e.to_string(),
        }
    }
}

impl std::fmt::Display for RowIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowIssue::ParseFailure { fields } => {
                write!(f, "unparsed fields: {}", fields.join(","))
            }
            RowIssue::VideoUnreadable { reason } => write!(f, "video unreadable: {}", reason),
            RowIssue::CsvNotFound => write!(f, "tracking csv not found"),
            RowIssue::AmbiguousCsvMatch { candidates, chosen } => write!(
                f,
                "{} tracking csv candidates, kept {}",
                candidates,
                chosen.display()
            ),
        }
    }
}
