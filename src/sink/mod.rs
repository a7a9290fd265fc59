//! Persistent table backends
//!
//! The ingestion pipeline only ever talks to a [`TableSink`]. Which backend
//! sits behind it is decided once, from configuration:
//!
//! - **CSV** ([`CsvSink`]): a flat file, replaced atomically on flush
//! - **SQLite** ([`crate::db::Database`]): a `trials` table, written in one
//!   transaction on flush
//!
//! ```ignore
//! use dlc_table::sink::{open_sink, SinkKind};
//!
//! // Picks the backend from the extension
//! let kind = SinkKind::from_path("data/dlc_table.csv");   // Csv
//! let kind = SinkKind::from_path("data/trials.sqlite");   // Sqlite
//! let mut sink = open_sink(kind, "data/dlc_table.csv")?;
//! ```

pub mod csv;

pub use self::csv::CsvSink;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::db::Database;
use crate::error::SinkError;
use crate::record::TrialRecord;

/// Storage behind the trial table.
///
/// Writes are staged; nothing is visible to other processes until
/// [`TableSink::flush`] returns.
pub trait TableSink {
    /// Where the table lives, for messages.
    fn location(&self) -> &Path;

    /// Rows already persisted. A table that does not exist yet is empty.
    fn load(&mut self) -> Result<Vec<TrialRecord>, SinkError>;

    /// Stage a row under a new id.
    fn write_row(&mut self, record: &TrialRecord) -> Result<(), SinkError>;

    /// Stage a row, replacing whatever is stored under its id.
    fn upsert_row(&mut self, record: &TrialRecord) -> Result<(), SinkError>;

    /// Persist everything staged.
    fn flush(&mut self) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Csv,
    Sqlite,
}

impl SinkKind {
    /// `.db`, `.sqlite` and `.sqlite3` are SQLite; anything else is CSV.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "db" | "sqlite" | "sqlite3" => SinkKind::Sqlite,
            _ => SinkKind::Csv,
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkKind::Csv => write!(f, "csv"),
            SinkKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Open the backend for `path`.
pub fn open_sink<P: AsRef<Path>>(kind: SinkKind, path: P) -> Result<Box<dyn TableSink>, SinkError> {
    let path = path.as_ref();
    Ok(match kind {
        SinkKind::Csv => Box::new(CsvSink::new(path)),
        SinkKind::Sqlite => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            Box::new(Database::open_at(path)?)
        }
    })
}
