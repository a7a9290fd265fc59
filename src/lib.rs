//! dlc-table - build the trial table for pose-tracking experiments
//!
//! Every experimental trial is one video plus one pose-tracking CSV. This
//! crate walks a directory of videos and produces one row per trial:
//! metadata parsed from the file name, frame count and rate from the video
//! container, the path of the companion tracking CSV, and the maze the
//! animal ran in.
//!
//! # Overview
//!
//! ```text
//!                 +-- parser   (task, date, animal, health, cohort)
//!                 |
//! videos ---------+-- video    (frames, fps, width, height)
//!                 |
//!                 +-- locate   (tracking CSV path)
//!                 |
//!                 +-- maze     (maze number, center label)
//!                        |
//!                        v
//!                     ingest --> Table --> TableSink (CSV file | SQLite)
//! ```
//!
//! Problems with a single video never stop a run: the row is written with
//! what could be filled, and the problem is counted in the
//! [`SummaryReport`]. Re-running over the same videos updates rows in place
//! and keeps their ids.
//!
//! # Quick Start
//!
//! ```no_run
//! use dlc_table::ingest;
//!
//! let summary = ingest("videos/", "dlc_table.csv", None)?;
//!
//! println!("{} rows, {} without tracking csv", summary.total, summary.csv_not_found);
//! # Ok::<(), dlc_table::IngestError>(())
//! ```
//!
//! # Modules
//!
//! - [`parser`]: Rule-based filename parsing
//! - [`video`]: Container metadata through `ffprobe`
//! - [`locate`]: Tracking CSV lookup
//! - [`maze`]: Maze numbers from mother videos, center labels
//! - [`ingest`](mod@ingest): The pipeline
//! - [`sink`], [`db`]: CSV and SQLite table backends
//! - [`report`]: Run summaries

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod locate;
pub mod logging;
pub mod maze;
pub mod parser;
pub mod record;
pub mod report;
pub mod schema;
pub mod sink;
pub mod video;

pub use config::{IngestConfig, WriteMode};
pub use db::{Database, DbError};
pub use error::{IngestError, IngestResult, IssueKind, RowIssue, SinkError, VideoError};
pub use ingest::{ingest, refresh_maze, Ingestor, MazeRefresh};
pub use locate::{CsvIndex, CsvLookup};
pub use maze::{CenterRule, MazeAssigner, MotherIndex};
pub use parser::{FilenameParser, ParsedName};
pub use record::{Table, TrialRecord, Upsert};
pub use report::SummaryReport;
pub use sink::{open_sink, CsvSink, SinkKind, TableSink};
pub use video::{FfprobeProbe, VideoInfo, VideoProbe};
