//! Run summary
//!
//! A [`SummaryReport`] is built up row by row during the merge phase of an
//! ingestion run. It counts every non-fatal issue kind, so an operator can
//! see the state of the table without reading the log.
//!
//! # Usage
//!
//! ```ignore
//! use dlc_table::report;
//!
//! // Automatically picks format based on extension
//! report::generate("summary.json", &summary)?;  // full report
//! report::generate("issues.csv", &summary)?;    // one line per row issue
//! ```

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{IssueKind, RowIssue};
use crate::record::{TrialRecord, Upsert};

/// Label used in the breakdowns for a field that could not be parsed.
pub const UNKNOWN: &str = "(unknown)";

/// Issues recorded against one row of this run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowReport {
    pub id: i32,
    pub video_name: String,
    pub issues: Vec<RowIssue>,
}

/// Counts for one ingestion run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryReport {
    /// Videos processed in this run
    pub total: usize,
    pub inserted: usize,
    pub updated: usize,
    pub parse_failures: usize,
    pub video_unreadable: usize,
    pub csv_not_found: usize,
    pub ambiguous_csv: usize,
    pub maze_unresolved: usize,
    /// Videos whose file name was already seen earlier in the same run
    pub duplicate_names: usize,
    /// Rows in the table after the run
    pub table_rows: usize,
    pub by_task: BTreeMap<String, usize>,
    pub by_health: BTreeMap<String, usize>,
    pub by_genotype: BTreeMap<String, usize>,
    pub rows: Vec<RowReport>,
}

impl SummaryReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one merged row.
    pub fn record(&mut self, record: &TrialRecord, issues: &[RowIssue], outcome: Upsert) {
        self.total += 1;
        match outcome {
            Upsert::Inserted(_) => self.inserted += 1,
            Upsert::Updated(_) => self.updated += 1,
        }

        for issue in issues {
            match issue.kind() {
                IssueKind::ParseFailure => self.parse_failures += 1,
                IssueKind::VideoUnreadable => self.video_unreadable += 1,
                IssueKind::CsvNotFound => self.csv_not_found += 1,
                IssueKind::AmbiguousCsvMatch => self.ambiguous_csv += 1,
            }
        }

        bump(&mut self.by_task, record.task.as_deref());
        bump(&mut self.by_health, record.health.as_deref());
        bump(&mut self.by_genotype, record.genotype.as_deref());

        if !issues.is_empty() {
            self.rows.push(RowReport {
                id: record.id,
                video_name: record.video_name.clone(),
                issues: issues.to_vec(),
            });
        }
    }

    /// Number of issues of one kind.
    pub fn count(&self, kind: IssueKind) -> usize {
        match kind {
            IssueKind::ParseFailure => self.parse_failures,
            IssueKind::VideoUnreadable => self.video_unreadable,
            IssueKind::CsvNotFound => self.csv_not_found,
            IssueKind::AmbiguousCsvMatch => self.ambiguous_csv,
        }
    }

    /// Rows of this run with at least one issue.
    pub fn rows_with_issues(&self) -> usize {
        self.rows.len()
    }

    pub fn is_clean(&self) -> bool {
        self.rows.is_empty()
    }
}

fn bump(counts: &mut BTreeMap<String, usize>, value: Option<&str>) {
    *counts.entry(value.unwrap_or(UNKNOWN).to_string()).or_insert(0) += 1;
}

/// Write the summary in the format matching the file extension.
///
/// `.csv` lists one line per row issue; anything else gets the full report
/// as JSON.
pub fn generate<P: AsRef<Path>>(path: P, summary: &SummaryReport) -> io::Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut file = std::fs::File::create(path)?;

    match ext.as_str() {
        "csv" => write_issues_csv(&mut file, summary),
        _ => write_json(&mut file, summary),
    }
}

pub fn write_json<W: Write>(writer: &mut W, summary: &SummaryReport) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, summary)?;
    writeln!(writer)
}

pub fn write_issues_csv<W: Write>(writer: W, summary: &SummaryReport) -> io::Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(["id", "video_name", "kind", "detail"])?;
    for row in &summary.rows {
        for issue in &row.issues {
            let kind = serde_json::to_value(issue.kind())?;
            out.write_record([
                row.id.to_string(),
                row.video_name.clone(),
                kind.as_str().unwrap_or_default().to_string(),
                issue.to_string(),
            ])?;
        }
    }
    out.flush()
}
