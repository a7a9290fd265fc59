//! Companion tracking CSV lookup
//!
//! Pose-estimation output is named after the video it was produced from:
//! `FoodOnly_7_30_25_S1P_Carrot.mp4` is tracked in
//! `FoodOnly_7_30_25_S1P_CarrotDLC_resnet50_AnimalBehaviorJun6shuffle1_1030000_filtered.csv`.
//! The index is built once per run and answers lookups from memory.

use regex::Regex;
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::RowIssue;
use crate::parser::rules::strip_extension;

/// Regular files under `root`. Entries that cannot be read are logged and
/// skipped.
pub fn walk_files(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
}

/// Suffix patterns tried in priority order. `*` matches any run of characters.
pub const DEFAULT_CSV_SUFFIXES: &[&str] = &["DLC*_filtered.csv", "_DLC.csv", "DLC*.csv", "_DLC*.csv"];

/// A wildcard pattern for what follows the video stem in a CSV file name.
#[derive(Debug, Clone)]
pub struct SuffixPattern {
    raw: String,
    regex: Regex,
}

impl SuffixPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = regex::escape(pattern).replace(r"\*", ".*");
        Ok(Self {
            raw: pattern.to_string(),
            regex: Regex::new(&format!("^{}$", body))?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, remainder: &str) -> bool {
        self.regex.is_match(remainder)
    }
}

#[derive(Debug, Clone)]
struct CsvEntry {
    path: PathBuf,
    file_name: String,
    modified: Option<SystemTime>,
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CsvLookup {
    Found(PathBuf),
    /// Several files tied at the best rank; `chosen` is the most recently
    /// modified (ties broken by path).
    Ambiguous {
        chosen: PathBuf,
        candidates: Vec<PathBuf>,
    },
    NotFound,
}

impl CsvLookup {
    pub fn path(&self) -> Option<&Path> {
        match self {
            CsvLookup::Found(p) => Some(p),
            CsvLookup::Ambiguous { chosen, .. } => Some(chosen),
            CsvLookup::NotFound => None,
        }
    }

    pub fn issue(&self) -> Option<RowIssue> {
        match self {
            CsvLookup::Found(_) => None,
            CsvLookup::Ambiguous { chosen, candidates } => Some(RowIssue::AmbiguousCsvMatch {
                candidates: candidates.len(),
                chosen: chosen.clone(),
            }),
            CsvLookup::NotFound => Some(RowIssue::CsvNotFound),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvIndex {
    entries: Vec<CsvEntry>,
    patterns: Vec<SuffixPattern>,
}

impl CsvIndex {
    /// Walk `dirs` recursively and index every `.csv` file.
    ///
    /// Directories that do not exist are skipped.
    pub fn build<S: AsRef<str>>(dirs: &[PathBuf], patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| SuffixPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::new();
        for dir in dirs {
            if !dir.is_dir() {
                warn!(dir = %dir.display(), "csv directory not found, skipping");
                continue;
            }
            entries.extend(
                walk_files(dir)
                    .filter(|e| {
                        e.path()
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .map(|ext| ext.eq_ignore_ascii_case("csv"))
                            .unwrap_or(false)
                    })
                    .map(|e| CsvEntry {
                        file_name: e.file_name().to_string_lossy().into_owned(),
                        modified: e.metadata().ok().and_then(|m| m.modified().ok()),
                        path: e.into_path(),
                    }),
            );
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries.dedup_by(|a, b| a.path == b.path);
        debug!(files = entries.len(), "indexed tracking csv files");

        Ok(Self { entries, patterns })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the tracking CSV for a video file name (or path).
    pub fn lookup(&self, video_name: &str) -> CsvLookup {
        let file_name = Path::new(video_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| video_name.to_string());
        let stem = strip_extension(&file_name);
        if stem.is_empty() {
            return CsvLookup::NotFound;
        }

        let mut ranked: Vec<(usize, &CsvEntry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let remainder = entry.file_name.strip_prefix(stem)?;
                let rank = self.patterns.iter().position(|p| p.matches(remainder))?;
                Some((rank, entry))
            })
            .collect();

        let Some(best) = ranked.iter().map(|(rank, _)| *rank).min() else {
            debug!(video = %file_name, "no tracking csv");
            return CsvLookup::NotFound;
        };
        ranked.retain(|(rank, _)| *rank == best);
        ranked.sort_by(|(_, a), (_, b)| {
            Reverse(a.modified)
                .cmp(&Reverse(b.modified))
                .then_with(|| a.path.cmp(&b.path))
        });

        let chosen = ranked[0].1.path.clone();
        if ranked.len() == 1 {
            return CsvLookup::Found(chosen);
        }

        let candidates: Vec<PathBuf> = ranked.iter().map(|(_, e)| e.path.clone()).collect();
        warn!(
            video = %file_name,
            pattern = self.patterns[best].as_str(),
            candidates = candidates.len(),
            chosen = %chosen.display(),
            "ambiguous tracking csv match, keeping most recent"
        );
        CsvLookup::Ambiguous { chosen, candidates }
    }
}
