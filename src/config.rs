//! Ingestion configuration
//!
//! Everything a run needs is carried in one [`IngestConfig`] value, so
//! several datasets can be ingested from the same process. Values come from
//! CLI flags, an optional JSON file and the defaults below, in that order of
//! precedence; the binary does the layering.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};
use crate::locate::DEFAULT_CSV_SUFFIXES;
use crate::maze::CenterRule;
use crate::sink::SinkKind;

pub const DEFAULT_OUTPUT: &str = "dlc_table.csv";
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

/// Cohort directories of the lab data layout.
const COHORTS: &[&str] = &["WhiteAnimals10X", "WhiteAnimals2X"];

/// What happens to a video whose name is already in the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Replace the existing row and keep its id
    #[default]
    Upsert,
    /// Add a new row every time
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Directories searched recursively for videos
    pub video_dirs: Vec<PathBuf>,
    /// Directories searched recursively for tracking CSVs
    pub csv_dirs: Vec<PathBuf>,
    /// Mother video directory, or CSV listing mother video names
    pub reference: Option<PathBuf>,
    pub output: PathBuf,
    /// Backend; inferred from `output` when absent
    pub sink: Option<SinkKind>,
    pub mode: WriteMode,
    pub video_extensions: Vec<String>,
    /// Ordered suffix patterns linking a video stem to its tracking CSV
    pub csv_suffixes: Vec<String>,
    pub center: CenterRule,
    /// Worker threads for the per-video phase; 1 runs inline
    pub jobs: Option<usize>,
    /// ffprobe binary name or path
    pub ffprobe: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            video_dirs: Vec::new(),
            csv_dirs: Vec::new(),
            reference: None,
            output: PathBuf::from(DEFAULT_OUTPUT),
            sink: None,
            mode: WriteMode::default(),
            video_extensions: DEFAULT_VIDEO_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            csv_suffixes: DEFAULT_CSV_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            center: CenterRule::default(),
            jobs: None,
            ffprobe: "ffprobe".to_string(),
        }
    }
}

impl IngestConfig {
    /// Videos and tracking CSVs both live under `input_dir`.
    pub fn for_input<P, Q>(input_dir: P, output: Q, reference: Option<PathBuf>) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let input_dir = input_dir.as_ref().to_path_buf();
        Self {
            video_dirs: vec![input_dir.clone()],
            csv_dirs: vec![input_dir],
            reference,
            output: output.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// The lab's data directory layout:
    ///
    /// ```text
    /// <data_dir>/SplitVideos/WhiteAnimals{10X,2X}/              videos
    /// <data_dir>/DlcDataPytorchFiltered/WhiteAnimals{10X,2X}/   tracking CSVs
    /// <data_dir>/RawVideos/                                     mother videos
    /// ```
    pub fn from_data_layout<P, Q>(data_dir: P, output: Q) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let data_dir = data_dir.as_ref();
        let cohort_dirs = |root: &str| -> Vec<PathBuf> {
            COHORTS.iter().map(|c| data_dir.join(root).join(c)).collect()
        };
        Self {
            video_dirs: cohort_dirs("SplitVideos"),
            csv_dirs: cohort_dirs("DlcDataPytorchFiltered"),
            reference: Some(data_dir.join("RawVideos")),
            output: output.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Read a JSON config file. Missing keys take their defaults.
    pub fn load_json<P: AsRef<Path>>(path: P) -> IngestResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn sink_kind(&self) -> SinkKind {
        self.sink.unwrap_or_else(|| SinkKind::from_path(&self.output))
    }

    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or(1)
    }

    /// Reject configurations no run could succeed with.
    pub fn validate(&self) -> IngestResult<()> {
        if self.video_dirs.is_empty() {
            return Err(IngestError::Config("no video directory configured".to_string()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(IngestError::Config("no output table configured".to_string()));
        }
        if self.video_extensions.is_empty() {
            return Err(IngestError::Config("no video extensions configured".to_string()));
        }
        if self.csv_suffixes.is_empty() {
            return Err(IngestError::Config("no csv suffix patterns configured".to_string()));
        }
        if self.jobs == Some(0) {
            return Err(IngestError::Config("jobs must be at least 1".to_string()));
        }
        if self.ffprobe.trim().is_empty() {
            return Err(IngestError::Config("ffprobe program is empty".to_string()));
        }
        Ok(())
    }
}
