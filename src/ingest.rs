//! Table generation
//!
//! One run turns a set of video directories into rows of the trial table:
//!
//! 1. **Discover** videos under the configured directories, sorted by path.
//! 2. **Assemble** a row per video from the filename parser, the video
//!    probe, the CSV locator and the maze assigner. Each video is
//!    independent, so with `jobs > 1` this phase runs on a rayon pool.
//! 3. **Merge** rows into the table one at a time, in discovery order: ids
//!    are handed out and writes are staged on the sink here, never in
//!    parallel.
//! 4. **Flush** the sink once.
//!
//! Nothing that goes wrong with a single video stops the run. The row is
//! still written with the fields that could not be filled left empty, and
//! the problem is counted in the [`SummaryReport`]. Only configuration
//! errors and failures of the table backend are fatal.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{IngestConfig, WriteMode};
use crate::error::{IngestError, IngestResult, RowIssue};
use crate::locate::{walk_files, CsvIndex};
use crate::maze::{has_extension, MazeAssigner, MotherIndex};
use crate::parser::FilenameParser;
use crate::record::{Table, TrialRecord, Upsert};
use crate::report::SummaryReport;
use crate::sink::{open_sink, TableSink};
use crate::video::{FfprobeProbe, VideoProbe};

/// A row ready to be merged, with what went wrong while filling it.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub record: TrialRecord,
    pub issues: Vec<RowIssue>,
}

/// Drives one ingestion run per [`IngestConfig`].
pub struct Ingestor {
    config: IngestConfig,
    parser: FilenameParser,
    probe: Box<dyn VideoProbe>,
    progress: bool,
}

impl Ingestor {
    pub fn new(config: IngestConfig) -> IngestResult<Self> {
        config.validate()?;
        let parser = FilenameParser::new()
            .map_err(|e| IngestError::Config(format!("filename rules: {}", e)))?;
        let probe = Box::new(FfprobeProbe::new(config.ffprobe.clone()));
        Ok(Self {
            config,
            parser,
            probe,
            progress: false,
        })
    }

    /// Replace the video backend.
    pub fn with_probe<V: VideoProbe + 'static>(mut self, probe: V) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Replace the filename rules.
    pub fn with_parser(mut self, parser: FilenameParser) -> Self {
        self.parser = parser;
        self
    }

    /// Show a progress bar while assembling rows.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Videos under the configured directories, sorted by path.
    pub fn collect_videos(&self) -> IngestResult<Vec<PathBuf>> {
        let mut videos = Vec::new();
        for dir in &self.config.video_dirs {
            if !dir.is_dir() {
                return Err(IngestError::InputMissing(dir.clone()));
            }
            videos.extend(
                walk_files(dir)
                    .filter(|e| has_extension(e.path(), &self.config.video_extensions))
                    .map(|e| e.into_path()),
            );
        }
        videos.sort();
        videos.dedup();
        Ok(videos)
    }

    fn csv_index(&self) -> IngestResult<CsvIndex> {
        CsvIndex::build(&self.config.csv_dirs, &self.config.csv_suffixes)
            .map_err(|e| IngestError::Config(format!("csv suffix pattern: {}", e)))
    }

    fn maze_assigner(&self) -> IngestResult<MazeAssigner> {
        let mothers = match &self.config.reference {
            Some(reference) => Some(MotherIndex::load(reference, &self.config.video_extensions)?),
            None => None,
        };
        Ok(MazeAssigner::new(mothers, self.config.center.clone()))
    }

    /// Run against the sink named by the configuration.
    pub fn run(&self) -> IngestResult<SummaryReport> {
        let mut sink = open_sink(self.config.sink_kind(), &self.config.output)?;
        self.run_with_sink(sink.as_mut())
    }

    /// Run against an already opened sink.
    pub fn run_with_sink(&self, sink: &mut dyn TableSink) -> IngestResult<SummaryReport> {
        let videos = self.collect_videos()?;
        let csvs = self.csv_index()?;
        let mazes = self.maze_assigner()?;

        info!(
            videos = videos.len(),
            csv_files = csvs.len(),
            table = %sink.location().display(),
            "starting ingestion"
        );

        let mut table = Table::from_records(sink.load()?)?;
        for id in table.renumbered().to_vec() {
            if let Some(record) = table.get(id) {
                sink.upsert_row(record)?;
            }
        }

        let assembled = self.assemble_all(&videos, &csvs, &mazes)?;

        let mut summary = SummaryReport::new();
        let mut seen = HashSet::new();
        for Assembled { record, issues } in assembled {
            if !seen.insert(record.video_name.clone()) {
                summary.duplicate_names += 1;
                warn!(video = %record.video_name, "video name seen twice in this run");
            }
            if mazes.has_reference() && record.maze.is_none() {
                summary.maze_unresolved += 1;
            }

            let outcome = match self.config.mode {
                WriteMode::Upsert => table.upsert(record)?,
                WriteMode::Append => Upsert::Inserted(table.append(record)?),
            };
            let Some(stored) = table.get(outcome.id()) else {
                continue;
            };
            match outcome {
                Upsert::Inserted(_) => sink.write_row(stored)?,
                Upsert::Updated(_) => sink.upsert_row(stored)?,
            }
            debug!(id = stored.id, video = %stored.video_name, "merged row");
            summary.record(stored, &issues, outcome);
        }

        sink.flush()?;
        summary.table_rows = table.len();

        info!(
            total = summary.total,
            inserted = summary.inserted,
            updated = summary.updated,
            rows_with_issues = summary.rows_with_issues(),
            "ingestion finished"
        );
        Ok(summary)
    }

    fn assemble_all(
        &self,
        videos: &[PathBuf],
        csvs: &CsvIndex,
        mazes: &MazeAssigner,
    ) -> IngestResult<Vec<Assembled>> {
        let pb = self.progress_bar(videos.len());
        let step = |path: &PathBuf| {
            let row = self.assemble(path, csvs, mazes);
            if let Some(ref pb) = pb {
                pb.inc(1);
                pb.set_message(row.record.video_name.clone());
            }
            row
        };

        let jobs = self.config.jobs();
        let assembled: Vec<Assembled> = if jobs > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .map_err(|e| IngestError::Config(format!("worker pool: {}", e)))?;
            pool.install(|| videos.par_iter().map(step).collect())
        } else {
            videos.iter().map(step).collect()
        };

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        Ok(assembled)
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.progress || len < 2 {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    }

    /// Fill one row. Never fails; problems become issues on the row.
    pub fn assemble(&self, path: &Path, csvs: &CsvIndex, mazes: &MazeAssigner) -> Assembled {
        let video_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let mut record = TrialRecord::new(video_name.clone());
        let mut issues = Vec::new();

        let parsed = self.parser.parse(path);
        let missing = parsed.missing_fields();
        if !missing.is_empty() {
            warn!(video = %video_name, fields = ?missing, "filename not fully parsed");
            issues.push(RowIssue::ParseFailure { fields: missing });
        }

        match self.probe.probe(path) {
            Ok(info) => record.set_video(&info),
            Err(e) => {
                warn!(video = %video_name, error = %e, "video unreadable");
                issues.push(e.into());
            }
        }

        let lookup = csvs.lookup(&video_name);
        record.csv_file_path = lookup.path().map(|p| p.to_string_lossy().into_owned());
        if let Some(issue) = lookup.issue() {
            issues.push(issue);
        }

        let placement = mazes.assign(&video_name, &parsed);
        record.maze = placement.maze;
        record.center = placement.center;

        record.task = parsed.task;
        record.modulation = parsed.modulation;
        record.date = parsed.date;
        record.name = parsed.name;
        record.health = parsed.health;
        record.genotype = parsed.genotype;
        record.dose_mult = parsed.dose_mult;
        record.notes = notes(&issues);

        Assembled { record, issues }
    }
}

fn notes(issues: &[RowIssue]) -> Option<String> {
    if issues.is_empty() {
        return None;
    }
    Some(
        issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Ingest every video under `input_dir` into the table at `output_path`.
///
/// Tracking CSVs are searched under `input_dir` as well. The backend is
/// chosen from the output extension.
pub fn ingest<P, Q>(
    input_dir: P,
    output_path: Q,
    reference_mapping_path: Option<&Path>,
) -> IngestResult<SummaryReport>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let config = IngestConfig::for_input(
        input_dir,
        output_path,
        reference_mapping_path.map(Path::to_path_buf),
    );
    Ingestor::new(config)?.run()
}

/// Counts from a [`refresh_maze`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MazeRefresh {
    pub rows: usize,
    pub changed: usize,
    pub unresolved: usize,
}

/// Recompute `maze` and `center` for every row of an existing table.
///
/// Everything else in the table is left as it is.
pub fn refresh_maze(config: &IngestConfig) -> IngestResult<MazeRefresh> {
    let mut sink = open_sink(config.sink_kind(), &config.output)?;
    refresh_maze_with_sink(config, sink.as_mut())
}

pub fn refresh_maze_with_sink(
    config: &IngestConfig,
    sink: &mut dyn TableSink,
) -> IngestResult<MazeRefresh> {
    let Some(reference) = &config.reference else {
        return Err(IngestError::Config("refreshing mazes needs a reference mapping".to_string()));
    };
    let mothers = MotherIndex::load(reference, &config.video_extensions)?;
    let assigner = MazeAssigner::new(Some(mothers), config.center.clone());
    let parser = FilenameParser::new()
        .map_err(|e| IngestError::Config(format!("filename rules: {}", e)))?;

    let mut table = Table::from_records(sink.load()?)?;
    let renumbered: HashSet<i32> = table.renumbered().iter().copied().collect();

    let mut counts = MazeRefresh::default();
    for record in table.rows_mut() {
        counts.rows += 1;
        let parsed = parser.parse_name(&record.video_name);
        let placement = assigner.assign(&record.video_name, &parsed);
        if placement.maze.is_none() {
            counts.unresolved += 1;
        }
        if placement.maze != record.maze || placement.center != record.center {
            record.maze = placement.maze;
            record.center = placement.center;
            counts.changed += 1;
            sink.upsert_row(record)?;
        } else if renumbered.contains(&record.id) {
            sink.upsert_row(record)?;
        }
    }
    sink.flush()?;

    info!(
        table = %config.output.display(),
        rows = counts.rows,
        changed = counts.changed,
        "maze numbers refreshed"
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VideoError;
    use crate::maze::CenterRule;
    use crate::sink::{CsvSink, SinkKind};
    use crate::video::VideoInfo;
    use std::collections::HashMap;
    use std::fs;

    /// Answers from a fixed table instead of running ffprobe.
    #[derive(Default)]
    struct FakeProbe {
        known: HashMap<String, VideoInfo>,
    }

    impl FakeProbe {
        fn with(mut self, file_name: &str, num_frames: u64, frame_rate: f64) -> Self {
            self.known.insert(
                file_name.to_string(),
                VideoInfo {
                    num_frames,
                    frame_rate,
                    width: 640,
                    height: 480,
                },
            );
            self
        }
    }

    impl VideoProbe for FakeProbe {
        fn probe(&self, path: &Path) -> Result<VideoInfo, VideoError> {
            crate::video::check_readable(path)?;
            let name = path.file_name().unwrap().to_string_lossy();
            self.known
                .get(&*name)
                .copied()
                .ok_or(VideoError::NoVideoStream)
        }
    }

    fn write(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn ingestor(config: IngestConfig, probe: FakeProbe) -> Ingestor {
        Ingestor::new(config).unwrap().with_probe(probe)
    }

    const SCENARIO: &str = "Task1_Mod2_20230115_AnimalA_Healthy";

    fn scenario_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(format!("{}.mp4", SCENARIO)), b"video");
        write(&dir.path().join(format!("{}_DLC.csv", SCENARIO)), b"scorer\n");
        dir
    }

    fn scenario_probe() -> FakeProbe {
        FakeProbe::default().with(&format!("{}.mp4", SCENARIO), 900, 30.0)
    }

    // ==========================================================================
    // SINGLE RUN
    // ==========================================================================

    #[test]
    fn test_scenario_row() {
        let dir = scenario_dir();
        let output = dir.path().join("out").join("dlc_table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);

        let summary = ingestor(config, scenario_probe()).run().unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.inserted, 1);
        assert!(summary.is_clean());

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.id, 1);
        assert_eq!(row.video_name, format!("{}.mp4", SCENARIO));
        assert_eq!(row.task.as_deref(), Some("Task1"));
        assert_eq!(row.modulation.as_deref(), Some("Mod2"));
        assert_eq!(row.date.as_deref(), Some("20230115"));
        assert_eq!(row.name.as_deref(), Some("AnimalA"));
        assert_eq!(row.health.as_deref(), Some("Healthy"));
        assert_eq!(row.trial_length(), Some(30.0));
        assert_eq!(
            row.csv_file_path.as_deref().map(PathBuf::from),
            Some(dir.path().join(format!("{}_DLC.csv", SCENARIO)))
        );
    }

    #[test]
    fn test_free_function_entry_point() {
        let dir = scenario_dir();
        let output = dir.path().join("table.csv");
        // No ffprobe needed: the placeholder video is reported, not fatal
        let summary = ingest(dir.path(), &output, None).unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.video_unreadable, 1);
        assert_eq!(summary.csv_not_found, 0);

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows[0].num_frames, None);
        assert_eq!(rows[0].trial_length(), None);
        assert!(rows[0].csv_file_path.is_some());
    }

    #[test]
    fn test_missing_csv_is_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("FoodOnly_7_29_25_S1Y_Celery.mp4"), b"video");
        let output = dir.path().join("table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);
        let probe = FakeProbe::default().with("FoodOnly_7_29_25_S1Y_Celery.mp4", 300, 30.0);

        let summary = ingestor(config, probe).run().unwrap();
        assert_eq!(summary.csv_not_found, 1);
        assert_eq!(summary.rows[0].issues, vec![RowIssue::CsvNotFound]);

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows[0].csv_file_path, None);
        assert_eq!(rows[0].date.as_deref(), Some("2025-07-29"));
    }

    #[test]
    fn test_unparseable_name_still_produces_row() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("random clip.mp4"), b"video");
        let output = dir.path().join("table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);
        let probe = FakeProbe::default().with("random clip.mp4", 10, 5.0);

        let summary = ingestor(config, probe).run().unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.parse_failures, 1);

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task, None);
        assert_eq!(rows[0].trial_length(), Some(2.0));
    }

    #[test]
    fn test_unreadable_video_leaves_fields_empty() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("FoodOnly_7_29_25_S1Y_Celery.mp4"), b"");
        let output = dir.path().join("table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);

        let summary = ingestor(config, FakeProbe::default()).run().unwrap();
        assert_eq!(summary.video_unreadable, 1);
        assert_eq!(
            summary.rows[0].issues[0],
            RowIssue::VideoUnreadable {
                reason: "video file is empty".to_string()
            }
        );

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows[0].num_frames, None);
        assert_eq!(rows[0].video_width, None);
        assert_eq!(rows[0].name.as_deref(), Some("Celery"));
    }

    #[test]
    fn test_ids_follow_path_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.mp4", "a.mp4", "b.avi", "notes.txt"] {
            write(&dir.path().join(name), b"video");
        }
        let output = dir.path().join("table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);

        let summary = ingestor(config, FakeProbe::default()).run().unwrap();
        assert_eq!(summary.total, 3);

        let names: Vec<String> = CsvSink::new(&output)
            .load()
            .unwrap()
            .into_iter()
            .map(|r| format!("{}:{}", r.id, r.video_name))
            .collect();
        assert_eq!(names, vec!["1:a.mp4", "2:b.avi", "3:c.mp4"]);
    }

    #[test]
    fn test_missing_input_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::for_input(dir.path().join("nope"), dir.path().join("t.csv"), None);
        assert!(matches!(
            ingestor(config, FakeProbe::default()).run(),
            Err(IngestError::InputMissing(_))
        ));
    }

    // ==========================================================================
    // RE-RUNS AGAINST AN EXISTING TABLE
    // ==========================================================================

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = scenario_dir();
        write(&dir.path().join("ToyOnly_3_4_25_P_Kale.mp4"), b"video");
        let output = dir.path().join("table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);
        let probe = || scenario_probe().with("ToyOnly_3_4_25_P_Kale.mp4", 600, 30.0);

        ingestor(config.clone(), probe()).run().unwrap();
        let first = fs::read_to_string(&output).unwrap();

        let summary = ingestor(config, probe()).run().unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.updated, 2);
        assert_eq!(summary.table_rows, 2);
        assert_eq!(fs::read_to_string(&output).unwrap(), first);
    }

    #[test]
    fn test_upsert_keeps_ids_when_new_videos_arrive() {
        let dir = scenario_dir();
        let output = dir.path().join("table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);
        ingestor(config.clone(), scenario_probe()).run().unwrap();

        // Sorts before the existing video but must not steal its id
        write(&dir.path().join("AAA_1_1_25_Y_Bean.mp4"), b"video");
        let summary = ingestor(config, scenario_probe()).run().unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 1);

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].video_name, format!("{}.mp4", SCENARIO));
        assert_eq!(rows[1].id, 2);
        assert_eq!(rows[1].video_name, "AAA_1_1_25_Y_Bean.mp4");
    }

    #[test]
    fn test_append_mode_duplicates_rows() {
        let dir = scenario_dir();
        let output = dir.path().join("table.csv");
        let config = IngestConfig {
            mode: WriteMode::Append,
            ..IngestConfig::for_input(dir.path(), &output, None)
        };

        ingestor(config.clone(), scenario_probe()).run().unwrap();
        let summary = ingestor(config, scenario_probe()).run().unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.table_rows, 2);

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].video_name, rows[1].video_name);
        assert_eq!((rows[0].id, rows[1].id), (1, 2));
    }

    #[test]
    fn test_rows_outside_this_run_are_kept() {
        let dir = scenario_dir();
        let output = dir.path().join("table.csv");
        write(
            &output,
            b"id,video_name,task\n5,Old_1_1_24_Y_Rex.mp4,Old\n",
        );
        let config = IngestConfig::for_input(dir.path(), &output, None);

        let summary = ingestor(config, scenario_probe()).run().unwrap();
        assert_eq!(summary.table_rows, 2);

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows[0].id, 5);
        assert_eq!(rows[0].task.as_deref(), Some("Old"));
        assert_eq!(rows[1].id, 6);
    }

    #[test]
    fn test_unreadable_existing_table_is_fatal() {
        let dir = scenario_dir();
        let output = dir.path().join("table.csv");
        write(&output, b"id,video_name\nabc,x.mp4\n");
        let config = IngestConfig::for_input(dir.path(), &output, None);

        let err = ingestor(config, scenario_probe()).run().unwrap_err();
        assert!(matches!(err, IngestError::Persistence(_)));
        // The broken table is left alone
        assert_eq!(fs::read_to_string(&output).unwrap(), "id,video_name\nabc,x.mp4\n");
    }

    #[test]
    fn test_unwritable_output_is_fatal() {
        let dir = scenario_dir();
        let blocker = dir.path().join("blocker");
        write(&blocker, b"not a directory");
        let config = IngestConfig::for_input(dir.path(), blocker.join("table.csv"), None);

        assert!(matches!(
            ingestor(config, scenario_probe()).run(),
            Err(IngestError::Persistence(_))
        ));
    }

    #[test]
    fn test_duplicate_names_in_one_run() {
        let dir = tempfile::tempdir().unwrap();
        let name = "FoodOnly_7_29_25_S1Y_Celery.mp4";
        write(&dir.path().join("WhiteAnimals10X").join(name), b"video");
        write(&dir.path().join("WhiteAnimals2X").join(name), b"video");
        let output = dir.path().join("table.csv");
        let config = IngestConfig::for_input(dir.path(), &output, None);

        let summary = ingestor(config, FakeProbe::default().with(name, 30, 30.0))
            .run()
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.duplicate_names, 1);
        assert_eq!(summary.table_rows, 1);

        // The later path wins
        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows[0].dose_mult, Some(2.0));
        assert_eq!(rows[0].genotype.as_deref(), Some("white"));
    }

    // ==========================================================================
    // BACKENDS AND PARALLELISM
    // ==========================================================================

    #[test]
    fn test_sqlite_backend() {
        let dir = scenario_dir();
        let output = dir.path().join("trials.db");
        let config = IngestConfig::for_input(dir.path(), &output, None);
        assert_eq!(config.sink_kind(), SinkKind::Sqlite);

        ingestor(config.clone(), scenario_probe()).run().unwrap();
        let summary = ingestor(config, scenario_probe()).run().unwrap();
        assert_eq!(summary.updated, 1);

        let db = crate::db::Database::open_at(&output).unwrap();
        let rows = db.get_trials().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].task.as_deref(), Some("Task1"));
        assert_eq!(rows[0].trial_length, Some(30.0));
    }

    #[test]
    fn test_parallel_run_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let mut probe = FakeProbe::default();
        for i in 0..12 {
            let name = format!("FoodOnly_7_{}_25_S1Y_Animal{}.mp4", i + 1, i);
            write(&dir.path().join(&name), b"video");
            probe = probe.with(&name, 100 + i, 10.0);
        }

        let sequential = dir.path().join("seq.csv");
        let config = IngestConfig::for_input(dir.path(), &sequential, None);
        let probe_copy = FakeProbe {
            known: probe.known.clone(),
        };
        ingestor(config, probe_copy).run().unwrap();

        let parallel = dir.path().join("par.csv");
        let config = IngestConfig {
            jobs: Some(4),
            ..IngestConfig::for_input(dir.path(), &parallel, None)
        };
        ingestor(config, probe).run().unwrap();

        assert_eq!(
            fs::read_to_string(&sequential).unwrap(),
            fs::read_to_string(&parallel).unwrap()
        );
    }

    // ==========================================================================
    // MAZE ASSIGNMENT
    // ==========================================================================

    fn maze_fixture() -> (tempfile::TempDir, IngestConfig) {
        let dir = tempfile::tempdir().unwrap();
        let videos = dir.path().join("split");
        let raw = dir.path().join("raw");
        write(&videos.join("FoodOnly_7_30_25_S1P_Kale_top_left.mp4"), b"video");
        write(&videos.join("FoodOnly_7_30_25_S1P_Zed.mp4"), b"video");
        write(&raw.join("FoodOnly_7_30_25_S1P_Carrot_Cauliflower_Kale_None.mp4"), b"video");

        let config = IngestConfig {
            center: CenterRule::Quadrant,
            ..IngestConfig::for_input(&videos, dir.path().join("table.csv"), Some(raw))
        };
        (dir, config)
    }

    #[test]
    fn test_maze_and_center_from_reference() {
        let (_dir, config) = maze_fixture();
        let output = config.output.clone();

        let summary = ingestor(config, FakeProbe::default()).run().unwrap();
        assert_eq!(summary.maze_unresolved, 1);

        let rows = CsvSink::new(&output).load().unwrap();
        let kale = rows.iter().find(|r| r.name.as_deref() == Some("Kale")).unwrap();
        assert_eq!(kale.maze, Some(3));
        assert_eq!(kale.center.as_deref(), Some("top_left"));
        let zed = rows.iter().find(|r| r.name.as_deref() == Some("Zed")).unwrap();
        assert_eq!(zed.maze, None);
    }

    #[test]
    fn test_missing_reference_is_fatal() {
        let (dir, mut config) = maze_fixture();
        config.reference = Some(dir.path().join("nowhere"));
        assert!(matches!(
            ingestor(config, FakeProbe::default()).run(),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn test_refresh_maze_updates_only_placement() {
        let (dir, config) = maze_fixture();
        let output = config.output.clone();
        let without_reference = IngestConfig {
            reference: None,
            ..config.clone()
        };
        ingestor(without_reference, FakeProbe::default()).run().unwrap();
        let before = CsvSink::new(&output).load().unwrap();
        assert!(before.iter().all(|r| r.maze.is_none()));

        let counts = refresh_maze(&config).unwrap();
        assert_eq!(
            counts,
            MazeRefresh {
                rows: 2,
                changed: 1,
                unresolved: 1
            }
        );

        let after = CsvSink::new(&output).load().unwrap();
        assert_eq!(after.len(), 2);
        let kale = after.iter().find(|r| r.name.as_deref() == Some("Kale")).unwrap();
        assert_eq!(kale.maze, Some(3));
        assert_eq!(kale.id, before.iter().find(|r| r.video_name == kale.video_name).unwrap().id);
        drop(dir);
    }

    #[test]
    fn test_refresh_maze_needs_reference() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::for_input(dir.path(), dir.path().join("t.csv"), None);
        assert!(matches!(refresh_maze(&config), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_refresh_maze_on_pandas_written_table() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("mothers.csv");
        write(
            &reference,
            b"video_name\nFoodOnly_7_30_25_S1P_Carrot_Cauliflower_Kale_None.mp4\n",
        );
        let output = dir.path().join("dlc_table.csv");
        write(
            &output,
            b"id,video_name,num_frames,frame_rate,trial_length,video_width,video_height,\
genotype,task,date,name,health,modulation,maze,center,dose_mult,csv_file_path
1.0,FoodOnly_7_30_25_S1P_Kale.mp4,1800.0,30.0,60.0,640.0,480.0,white,FoodOnly,2025-07-30,Kale,ghrelin,,1.0,,,
2.0,FoodOnly_7_30_25_S1P_Beet.mp4,,,,,,white,FoodOnly,2025-07-30,Beet,ghrelin,,,,,
",
        );

        let config = IngestConfig {
            output: output.clone(),
            reference: Some(reference),
            ..Default::default()
        };
        let counts = refresh_maze(&config).unwrap();
        assert_eq!(counts.rows, 2);
        assert_eq!(counts.changed, 1);
        assert_eq!(counts.unresolved, 1);

        let rows = CsvSink::new(&output).load().unwrap();
        assert_eq!(rows[0].maze, Some(3));
        assert_eq!(rows[0].num_frames, Some(1800));
        assert_eq!(rows[1].id, 2);
        assert_eq!(rows[1].maze, None);
    }

    #[test]
    fn test_exhausted_ids_fail_the_run() {
        let dir = scenario_dir();
        let output = dir.path().join("table.csv");
        write(&output, format!("id,video_name\n{},other.mp4\n", i32::MAX).as_bytes());

        let config = IngestConfig::for_input(dir.path(), &output, None);
        let result = ingestor(config, scenario_probe()).run();
        assert!(matches!(result, Err(IngestError::IdsExhausted(i32::MAX))));
        // The table on disk is untouched
        assert_eq!(CsvSink::new(&output).load().unwrap().len(), 1);
    }
}
