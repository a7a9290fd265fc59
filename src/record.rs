//! Trial records and the in-memory table
//!
//! A [`TrialRecord`] is one row of the output: one video, one trial.
//! `video_name` is the natural key; `id` is assigned by the [`Table`] and
//! stays stable across re-runs in upsert mode.
//!
//! `trial_length` is never stored on the record. It is derived from
//! `num_frames / frame_rate` whenever a row is written, and ignored when a
//! row is read back.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::error::{IngestError, IngestResult};
use crate::video::{self, VideoInfo};

/// Column order of the persisted table.
pub const COLUMNS: &[&str] = &[
    "id",
    "video_name",
    "task",
    "modulation",
    "date",
    "name",
    "health",
    "genotype",
    "dose_mult",
    "maze",
    "center",
    "num_frames",
    "frame_rate",
    "trial_length",
    "video_width",
    "video_height",
    "csv_file_path",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrialRecord {
    pub id: i32,
    pub video_name: String,
    pub task: Option<String>,
    pub modulation: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub health: Option<String>,
    pub genotype: Option<String>,
    pub dose_mult: Option<f64>,
    pub maze: Option<u8>,
    pub center: Option<String>,
    pub num_frames: Option<u64>,
    pub frame_rate: Option<f64>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub csv_file_path: Option<String>,
    /// Row-level issues from the run that produced this row
    pub notes: Option<String>,
}

impl TrialRecord {
    pub fn new(video_name: impl Into<String>) -> Self {
        Self {
            video_name: video_name.into(),
            ..Default::default()
        }
    }

    pub fn trial_length(&self) -> Option<f64> {
        video::trial_length(self.num_frames, self.frame_rate)
    }

    pub fn set_video(&mut self, info: &VideoInfo) {
        self.num_frames = Some(info.num_frames);
        self.frame_rate = Some(info.frame_rate);
        self.video_width = Some(info.width);
        self.video_height = Some(info.height);
    }

    pub fn has_video_metadata(&self) -> bool {
        self.num_frames.is_some() && self.frame_rate.is_some()
    }
}

/// Flat-file shape of a record, in [`COLUMNS`] order.
///
/// Missing columns in an older table read as empty. Integer columns also
/// accept whole floats (`3.0`), which is how pandas writes an integer column
/// holding blanks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialRow {
    #[serde(deserialize_with = "whole_id")]
    pub id: i32,
    pub video_name: String,
    pub task: Option<String>,
    pub modulation: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub health: Option<String>,
    pub genotype: Option<String>,
    pub dose_mult: Option<f64>,
    #[serde(deserialize_with = "whole_number")]
    pub maze: Option<u8>,
    pub center: Option<String>,
    #[serde(deserialize_with = "whole_number")]
    pub num_frames: Option<u64>,
    pub frame_rate: Option<f64>,
    pub trial_length: Option<f64>,
    #[serde(deserialize_with = "whole_number")]
    pub video_width: Option<u32>,
    #[serde(deserialize_with = "whole_number")]
    pub video_height: Option<u32>,
    pub csv_file_path: Option<String>,
}

/// An empty id reads as 0 and is renumbered by the table.
fn whole_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    Ok(whole_number(deserializer)?.unwrap_or(0))
}

fn whole_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + TryFrom<i64>,
{
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(value) = text.parse::<T>() {
        return Ok(Some(value));
    }

    let float: f64 = text
        .parse()
        .map_err(|_| de::Error::custom(format!("`{}` is not a whole number", text)))?;
    if !float.is_finite() || float.fract() != 0.0 || float.abs() > i64::MAX as f64 {
        return Err(de::Error::custom(format!("`{}` is not a whole number", text)));
    }
    T::try_from(float as i64)
        .map(Some)
        .map_err(|_| de::Error::custom(format!("`{}` is out of range", text)))
}

impl From<&TrialRecord> for TrialRow {
    fn from(r: &TrialRecord) -> Self {
        Self {
            id: r.id,
            video_name: r.video_name.clone(),
            task: r.task.clone(),
            modulation: r.modulation.clone(),
            date: r.date.clone(),
            name: r.name.clone(),
            health: r.health.clone(),
            genotype: r.genotype.clone(),
            dose_mult: r.dose_mult,
            maze: r.maze,
            center: r.center.clone(),
            num_frames: r.num_frames,
            frame_rate: r.frame_rate,
            trial_length: r.trial_length(),
            video_width: r.video_width,
            video_height: r.video_height,
            csv_file_path: r.csv_file_path.clone(),
        }
    }
}

impl From<TrialRow> for TrialRecord {
    fn from(r: TrialRow) -> Self {
        Self {
            id: r.id,
            video_name: r.video_name,
            task: r.task,
            modulation: r.modulation,
            date: r.date,
            name: r.name,
            health: r.health,
            genotype: r.genotype,
            dose_mult: r.dose_mult,
            maze: r.maze,
            center: r.center,
            num_frames: r.num_frames,
            frame_rate: r.frame_rate,
            video_width: r.video_width,
            video_height: r.video_height,
            csv_file_path: r.csv_file_path,
            notes: None,
        }
    }
}

// ============================================================================
// Table
// ============================================================================

/// What [`Table::upsert`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(i32),
    Updated(i32),
}

impl Upsert {
    pub fn id(self) -> i32 {
        match self {
            Upsert::Inserted(id) | Upsert::Updated(id) => id,
        }
    }
}

/// Records ordered by id, indexed by `video_name`.
#[derive(Debug, Clone, Default)]
pub struct Table {
    rows: BTreeMap<i32, TrialRecord>,
    by_name: HashMap<String, i32>,
    renumbered: Vec<i32>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records.
    ///
    /// Rows without a usable id (zero, negative or repeated) get fresh ids
    /// after the existing ones. When an append-mode table holds the same
    /// `video_name` more than once, the highest id is the one later upserts
    /// update.
    pub fn from_records(records: Vec<TrialRecord>) -> IngestResult<Self> {
        let mut table = Self::new();
        let mut orphans = Vec::new();

        for record in records {
            if record.id <= 0 || table.rows.contains_key(&record.id) {
                orphans.push(record);
            } else {
                table.index(record);
            }
        }
        for mut record in orphans {
            record.id = table.next_id()?;
            table.renumbered.push(record.id);
            table.index(record);
        }
        Ok(table)
    }

    /// Ids handed out by [`Table::from_records`] to rows whose stored id was
    /// unusable. These rows must be written back under their new id.
    pub fn renumbered(&self) -> &[i32] {
        &self.renumbered
    }

    fn index(&mut self, record: TrialRecord) {
        let id = record.id;
        let newer = self
            .by_name
            .get(&record.video_name)
            .map_or(true, |existing| *existing < id);
        if newer {
            self.by_name.insert(record.video_name.clone(), id);
        }
        self.rows.insert(id, record);
    }

    /// Next unused id. Fails once the highest id is `i32::MAX`.
    pub fn next_id(&self) -> IngestResult<i32> {
        match self.rows.keys().next_back() {
            None => Ok(1),
            Some(&max) => max.checked_add(1).ok_or(IngestError::IdsExhausted(max)),
        }
    }

    /// Replace the row with the same `video_name`, keeping its id, or insert
    /// with the next id.
    pub fn upsert(&mut self, mut record: TrialRecord) -> IngestResult<Upsert> {
        match self.by_name.get(&record.video_name).copied() {
            Some(id) => {
                record.id = id;
                self.rows.insert(id, record);
                Ok(Upsert::Updated(id))
            }
            None => {
                let id = self.next_id()?;
                record.id = id;
                self.index(record);
                Ok(Upsert::Inserted(id))
            }
        }
    }

    /// Insert as a new row regardless of `video_name`.
    pub fn append(&mut self, mut record: TrialRecord) -> IngestResult<i32> {
        let id = self.next_id()?;
        record.id = id;
        self.index(record);
        Ok(id)
    }

    pub fn get(&self, id: i32) -> Option<&TrialRecord> {
        self.rows.get(&id)
    }

    pub fn by_name(&self, video_name: &str) -> Option<&TrialRecord> {
        self.by_name.get(video_name).and_then(|id| self.rows.get(id))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in id order.
    pub fn rows(&self) -> impl Iterator<Item = &TrialRecord> {
        self.rows.values()
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut TrialRecord> {
        self.rows.values_mut()
    }
}
