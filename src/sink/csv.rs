//! Flat-file table
//!
//! Rows are kept in memory by id and the whole file is rewritten on flush:
//! serialized into a temporary file next to the target, then renamed over
//! it. Readers see either the old table or the new one.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::TableSink;
use crate::error::SinkError;
use crate::record::{TrialRecord, TrialRow, COLUMNS};

#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    rows: BTreeMap<i32, TrialRow>,
}

impl CsvSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            rows: BTreeMap::new(),
        }
    }

    fn csv_error(&self, source: csv::Error) -> SinkError {
        SinkError::Csv {
            path: self.path.clone(),
            source,
        }
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn stage(&mut self, record: &TrialRecord) {
        self.rows.insert(record.id, TrialRow::from(record));
    }
}

impl TableSink for CsvSink {
    fn location(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) -> Result<Vec<TrialRecord>, SinkError> {
        self.rows.clear();
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no existing table, starting empty");
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut reader = csv::Reader::from_reader(file);

        let mut records = Vec::new();
        for row in reader.deserialize::<TrialRow>() {
            let record = TrialRecord::from(row.map_err(|e| self.csv_error(e))?);
            // Rows with unusable ids are renumbered by the table and staged
            // again by the caller
            if record.id > 0 && !self.rows.contains_key(&record.id) {
                self.rows.insert(record.id, TrialRow::from(&record));
            } else {
                warn!(id = record.id, video = %record.video_name, "row with unusable id in existing table");
            }
            records.push(record);
        }

        debug!(path = %self.path.display(), rows = records.len(), "loaded existing table");
        Ok(records)
    }

    fn write_row(&mut self, record: &TrialRecord) -> Result<(), SinkError> {
        self.stage(record);
        Ok(())
    }

    fn upsert_row(&mut self, record: &TrialRecord) -> Result<(), SinkError> {
        self.stage(record);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| self.io_error(e))?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| self.io_error(e))?;
        {
            // Header is written explicitly so an empty table still has one
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer.write_record(COLUMNS).map_err(|e| self.csv_error(e))?;
            for row in self.rows.values() {
                writer.serialize(row).map_err(|e| self.csv_error(e))?;
            }
            writer.flush().map_err(|e| self.io_error(e))?;
        }

        tmp.persist(&self.path).map_err(|e| SinkError::Persist {
            path: self.path.clone(),
            reason: e.error.to_string(),
        })?;

        debug!(path = %self.path.display(), rows = self.rows.len(), "table written");
        Ok(())
    }
}
