//! SQLite table with Diesel ORM
//!
//! Relational backend for the trial table. Rows are staged in memory and
//! applied in a single transaction on flush, so a failed run leaves the
//! previous table untouched.

use crate::error::SinkError;
use crate::record::TrialRecord;
use crate::schema::trials;
use crate::sink::TableSink;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable trial row
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = trials)]
pub struct NewTrial {
    pub id: i32,
    pub video_name: String,
    pub task: Option<String>,
    pub modulation: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub health: Option<String>,
    pub genotype: Option<String>,
    pub dose_mult: Option<f64>,
    pub maze: Option<i32>,
    pub center: Option<String>,
    pub num_frames: Option<i64>,
    pub frame_rate: Option<f64>,
    pub trial_length: Option<f64>,
    pub video_width: Option<i32>,
    pub video_height: Option<i32>,
    pub csv_file_path: Option<String>,
    pub notes: Option<String>,
    pub ingested_at: String,
}

impl NewTrial {
    fn from_record(r: &TrialRecord, ingested_at: &str) -> Self {
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
            maze: r.maze.map(i32::from),
            center: r.center.clone(),
            num_frames: r.num_frames.and_then(|n| i64::try_from(n).ok()),
            frame_rate: r.frame_rate,
            trial_length: r.trial_length(),
            video_width: r.video_width.and_then(|w| i32::try_from(w).ok()),
            video_height: r.video_height.and_then(|h| i32::try_from(h).ok()),
            csv_file_path: r.csv_file_path.clone(),
            notes: r.notes.clone(),
            ingested_at: ingested_at.to_string(),
        }
    }
}

/// Queryable trial row (database record)
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = trials)]
pub struct StoredTrial {
    pub id: i32,
    pub video_name: String,
    pub task: Option<String>,
    pub modulation: Option<String>,
    pub date: Option<String>,
    pub name: Option<String>,
    pub health: Option<String>,
    pub genotype: Option<String>,
    pub dose_mult: Option<f64>,
    pub maze: Option<i32>,
    pub center: Option<String>,
    pub num_frames: Option<i64>,
    pub frame_rate: Option<f64>,
    pub trial_length: Option<f64>,
    pub video_width: Option<i32>,
    pub video_height: Option<i32>,
    pub csv_file_path: Option<String>,
    pub notes: Option<String>,
    pub ingested_at: String,
}

impl From<StoredTrial> for TrialRecord {
    // trial_length is dropped and recomputed from the stored frame fields
    fn from(s: StoredTrial) -> Self {
        Self {
            id: s.id,
            video_name: s.video_name,
            task: s.task,
            modulation: s.modulation,
            date: s.date,
            name: s.name,
            health: s.health,
            genotype: s.genotype,
            dose_mult: s.dose_mult,
            maze: s.maze.and_then(|m| u8::try_from(m).ok()),
            center: s.center,
            num_frames: s.num_frames.and_then(|n| u64::try_from(n).ok()),
            frame_rate: s.frame_rate,
            video_width: s.video_width.and_then(|w| u32::try_from(w).ok()),
            video_height: s.video_height.and_then(|h| u32::try_from(h).ok()),
            csv_file_path: s.csv_file_path,
            notes: s.notes,
        }
    }
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Error type for database operations
#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// A write waiting for the next flush.
#[derive(Debug, Clone)]
enum Staged {
    Insert(NewTrial),
    Replace(NewTrial),
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
    path: PathBuf,
    staged: Vec<Staged>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("staged", &self.staged.len())
            .finish()
    }
}

impl Database {
    /// Open database at specified path, creating the table if needed
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let path_str = path.to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(&path_str);
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self {
            pool,
            path,
            staged: Vec::new(),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn get_conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS trials (
                id INTEGER PRIMARY KEY NOT NULL,
                video_name TEXT NOT NULL,
                task TEXT,
                modulation TEXT,
                date TEXT,
                name TEXT,
                health TEXT,
                genotype TEXT,
                dose_mult REAL,
                maze INTEGER,
                center TEXT,
                num_frames INTEGER,
                frame_rate REAL,
                trial_length REAL,
                video_width INTEGER,
                video_height INTEGER,
                csv_file_path TEXT,
                notes TEXT,
                ingested_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_trials_video_name ON trials(video_name)")
            .execute(&mut conn)?;

        Ok(())
    }

    /// All rows, ordered by id
    pub fn get_trials(&self) -> Result<Vec<StoredTrial>> {
        let mut conn = self.get_conn()?;
        let rows = trials::table
            .order(trials::id.asc())
            .select(StoredTrial::as_select())
            .load(&mut conn)?;
        Ok(rows)
    }

    /// Most recent row for a video name
    pub fn get_by_name(&self, video_name: &str) -> Result<Option<StoredTrial>> {
        let mut conn = self.get_conn()?;
        let row = trials::table
            .filter(trials::video_name.eq(video_name))
            .order(trials::id.desc())
            .select(StoredTrial::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(row)
    }

    /// Number of rows
    pub fn count(&self) -> Result<i64> {
        let mut conn = self.get_conn()?;
        let total = trials::table.count().get_result(&mut conn)?;
        Ok(total)
    }

    /// Apply staged writes in one transaction
    fn apply_staged(&mut self) -> Result<usize> {
        let mut conn = self.get_conn()?;
        let staged = std::mem::take(&mut self.staged);

        let applied = conn.transaction::<_, DbError, _>(|conn| {
            for op in &staged {
                match op {
                    Staged::Insert(row) => {
                        diesel::insert_into(trials::table).values(row).execute(conn)?;
                    }
                    Staged::Replace(row) => {
                        diesel::replace_into(trials::table).values(row).execute(conn)?;
                    }
                }
            }
            Ok(staged.len())
        });

        if applied.is_err() {
            // Keep the writes so a retry sees the same state
            self.staged = staged;
        }
        applied
    }
}

impl TableSink for Database {
    fn location(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) -> std::result::Result<Vec<TrialRecord>, SinkError> {
        let rows = self.get_trials()?;
        debug!(path = %self.path.display(), rows = rows.len(), "loaded existing table");
        Ok(rows.into_iter().map(TrialRecord::from).collect())
    }

    fn write_row(&mut self, record: &TrialRecord) -> std::result::Result<(), SinkError> {
        let now = chrono::Local::now().to_rfc3339();
        self.staged
            .push(Staged::Insert(NewTrial::from_record(record, &now)));
        Ok(())
    }

    fn upsert_row(&mut self, record: &TrialRecord) -> std::result::Result<(), SinkError> {
        let now = chrono::Local::now().to_rfc3339();
        self.staged
            .push(Staged::Replace(NewTrial::from_record(record, &now)));
        Ok(())
    }

    fn flush(&mut self) -> std::result::Result<(), SinkError> {
        let applied = self.apply_staged()?;
        debug!(path = %self.path.display(), rows = applied, "table written");
        Ok(())
    }
}
