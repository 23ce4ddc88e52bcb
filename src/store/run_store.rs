//! RunStore: SQLite tables for data, training, and generation runs.
//!
//! Each call locks the connection, runs one short statement or transaction,
//! and releases it. No transaction is held across a worker's execution.

use log::debug;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::domain::{DataRun, GenerationRun, RunStatus, TrainRun};
use crate::error::{Result, WavediffError};
use crate::id::now_ms;

const DATA_COLUMNS: &str = "id, created_at, params, artifact_path, row_count, status, log";
const TRAIN_COLUMNS: &str = "id, created_at, params, epoch_count, status, log_path, checkpoint_dir";
const GENERATION_COLUMNS: &str = "id, created_at, train_run_id, artifact_path, artifact_name, status";

/// Durable storage for the three run kinds.
///
/// rusqlite::Connection isn't Sync, so it sits behind a Mutex; SQLite calls
/// are short and need exclusive access anyway.
pub struct RunStore {
    db: Mutex<Connection>,
}

impl std::fmt::Debug for RunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStore").finish_non_exhaustive()
    }
}

impl RunStore {
    /// Open or create the database file, creating its parent directory.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        Self::init(db)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Initialize the SQLite schema.
    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS data_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                params TEXT NOT NULL,
                artifact_path TEXT NOT NULL,
                row_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                log TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS train_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                params TEXT NOT NULL,
                epoch_count INTEGER NOT NULL,
                status TEXT NOT NULL,
                log_path TEXT NOT NULL DEFAULT '',
                checkpoint_dir TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS generation_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                train_run_id INTEGER NOT NULL REFERENCES train_runs(id) ON DELETE CASCADE,
                artifact_path TEXT NOT NULL,
                artifact_name TEXT NOT NULL,
                status TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_train_runs_status ON train_runs(status);
            CREATE INDEX IF NOT EXISTS idx_generation_runs_train ON generation_runs(train_run_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| WavediffError::Storage(e.to_string()))
    }

    //=== Data runs ===

    /// Insert a data run in `running` state.
    pub fn insert_data_run(&self, params: &serde_json::Value, artifact_path: &Path) -> Result<DataRun> {
        let db = self.conn()?;
        let created_at = now_ms();
        db.execute(
            "INSERT INTO data_runs (created_at, params, artifact_path, row_count, status, log)
             VALUES (?1, ?2, ?3, 0, ?4, '')",
            params![
                created_at,
                serde_json::to_string(params)?,
                path_text(artifact_path),
                RunStatus::Running,
            ],
        )?;
        let id = db.last_insert_rowid();
        debug!("Inserted data run {}", id);
        Ok(DataRun {
            id,
            created_at,
            params: params.clone(),
            artifact_path: artifact_path.to_path_buf(),
            row_count: 0,
            status: RunStatus::Running,
            log: String::new(),
        })
    }

    /// Record the outcome of a still-running data run.
    ///
    /// Returns false if the row is gone or already terminal.
    pub fn complete_data_run(
        &self,
        id: i64,
        status: RunStatus,
        row_count: u64,
        artifact_path: &Path,
        log: &str,
    ) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE data_runs SET status = ?2, row_count = ?3, artifact_path = ?4, log = ?5
             WHERE id = ?1 AND status = 'running'",
            params![id, status, row_count as i64, path_text(artifact_path), log],
        )?;
        Ok(changed > 0)
    }

    pub fn get_data_run(&self, id: i64) -> Result<Option<DataRun>> {
        let db = self.conn()?;
        let sql = format!("SELECT {} FROM data_runs WHERE id = ?1", DATA_COLUMNS);
        Ok(db.query_row(&sql, [id], data_run_from_row).optional()?)
    }

    /// All data runs, newest first.
    pub fn list_data_runs(&self) -> Result<Vec<DataRun>> {
        let db = self.conn()?;
        let sql = format!("SELECT {} FROM data_runs ORDER BY created_at DESC, id DESC", DATA_COLUMNS);
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], data_run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Data runs in the given status.
    pub fn list_data_runs_by_status(&self, status: RunStatus) -> Result<Vec<DataRun>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM data_runs WHERE status = ?1 ORDER BY created_at DESC, id DESC",
            DATA_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([status], data_run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    //=== Training runs ===

    /// Create a `pending` training run and assign its derived paths.
    ///
    /// Paths depend on the id, so the row is inserted first and updated with
    /// `paths(id)` inside the same transaction.
    pub fn create_train_run<F>(&self, params: &serde_json::Value, epoch_count: u32, paths: F) -> Result<TrainRun>
    where
        F: FnOnce(i64) -> (PathBuf, PathBuf),
    {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let created_at = now_ms();
        tx.execute(
            "INSERT INTO train_runs (created_at, params, epoch_count, status, log_path, checkpoint_dir)
             VALUES (?1, ?2, ?3, ?4, '', '')",
            params![created_at, serde_json::to_string(params)?, epoch_count, RunStatus::Pending],
        )?;
        let id = tx.last_insert_rowid();
        let (log_path, checkpoint_dir) = paths(id);
        tx.execute(
            "UPDATE train_runs SET log_path = ?2, checkpoint_dir = ?3 WHERE id = ?1",
            params![id, path_text(&log_path), path_text(&checkpoint_dir)],
        )?;
        tx.commit()?;
        debug!("Inserted train run {}", id);

        Ok(TrainRun {
            id,
            created_at,
            params: params.clone(),
            epoch_count,
            status: RunStatus::Pending,
            log_path,
            checkpoint_dir,
        })
    }

    /// Move a training run out of `pending`/`running`.
    ///
    /// A terminal status is never overwritten. Returns false if the row is gone
    /// or already terminal.
    pub fn set_train_status(&self, id: i64, status: RunStatus) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE train_runs SET status = ?2 WHERE id = ?1 AND status IN ('pending', 'running')",
            params![id, status],
        )?;
        Ok(changed > 0)
    }

    pub fn get_train_run(&self, id: i64) -> Result<Option<TrainRun>> {
        let db = self.conn()?;
        let sql = format!("SELECT {} FROM train_runs WHERE id = ?1", TRAIN_COLUMNS);
        Ok(db.query_row(&sql, [id], train_run_from_row).optional()?)
    }

    /// All training runs, newest first.
    pub fn list_train_runs(&self) -> Result<Vec<TrainRun>> {
        let db = self.conn()?;
        let sql = format!("SELECT {} FROM train_runs ORDER BY created_at DESC, id DESC", TRAIN_COLUMNS);
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], train_run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Training runs whose persisted status is not terminal.
    pub fn list_unfinished_train_runs(&self) -> Result<Vec<TrainRun>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM train_runs WHERE status IN ('pending', 'running') ORDER BY created_at, id",
            TRAIN_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], train_run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a training run and every generation run that references it.
    ///
    /// Returns the number of generation runs removed, or None if the training
    /// run did not exist.
    pub fn delete_train_run(&self, id: i64) -> Result<Option<usize>> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let generations = tx.execute("DELETE FROM generation_runs WHERE train_run_id = ?1", [id])?;
        let deleted = tx.execute("DELETE FROM train_runs WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok((deleted > 0).then_some(generations))
    }

    //=== Generation runs ===

    pub fn insert_generation_run(
        &self,
        train_run_id: i64,
        artifact_path: &Path,
        artifact_name: &str,
        status: RunStatus,
    ) -> Result<GenerationRun> {
        let db = self.conn()?;
        let created_at = now_ms();
        db.execute(
            "INSERT INTO generation_runs (created_at, train_run_id, artifact_path, artifact_name, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![created_at, train_run_id, path_text(artifact_path), artifact_name, status],
        )?;
        let id = db.last_insert_rowid();
        debug!("Inserted generation run {} for train run {}", id, train_run_id);
        Ok(GenerationRun {
            id,
            created_at,
            train_run_id,
            artifact_path: artifact_path.to_path_buf(),
            artifact_name: artifact_name.to_string(),
            status,
        })
    }

    /// All generation runs, newest first.
    pub fn list_generation_runs(&self) -> Result<Vec<GenerationRun>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM generation_runs ORDER BY created_at DESC, id DESC",
            GENERATION_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], generation_run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Generation runs produced from one training run, newest first.
    pub fn list_generation_runs_for(&self, train_run_id: i64) -> Result<Vec<GenerationRun>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM generation_runs WHERE train_run_id = ?1 ORDER BY created_at DESC, id DESC",
            GENERATION_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([train_run_id], generation_run_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn data_run_from_row(row: &Row<'_>) -> rusqlite::Result<DataRun> {
    let row_count: i64 = row.get(4)?;
    Ok(DataRun {
        id: row.get(0)?,
        created_at: row.get(1)?,
        params: json_column(row, 2)?,
        artifact_path: PathBuf::from(row.get::<_, String>(3)?),
        row_count: row_count.max(0) as u64,
        status: row.get(5)?,
        log: row.get(6)?,
    })
}

fn train_run_from_row(row: &Row<'_>) -> rusqlite::Result<TrainRun> {
    Ok(TrainRun {
        id: row.get(0)?,
        created_at: row.get(1)?,
        params: json_column(row, 2)?,
        epoch_count: row.get(3)?,
        status: row.get(4)?,
        log_path: PathBuf::from(row.get::<_, String>(5)?),
        checkpoint_dir: PathBuf::from(row.get::<_, String>(6)?),
    })
}

fn generation_run_from_row(row: &Row<'_>) -> rusqlite::Result<GenerationRun> {
    Ok(GenerationRun {
        id: row.get(0)?,
        created_at: row.get(1)?,
        train_run_id: row.get(2)?,
        artifact_path: PathBuf::from(row.get::<_, String>(3)?),
        artifact_name: row.get(4)?,
        status: row.get(5)?,
    })
}
