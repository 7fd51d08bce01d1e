//! SqliteDetectionStore - local detection history
//!
//! One connection behind a mutex; callers run on the blocking pool.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use contracts::{
    unix_timestamp, BoundingBox, ContractError, DetectionRecord, DetectionStore,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{RecorderError, Result};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=NORMAL;

    CREATE TABLE IF NOT EXISTS detections (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      device_id TEXT NOT NULL,
      timestamp REAL NOT NULL,
      class_id INTEGER NOT NULL,
      class_name TEXT NOT NULL,
      confidence REAL NOT NULL,
      bbox_x1 REAL NOT NULL,
      bbox_y1 REAL NOT NULL,
      bbox_x2 REAL NOT NULL,
      bbox_y2 REAL NOT NULL,
      image_path TEXT,
      synced INTEGER NOT NULL DEFAULT 0,
      created_at REAL NOT NULL
    );

    CREATE TABLE IF NOT EXISTS device_state (
      key TEXT PRIMARY KEY,
      value TEXT NOT NULL,
      updated_at REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_detections_timestamp ON detections(timestamp);
    CREATE INDEX IF NOT EXISTS idx_detections_synced ON detections(synced);
    CREATE INDEX IF NOT EXISTS idx_detections_class ON detections(class_name);
"#;

const SELECT_COLUMNS: &str = "id, device_id, timestamp, class_id, class_name, confidence, \
     bbox_x1, bbox_y1, bbox_x2, bbox_y2, image_path, synced, created_at";

pub struct SqliteDetectionStore {
    conn: Mutex<Connection>,
}

impl SqliteDetectionStore {
    /// Open (or create) the database file, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "Detection store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RecorderError::LockPoisoned)
    }

    pub fn insert_record(&self, record: &DetectionRecord) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO detections
              (device_id, timestamp, class_id, class_name, confidence,
               bbox_x1, bbox_y1, bbox_x2, bbox_y2, image_path, synced, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                record.device_id,
                record.timestamp,
                record.class_id,
                record.class_name,
                record.confidence as f64,
                record.bbox.x1 as f64,
                record.bbox.y1 as f64,
                record.bbox.x2 as f64,
                record.bbox.y2 as f64,
                record.image_path,
                record.synced,
                record.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Oldest first
    pub fn unsynced(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM detections WHERE synced = 0 \
             ORDER BY timestamp ASC, id ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let conn = self.conn()?;
        let updated = conn.execute(
            &format!("UPDATE detections SET synced = 1 WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter()),
        )?;
        debug!(requested = ids.len(), updated, "Marked detections synced");
        Ok(updated)
    }

    pub fn unsynced_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM detections WHERE synced = 0", [], |row| {
                row.get(0)
            })?;
        Ok(count as u64)
    }

    pub fn total_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT value FROM device_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn put_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO device_state (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![key, value, unix_timestamp()],
        )?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DetectionRecord> {
    let bbox = BoundingBox::new(
        row.get::<_, f64>(6)? as f32,
        row.get::<_, f64>(7)? as f32,
        row.get::<_, f64>(8)? as f32,
        row.get::<_, f64>(9)? as f32,
    );
    Ok(DetectionRecord {
        id: Some(row.get(0)?),
        device_id: row.get(1)?,
        timestamp: row.get(2)?,
        class_id: row.get(3)?,
        class_name: row.get(4)?,
        confidence: row.get::<_, f64>(5)? as f32,
        bbox,
        image_path: row.get(10)?,
        synced: row.get(11)?,
        created_at: row.get(12)?,
    })
}

impl DetectionStore for SqliteDetectionStore {
    fn insert(&self, record: &DetectionRecord) -> std::result::Result<i64, ContractError> {
        self.insert_record(record).map_err(|e| e.into_storage("insert"))
    }

    fn query_unsynced(
        &self,
        limit: usize,
    ) -> std::result::Result<Vec<DetectionRecord>, ContractError> {
        self.unsynced(limit).map_err(|e| e.into_storage("query_unsynced"))
    }

    fn mark_synced(&self, ids: &[i64]) -> std::result::Result<usize, ContractError> {
        self.set_synced(ids).map_err(|e| e.into_storage("mark_synced"))
    }

    fn get_state(&self, key: &str) -> std::result::Result<Option<String>, ContractError> {
        self.state(key).map_err(|e| e.into_storage("get_state"))
    }

    fn set_state(&self, key: &str, value: &str) -> std::result::Result<(), ContractError> {
        self.put_state(key, value).map_err(|e| e.into_storage("set_state"))
    }

    fn count(&self) -> std::result::Result<u64, ContractError> {
        self.total_count().map_err(|e| e.into_storage("count"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(class_name: &str, timestamp: f64) -> DetectionRecord {
        DetectionRecord {
            id: None,
            device_id: "edge-1".to_string(),
            timestamp,
            class_id: 3,
            class_name: class_name.to_string(),
            confidence: 0.75,
            bbox: BoundingBox::new(1.0, 2.0, 30.0, 40.0),
            image_path: None,
            synced: false,
            created_at: timestamp,
        }
    }

    #[test]
    fn test_insert_and_query_oldest_first() {
        let store = SqliteDetectionStore::open_in_memory().unwrap();
        let late = store.insert_record(&record("dog", 20.0)).unwrap();
        let early = store.insert_record(&record("cat", 10.0)).unwrap();
        assert_ne!(late, early);

        let rows = store.unsynced(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, Some(early));
        assert_eq!(rows[0].class_name, "cat");
        assert_eq!(rows[0].bbox.to_array(), [1.0, 2.0, 30.0, 40.0]);
        assert!(!rows[0].synced);
    }

    #[test]
    fn test_mark_synced_removes_from_backlog() {
        let store = SqliteDetectionStore::open_in_memory().unwrap();
        let a = store.insert_record(&record("a", 1.0)).unwrap();
        let b = store.insert_record(&record("b", 2.0)).unwrap();

        assert_eq!(store.set_synced(&[a]).unwrap(), 1);
        assert_eq!(store.set_synced(&[]).unwrap(), 0);

        let rows = store.unsynced(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, Some(b));
        assert_eq!(store.unsynced_count().unwrap(), 1);
        assert_eq!(store.total_count().unwrap(), 2);
    }

    #[test]
    fn test_state_upsert() {
        let store = SqliteDetectionStore::open_in_memory().unwrap();
        assert_eq!(store.state("registered").unwrap(), None);

        store.put_state("registered", "false").unwrap();
        store.put_state("registered", "true").unwrap();
        assert_eq!(store.state("registered").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("detections.db");

        {
            let store = SqliteDetectionStore::open(&path).unwrap();
            store.insert_record(&record("tiger", 5.0)).unwrap();
        }

        let store = SqliteDetectionStore::open(&path).unwrap();
        assert_eq!(DetectionStore::count(&store).unwrap(), 1);
        assert_eq!(store.query_unsynced(5).unwrap()[0].class_name, "tiger");
    }
}
