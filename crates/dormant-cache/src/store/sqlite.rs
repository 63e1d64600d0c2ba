use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{RecordMeta, StoreBackend, StoreResult};
use crate::error::StoreError;
use crate::key::SessionKey;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS passivated_sessions (
    key        TEXT PRIMARY KEY,
    payload    BLOB NOT NULL,
    stored_at  TEXT NOT NULL
);
";

/// SQLite backend: one row per passivated session.
///
/// Thread-safe via internal `Mutex<Connection>`.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StoreBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn put(&self, key: &SessionKey, bytes: &[u8]) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO passivated_sessions (key, payload, stored_at)
             VALUES (?1, ?2, ?3)",
            params![key.to_string(), bytes, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn get(&self, key: &SessionKey) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT payload FROM passivated_sessions WHERE key = ?1",
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn delete(&self, key: &SessionKey) -> StoreResult<bool> {
        let changed = self.conn.lock().execute(
            "DELETE FROM passivated_sessions WHERE key = ?1",
            params![key.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn contains(&self, key: &SessionKey) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT 1 FROM passivated_sessions WHERE key = ?1",
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list(&self) -> StoreResult<Vec<RecordMeta>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key, length(payload), stored_at FROM passivated_sessions")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (key, size, stored_at) = row?;
            let key: SessionKey = key
                .parse()
                .map_err(|_| StoreError::InvalidRecord(key.clone()))?;
            let stored_at = DateTime::parse_from_rfc3339(&stored_at)
                .map_err(|_| StoreError::InvalidRecord(format!("{key}: bad timestamp")))?
                .with_timezone(&Utc);
            records.push(RecordMeta {
                key,
                size: size.max(0) as u64,
                stored_at,
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_in_memory() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let key = SessionKey::generate();

        assert!(!backend.contains(&key).unwrap());
        backend.put(&key, b"payload").unwrap();
        assert!(backend.contains(&key).unwrap());
        assert_eq!(backend.get(&key).unwrap(), Some(b"payload".to_vec()));

        let records = backend.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 7);

        assert!(backend.delete(&key).unwrap());
        assert!(!backend.delete(&key).unwrap());
        assert_eq!(backend.get(&key).unwrap(), None);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");
        let key = SessionKey::generate();

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.put(&key, b"durable").unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.get(&key).unwrap(), Some(b"durable".to_vec()));
    }
}
