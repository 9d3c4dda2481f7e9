use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use crate::errors::AutoWebError;

pub const DEFAULT_DB_PATH: &str = "data/autowebprompt.db";

pub struct Database {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self, AutoWebError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| AutoWebError::Database(format!("Failed to open database: {}", e)))?;

        // WAL so a batch run and a `tasks list` can share the file
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| AutoWebError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.initialize()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self, AutoWebError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AutoWebError::Database(format!("Failed to open in-memory db: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| AutoWebError::Database(format!("Failed to set pragmas: {}", e)))?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> Result<(), AutoWebError> {
        let conn = self.lock()?;
        conn.execute_batch(super::schema::CREATE_TABLES)
            .map_err(|e| AutoWebError::Database(format!("Failed to create tables: {}", e)))?;
        conn.execute(
            "INSERT INTO _autowebprompt_meta (key, value) VALUES ('schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![super::schema::SCHEMA_VERSION],
        )
        .map_err(|e| AutoWebError::Database(format!("Failed to record schema version: {}", e)))?;
        Ok(())
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, AutoWebError> {
        self.conn
            .lock()
            .map_err(|_| AutoWebError::Database("connection mutex poisoned".into()))
    }

    pub fn schema_version(&self) -> Result<Option<String>, AutoWebError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT value FROM _autowebprompt_meta WHERE key = 'schema_version'")
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        let mut rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        rows.next()
            .transpose()
            .map_err(|e| AutoWebError::Database(format!("Row read failed: {}", e)))
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self { conn: self.conn.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_parent_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/store.db");
        let db = Database::new(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.schema_version().unwrap().as_deref(), Some(super::super::schema::SCHEMA_VERSION));

        // reopening is idempotent
        let again = Database::new(&path).unwrap();
        assert_eq!(again.schema_version().unwrap().as_deref(), Some("1"));
    }
}
