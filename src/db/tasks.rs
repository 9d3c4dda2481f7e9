use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::AutoWebError;
use super::Database;

/// A task definition as stored. File lists hold local paths or
/// `http(s)://` / `s3://` URIs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRow {
    pub id: i64,
    pub task_name: String,
    pub task_source: Option<String>,
    pub starting_files: Vec<String>,
    pub solution_files: Vec<String>,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub task_name: String,
    #[serde(default)]
    pub task_source: Option<String>,
    #[serde(default, alias = "task_starting_files")]
    pub starting_files: Vec<String>,
    #[serde(default, alias = "task_solution_files")]
    pub solution_files: Vec<String>,
}

const TASK_COLUMNS: &str = "id, task_name, task_source, task_starting_files, task_solution_files, deprecated, deprecation_reason, created_at";

fn decode_list(raw: String) -> Vec<String> {
    serde_json::from_str(&raw).unwrap_or_default()
}

fn map_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        task_name: row.get(1)?,
        task_source: row.get(2)?,
        starting_files: decode_list(row.get(3)?),
        solution_files: decode_list(row.get(4)?),
        deprecated: row.get::<_, i64>(5)? != 0,
        deprecation_reason: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Database {
    pub fn insert_task(&self, task: &NewTask) -> Result<i64, AutoWebError> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO tasks (task_name, task_source, task_starting_files, task_solution_files, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![
                task.task_name,
                task.task_source,
                serde_json::to_string(&task.starting_files)?,
                serde_json::to_string(&task.solution_files)?,
                now,
            ],
        )
        .map_err(|e| AutoWebError::Database(format!("Failed to insert task: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_task(&self, id: i64) -> Result<Option<TaskRow>, AutoWebError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS))
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        let mut rows = stmt
            .query_map(rusqlite::params![id], map_task)
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        rows.next()
            .transpose()
            .map_err(|e| AutoWebError::Database(format!("Row read failed: {}", e)))
    }

    /// First non-deprecated task with this name (and source, when given).
    pub fn find_task(&self, task_name: &str, task_source: Option<&str>) -> Result<Option<TaskRow>, AutoWebError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE task_name = ?1 AND (?2 IS NULL OR task_source = ?2) AND deprecated = 0 ORDER BY id LIMIT 1",
                TASK_COLUMNS
            ))
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        let mut rows = stmt
            .query_map(rusqlite::params![task_name, task_source], map_task)
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        rows.next()
            .transpose()
            .map_err(|e| AutoWebError::Database(format!("Row read failed: {}", e)))
    }

    pub fn list_tasks(&self, task_source: Option<&str>, include_deprecated: bool) -> Result<Vec<TaskRow>, AutoWebError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM tasks WHERE (?1 IS NULL OR task_source = ?1) AND (?2 OR deprecated = 0) ORDER BY id",
                TASK_COLUMNS
            ))
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        let rows = stmt
            .query_map(rusqlite::params![task_source, include_deprecated], map_task)
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| AutoWebError::Database(format!("Row read failed: {}", e)))?);
        }
        Ok(tasks)
    }

    pub fn deprecate_task(&self, id: i64, reason: &str) -> Result<bool, AutoWebError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET deprecated = 1, deprecation_reason = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id, reason, Utc::now().to_rfc3339()],
            )
            .map_err(|e| AutoWebError::Database(format!("Update failed: {}", e)))?;
        Ok(changed > 0)
    }
}
