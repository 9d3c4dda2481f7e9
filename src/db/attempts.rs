use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::AutoWebError;
use super::Database;

/// One archived attempt of a task.
#[derive(Debug, Clone, Default)]
pub struct NewAttempt {
    pub task_id: i64,
    pub prompt_files: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub agent_model_name: Option<String>,
    pub agent_model_type: Option<String>,
    pub attempt_files: Vec<String>,
    pub cost: Option<f64>,
}

impl NewAttempt {
    pub fn time_taken_mins(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 60_000.0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskAttemptRow {
    pub id: i64,
    pub task_id: i64,
    pub prompt_files: Vec<String>,
    pub start_end_times: Vec<(Option<String>, Option<String>)>,
    pub agent_model_name: Option<String>,
    pub agent_model_type: Option<String>,
    pub attempt_files: Vec<String>,
    pub time_taken_mins: Option<f64>,
    pub cost: Option<f64>,
}

impl Database {
    pub fn insert_attempt(&self, attempt: &NewAttempt) -> Result<i64, AutoWebError> {
        let times = vec![(
            attempt.start_time.map(|t| t.to_rfc3339()),
            attempt.end_time.map(|t| t.to_rfc3339()),
        )];
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO task_attempts (task_id, prompt_files, start_end_times, agent_model_name, agent_model_type, attempt_files, time_taken_mins, cost, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                attempt.task_id,
                serde_json::to_string(&attempt.prompt_files)?,
                serde_json::to_string(&times)?,
                attempt.agent_model_name,
                attempt.agent_model_type,
                serde_json::to_string(&attempt.attempt_files)?,
                attempt.time_taken_mins(),
                attempt.cost,
                now,
            ],
        )
        .map_err(|e| AutoWebError::Database(format!("Failed to insert attempt: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_attempts(&self, task_id: i64) -> Result<Vec<TaskAttemptRow>, AutoWebError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, prompt_files, start_end_times, agent_model_name, agent_model_type, attempt_files, time_taken_mins, cost FROM task_attempts WHERE task_id = ?1 ORDER BY id",
            )
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;
        let rows = stmt
            .query_map(rusqlite::params![task_id], |row| {
                Ok(TaskAttemptRow {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    prompt_files: serde_json::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
                    start_end_times: serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
                    agent_model_name: row.get(4)?,
                    agent_model_type: row.get(5)?,
                    attempt_files: serde_json::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
                    time_taken_mins: row.get(7)?,
                    cost: row.get(8)?,
                })
            })
            .map_err(|e| AutoWebError::Database(format!("Query failed: {}", e)))?;

        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row.map_err(|e| AutoWebError::Database(format!("Row read failed: {}", e)))?);
        }
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewTask;
    use chrono::Duration;

    #[test]
    fn test_attempt_round_trip() {
        let db = Database::in_memory().unwrap();
        let task_id = db
            .insert_task(&NewTask { task_name: "dcf".into(), ..Default::default() })
            .unwrap();
        let start = Utc::now();
        let id = db
            .insert_attempt(&NewAttempt {
                task_id,
                prompt_files: vec!["archive/conversation.json".into()],
                start_time: Some(start),
                end_time: Some(start + Duration::seconds(90)),
                agent_model_name: Some("Opus 4.5".into()),
                agent_model_type: Some("claude_web".into()),
                attempt_files: vec!["archive/solution.xlsx".into()],
                cost: None,
            })
            .unwrap();

        let attempts = db.list_attempts(task_id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].id, id);
        assert_eq!(attempts[0].attempt_files, vec!["archive/solution.xlsx".to_string()]);
        assert!((attempts[0].time_taken_mins.unwrap() - 1.5).abs() < 1e-9);
        assert!(attempts[0].start_end_times[0].1.is_some());
    }

    #[test]
    fn test_attempt_requires_existing_task() {
        let db = Database::in_memory().unwrap();
        let result = db.insert_attempt(&NewAttempt { task_id: 42, ..Default::default() });
        assert!(matches!(result, Err(AutoWebError::Database(_))));
    }
}
