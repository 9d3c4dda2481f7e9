use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::status::TaskStatus;
use crate::errors::AutoWebError;
use super::utils::{atomic_write, clean_name};

pub const SUPERSEDED_REASON: &str = "Superseded by later attempt";
const PROMPT_TEXT_LIMIT: usize = 500;

/// Logger handle shared between the runner and the agent of one attempt.
pub type SharedCompletionLogger = Arc<Mutex<CompletionLogger>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSession {
    pub session_start: DateTime<Utc>,
    pub agent_name: String,
    pub prompt_version: u32,
    pub task_source: String,
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEntry {
    pub task_name: String,
    pub attempt_number: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub task_status: Option<TaskStatus>,
    pub agent_failed: Option<bool>,
    pub agent_failed_reason: Option<TaskStatus>,
    pub deprecated: bool,
    pub deprecated_reason: Option<String>,
    pub duration_seconds: Option<f64>,
    pub prompts: Vec<PromptEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEntry {
    pub prompt_number: u32,
    pub prompt_text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
}

/// Write-through recorder of task and prompt timing for one attempt.
///
/// Every mutation rewrites the whole document on disk, so a killed process
/// leaves the last completed transition behind. Open entries are written with
/// a null `end_time`.
pub struct CompletionLogger {
    path: PathBuf,
    data: CompletionSession,
    current_task: Option<usize>,
    current_prompt: Option<usize>,
}

impl CompletionLogger {
    /// Create the record file `completion_{agent}_{ts}_{task}_attempt{n}.json`
    /// under `log_dir` and write the empty session.
    pub async fn create(
        log_dir: &Path,
        task_identifier: &str,
        agent_name: &str,
        prompt_version: u32,
        task_source: &str,
        attempt: u32,
    ) -> Result<Self, AutoWebError> {
        tokio::fs::create_dir_all(log_dir).await?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let file_name = format!(
            "completion_{}_{}_{}_attempt{}.json",
            clean_name(agent_name),
            timestamp,
            clean_name(task_identifier),
            attempt
        );

        let logger = Self {
            path: log_dir.join(file_name),
            data: CompletionSession {
                session_start: Utc::now(),
                agent_name: agent_name.to_string(),
                prompt_version,
                task_source: task_source.to_string(),
                tasks: Vec::new(),
            },
            current_task: None,
            current_prompt: None,
        };
        logger.save().await?;
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session(&self) -> &CompletionSession {
        &self.data
    }

    pub fn has_open_task(&self) -> bool {
        self.current_task.is_some()
    }

    pub async fn start_task(&mut self, task_name: &str, attempt_number: u32) -> Result<(), AutoWebError> {
        self.data.tasks.push(TaskEntry {
            task_name: task_name.to_string(),
            attempt_number,
            start_time: Utc::now(),
            end_time: None,
            task_status: None,
            agent_failed: None,
            agent_failed_reason: None,
            deprecated: false,
            deprecated_reason: None,
            duration_seconds: None,
            prompts: Vec::new(),
        });
        self.current_task = Some(self.data.tasks.len() - 1);
        self.current_prompt = None;
        self.save().await
    }

    pub async fn end_task(&mut self, status: TaskStatus) -> Result<(), AutoWebError> {
        let Some(index) = self.current_task.take() else {
            warn!("end_task called with no active task");
            return Ok(());
        };
        let task = &mut self.data.tasks[index];
        let now = Utc::now();
        task.end_time = Some(now);
        task.duration_seconds = Some(seconds_between(task.start_time, now));
        task.task_status = Some(status);
        if status == TaskStatus::Success {
            task.agent_failed = Some(false);
            task.agent_failed_reason = None;
        } else {
            task.agent_failed = Some(true);
            task.agent_failed_reason = Some(status);
        }
        self.current_prompt = None;
        self.save().await
    }

    pub async fn start_prompt(&mut self, prompt_number: u32, prompt_text: &str) -> Result<(), AutoWebError> {
        let Some(index) = self.current_task else {
            warn!(prompt_number, "start_prompt called with no active task");
            return Ok(());
        };
        let prompts = &mut self.data.tasks[index].prompts;
        prompts.push(PromptEntry {
            prompt_number,
            prompt_text: prompt_text.chars().take(PROMPT_TEXT_LIMIT).collect(),
            start_time: Utc::now(),
            end_time: None,
            success: None,
            duration_seconds: None,
            response_length: None,
        });
        self.current_prompt = Some(prompts.len() - 1);
        self.save().await
    }

    pub async fn end_prompt(&mut self, success: bool, response_length: usize) -> Result<(), AutoWebError> {
        let (Some(task), Some(prompt)) = (self.current_task, self.current_prompt.take()) else {
            warn!("end_prompt called with no active prompt");
            return Ok(());
        };
        let entry = &mut self.data.tasks[task].prompts[prompt];
        let now = Utc::now();
        entry.end_time = Some(now);
        entry.duration_seconds = Some(seconds_between(entry.start_time, now));
        entry.success = Some(success);
        if response_length > 0 {
            entry.response_length = Some(response_length);
        }
        self.save().await
    }

    /// Deprecate every task entry of this record, in memory and on disk.
    pub async fn mark_deprecated(&mut self, reason: &str) -> Result<(), AutoWebError> {
        for task in &mut self.data.tasks {
            task.deprecated = true;
            task.deprecated_reason = Some(reason.to_string());
        }
        self.save().await?;
        info!(record = %self.path.display(), "Marked completion record as deprecated");
        Ok(())
    }

    async fn save(&self) -> Result<(), AutoWebError> {
        let json = serde_json::to_string_pretty(&self.data)?;
        atomic_write(&self.path, &json).await
    }
}

pub async fn load_record(path: &Path) -> Result<CompletionSession, AutoWebError> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let secs = (end - start).num_milliseconds() as f64 / 1000.0;
    (secs * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn new_logger(dir: &Path) -> CompletionLogger {
        CompletionLogger::create(dir, "wsp/task 7", "claude_web", 2, "wsp", 1)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_file_written_on_creation() {
        let dir = tempfile::tempdir().unwrap();
        let logger = new_logger(dir.path()).await;
        let name = logger.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("completion_claude_web_"));
        assert!(name.ends_with("_wsp-task_7_attempt1.json"));

        let record = load_record(logger.path()).await.unwrap();
        assert_eq!(record.agent_name, "claude_web");
        assert_eq!(record.prompt_version, 2);
        assert!(record.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_every_transition_is_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = new_logger(dir.path()).await;

        logger.start_task("task-7", 3).await.unwrap();
        let record = load_record(logger.path()).await.unwrap();
        assert_eq!(record.tasks.len(), 1);
        assert_eq!(record.tasks[0].attempt_number, 3);
        assert!(record.tasks[0].end_time.is_none());

        logger.start_prompt(1, &"x".repeat(800)).await.unwrap();
        let record = load_record(logger.path()).await.unwrap();
        assert_eq!(record.tasks[0].prompts.len(), 1);
        assert_eq!(record.tasks[0].prompts[0].prompt_text.len(), 500);
        assert!(record.tasks[0].prompts[0].success.is_none());

        logger.end_prompt(true, 1234).await.unwrap();
        let record = load_record(logger.path()).await.unwrap();
        assert_eq!(record.tasks[0].prompts[0].success, Some(true));
        assert_eq!(record.tasks[0].prompts[0].response_length, Some(1234));

        logger.end_task(TaskStatus::Success).await.unwrap();
        let record = load_record(logger.path()).await.unwrap();
        let task = &record.tasks[0];
        assert_eq!(task.task_status, Some(TaskStatus::Success));
        assert_eq!(task.agent_failed, Some(false));
        assert!(task.agent_failed_reason.is_none());
        assert!(task.duration_seconds.is_some());
    }

    #[tokio::test]
    async fn test_failed_status_sets_agent_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = new_logger(dir.path()).await;
        logger.start_task("task-7", 1).await.unwrap();
        logger.end_task(TaskStatus::MissingSheets).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(logger.path()).unwrap()).unwrap();
        assert_eq!(raw["tasks"][0]["agent_failed"], true);
        assert_eq!(raw["tasks"][0]["agent_failed_reason"], "MISSING_SHEETS");
        assert_eq!(raw["tasks"][0]["task_status"], "MISSING_SHEETS");
        assert!(!logger.has_open_task());
    }

    #[tokio::test]
    async fn test_end_without_start_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = new_logger(dir.path()).await;
        logger.end_prompt(true, 10).await.unwrap();
        logger.end_task(TaskStatus::Timeout).await.unwrap();
        assert!(logger.session().tasks.is_empty());
    }

    #[tokio::test]
    async fn test_mark_deprecated_updates_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = new_logger(dir.path()).await;
        logger.start_task("task-7", 1).await.unwrap();
        logger.end_task(TaskStatus::Timeout).await.unwrap();

        logger.mark_deprecated(SUPERSEDED_REASON).await.unwrap();
        assert!(logger.session().tasks[0].deprecated);
        let record = load_record(logger.path()).await.unwrap();
        assert_eq!(record.tasks[0].deprecated_reason.as_deref(), Some(SUPERSEDED_REASON));
    }
}
