use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::agents::ConversationMessage;
use crate::audit::{atomic_write, clean_name};
use crate::db::{Database, NewAttempt};
use crate::errors::AutoWebError;

/// Everything a successful attempt hands to the archive.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub task_name: String,
    pub task_source: String,
    pub task_id: Option<i64>,
    pub artifacts: Vec<PathBuf>,
    pub conversation: Vec<ConversationMessage>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub agent_model_name: String,
    pub agent_model_type: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub success: bool,
    pub artifact_locations: Vec<String>,
    pub conversation_location: Option<String>,
    pub attempt_id: Option<i64>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait ResultUploader: Send + Sync {
    /// Never fails outright; problems are listed in `errors`.
    async fn upload_results(&self, request: UploadRequest) -> UploadReport;
}

/// Copies results under `archive_dir` and, when a task store is attached,
/// records a `task_attempts` row pointing at them.
pub struct LocalArchiveUploader {
    archive_dir: PathBuf,
    db: Option<Database>,
}

#[derive(Serialize)]
struct ArchivedConversation<'a> {
    task_name: &'a str,
    task_source: &'a str,
    timestamp: String,
    agent_model_name: &'a str,
    agent_model_type: &'a str,
    messages: &'a [ConversationMessage],
}

impl LocalArchiveUploader {
    pub fn new(archive_dir: impl Into<PathBuf>, db: Option<Database>) -> Self {
        Self { archive_dir: archive_dir.into(), db }
    }

    async fn archive_artifact(&self, path: &Path, request: &UploadRequest, stamp: &str) -> Result<PathBuf, AutoWebError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| AutoWebError::Upload(format!("Not a file: {}", path.display())))?;
        let dir = self
            .archive_dir
            .join("artifacts")
            .join(clean_name(&request.task_source))
            .join(clean_name(&request.task_name));
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(format!("{}_{}", stamp, file_name.to_string_lossy()));
        tokio::fs::copy(path, &dest).await?;
        Ok(dest)
    }

    async fn archive_conversation(&self, request: &UploadRequest, stamp: &str) -> Result<PathBuf, AutoWebError> {
        let dir = self.archive_dir.join("conversations");
        tokio::fs::create_dir_all(&dir).await?;
        let dest = dir.join(format!("{}_{}.json", stamp, clean_name(&request.task_name)));
        let doc = ArchivedConversation {
            task_name: &request.task_name,
            task_source: &request.task_source,
            timestamp: Utc::now().to_rfc3339(),
            agent_model_name: &request.agent_model_name,
            agent_model_type: &request.agent_model_type,
            messages: &request.conversation,
        };
        atomic_write(&dest, &serde_json::to_string_pretty(&doc)?).await?;
        Ok(dest)
    }

    fn record_attempt(&self, db: &Database, request: &UploadRequest, report: &UploadReport) -> Result<Option<i64>, AutoWebError> {
        let task = match request.task_id {
            Some(id) => db.get_task(id)?,
            None => db.find_task(&request.task_name, Some(&request.task_source))?,
        };
        let Some(task) = task else {
            warn!(task = %request.task_name, "Task not found in task store, attempt not recorded");
            return Ok(None);
        };

        let attempt = NewAttempt {
            task_id: task.id,
            prompt_files: report.conversation_location.iter().cloned().collect(),
            start_time: Some(request.start_time),
            end_time: Some(request.end_time),
            agent_model_name: Some(request.agent_model_name.clone()),
            agent_model_type: Some(request.agent_model_type.clone()),
            attempt_files: report.artifact_locations.clone(),
            cost: None,
        };
        let id = db.insert_attempt(&attempt)?;
        info!(attempt_id = id, task_id = task.id, "Recorded task attempt");
        Ok(Some(id))
    }
}

#[async_trait]
impl ResultUploader for LocalArchiveUploader {
    async fn upload_results(&self, request: UploadRequest) -> UploadReport {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut report = UploadReport::default();
        info!(task = %request.task_name, artifacts = request.artifacts.len(), "Archiving results");

        for path in &request.artifacts {
            match self.archive_artifact(path, &request, &stamp).await {
                Ok(dest) => report.artifact_locations.push(dest.display().to_string()),
                Err(e) => report.errors.push(format!("Failed to archive artifact {}: {}", path.display(), e)),
            }
        }

        if !request.conversation.is_empty() {
            match self.archive_conversation(&request, &stamp).await {
                Ok(dest) => report.conversation_location = Some(dest.display().to_string()),
                Err(e) => report.errors.push(format!("Failed to archive conversation: {}", e)),
            }
        }

        if let Some(db) = &self.db {
            match self.record_attempt(db, &request, &report) {
                Ok(id) => report.attempt_id = id,
                Err(e) => {
                    error!(error = %e, "Task store write failed");
                    report.errors.push(e.to_string());
                }
            }
        }

        report.success = report.errors.is_empty();
        report
    }
}
