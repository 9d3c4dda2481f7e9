use serde::{Deserialize, Serialize};

/// Terminal outcome of one attempt.
///
/// Agent statuses are charged to the agent retry budget; pipeline statuses
/// only count toward the total attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Timeout,
    PromptFailed,
    DownloadFailed,
    FileCorrupted,
    MissingSheets,
    NavigationFailed,
    AuthFailed,
    UploadFailed,
    RateLimited,
    Unknown,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 11] = [
        TaskStatus::Success,
        TaskStatus::Timeout,
        TaskStatus::PromptFailed,
        TaskStatus::DownloadFailed,
        TaskStatus::FileCorrupted,
        TaskStatus::MissingSheets,
        TaskStatus::NavigationFailed,
        TaskStatus::AuthFailed,
        TaskStatus::UploadFailed,
        TaskStatus::RateLimited,
        TaskStatus::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Timeout => "TIMEOUT",
            Self::PromptFailed => "PROMPT_FAILED",
            Self::DownloadFailed => "DOWNLOAD_FAILED",
            Self::FileCorrupted => "FILE_CORRUPTED",
            Self::MissingSheets => "MISSING_SHEETS",
            Self::NavigationFailed => "NAVIGATION_FAILED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_agent(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Timeout
                | Self::PromptFailed
                | Self::DownloadFailed
                | Self::FileCorrupted
                | Self::MissingSheets
        )
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(
            self,
            Self::NavigationFailed
                | Self::AuthFailed
                | Self::UploadFailed
                | Self::RateLimited
                | Self::Unknown
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Phase 1 failure. Carries the pipeline status it is recorded under.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status}: {message}")]
pub struct PipelineError {
    pub status: TaskStatus,
    pub message: String,
}

impl PipelineError {
    pub fn new(status: TaskStatus, message: impl Into<String>) -> Self {
        debug_assert!(status.is_pipeline());
        Self { status, message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_sets_are_disjoint_and_exhaustive() {
        for status in TaskStatus::ALL {
            assert_ne!(status.is_agent(), status.is_pipeline(), "{status} must be in exactly one set");
        }
    }

    #[test]
    fn test_agent_set_members() {
        let agent: Vec<_> = TaskStatus::ALL.iter().filter(|s| s.is_agent()).collect();
        assert_eq!(agent.len(), 6);
        assert!(TaskStatus::Success.is_agent());
        assert!(TaskStatus::MissingSheets.is_agent());
        assert!(TaskStatus::Unknown.is_pipeline());
    }

    #[test]
    fn test_status_serializes_screaming_case() {
        let json = serde_json::to_string(&TaskStatus::PromptFailed).unwrap();
        assert_eq!(json, "\"PROMPT_FAILED\"");
        let back: TaskStatus = serde_json::from_str("\"NAVIGATION_FAILED\"").unwrap();
        assert_eq!(back, TaskStatus::NavigationFailed);
        assert_eq!(TaskStatus::RateLimited.to_string(), "RATE_LIMITED");
    }

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::new(TaskStatus::AuthFailed, "login wall");
        assert_eq!(err.to_string(), "AUTH_FAILED: login wall");
    }
}
