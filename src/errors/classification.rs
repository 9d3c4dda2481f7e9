use super::types::AutoWebError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl AutoWebError {
    /// Classify this error to determine its type and whether glue operations
    /// (staging, database, uploads) may retry it.
    pub fn classify(&self) -> ErrorClassification {
        let (error_type, retryable) = match self {
            AutoWebError::Http(_) => ("HttpError", true),
            AutoWebError::Staging(_) => ("StagingError", true),
            AutoWebError::Timeout(_) => ("TimeoutError", true),
            AutoWebError::RateLimited(_) => ("RateLimitError", true),
            AutoWebError::Browser(_) => ("BrowserError", true),
            AutoWebError::Navigation(_) => ("NavigationError", true),
            AutoWebError::Upload(_) => ("UploadError", true),
            AutoWebError::Download(_) => ("DownloadError", true),
            AutoWebError::Io(_) => ("IoError", true),
            AutoWebError::Database(_) => ("DatabaseError", true),
            AutoWebError::Internal(_) => ("InternalError", true),

            AutoWebError::Config(_) => ("ConfigError", false),
            AutoWebError::Auth(_) => ("AuthError", false),
            AutoWebError::Prompt(_) => ("PromptError", false),
            AutoWebError::Validation(_) => ("ValidationError", false),
            AutoWebError::Cancelled => ("Cancelled", false),
            AutoWebError::Json(_) => ("JsonError", false),
            AutoWebError::Yaml(_) => ("YamlError", false),
        };
        ErrorClassification { error_type, retryable }
    }
}
