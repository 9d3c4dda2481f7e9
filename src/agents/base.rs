use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::SharedCompletionLogger;
use crate::browser::{downloads, BrowserPage};
use crate::detector::{CompletionDetector, CompletionOutcome, PageSignals};
use crate::errors::AutoWebError;
use crate::utils::{preview, sleep_or_cancel};

/// UI state of a chat page, read in a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Running,
    Ready,
    RateLimited,
    AuthRequired,
    Error,
    Unknown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Ready => "READY",
            Self::RateLimited => "RATE_LIMITED",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
            metadata: serde_json::Map::new(),
        }
    }
}

/// State every provider agent carries for one attempt.
pub struct AgentContext {
    pub page: Arc<dyn BrowserPage>,
    pub prompts: Vec<String>,
    pub detector: CompletionDetector,
    /// Observed by every wait. Replaced with the attempt-scoped token when
    /// prompting starts.
    pub cancel: CancellationToken,
    pub completion_logger: Option<SharedCompletionLogger>,
    pub messages: Vec<ConversationMessage>,
    /// Directory the browser saves downloads to on its own (CDP mode).
    pub browser_download_dir: Option<PathBuf>,
    pending_prompt: Option<String>,
}

impl AgentContext {
    pub fn new(
        page: Arc<dyn BrowserPage>,
        prompts: Vec<String>,
        detector: CompletionDetector,
        cancel: CancellationToken,
        browser_download_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            page,
            prompts,
            detector,
            cancel,
            completion_logger: None,
            messages: Vec::new(),
            browser_download_dir,
            pending_prompt: None,
        }
    }

    /// Switch to the token and logger of the attempt about to prompt.
    pub fn bind_attempt(&mut self, cancel: CancellationToken, logger: Option<SharedCompletionLogger>) {
        self.cancel = cancel;
        self.completion_logger = logger;
    }

    pub(crate) fn set_pending_prompt(&mut self, prompt: &str) {
        self.pending_prompt = Some(prompt.to_string());
    }

    pub fn record_exchange(&mut self, prompt: &str, response: &str) {
        self.messages.push(ConversationMessage::new(Role::User, prompt));
        self.messages.push(ConversationMessage::new(Role::Assistant, response));
    }

    /// Sleep that gives up when the attempt is cancelled.
    pub async fn pause(&self, duration: Duration) -> bool {
        sleep_or_cancel(&self.cancel, duration).await
    }

    async fn log_prompt_start(&self, prompt_number: u32, prompt: &str) {
        if let Some(logger) = &self.completion_logger {
            if let Err(e) = logger.lock().await.start_prompt(prompt_number, prompt).await {
                warn!(error = %e, prompt_number, "Failed to record prompt start");
            }
        }
    }

    async fn log_prompt_end(&self, success: bool, response_length: usize) {
        if let Some(logger) = &self.completion_logger {
            if let Err(e) = logger.lock().await.end_prompt(success, response_length).await {
                warn!(error = %e, "Failed to record prompt end");
            }
        }
    }

    /// Run the completion protocol for the prompt just submitted and record
    /// the exchange when text comes back.
    pub async fn await_response(&mut self, signals: &dyn PageSignals, prompt_number: u32) -> Option<String> {
        info!(prompt_number, "Waiting for response");
        let outcome = self.detector.wait_for_completion(signals, &self.cancel).await;
        let response = match outcome {
            CompletionOutcome::Complete(text) => text,
            CompletionOutcome::Partial(text) => {
                warn!(prompt_number, chars = text.chars().count(), "Using partial response");
                text
            }
            CompletionOutcome::NeverStarted => {
                error!(prompt_number, "Response never started");
                return None;
            }
            CompletionOutcome::TimedOut => {
                error!(prompt_number, "Timed out waiting for response");
                return None;
            }
            CompletionOutcome::Cancelled => {
                warn!(prompt_number, "Response wait cancelled");
                return None;
            }
        };

        let prompt = self
            .pending_prompt
            .take()
            .or_else(|| self.prompts.get(prompt_number.saturating_sub(1) as usize).cloned())
            .unwrap_or_default();
        self.record_exchange(&prompt, &response);
        info!(prompt_number, preview = %preview(&response, 200), "Response received");
        Some(response)
    }
}

/// A provider-specific web chat driven through one browser page.
#[async_trait]
pub trait WebAgent: Send + Sync {
    fn context(&self) -> &AgentContext;

    fn context_mut(&mut self) -> &mut AgentContext;

    /// Page the agent navigates to for a fresh conversation.
    fn home_url(&self) -> String;

    /// Whether `url` is on the provider's domain (anything else is a login
    /// or consent redirect).
    fn owns_url(&self, url: &str) -> bool;

    /// True when the page loaded, even if it then needs a login.
    async fn navigate_to_new_chat(&mut self) -> bool;

    async fn get_state(&self) -> AgentState;

    async fn upload_files(&mut self, files: &[PathBuf]) -> bool;

    async fn submit_prompt(&mut self, prompt: &str, prompt_number: u32) -> bool;

    async fn wait_for_response(&mut self, prompt_number: u32) -> Option<String>;

    async fn download_all_artifacts(&mut self, dest_dir: &Path, timeout: Duration) -> Vec<PathBuf>;

    async fn get_conversation_history(&self) -> Vec<ConversationMessage>;

    async fn ensure_features_enabled(&mut self) -> bool;

    /// Upload `files` (if any), then submit and await every configured
    /// prompt in order. Stops at the first failure.
    async fn process_all_prompts(&mut self, files: &[PathBuf]) -> bool {
        let prompts = self.context().prompts.clone();
        if prompts.is_empty() {
            error!("No prompts configured");
            return false;
        }

        if !files.is_empty() && !self.upload_files(files).await {
            error!("File upload failed");
            return false;
        }

        let total = prompts.len();
        for (index, prompt) in prompts.iter().enumerate() {
            let prompt_number = index as u32 + 1;
            if self.context().cancel.is_cancelled() {
                warn!(prompt_number, "Cancelled before prompt");
                return false;
            }
            info!(prompt_number, total, "Processing prompt");

            self.context().log_prompt_start(prompt_number, prompt).await;

            if !self.submit_prompt(prompt, prompt_number).await {
                error!(prompt_number, "Failed to submit prompt");
                self.context().log_prompt_end(false, 0).await;
                return false;
            }

            match self.wait_for_response(prompt_number).await {
                Some(response) => {
                    self.context().log_prompt_end(true, response.chars().count()).await;
                }
                None => {
                    error!(prompt_number, "No response for prompt");
                    self.context().log_prompt_end(false, 0).await;
                    return false;
                }
            }
        }

        info!(total, "All prompts processed");
        true
    }
}

/// Host of `url`, lowercased, or empty when it does not parse.
pub(crate) fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}

/// Poll until `selector` matches at least one element.
pub(crate) async fn wait_attached(page: &dyn BrowserPage, selector: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match page.count(selector).await {
            Ok(n) if n > 0 => return true,
            Ok(_) => {}
            Err(e) => debug!(selector, error = %e, "Selector probe failed"),
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Click a download affordance and return the saved file inside `dest_dir`.
///
/// With a browser-managed download directory the click is followed by
/// polling that directory for a new finished file, which is then moved to
/// `dest_dir` (named `file_name` when given). Otherwise the download event
/// is awaited through the page.
pub(crate) async fn click_download(
    page: &dyn BrowserPage,
    selector: &str,
    dest_dir: &Path,
    browser_download_dir: Option<&Path>,
    file_name: Option<&str>,
    timeout: Duration,
) -> Result<Option<PathBuf>, AutoWebError> {
    let Some(watch_dir) = browser_download_dir else {
        return page.download_via_click(selector, dest_dir, timeout).await;
    };

    let before = downloads::snapshot(watch_dir).await?;
    page.click(selector, Duration::from_secs(10)).await?;
    let Some(saved) = downloads::wait_for_new_file(watch_dir, &before, timeout).await? else {
        return Ok(None);
    };

    let name = match file_name {
        Some(name) => name.to_string(),
        None => saved
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".into()),
    };
    let target = dest_dir.join(name);
    if saved != target {
        move_file(&saved, &target).await?;
    }
    Ok(Some(target))
}

async fn move_file(from: &Path, to: &Path) -> Result<(), AutoWebError> {
    if tokio::fs::rename(from, to).await.is_err() {
        // different filesystem
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}
