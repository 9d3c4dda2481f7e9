use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentFactory, AgentState, WebAgent};
use crate::audit::{save_conversation, CompletionLogger, SharedCompletionLogger, SUPERSEDED_REASON};
use crate::browser::{BrowserPage, BrowserProvider, BrowserSession};
use crate::config::TaskConfig;
use crate::errors::AutoWebError;
use crate::storage::{ResultUploader, UploadRequest};
use crate::utils::{format_duration, sleep_or_cancel};
use crate::validators::ArtifactValidator;
use super::output::{create_run_directory, has_expected_extension, rename_solution_file, RunLayout};
use super::status::{PipelineError, TaskStatus};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);
const AUTH_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const ARCHIVAL_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// How a task ended after the retry loop.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub total_attempts: u32,
    pub agent_attempts: u32,
    pub final_status: Option<TaskStatus>,
    /// Completion records written, oldest first. All but the last are
    /// deprecated.
    pub records: Vec<PathBuf>,
}

/// Browser resources held by one attempt.
struct Lease {
    session: Box<dyn BrowserSession>,
    page: Arc<dyn BrowserPage>,
    agent: Box<dyn WebAgent>,
}

impl Lease {
    async fn release(self) {
        if let Err(e) = self.page.close().await {
            debug!(error = %e, "Page close failed");
        }
        if let Err(e) = self.session.close().await {
            warn!(error = %e, "Browser session close failed");
        }
    }
}

/// Result of the agent phase before it is written to the record.
struct AgentPhase {
    status: TaskStatus,
    artifacts: Vec<PathBuf>,
}

impl AgentPhase {
    fn failed(status: TaskStatus) -> Self {
        Self { status, artifacts: Vec::new() }
    }
}

/// Drives one task through the two-tier retry loop.
///
/// Phase 1 (browser, navigation, login, uploads) failures only count toward
/// `max_total_attempts` and leave no completion record. Phase 2 (prompts,
/// downloads, validation) failures are charged to `max_agent_attempts` and
/// each write exactly one record.
#[derive(Clone)]
pub struct TaskRunner {
    provider: Arc<dyn BrowserProvider>,
    agents: Arc<dyn AgentFactory>,
    validator: Arc<dyn ArtifactValidator>,
    uploader: Option<Arc<dyn ResultUploader>>,
    shutdown: CancellationToken,
    hold_browser: bool,
}

impl TaskRunner {
    pub fn new(
        provider: Arc<dyn BrowserProvider>,
        agents: Arc<dyn AgentFactory>,
        validator: Arc<dyn ArtifactValidator>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            agents,
            validator,
            uploader: None,
            shutdown,
            hold_browser: false,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn ResultUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Same runner, stopped by `shutdown` instead of its own token.
    pub fn with_shutdown(&self, shutdown: CancellationToken) -> Self {
        Self { shutdown, ..self.clone() }
    }

    /// Keep the browser page open after a success until shutdown.
    pub fn hold_browser(mut self, hold: bool) -> Self {
        self.hold_browser = hold;
        self
    }

    pub async fn run(&self, config: &TaskConfig) -> Result<TaskOutcome, AutoWebError> {
        let provider = config.provider();
        let retry = &provider.retry;
        let max_sec_per_task = config.max_sec_per_task();
        let agent_name = config.agent_name();

        info!(
            task = %config.task_name,
            task_id = ?config.task_id,
            source = %config.task_source,
            provider = %config.agent_type,
            max_agent = retry.max_agent_attempts,
            max_total = retry.max_total_attempts,
            "Starting task"
        );
        if max_sec_per_task > 0 {
            info!(budget = %format_duration(Duration::from_secs(max_sec_per_task)), "Task time budget");
        } else {
            info!("No task time budget (unlimited runtime)");
        }

        let layout = create_run_directory(&provider.output.base_dir, &config.folder_prefix()).await?;
        info!(dir = %layout.run_dir.display(), "Output directory");

        let task_start = Instant::now();
        let backoff = Duration::from_secs(retry.sleep_between_retries);
        let mut total_attempts = 0u32;
        let mut agent_attempts = 0u32;
        let mut final_status = None;
        let mut loggers: Vec<SharedCompletionLogger> = Vec::new();
        let mut success = false;

        loop {
            if total_attempts >= retry.max_total_attempts {
                error!(max = retry.max_total_attempts, "Max total attempts exhausted");
                break;
            }
            if agent_attempts >= retry.max_agent_attempts {
                error!(max = retry.max_agent_attempts, "Max agent attempts exhausted");
                break;
            }
            if max_sec_per_task > 0 && task_start.elapsed() >= Duration::from_secs(max_sec_per_task) {
                error!(budget_secs = max_sec_per_task, "Task time budget exhausted");
                break;
            }
            if self.shutdown.is_cancelled() {
                warn!("Shutdown requested, leaving retry loop");
                break;
            }

            total_attempts += 1;
            info!(
                attempt = total_attempts,
                agent_attempts,
                max_agent = retry.max_agent_attempts,
                "Attempt starting"
            );

            // Phase 1: pipeline
            let mut lease = match self.prepare(config).await {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(status = %e.status, error = %e.message, "Pipeline failure");
                    final_status = Some(e.status);
                    sleep_or_cancel(&self.shutdown, backoff).await;
                    continue;
                }
            };

            // Phase 2: agent
            let logger = CompletionLogger::create(
                &layout.json_logs_dir,
                &config.task_name,
                &agent_name,
                provider.session.prompt_version,
                &config.task_source,
                total_attempts,
            )
            .await;
            let logger = match logger {
                Ok(logger) => Arc::new(Mutex::new(logger)),
                Err(e) => {
                    error!(error = %e, "Failed to create completion record");
                    lease.release().await;
                    agent_attempts += 1;
                    final_status = Some(TaskStatus::Unknown);
                    sleep_or_cancel(&self.shutdown, backoff).await;
                    continue;
                }
            };
            if let Err(e) = logger.lock().await.start_task(&config.task_name, total_attempts).await {
                warn!(error = %e, "Failed to record task start");
            }
            loggers.push(logger.clone());
            let attempt_started = Utc::now();

            let attempt_token = self.shutdown.child_token();
            let timed_out = Arc::new(AtomicBool::new(false));
            lease
                .agent
                .context_mut()
                .bind_attempt(attempt_token.clone(), Some(logger.clone()));
            let guard = self.spawn_guard(
                attempt_budget(retry.max_sec_per_attempt, max_sec_per_task, task_start.elapsed()),
                attempt_token.clone(),
                timed_out.clone(),
            );

            let phase = AssertUnwindSafe(self.run_agent_phase(lease.agent.as_mut(), config, &layout, &timed_out))
                .catch_unwind()
                .await;
            if let Some(guard) = guard {
                guard.abort();
            }
            let phase = match phase {
                Ok(Ok(phase)) => phase,
                Ok(Err(e)) => {
                    error!(error = %e, "Agent phase failed unexpectedly");
                    AgentPhase::failed(TaskStatus::Unknown)
                }
                Err(panic) => {
                    error!(panic = %panic_message(&panic), "Agent phase panicked");
                    AgentPhase::failed(TaskStatus::Unknown)
                }
            };

            agent_attempts += 1;
            final_status = Some(phase.status);
            if let Err(e) = logger.lock().await.end_task(phase.status).await {
                warn!(error = %e, "Failed to record task end");
            }

            if phase.status != TaskStatus::Success {
                warn!(status = %phase.status, agent_attempts, "Agent failure");
                lease.release().await;
                sleep_or_cancel(&self.shutdown, backoff).await;
                continue;
            }

            info!(task = %config.task_name, files = phase.artifacts.len(), "Task completed successfully");
            self.finish_success(lease.agent.as_ref(), config, phase.artifacts, attempt_started).await;

            if self.hold_browser {
                info!("Browser staying open for inspection, interrupt to exit");
                self.shutdown.cancelled().await;
            }
            lease.release().await;
            success = true;
            break;
        }

        let records = deprecate_superseded(&loggers).await;
        info!(
            task = %config.task_name,
            success,
            total_attempts,
            agent_attempts,
            elapsed = %format_duration(task_start.elapsed()),
            "Task finished"
        );

        Ok(TaskOutcome {
            success,
            total_attempts,
            agent_attempts,
            final_status,
            records,
        })
    }

    /// Phase 1. Any failure releases what was acquired and is reported as a
    /// pipeline status.
    async fn prepare(&self, config: &TaskConfig) -> Result<Lease, PipelineError> {
        let session = self
            .provider
            .connect()
            .await
            .map_err(|e| PipelineError::new(TaskStatus::Unknown, format!("Browser unavailable: {}", e)))?;

        match session.close_stale_pages().await {
            Ok(0) => {}
            Ok(closed) => debug!(closed, "Closed stale pages"),
            Err(e) => debug!(error = %e, "Could not close stale pages"),
        }

        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "Browser session close failed");
                }
                return Err(PipelineError::new(TaskStatus::Unknown, format!("Could not open page: {}", e)));
            }
        };
        debug!("Created new browser page");

        let agent = self.agents.create(
            page.clone(),
            config,
            session.download_dir(),
            self.shutdown.child_token(),
        );
        let mut lease = Lease { session, page, agent };

        match self.ready_agent(&mut lease, config).await {
            Ok(()) => Ok(lease),
            Err(e) => {
                lease.release().await;
                Err(e)
            }
        }
    }

    async fn ready_agent(&self, lease: &mut Lease, config: &TaskConfig) -> Result<(), PipelineError> {
        if !lease.agent.navigate_to_new_chat().await {
            return Err(PipelineError::new(
                TaskStatus::NavigationFailed,
                format!("Failed to navigate to {}", lease.agent.home_url()),
            ));
        }

        let mut state = lease.agent.get_state().await;
        info!(state = %state, "Page state after navigation");
        if state == AgentState::AuthRequired {
            state = self.wait_for_login(lease, config).await?;
        }

        if state == AgentState::RateLimited {
            return Err(PipelineError::new(TaskStatus::RateLimited, "Rate limited before prompts"));
        }

        let files = &config.files_to_upload;
        if !files.is_empty() {
            info!(count = files.len(), "Uploading files");
            if !lease.agent.upload_files(files).await {
                return Err(PipelineError::new(TaskStatus::UploadFailed, "File upload failed"));
            }
        }
        Ok(())
    }

    /// Poll until a manual login lands on a ready page. Persists the auth
    /// state once it does.
    async fn wait_for_login(&self, lease: &mut Lease, config: &TaskConfig) -> Result<AgentState, PipelineError> {
        let timeout = Duration::from_secs(config.provider().browser.auth_timeout_seconds);
        info!(timeout_secs = timeout.as_secs(), "Authentication required, waiting for login");

        let started = Instant::now();
        while started.elapsed() < timeout {
            if !sleep_or_cancel(&self.shutdown, AUTH_POLL_INTERVAL).await {
                return Err(PipelineError::new(TaskStatus::AuthFailed, "Shutdown during login wait"));
            }

            let url = lease.page.url().await.unwrap_or_default();
            if !lease.agent.owns_url(&url) {
                debug!(url = %url, "Still on login page, navigating back");
                let home = lease.agent.home_url();
                if let Err(e) = lease.page.goto(&home, NAVIGATION_TIMEOUT).await {
                    debug!(error = %e, "Navigation back failed");
                }
            }

            let state = lease.agent.get_state().await;
            if state == AgentState::Ready {
                info!("Login successful");
                if let Err(e) = lease.session.save_auth_state().await {
                    warn!(error = %e, "Failed to save auth state");
                }
                return Ok(state);
            }
            debug!(state = %state, elapsed_secs = started.elapsed().as_secs(), "Still waiting for login");
        }
        Err(PipelineError::new(TaskStatus::AuthFailed, "Login timeout"))
    }

    fn spawn_guard(
        &self,
        budget: Option<Duration>,
        attempt_token: CancellationToken,
        timed_out: Arc<AtomicBool>,
    ) -> Option<JoinHandle<()>> {
        let budget = budget?;
        if budget.is_zero() {
            warn!("Task time budget already spent, cancelling attempt");
            timed_out.store(true, Ordering::SeqCst);
            attempt_token.cancel();
            return None;
        }
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = attempt_token.cancelled() => {}
                _ = tokio::time::sleep(budget) => {
                    warn!(budget_secs = budget.as_secs(), "Attempt time budget exhausted, cancelling");
                    timed_out.store(true, Ordering::SeqCst);
                    attempt_token.cancel();
                }
            }
        }))
    }

    /// Phase 2: prompts, downloads, validation, canonical renaming.
    async fn run_agent_phase(
        &self,
        agent: &mut dyn WebAgent,
        config: &TaskConfig,
        layout: &RunLayout,
        timed_out: &AtomicBool,
    ) -> Result<AgentPhase, AutoWebError> {
        let provider = config.provider();

        // Files were already uploaded in Phase 1.
        if !agent.process_all_prompts(&[]).await {
            let status = if timed_out.load(Ordering::SeqCst) {
                TaskStatus::Timeout
            } else {
                TaskStatus::PromptFailed
            };
            let archived = agent
                .download_all_artifacts(&layout.solutions_dir, ARCHIVAL_DOWNLOAD_TIMEOUT)
                .await;
            if !archived.is_empty() {
                info!(count = archived.len(), "Archived partial artifacts");
            }
            return Ok(AgentPhase::failed(status));
        }

        info!("All prompts completed, downloading artifacts");
        let downloaded = agent.download_all_artifacts(&layout.solutions_dir, DOWNLOAD_TIMEOUT).await;
        if downloaded.is_empty() {
            warn!("No artifacts retrieved");
            return Ok(AgentPhase::failed(TaskStatus::DownloadFailed));
        }

        let expected: Vec<&PathBuf> = downloaded
            .iter()
            .filter(|p| has_expected_extension(p, &provider.expected_extensions))
            .collect();
        if expected.is_empty() {
            warn!(
                downloaded = downloaded.len(),
                expected = ?provider.expected_extensions,
                "No artifact with an expected extension"
            );
            return Ok(AgentPhase::failed(TaskStatus::DownloadFailed));
        }

        for path in &expected {
            let validator = self.validator.clone();
            let target = (*path).clone();
            let result = tokio::task::spawn_blocking(move || validator.validate(&target))
                .await
                .map_err(|e| AutoWebError::Internal(format!("Validation task failed: {}", e)))?;
            if !result.is_valid {
                warn!(file = %path.display(), status = %result.status, message = %result.message, "Validation failed");
                return Ok(AgentPhase::failed(result.status));
            }
            debug!(file = %path.display(), "Artifact valid");
        }

        let agent_name = config.agent_name();
        let mut artifacts = Vec::with_capacity(downloaded.len());
        for path in downloaded {
            if has_expected_extension(&path, &provider.expected_extensions) {
                artifacts.push(rename_solution_file(&path, &config.task_name, &agent_name).await?);
            } else {
                artifacts.push(path);
            }
        }
        Ok(AgentPhase { status: TaskStatus::Success, artifacts })
    }

    async fn finish_success(
        &self,
        agent: &dyn WebAgent,
        config: &TaskConfig,
        artifacts: Vec<PathBuf>,
        started: chrono::DateTime<Utc>,
    ) {
        let provider = config.provider();
        let history = agent.get_conversation_history().await;

        if provider.logging.save_to_file {
            if let Err(e) = save_conversation(
                &provider.logging.conversation_directory,
                &config.task_name,
                &config.task_source,
                &history,
            )
            .await
            {
                warn!(error = %e, "Failed to save conversation history");
            }
        }

        if !config.upload_to_cloud {
            return;
        }
        let Some(uploader) = &self.uploader else {
            warn!("upload_to_cloud is set but no uploader is configured");
            return;
        };

        let request = UploadRequest {
            task_name: config.task_name.clone(),
            task_source: config.task_source.clone(),
            task_id: config.task_id,
            artifacts,
            start_time: history.first().and_then(|m| m.timestamp).unwrap_or(started),
            conversation: history,
            end_time: Utc::now(),
            agent_model_name: config.model_name(),
            agent_model_type: provider
                .agent_model_type
                .clone()
                .unwrap_or_else(|| config.agent_type.as_str().to_string()),
        };
        let report = uploader.upload_results(request).await;
        if report.success {
            info!(
                artifacts = ?report.artifact_locations,
                conversation = ?report.conversation_location,
                attempt_id = ?report.attempt_id,
                "Results uploaded"
            );
        } else {
            warn!(errors = ?report.errors, "Upload completed with errors");
        }
    }
}

/// Guard timeout for the next attempt: the per-attempt limit, capped by
/// what is left of the task budget. A limit of 0 is unlimited, so `None`
/// only when both are. An exhausted task budget yields `Some(ZERO)`.
fn attempt_budget(max_sec_per_attempt: u64, max_sec_per_task: u64, elapsed: Duration) -> Option<Duration> {
    let per_attempt = (max_sec_per_attempt > 0).then(|| Duration::from_secs(max_sec_per_attempt));
    let remaining =
        (max_sec_per_task > 0).then(|| Duration::from_secs(max_sec_per_task).saturating_sub(elapsed));
    match (per_attempt, remaining) {
        (Some(a), Some(r)) => Some(a.min(r)),
        (a, r) => a.or(r),
    }
}

/// Mark every record but the newest as superseded. Returns all record paths.
async fn deprecate_superseded(loggers: &[SharedCompletionLogger]) -> Vec<PathBuf> {
    let mut records = Vec::with_capacity(loggers.len());
    for (index, logger) in loggers.iter().enumerate() {
        let mut logger = logger.lock().await;
        if index + 1 < loggers.len() {
            if let Err(e) = logger.mark_deprecated(SUPERSEDED_REASON).await {
                warn!(record = %logger.path().display(), error = %e, "Failed to deprecate record");
            }
        }
        records.push(logger.path().to_path_buf());
    }
    records
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
