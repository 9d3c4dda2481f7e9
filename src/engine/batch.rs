use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit::{atomic_write, clean_name};
use crate::config::{inject_agent_type, into_task_config, merge_task_config, AgentType, TaskConfig};
use crate::db::{Database, TaskRow};
use crate::errors::AutoWebError;
use crate::storage::FileStager;
use super::runner::TaskRunner;

/// Time a timed-out task gets to wind down after cancellation before it is
/// aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(15);

/// Runs one fully merged task. Implementations must stop promptly once
/// `cancel` fires.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, config: TaskConfig, cancel: CancellationToken) -> Result<bool, AutoWebError>;
}

#[async_trait]
impl TaskExecutor for TaskRunner {
    async fn execute(&self, config: TaskConfig, cancel: CancellationToken) -> Result<bool, AutoWebError> {
        let outcome = self.with_shutdown(cancel).run(&config).await?;
        Ok(outcome.success)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub start: usize,
    pub end: Option<usize>,
    pub dry_run: bool,
    pub continue_on_failure: bool,
    /// Per-task limit when the task sets none, in seconds.
    pub default_timeout: Option<u64>,
    /// Stage starting files from the task store into this directory.
    pub stage_dir: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            start: 0,
            end: None,
            dry_run: false,
            continue_on_failure: true,
            default_timeout: None,
            stage_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_name: String,
    pub index: usize,
    pub success: bool,
    pub skipped: bool,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub tasks: Vec<TaskResult>,
}

impl BatchReport {
    /// Write `batch_results_{ts}.json` under `dir`.
    pub async fn save(&self, dir: &Path) -> Result<PathBuf, AutoWebError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("batch_results_{}.json", Local::now().format("%Y%m%d_%H%M%S")));
        atomic_write(&path, &serde_json::to_string_pretty(self)?).await?;
        Ok(path)
    }
}

/// Task entries of a batch, before template merging.
pub fn tasks_from_store(rows: &[TaskRow]) -> Vec<Mapping> {
    rows.iter()
        .map(|row| {
            let mut task = Mapping::new();
            task.insert("task_id".into(), Value::from(row.id));
            task.insert("task_name".into(), Value::from(row.task_name.clone()));
            if let Some(source) = &row.task_source {
                task.insert("task_source".into(), Value::from(source.clone()));
            }
            task
        })
        .collect()
}

/// Runs a list of tasks one after another, each in its own tokio task.
pub struct BatchRunner {
    executor: Arc<dyn TaskExecutor>,
    template: Mapping,
    agent_type: AgentType,
    options: BatchOptions,
    shutdown: CancellationToken,
    store: Option<Database>,
    stager: FileStager,
}

impl BatchRunner {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        template: Mapping,
        agent_type: AgentType,
        options: BatchOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            executor,
            template,
            agent_type,
            options,
            shutdown,
            store: None,
            stager: FileStager::new(),
        }
    }

    pub fn with_store(mut self, store: Database) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_stager(mut self, stager: FileStager) -> Self {
        self.stager = stager;
        self
    }

    /// Template + task overrides, with the batch provider forced.
    pub fn merged_config(&self, task: &Mapping) -> Mapping {
        let mut merged = merge_task_config(task, &self.template);
        inject_agent_type(&mut merged, self.agent_type);
        merged
    }

    pub async fn run(&self, tasks: &[Mapping]) -> BatchReport {
        let end = self.options.end.unwrap_or(tasks.len()).min(tasks.len());
        let start = self.options.start.min(end);
        let selected = &tasks[start..end];
        info!(count = selected.len(), start, end, dry_run = self.options.dry_run, "Running batch");

        let mut report = BatchReport { total: selected.len(), ..Default::default() };

        for (offset, task) in selected.iter().enumerate() {
            let index = start + offset;
            let task_name = task
                .get("task_name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("task_{}", index));

            if self.shutdown.is_cancelled() {
                warn!("Interrupted, skipping remaining tasks");
                report.skipped += selected.len() - offset;
                break;
            }

            info!(index, task = %task_name, "Task starting");
            let started = Instant::now();
            let result = self.run_one(task, &task_name).await;
            let duration_seconds = started.elapsed().as_secs_f64();

            let (success, skipped) = match result {
                Ok(success) => (success, false),
                Err(reason) => {
                    warn!(task = %task_name, reason = %reason, "Skipping task");
                    (false, true)
                }
            };
            report.tasks.push(TaskResult {
                task_name: task_name.clone(),
                index,
                success,
                skipped,
                duration_seconds,
            });

            if skipped {
                report.skipped += 1;
            } else if success {
                report.succeeded += 1;
                info!(task = %task_name, "Task succeeded");
            } else {
                report.failed += 1;
                error!(task = %task_name, "Task failed");
                if !self.options.continue_on_failure {
                    error!("Stopping batch on first failure");
                    report.skipped += selected.len() - offset - 1;
                    break;
                }
            }
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Batch finished"
        );
        report
    }

    /// `Ok(success)` for a task that ran (or was printed in dry-run),
    /// `Err(reason)` for one that was skipped before running.
    async fn run_one(&self, task: &Mapping, task_name: &str) -> Result<bool, String> {
        let mut task = task.clone();
        if self.options.stage_dir.is_some() && !self.options.dry_run {
            self.stage_task_files(&mut task, task_name).await?;
        }

        let merged = self.merged_config(&task);
        if self.options.dry_run {
            let yaml = serde_yaml::to_string(&merged).unwrap_or_default();
            println!("[DRY RUN] task {}:\n{}", task_name, yaml);
            return Ok(true);
        }

        let config = match into_task_config(merged) {
            Ok(config) => config,
            Err(e) => {
                error!(task = %task_name, error = %e, "Invalid task config");
                return Ok(false);
            }
        };
        let timeout = self.effective_timeout(&config);
        Ok(self.execute_isolated(config, timeout).await)
    }

    /// task `timeout` → batch default → provider `max_sec_per_task` → none.
    fn effective_timeout(&self, config: &TaskConfig) -> Option<Duration> {
        config
            .timeout
            .or(self.options.default_timeout)
            .or(Some(config.max_sec_per_task()).filter(|secs| *secs > 0))
            .map(Duration::from_secs)
    }

    async fn execute_isolated(&self, config: TaskConfig, timeout: Option<Duration>) -> bool {
        let task_name = config.task_name.clone();
        let cancel = self.shutdown.child_token();
        let executor = self.executor.clone();
        let token = cancel.clone();
        let mut handle = tokio::spawn(async move { executor.execute(config, token).await });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    error!(task = %task_name, timeout_secs = limit.as_secs(), "Task timed out");
                    cancel.cancel();
                    if tokio::time::timeout(CANCEL_GRACE, &mut handle).await.is_err() {
                        warn!(task = %task_name, "Task ignored cancellation, aborting");
                        handle.abort();
                    }
                    return false;
                }
            },
            None => (&mut handle).await,
        };

        match joined {
            Ok(Ok(success)) => success,
            Ok(Err(e)) => {
                error!(task = %task_name, error = %e, "Task errored");
                false
            }
            Err(e) if e.is_panic() => {
                error!(task = %task_name, "Task panicked");
                false
            }
            Err(e) => {
                error!(task = %task_name, error = %e, "Task did not finish");
                false
            }
        }
    }

    async fn stage_task_files(&self, task: &mut Mapping, task_name: &str) -> Result<(), String> {
        let has_files = matches!(task.get("files_to_upload"), Some(Value::Sequence(files)) if !files.is_empty());
        if has_files {
            return Ok(());
        }
        let (Some(store), Some(stage_dir)) = (&self.store, &self.options.stage_dir) else {
            return Ok(());
        };

        let row = match task.get("task_id").and_then(Value::as_i64) {
            Some(id) => store.get_task(id),
            None => {
                let source = task.get("task_source").and_then(Value::as_str);
                store.find_task(task_name, source)
            }
        }
        .map_err(|e| format!("task store lookup failed: {}", e))?
        .ok_or_else(|| format!("task '{}' not found in task store", task_name))?;

        let dest = stage_dir.join(clean_name(task_name));
        let staged = self
            .stager
            .stage_all(&row.starting_files, &dest)
            .await
            .map_err(|e| format!("staging failed: {}", e))?;

        let files: Vec<Value> = staged.iter().map(|p| Value::from(p.display().to_string())).collect();
        info!(task = %task_name, count = files.len(), "Prepared task files");
        task.insert("files_to_upload".into(), Value::Sequence(files));
        if !task.contains_key("task_id") {
            task.insert("task_id".into(), Value::from(row.id));
        }
        Ok(())
    }
}
