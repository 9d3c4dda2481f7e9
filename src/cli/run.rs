use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::DefaultAgentFactory;
use crate::browser::PlaywrightProvider;
use crate::cli::commands::RunArgs;
use crate::config::{self, TaskConfig};
use crate::db::Database;
use crate::engine::{TaskExecutor, TaskRunner};
use crate::errors::AutoWebError;
use crate::storage::LocalArchiveUploader;
use crate::utils::format_duration;
use crate::validators::ExcelValidator;

/// Production wiring of a runner for one task: Playwright browser, the
/// registered web agents, the workbook validator and, when the task asks for
/// it, the local archive uploader.
pub fn build_runner(
    config: &TaskConfig,
    store: Option<Database>,
    archive_dir: &Path,
    shutdown: CancellationToken,
) -> TaskRunner {
    let provider = Arc::new(PlaywrightProvider::new(config.provider().browser.clone()));
    let runner = TaskRunner::new(
        provider,
        Arc::new(DefaultAgentFactory),
        Arc::new(ExcelValidator::default()),
        shutdown,
    );
    if config.upload_to_cloud {
        runner.with_uploader(Arc::new(LocalArchiveUploader::new(archive_dir, store)))
    } else {
        runner
    }
}

/// Batch executor that wires a fresh runner per task.
pub struct WebTaskExecutor {
    pub store: Option<Database>,
    pub archive_dir: PathBuf,
}

#[async_trait]
impl TaskExecutor for WebTaskExecutor {
    async fn execute(&self, config: TaskConfig, cancel: CancellationToken) -> Result<bool, AutoWebError> {
        let runner = build_runner(&config, self.store.clone(), &self.archive_dir, cancel.clone());
        runner.execute(config, cancel).await
    }
}

pub async fn handle_run(args: RunArgs, shutdown: CancellationToken) -> Result<bool, AutoWebError> {
    let config = config::parse_task_config(&args.config).await?;
    info!(config = %args.config.display(), task = %config.task_name, provider = %config.agent_type, "Loaded task config");

    let store = args.db.as_deref().map(Database::new).transpose()?;

    if let Some(secs) = args.max_runtime {
        let deadline = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            if !deadline.is_cancelled() {
                warn!(max_runtime_secs = secs, "Max runtime reached, stopping");
                deadline.cancel();
            }
        });
    }

    let runner = build_runner(&config, store, &args.archive_dir, shutdown).hold_browser(args.hold);
    let started = tokio::time::Instant::now();
    let outcome = runner.run(&config).await?;

    let status = outcome
        .final_status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "NOT_RUN".to_string());
    let verdict = if outcome.success { style("SUCCESS").green().bold() } else { style("FAILED").red().bold() };
    println!();
    println!("{} {}", verdict, style(&config.task_name).bold());
    println!("  Status:         {}", status);
    println!("  Attempts:       {} total, {} agent", outcome.total_attempts, outcome.agent_attempts);
    println!("  Records:        {}", outcome.records.len());
    println!("  Duration:       {}", format_duration(started.elapsed()));

    Ok(outcome.success)
}
