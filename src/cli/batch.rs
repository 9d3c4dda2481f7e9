use std::sync::Arc;

use console::style;
use serde_yaml::Mapping;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cli::commands::BatchArgs;
use crate::cli::run::WebTaskExecutor;
use crate::config::{self, AgentType};
use crate::db::Database;
use crate::engine::{tasks_from_store, BatchOptions, BatchReport, BatchRunner};
use crate::errors::AutoWebError;

pub async fn handle_batch(args: BatchArgs, shutdown: CancellationToken) -> Result<bool, AutoWebError> {
    let agent_type = AgentType::from_provider(&args.provider);
    let template = match &args.template {
        Some(path) => config::load_config(path).await?,
        None => Mapping::new(),
    };

    let fetch_from_db = args.fetch_from_db || args.from_db;
    let store = if fetch_from_db { Some(Database::new(&args.db)?) } else { None };

    let tasks = match (&store, &args.tasks) {
        (Some(db), _) if args.from_db => {
            let rows = db.list_tasks(Some(&args.source), false)?;
            if rows.is_empty() {
                return Err(AutoWebError::Config(format!("No tasks found in task store for source: {}", args.source)));
            }
            info!(count = rows.len(), source = %args.source, "Loaded tasks from task store");
            tasks_from_store(&rows)
        }
        (_, Some(path)) => {
            let list = config::load_task_list(path).await?;
            info!(count = list.tasks.len(), file = %path.display(), "Loaded tasks");
            list.tasks
        }
        _ => return Err(AutoWebError::Config("Either --tasks or --from-db must be given".into())),
    };

    let options = BatchOptions {
        start: args.start,
        end: args.end,
        dry_run: args.dry_run,
        continue_on_failure: !args.stop_on_failure,
        default_timeout: args.timeout,
        stage_dir: fetch_from_db.then(|| args.stage_dir.clone()),
    };
    let executor = Arc::new(WebTaskExecutor { store: store.clone(), archive_dir: args.archive_dir.clone() });
    let mut runner = BatchRunner::new(executor, template, agent_type, options, shutdown);
    if let Some(db) = store {
        runner = runner.with_store(db);
    }

    let report = runner.run(&tasks).await;
    match report.save(&args.results_dir).await {
        Ok(path) => info!(path = %path.display(), "Batch results saved"),
        Err(e) => error!(error = %e, "Failed to save batch results"),
    }
    print_summary(&report);

    Ok(report.failed == 0)
}

fn print_summary(report: &BatchReport) {
    println!();
    println!("{}", style("BATCH COMPLETE").bold());
    println!("  Total:      {}", report.total);
    println!("  Succeeded:  {}", style(report.succeeded).green());
    println!("  Failed:     {}", if report.failed > 0 { style(report.failed).red() } else { style(report.failed).dim() });
    println!("  Skipped:    {}", style(report.skipped).yellow());

    for task in report.tasks.iter().filter(|t| !t.success) {
        let label = if task.skipped { style("skipped").yellow() } else { style("failed").red() };
        println!("    [{}] {} ({})", task.index, task.task_name, label);
    }
}
