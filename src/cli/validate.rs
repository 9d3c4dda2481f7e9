use serde_yaml::Value;

use crate::cli::commands::ValidateArgs;
use crate::config;
use crate::errors::AutoWebError;

/// Accepts either a single-task config or a task list (`tasks:` key).
pub async fn handle_validate(args: ValidateArgs) -> Result<bool, AutoWebError> {
    let data = config::load_config(&args.config).await?;

    if data.contains_key("tasks") {
        let list = config::parse_task_list(&data)?;
        let unnamed = list
            .tasks
            .iter()
            .filter(|t| t.get("task_name").and_then(Value::as_str).is_none())
            .count();
        if unnamed > 0 {
            return Err(AutoWebError::Config(format!("{} task entries have no task_name", unnamed)));
        }
        println!("Task list is valid: {} ({} tasks, source {})", args.config.display(), list.tasks.len(), list.task_source);
        return Ok(true);
    }

    let task = config::into_task_config(data)?;
    let retry = &task.provider().retry;
    println!("Configuration is valid: {}", args.config.display());
    println!("  Task:      {}", task.task_name);
    println!("  Provider:  {}", task.agent_type);
    println!("  Prompts:   {}", task.prompts.len());
    println!("  Files:     {}", task.files_to_upload.len());
    println!("  Attempts:  {} agent / {} total", retry.max_agent_attempts, retry.max_total_attempts);
    Ok(true)
}
