use console::style;
use serde::Deserialize;

use crate::cli::commands::{TasksArgs, TasksCommand};
use crate::db::{Database, NewTask};
use crate::errors::AutoWebError;

/// Import files are a bare list of task definitions or a mapping with a
/// `tasks` list. JSON parses as YAML too.
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    List(Vec<NewTask>),
    Wrapped { tasks: Vec<NewTask> },
}

pub fn parse_task_definitions(content: &str) -> Result<Vec<NewTask>, AutoWebError> {
    let parsed: ImportFile = serde_yaml::from_str(content)
        .map_err(|e| AutoWebError::Config(format!("Invalid task definitions: {}", e)))?;
    let tasks = match parsed {
        ImportFile::List(tasks) | ImportFile::Wrapped { tasks } => tasks,
    };
    if let Some(index) = tasks.iter().position(|t| t.task_name.trim().is_empty()) {
        return Err(AutoWebError::Config(format!("Task definition {} has an empty task_name", index)));
    }
    Ok(tasks)
}

pub async fn handle_tasks(args: TasksArgs) -> Result<bool, AutoWebError> {
    let db = Database::new(&args.db)?;

    match args.command {
        TasksCommand::List { source, all, json } => {
            let rows = db.list_tasks(source.as_deref(), all)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(true);
            }
            if rows.is_empty() {
                println!("No tasks stored in {}", args.db.display());
                return Ok(true);
            }
            println!("{:>5}  {:<40} {:<12} {:>6}", "ID", "TASK", "SOURCE", "FILES");
            for row in &rows {
                let name = if row.deprecated {
                    style(&row.task_name).dim().strikethrough().to_string()
                } else {
                    row.task_name.clone()
                };
                println!(
                    "{:>5}  {:<40} {:<12} {:>6}",
                    row.id,
                    name,
                    row.task_source.as_deref().unwrap_or("-"),
                    row.starting_files.len()
                );
            }
            println!("\n{} tasks", rows.len());
        }
        TasksCommand::Import { file } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let tasks = parse_task_definitions(&content)?;
            for task in &tasks {
                let id = db.insert_task(task)?;
                println!("{} {} (id {})", style("+").green(), task.task_name, id);
            }
            println!("\nImported {} tasks into {}", tasks.len(), args.db.display());
        }
        TasksCommand::Deprecate { id, reason } => {
            if !db.deprecate_task(id, &reason)? {
                eprintln!("No task with id {}", id);
                return Ok(false);
            }
            println!("Task {} deprecated: {}", id, reason);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_list() {
        let tasks = parse_task_definitions(
            "- task_name: dcf\n  task_source: wsp\n  task_starting_files: [s3://bucket/dcf.xlsx]\n- task_name: lbo\n",
        )
        .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].starting_files, vec!["s3://bucket/dcf.xlsx".to_string()]);
        assert!(tasks[1].task_source.is_none());
    }

    #[test]
    fn test_parse_wrapped_json() {
        let tasks = parse_task_definitions(r#"{"tasks": [{"task_name": "dcf", "starting_files": ["a.xlsx"]}]}"#).unwrap();
        assert_eq!(tasks[0].task_name, "dcf");
        assert_eq!(tasks[0].starting_files.len(), 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(parse_task_definitions("- task_name: ''\n").is_err());
        assert!(parse_task_definitions("just a string").is_err());
    }
}
