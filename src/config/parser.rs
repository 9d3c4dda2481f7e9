use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::errors::AutoWebError;
use super::types::{AgentType, TaskConfig};

const MAX_CONFIG_BYTES: u64 = 1_048_576;

/// Load a YAML config file as a raw mapping.
///
/// A file whose top level holds a `template` key is unwrapped to that key's
/// value. An empty file yields an empty mapping.
pub async fn load_config(path: &Path) -> Result<Mapping, AutoWebError> {
    if !path.exists() {
        return Err(AutoWebError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(AutoWebError::Config(format!("{} exceeds 1MB limit", path.display())));
    }

    let content = tokio::fs::read_to_string(path).await?;
    let value: Value = serde_yaml::from_str(&content)?;
    let mut mapping = match value {
        Value::Null => Mapping::new(),
        Value::Mapping(m) => m,
        _ => {
            return Err(AutoWebError::Config(format!(
                "{} must contain a YAML mapping at the top level",
                path.display()
            )))
        }
    };

    if let Some(Value::Mapping(inner)) = mapping.remove("template") {
        mapping = inner;
    }

    Ok(mapping)
}

/// Overlay task values on a template.
///
/// Task values win. When both sides hold a mapping for the same key the two
/// are merged key by key, one level deep. A non-mapping task value replaces
/// the template value outright.
pub fn merge_task_config(task: &Mapping, template: &Mapping) -> Mapping {
    let mut merged = template.clone();
    for (key, value) in task {
        match (value, merged.get_mut(key)) {
            (Value::Mapping(task_inner), Some(Value::Mapping(template_inner))) => {
                for (k, v) in task_inner {
                    template_inner.insert(k.clone(), v.clone());
                }
            }
            _ => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Force the provider selection on a merged mapping.
pub fn inject_agent_type(config: &mut Mapping, agent_type: AgentType) {
    config.insert(Value::from("agent_type"), Value::from(agent_type.as_str()));
}

/// Turn a merged mapping into a typed, validated task config.
pub fn into_task_config(mapping: Mapping) -> Result<TaskConfig, AutoWebError> {
    let config: TaskConfig = serde_yaml::from_value(Value::Mapping(mapping))?;
    validate_task_config(&config)?;
    Ok(config)
}

/// Load and validate a single-task config file (the `run` command).
pub async fn parse_task_config(path: &Path) -> Result<TaskConfig, AutoWebError> {
    into_task_config(load_config(path).await?)
}

fn validate_task_config(config: &TaskConfig) -> Result<(), AutoWebError> {
    let retry = &config.provider().retry;
    if retry.max_total_attempts == 0 {
        return Err(AutoWebError::Config("retry.max_total_attempts must be at least 1".into()));
    }
    if retry.max_agent_attempts == 0 {
        return Err(AutoWebError::Config("retry.max_agent_attempts must be at least 1".into()));
    }
    if retry.max_agent_attempts > retry.max_total_attempts {
        warn!(
            max_agent = retry.max_agent_attempts,
            max_total = retry.max_total_attempts,
            "max_agent_attempts exceeds max_total_attempts; the total budget will bind first"
        );
    }
    if config.prompts.is_empty() {
        warn!(task = %config.task_name, "No prompts configured");
    }
    for file in &config.files_to_upload {
        if !file.exists() {
            warn!(task = %config.task_name, file = %file.display(), "File to upload does not exist");
        }
    }
    Ok(())
}

/// A batch task list: top-level `task_source` plus `tasks`, where each entry
/// is a bare task name or a mapping of per-task overrides.
#[derive(Debug, Clone, Default)]
pub struct TaskList {
    pub task_source: String,
    pub tasks: Vec<Mapping>,
}

pub async fn load_task_list(path: &Path) -> Result<TaskList, AutoWebError> {
    let data = load_config(path).await?;
    parse_task_list(&data)
}

pub fn parse_task_list(data: &Mapping) -> Result<TaskList, AutoWebError> {
    let task_source = data
        .get("task_source")
        .and_then(Value::as_str)
        .unwrap_or("claude_web")
        .to_string();

    let entries = match data.get("tasks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(seq)) => seq.clone(),
        Some(_) => return Err(AutoWebError::Config("`tasks` must be a list".into())),
    };

    let mut tasks = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match entry {
            Value::String(name) => {
                let mut task = Mapping::new();
                task.insert("task_name".into(), Value::String(name));
                task.insert("task_source".into(), Value::String(task_source.clone()));
                tasks.push(task);
            }
            Value::Mapping(mut task) => {
                if !task.contains_key("task_source") {
                    task.insert("task_source".into(), Value::String(task_source.clone()));
                }
                tasks.push(task);
            }
            other => {
                warn!(index, entry = ?other, "Ignoring task entry that is neither a name nor a mapping");
            }
        }
    }

    Ok(TaskList { task_source, tasks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Mapping {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_merge_task_wins_on_scalars() {
        let template = yaml("task_source: wsp\nupload_to_cloud: false\n");
        let task = yaml("upload_to_cloud: true\n");
        let merged = merge_task_config(&task, &template);
        assert_eq!(merged.get("upload_to_cloud"), Some(&Value::Bool(true)));
        assert_eq!(merged.get("task_source"), Some(&Value::from("wsp")));
    }

    #[test]
    fn test_merge_nested_mapping_one_level() {
        let template = yaml(
            "claude_web:\n  project_id: p1\n  retry:\n    max_agent_attempts: 3\n    max_total_attempts: 10\n",
        );
        let task = yaml("claude_web:\n  retry:\n    max_agent_attempts: 1\n");
        let merged = merge_task_config(&task, &template);
        let claude = merged.get("claude_web").and_then(Value::as_mapping).unwrap();
        assert_eq!(claude.get("project_id"), Some(&Value::from("p1")));
        // one level deep only: the nested retry mapping is replaced, not merged
        let retry = claude.get("retry").and_then(Value::as_mapping).unwrap();
        assert_eq!(retry.get("max_agent_attempts"), Some(&Value::from(1)));
        assert!(retry.get("max_total_attempts").is_none());
    }

    #[test]
    fn test_merge_scalar_replaces_mapping() {
        let template = yaml("claude_web:\n  project_id: p1\n");
        let task = yaml("claude_web: disabled\n");
        let merged = merge_task_config(&task, &template);
        assert_eq!(merged.get("claude_web"), Some(&Value::from("disabled")));
    }

    #[test]
    fn test_merge_does_not_mutate_template() {
        let template = yaml("claude_web:\n  project_id: p1\n");
        let task = yaml("claude_web:\n  project_id: p2\n");
        let _ = merge_task_config(&task, &template);
        let claude = template.get("claude_web").and_then(Value::as_mapping).unwrap();
        assert_eq!(claude.get("project_id"), Some(&Value::from("p1")));
    }

    #[test]
    fn test_inject_agent_type() {
        let mut config = yaml("agent_type: claude_web\n");
        inject_agent_type(&mut config, AgentType::ChatGptWeb);
        let typed = into_task_config(config).unwrap();
        assert_eq!(typed.agent_type, AgentType::ChatGptWeb);
    }

    #[test]
    fn test_parse_task_list_mixed_entries() {
        let data = yaml(
            "task_source: modeloff\ntasks:\n  - alpha\n  - task_name: beta\n    task_source: wsp\n  - task_name: gamma\n  - 42\n",
        );
        let list = parse_task_list(&data).unwrap();
        assert_eq!(list.task_source, "modeloff");
        assert_eq!(list.tasks.len(), 3);
        assert_eq!(list.tasks[0].get("task_name"), Some(&Value::from("alpha")));
        assert_eq!(list.tasks[0].get("task_source"), Some(&Value::from("modeloff")));
        assert_eq!(list.tasks[1].get("task_source"), Some(&Value::from("wsp")));
        assert_eq!(list.tasks[2].get("task_source"), Some(&Value::from("modeloff")));
    }

    #[test]
    fn test_zero_total_attempts_rejected() {
        let config = yaml("claude_web:\n  retry:\n    max_total_attempts: 0\n");
        assert!(matches!(into_task_config(config), Err(AutoWebError::Config(_))));
    }

    #[tokio::test]
    async fn test_load_config_unwraps_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.yaml");
        std::fs::write(&path, "template:\n  task_source: wsp\n  prompts:\n    - hello\n").unwrap();
        let mapping = load_config(&path).await.unwrap();
        assert_eq!(mapping.get("task_source"), Some(&Value::from("wsp")));
        assert!(mapping.get("template").is_none());
    }

    #[tokio::test]
    async fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/config.yaml")).await.unwrap_err();
        assert!(matches!(err, AutoWebError::Config(_)));
    }

    #[tokio::test]
    async fn test_load_config_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "").unwrap();
        assert!(load_config(&path).await.unwrap().is_empty());
    }
}
