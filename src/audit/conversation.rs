use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use serde::Serialize;
use tracing::info;

use crate::agents::ConversationMessage;
use crate::errors::AutoWebError;
use super::utils::{atomic_write, clean_name};

#[derive(Debug, Serialize)]
struct ConversationFile<'a> {
    task_name: &'a str,
    task_source: &'a str,
    timestamp: String,
    messages: &'a [ConversationMessage],
}

/// Persist a conversation as `conversation_{ts}_{task}.json` under `dir`.
pub async fn save_conversation(
    dir: &Path,
    task_name: &str,
    task_source: &str,
    messages: &[ConversationMessage],
) -> Result<PathBuf, AutoWebError> {
    tokio::fs::create_dir_all(dir).await?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("conversation_{}_{}.json", timestamp, clean_name(task_name)));

    let file = ConversationFile {
        task_name,
        task_source,
        timestamp: Utc::now().to_rfc3339(),
        messages,
    };
    atomic_write(&path, &serde_json::to_string_pretty(&file)?).await?;
    info!(path = %path.display(), messages = messages.len(), "Saved conversation history");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Role;

    #[tokio::test]
    async fn test_save_conversation_layout() {
        let dir = tempfile::tempdir().unwrap();
        let messages = vec![
            ConversationMessage::new(Role::User, "Build the model"),
            ConversationMessage::new(Role::Assistant, "Done, see workbook."),
        ];
        let path = save_conversation(&dir.path().join("conversations"), "wsp/42", "wsp", &messages)
            .await
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("conversation_"));
        assert!(name.ends_with("_wsp-42.json"));

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["task_name"], "wsp/42");
        assert_eq!(raw["messages"][0]["role"], "user");
        assert_eq!(raw["messages"][1]["content"], "Done, see workbook.");
    }
}
