use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::audit::clean_name;
use crate::errors::AutoWebError;

/// Directories of one day's run: `{base}/{YYYYMMDD}_{prefix}/`.
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub run_dir: PathBuf,
    pub solutions_dir: PathBuf,
    pub json_logs_dir: PathBuf,
}

pub async fn create_run_directory(base_dir: &Path, prefix: &str) -> Result<RunLayout, AutoWebError> {
    let run_dir = base_dir.join(format!("{}_{}", Local::now().format("%Y%m%d"), prefix));
    let layout = RunLayout {
        solutions_dir: run_dir.join("solutions"),
        json_logs_dir: run_dir.join("json_logs"),
        run_dir,
    };
    tokio::fs::create_dir_all(&layout.solutions_dir).await?;
    tokio::fs::create_dir_all(&layout.json_logs_dir).await?;
    Ok(layout)
}

/// Case-insensitive extension check against entries like `.xlsx`.
pub fn has_expected_extension(path: &Path, expected: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    expected
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

/// Rename a validated artifact to
/// `{YYYYMMDD_HHMMSS}_{task}_Solution_{agent}_Model{ext}` in its directory,
/// appending `_N` until the name is free.
pub async fn rename_solution_file(path: &Path, task_name: &str, agent_name: &str) -> Result<PathBuf, AutoWebError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = format!(
        "{}_{}_Solution_{}_Model",
        Local::now().format("%Y%m%d_%H%M%S"),
        clean_name(task_name),
        clean_name(agent_name)
    );

    let mut target = dir.join(format!("{}{}", stem, ext));
    let mut counter = 1;
    while tokio::fs::try_exists(&target).await? {
        target = dir.join(format!("{}_{}{}", stem, counter, ext));
        counter += 1;
    }

    tokio::fs::rename(path, &target).await?;
    info!(from = %path.display(), to = %target.display(), "Renamed solution file");
    Ok(target)
}
