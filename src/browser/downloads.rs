use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::errors::AutoWebError;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Regular files currently in `dir`, ignoring in-progress Chrome downloads.
pub async fn snapshot(dir: &Path) -> Result<HashSet<PathBuf>, AutoWebError> {
    let mut files = HashSet::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && !is_partial(&path) {
            files.insert(path);
        }
    }
    Ok(files)
}

fn is_partial(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("crdownload") | Some("tmp") | Some("part")
    )
}

/// Wait for a file that was not in `before` to appear in `dir` and stop
/// growing. Returns `None` on timeout.
pub async fn wait_for_new_file(
    dir: &Path,
    before: &HashSet<PathBuf>,
    timeout: Duration,
) -> Result<Option<PathBuf>, AutoWebError> {
    let deadline = Instant::now() + timeout;
    let mut candidate: Option<(PathBuf, u64)> = None;

    while Instant::now() < deadline {
        let current = snapshot(dir).await?;
        let mut fresh: Vec<_> = current.difference(before).cloned().collect();
        fresh.sort();

        if let Some(path) = fresh.into_iter().next() {
            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            match &candidate {
                Some((prev, prev_size)) if *prev == path && *prev_size == size && size > 0 => {
                    return Ok(Some(path));
                }
                _ => {
                    debug!(file = %path.display(), size, "Download in progress");
                    candidate = Some((path, size));
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Ok(None)
}
