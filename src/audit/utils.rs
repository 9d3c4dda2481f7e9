use std::path::Path;

use regex::Regex;
use std::sync::LazyLock;

use crate::errors::AutoWebError;

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9._-]").expect("valid regex"));

/// Atomic file write: write to temp, then rename
pub async fn atomic_write(path: &Path, content: &str) -> Result<(), AutoWebError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Make a task or agent name safe for use inside a file name.
///
/// Path separators become `-`, spaces become `_`, anything else outside
/// `[A-Za-z0-9._-]` is dropped.
pub fn clean_name(name: &str) -> String {
    let name = name.replace(['/', '\\'], "-").replace(' ', "_");
    UNSAFE_NAME_CHARS.replace_all(&name, "").into_owned()
}
