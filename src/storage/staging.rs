use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::{with_retry, AutoWebError, RetryConfig};

/// Copies a task's starting files into a local input directory. Sources may
/// be local paths, `http(s)://` URLs or `s3://` URIs (through the `aws` CLI).
pub struct FileStager {
    client: Client,
    retry: RetryConfig,
    aws_cli: String,
}

impl Default for FileStager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStager {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            retry: RetryConfig::default(),
            aws_cli: "aws".into(),
        }
    }

    pub fn with_aws_cli(mut self, program: impl Into<String>) -> Self {
        self.aws_cli = program.into();
        self
    }

    /// Stage every source; the first failure aborts and is returned.
    pub async fn stage_all(&self, sources: &[String], dest_dir: &Path) -> Result<Vec<PathBuf>, AutoWebError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let mut staged = Vec::with_capacity(sources.len());
        for source in sources {
            let path = with_retry("stage_file", &self.retry, || self.stage(source, dest_dir)).await?;
            staged.push(path);
        }
        info!(count = staged.len(), dir = %dest_dir.display(), "Staged task files");
        Ok(staged)
    }

    pub async fn stage(&self, source: &str, dest_dir: &Path) -> Result<PathBuf, AutoWebError> {
        let name = file_name_of(source)?;
        let dest = dest_dir.join(&name);

        if source.starts_with("s3://") {
            let output = Command::new(&self.aws_cli)
                .args(["s3", "cp", source])
                .arg(&dest)
                .output()
                .await
                .map_err(|e| AutoWebError::Staging(format!("Failed to run {}: {}", self.aws_cli, e)))?;
            if !output.status.success() {
                return Err(AutoWebError::Staging(format!(
                    "S3 download of {} failed: {}",
                    source,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        } else if source.starts_with("http://") || source.starts_with("https://") {
            let resp = self
                .client
                .get(source)
                .send()
                .await
                .map_err(|e| AutoWebError::Http(format!("GET {} failed: {}", source, e)))?;
            let status = resp.status();
            if !status.is_success() {
                let err = format!("GET {} returned {}", source, status);
                // 4xx will not fix itself
                return Err(if status.is_client_error() {
                    AutoWebError::Validation(err)
                } else {
                    AutoWebError::Http(err)
                });
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| AutoWebError::Http(format!("Reading {} failed: {}", source, e)))?;
            tokio::fs::write(&dest, &bytes).await?;
        } else {
            let src = Path::new(source.strip_prefix("file://").unwrap_or(source));
            if !src.is_file() {
                return Err(AutoWebError::Validation(format!("Task file not found: {}", source)));
            }
            if src != dest {
                tokio::fs::copy(src, &dest).await?;
            }
        }

        if !dest.is_file() {
            warn!(source, dest = %dest.display(), "Staging reported success but no file was written");
            return Err(AutoWebError::Staging(format!("Nothing written for {}", source)));
        }
        info!(source, dest = %dest.display(), "Staged file");
        Ok(dest)
    }
}

fn file_name_of(source: &str) -> Result<String, AutoWebError> {
    let trimmed = source.split(['?', '#']).next().unwrap_or(source);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AutoWebError::Validation(format!("No file name in {}", source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of("s3://bucket/tasks/input.xlsx").unwrap(), "input.xlsx");
        assert_eq!(file_name_of("https://host/a/b.csv?sig=1").unwrap(), "b.csv");
        assert_eq!(file_name_of("/tmp/local.xlsx").unwrap(), "local.xlsx");
        assert!(file_name_of("s3://bucket/dir/").is_err());
    }

    #[tokio::test]
    async fn test_stage_local_files() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let a = src_dir.path().join("a.xlsx");
        let b = src_dir.path().join("b.pdf");
        std::fs::write(&a, b"aaa").unwrap();
        std::fs::write(&b, b"bbb").unwrap();

        let sources = vec![a.display().to_string(), format!("file://{}", b.display())];
        let staged = FileStager::new()
            .stage_all(&sources, &dest_dir.path().join("inputs"))
            .await
            .unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(std::fs::read(&staged[0]).unwrap(), b"aaa");
        assert!(staged[1].ends_with("inputs/b.pdf"));
    }

    #[tokio::test]
    async fn test_missing_local_file_fails_fast() {
        let dest_dir = tempfile::tempdir().unwrap();
        let result = FileStager::new()
            .stage_all(&["/definitely/not/here.xlsx".to_string()], dest_dir.path())
            .await;
        assert!(matches!(result, Err(AutoWebError::Validation(_))));
    }

    #[tokio::test]
    async fn test_s3_failure_reports_staging_error() {
        let dest_dir = tempfile::tempdir().unwrap();
        let stager = FileStager { retry: RetryConfig { max_retries: 0 }, ..FileStager::new() }
            .with_aws_cli("false");
        let result = stager.stage("s3://bucket/input.xlsx", dest_dir.path()).await;
        assert!(matches!(result, Err(AutoWebError::Staging(_))));
    }
}
