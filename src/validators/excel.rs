use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::engine::status::TaskStatus;
use super::{ArtifactValidator, Validation};

static SHEET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<sheet\b[^>]*?\bname="([^"]*)""#).expect("valid regex"));

/// Checks that a workbook opens and carries the expected sheets.
#[derive(Debug, Clone)]
pub struct ExcelValidator {
    pub require_model_sheet: bool,
    pub require_answers_sheet: bool,
}

impl Default for ExcelValidator {
    fn default() -> Self {
        Self { require_model_sheet: true, require_answers_sheet: true }
    }
}

/// Lowercased sheet names from the workbook part of an xlsx package.
pub fn sheet_names(path: &Path) -> Result<Vec<String>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut workbook = archive
        .by_name("xl/workbook.xml")
        .map_err(|e| format!("no workbook part: {}", e))?;
    let mut xml = String::new();
    workbook.read_to_string(&mut xml).map_err(|e| e.to_string())?;

    Ok(SHEET_NAME
        .captures_iter(&xml)
        .map(|c| unescape(&c[1]).to_lowercase())
        .collect())
}

fn unescape(name: &str) -> String {
    name.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

impl ArtifactValidator for ExcelValidator {
    fn validate(&self, path: &Path) -> Validation {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Validation::invalid(
                    TaskStatus::DownloadFailed,
                    format!("File does not exist: {}", path.display()),
                )
            }
        };
        if size == 0 {
            return Validation::invalid(TaskStatus::DownloadFailed, format!("File is empty: {}", path.display()));
        }

        let sheets = match sheet_names(path) {
            Ok(sheets) => sheets,
            Err(e) => {
                return Validation::invalid(TaskStatus::FileCorrupted, format!("Cannot open Excel file: {}", e));
            }
        };
        debug!(file = %path.display(), ?sheets, "Workbook sheets");

        let has_model = sheets.iter().any(|s| s.contains("model"));
        let has_answers = sheets.iter().any(|s| s.contains("answer"));
        let missing = match (
            self.require_model_sheet && !has_model,
            self.require_answers_sheet && !has_answers,
        ) {
            (true, true) => Some("Missing both 'model' and 'answers' sheets"),
            (true, false) => Some("Missing 'model' sheet"),
            (false, true) => Some("Missing 'answers' sheet"),
            (false, false) => None,
        };
        match missing {
            Some(reason) => Validation::invalid(TaskStatus::MissingSheets, format!("{}. Found: {:?}", reason, sheets)),
            None => Validation::valid("Valid"),
        }
    }
}
