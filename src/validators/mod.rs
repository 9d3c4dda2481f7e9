//! Structural checks on downloaded artifacts.

pub mod excel;

use std::path::Path;

use crate::engine::status::TaskStatus;

pub use excel::ExcelValidator;

/// Verdict on one artifact. `status` is the task status to record when the
/// artifact is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub status: TaskStatus,
    pub message: String,
}

impl Validation {
    pub fn valid(message: impl Into<String>) -> Self {
        Self { is_valid: true, status: TaskStatus::Success, message: message.into() }
    }

    pub fn invalid(status: TaskStatus, message: impl Into<String>) -> Self {
        Self { is_valid: false, status, message: message.into() }
    }
}

pub trait ArtifactValidator: Send + Sync {
    fn validate(&self, path: &Path) -> Validation;
}
