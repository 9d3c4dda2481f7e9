//! Browser access behind three traits so the engine never touches the
//! automation backend directly.
//!
//! The shipped backend drives Playwright through a resident Node.js process
//! ([`playwright::PlaywrightProvider`]); in CDP mode it attaches to a real
//! Chrome launched by [`chrome`].

pub mod bridge;
pub mod chrome;
pub mod downloads;
pub mod playwright;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AutoWebError;

pub use playwright::PlaywrightProvider;

/// One tab. Selectors are Playwright selectors.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), AutoWebError>;

    async fn url(&self) -> Result<String, AutoWebError>;

    /// Evaluate a JS function expression with one JSON argument.
    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value, AutoWebError>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AutoWebError>;

    async fn hover(&self, selector: &str, timeout: Duration) -> Result<(), AutoWebError>;

    async fn fill(&self, selector: &str, text: &str) -> Result<(), AutoWebError>;

    async fn press(&self, selector: &str, key: &str) -> Result<(), AutoWebError>;

    async fn is_visible(&self, selector: &str) -> Result<bool, AutoWebError>;

    async fn count(&self, selector: &str) -> Result<usize, AutoWebError>;

    async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>, AutoWebError>;

    /// Attach files to a (possibly hidden) `<input type=file>`.
    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), AutoWebError>;

    /// Click `trigger` and answer the resulting native file chooser.
    async fn upload_via_chooser(
        &self,
        trigger: &str,
        files: &[PathBuf],
        timeout: Duration,
    ) -> Result<(), AutoWebError>;

    /// Click `selector` and save the download it triggers into `dest_dir`.
    /// `Ok(None)` when no download event arrived in time (CDP-attached
    /// browsers write straight to disk instead).
    async fn download_via_click(
        &self,
        selector: &str,
        dest_dir: &Path,
        timeout: Duration,
    ) -> Result<Option<PathBuf>, AutoWebError>;

    async fn close(&self) -> Result<(), AutoWebError>;
}

/// A connected browser with one reusable context.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Close every page left open by earlier attempts. Returns how many.
    async fn close_stale_pages(&self) -> Result<usize, AutoWebError>;

    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, AutoWebError>;

    /// Directory the browser itself writes downloads to, when it does so
    /// without a download event.
    fn download_dir(&self) -> Option<PathBuf>;

    /// Persist cookies/local storage after a manual login (classic mode).
    async fn save_auth_state(&self) -> Result<(), AutoWebError>;

    /// Release the session. For an attached Chrome the browser stays up.
    async fn close(&self) -> Result<(), AutoWebError>;
}

#[async_trait]
pub trait BrowserProvider: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrowserSession>, AutoWebError>;
}
