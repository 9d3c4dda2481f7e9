use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserPage;
use crate::config::ProviderSettings;
use crate::detector::PageSignals;
use crate::errors::AutoWebError;
use super::base::{click_download, host_of, AgentContext, AgentState, ConversationMessage, WebAgent};

pub const CLAUDE_BASE_URL: &str = "https://claude.ai";
const CLAUDE_HOST: &str = "claude.ai";

const CHAT_INPUTS: [&str; 3] = [
    r#"div[contenteditable="true"][data-placeholder]"#,
    r#"div[enterkeyhint="enter"]"#,
    r#"fieldset div[contenteditable="true"]"#,
];
const SEND_BUTTONS: [&str; 2] = [
    r#"button[aria-label="Send message"]"#,
    r#"button:has(svg[viewBox="0 0 32 32"])"#,
];
const STOP_BUTTONS: [&str; 2] = [r#"button[aria-label="Stop response"]"#, r#"button:has-text("Stop")"#];
const STREAMING: &str = r#"div[data-is-streaming="true"]"#;
const RESPONSE_UNITS: &str = "div[data-is-streaming]";
const RATE_LIMIT: &str = "text=You've reached";
const LOGIN_BUTTON: &str = r#"a:has-text("Log in")"#;
const FILE_INPUT: &str = r#"input[type="file"]"#;
const ATTACH_BUTTON: &str = r#"button[aria-label="Attach files"]"#;
const EXTENDED_THINKING: [&str; 2] = [
    r#"role=button[name="Extended thinking"]"#,
    r#"button[aria-label="Extended thinking"]"#,
];
const TOGGLE_MENU: [&str; 2] = [r#"role=button[name="Toggle menu"]"#, r#"button[aria-label="Toggle menu"]"#];
const WEB_SEARCH: [&str; 2] = [
    r#"role=menuitemcheckbox[name="Web search"]"#,
    r#"div[role="menuitemcheckbox"]:has-text("Web search")"#,
];
const DOWNLOAD_ALL: &str = r#"role=button[name="Download all"]"#;
const DOWNLOAD_BUTTONS: [&str; 2] = [r#"button:has-text("Download")"#, r#"[aria-label="Download"]"#];

const NAV_TIMEOUT: Duration = Duration::from_secs(60);
const SEND_CONFIRM_WINDOW: Duration = Duration::from_secs(30);

pub(crate) const EXTRACT_SCRIPT: &str = r#"() => {
  for (const sel of ['div[data-is-streaming="false"]', 'div.font-claude-message', 'div[class*="prose"]']) {
    const nodes = document.querySelectorAll(sel);
    if (!nodes.length) continue;
    const clone = nodes[nodes.length - 1].cloneNode(true);
    clone.querySelectorAll('pre, code').forEach(n => n.remove());
    const text = clone.innerText.trim();
    if (text) return text;
  }
  return null;
}"#;

/// First selector in `selectors` with a visible match.
async fn first_visible<'a>(page: &dyn BrowserPage, selectors: &[&'a str]) -> Option<&'a str> {
    for selector in selectors {
        match page.is_visible(selector).await {
            Ok(true) => return Some(selector),
            Ok(false) => {}
            Err(e) => debug!(selector, error = %e, "Visibility probe failed"),
        }
    }
    None
}

pub struct ClaudeSignals {
    page: Arc<dyn BrowserPage>,
}

impl ClaudeSignals {
    pub fn new(page: Arc<dyn BrowserPage>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl PageSignals for ClaudeSignals {
    async fn is_generating(&self) -> Result<bool, AutoWebError> {
        if self.page.count(STREAMING).await? > 0 {
            return Ok(true);
        }
        for selector in STOP_BUTTONS {
            if self.page.is_visible(selector).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn extract_latest_response(&self) -> Result<Option<String>, AutoWebError> {
        let v = self.page.evaluate(EXTRACT_SCRIPT, Value::Null).await?;
        Ok(v.as_str().map(str::to_string).filter(|t| !t.is_empty()))
    }

    async fn count_response_units(&self) -> Result<usize, AutoWebError> {
        self.page.count(RESPONSE_UNITS).await
    }
}

/// claude.ai chat, optionally inside a project, with extended thinking and
/// web search switched on.
pub struct ClaudeAgent {
    ctx: AgentContext,
    settings: ProviderSettings,
    signals: Arc<dyn PageSignals>,
}

impl ClaudeAgent {
    pub fn new(ctx: AgentContext, settings: ProviderSettings) -> Self {
        let signals = Arc::new(ClaudeSignals::new(ctx.page.clone()));
        Self::with_signals(ctx, settings, signals)
    }

    pub fn with_signals(ctx: AgentContext, settings: ProviderSettings, signals: Arc<dyn PageSignals>) -> Self {
        Self { ctx, settings, signals }
    }

    fn project_id(&self) -> Option<String> {
        if let Some(url) = self.settings.project_url.as_deref() {
            if let Some((_, rest)) = url.split_once("/project/") {
                let id = rest.split(['/', '?']).next().unwrap_or_default();
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }
        self.settings.project_id.clone().filter(|id| !id.is_empty())
    }

    fn page(&self) -> &dyn BrowserPage {
        self.ctx.page.as_ref()
    }

    async fn ensure_extended_thinking(&self) -> Result<bool, AutoWebError> {
        let Some(button) = first_visible(self.page(), &EXTENDED_THINKING).await else {
            warn!("Extended thinking button not found");
            return Ok(false);
        };
        if self.page().get_attribute(button, "aria-pressed").await?.as_deref() == Some("true") {
            info!("Extended thinking already enabled");
            return Ok(true);
        }
        self.page().click(button, Duration::from_secs(3)).await?;
        self.ctx.pause(Duration::from_millis(500)).await;
        let pressed = self.page().get_attribute(button, "aria-pressed").await?.as_deref() == Some("true");
        if pressed {
            info!("Extended thinking enabled");
        } else {
            warn!("Failed to enable extended thinking");
        }
        Ok(pressed)
    }

    async fn ensure_web_search(&self) -> Result<bool, AutoWebError> {
        let Some(menu) = first_visible(self.page(), &TOGGLE_MENU).await else {
            warn!("Toggle menu button not found");
            return Ok(false);
        };
        self.page().click(menu, Duration::from_secs(3)).await?;
        self.ctx.pause(Duration::from_millis(500)).await;

        let Some(item) = first_visible(self.page(), &WEB_SEARCH).await else {
            warn!("Web search toggle not found");
            self.page().press("body", "Escape").await?;
            return Ok(false);
        };
        if self.page().get_attribute(item, "aria-checked").await?.as_deref() == Some("true") {
            info!("Web search already enabled");
            self.page().press("body", "Escape").await?;
            return Ok(true);
        }
        self.page().click(item, Duration::from_secs(3)).await?;
        self.ctx.pause(Duration::from_millis(300)).await;
        info!("Web search enabled");
        Ok(true)
    }

    async fn download_buttons(&self) -> Option<(&'static str, usize)> {
        for selector in DOWNLOAD_BUTTONS {
            match self.page().count(selector).await {
                Ok(n) if n > 0 => return Some((selector, n)),
                Ok(_) => {}
                Err(e) => debug!(selector, error = %e, "Download button probe failed"),
            }
        }
        None
    }
}

#[async_trait]
impl WebAgent for ClaudeAgent {
    fn context(&self) -> &AgentContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.ctx
    }

    fn home_url(&self) -> String {
        match self.project_id() {
            Some(id) => format!("{}/project/{}", CLAUDE_BASE_URL, id),
            None => format!("{}/new", CLAUDE_BASE_URL),
        }
    }

    fn owns_url(&self, url: &str) -> bool {
        let host = host_of(url);
        host == CLAUDE_HOST || host.ends_with(".claude.ai")
    }

    async fn navigate_to_new_chat(&mut self) -> bool {
        let url = self.home_url();
        info!(url = %url, "Navigating to Claude");
        if let Err(e) = self.page().goto(&url, NAV_TIMEOUT).await {
            error!(error = %e, "Navigation failed");
            return false;
        }
        self.ctx.pause(Duration::from_secs(2)).await;

        let state = self.get_state().await;
        if state == AgentState::AuthRequired {
            warn!("Authentication required, please log in");
            return true;
        }
        info!(state = %state, "Page loaded");
        if !self.ensure_features_enabled().await {
            warn!("Some Claude features could not be enabled");
        }
        true
    }

    async fn get_state(&self) -> AgentState {
        let page = self.page();
        match page.count(RATE_LIMIT).await {
            Ok(n) if n > 0 => return AgentState::RateLimited,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "State probe failed");
                return AgentState::Unknown;
            }
        }
        if page.is_visible(LOGIN_BUTTON).await.unwrap_or(false) {
            return AgentState::AuthRequired;
        }
        if first_visible(page, &STOP_BUTTONS).await.is_some() {
            return AgentState::Running;
        }
        if first_visible(page, &CHAT_INPUTS).await.is_some() {
            return AgentState::Ready;
        }
        AgentState::Unknown
    }

    async fn upload_files(&mut self, files: &[PathBuf]) -> bool {
        if files.is_empty() {
            return true;
        }
        info!(count = files.len(), "Uploading files");
        let page = self.page();
        let result = match page.count(FILE_INPUT).await {
            Ok(n) if n > 0 => page.set_input_files(FILE_INPUT, files).await,
            _ => match page.count(ATTACH_BUTTON).await {
                Ok(n) if n > 0 => page.upload_via_chooser(ATTACH_BUTTON, files, Duration::from_secs(10)).await,
                _ => Err(AutoWebError::Upload("could not find file upload mechanism".into())),
            },
        };
        if let Err(e) = result {
            error!(error = %e, "File upload failed");
            return false;
        }
        self.ctx.pause(Duration::from_secs(2 + files.len() as u64)).await;
        info!(count = files.len(), "Files uploaded");
        true
    }

    async fn submit_prompt(&mut self, prompt: &str, prompt_number: u32) -> bool {
        info!(prompt_number, chars = prompt.chars().count(), "Submitting prompt");
        let pre_prompt = self.ctx.detector.capture_pre_prompt(self.signals.as_ref()).await;

        let page = self.ctx.page.clone();
        let Some(input) = first_visible(page.as_ref(), &CHAT_INPUTS).await else {
            error!("Could not find chat input field");
            return false;
        };
        if let Err(e) = page.click(input, Duration::from_secs(5)).await {
            debug!(error = %e, "Input click failed");
        }
        if let Err(e) = page.fill(input, prompt).await {
            error!(error = %e, "Could not enter prompt text");
            return false;
        }
        self.ctx.pause(Duration::from_millis(500)).await;

        if prompt_number == 1 && !self.ensure_features_enabled().await {
            warn!("Continuing without all Claude features enabled");
        }

        let sent = match first_visible(page.as_ref(), &SEND_BUTTONS).await {
            Some(button) => page.click(button, Duration::from_secs(5)).await,
            None => page.press(input, "Enter").await,
        };
        if let Err(e) = sent {
            error!(error = %e, "Could not send prompt");
            return false;
        }
        self.ctx.set_pending_prompt(prompt);

        let deadline = Instant::now() + SEND_CONFIRM_WINDOW;
        while Instant::now() < deadline {
            if self.signals.is_generating().await.unwrap_or(false) {
                info!("Prompt sent (generation started)");
                return true;
            }
            if self.signals.count_response_units().await.map_or(false, |n| n > pre_prompt) {
                info!("Prompt sent (response appeared)");
                return true;
            }
            if !self.ctx.pause(Duration::from_secs(1)).await {
                return false;
            }
        }
        error!("Prompt may not have been sent");
        false
    }

    async fn wait_for_response(&mut self, prompt_number: u32) -> Option<String> {
        let signals = self.signals.clone();
        self.ctx.await_response(signals.as_ref(), prompt_number).await
    }

    async fn download_all_artifacts(&mut self, dest_dir: &Path, timeout: Duration) -> Vec<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(dest_dir).await {
            error!(error = %e, dir = %dest_dir.display(), "Cannot create download directory");
            return Vec::new();
        }
        self.ctx.pause(Duration::from_secs(1)).await;
        let browser_dir = self.ctx.browser_download_dir.clone();

        if self.page().is_visible(DOWNLOAD_ALL).await.unwrap_or(false) {
            info!("Found 'Download all' button");
            match click_download(self.page(), DOWNLOAD_ALL, dest_dir, browser_dir.as_deref(), None, timeout).await {
                Ok(Some(path)) => {
                    info!(path = %path.display(), "Downloaded all artifacts");
                    return vec![path];
                }
                Ok(None) => warn!("'Download all' produced no file"),
                Err(e) => warn!(error = %e, "'Download all' failed"),
            }
        }

        let Some((selector, count)) = self.download_buttons().await else {
            warn!("No download buttons found on page");
            return Vec::new();
        };
        info!(count, "Found individual download buttons");

        let mut saved = Vec::new();
        for i in 0..count {
            let nth = format!("{} >> nth={}", selector, i);
            if !self.page().is_visible(&nth).await.unwrap_or(false) {
                continue;
            }
            match click_download(self.page(), &nth, dest_dir, browser_dir.as_deref(), None, timeout).await {
                Ok(Some(path)) => {
                    info!(path = %path.display(), "Downloaded");
                    saved.push(path);
                }
                Ok(None) => warn!(index = i + 1, "Download timed out"),
                Err(e) => warn!(index = i + 1, error = %e, "Download failed"),
            }
            self.ctx.pause(Duration::from_millis(500)).await;
        }
        saved
    }

    async fn get_conversation_history(&self) -> Vec<ConversationMessage> {
        self.ctx.messages.clone()
    }

    async fn ensure_features_enabled(&mut self) -> bool {
        let mut ok = true;
        if self.settings.enable_extended_thinking {
            ok &= self.ensure_extended_thinking().await.unwrap_or_else(|e| {
                error!(error = %e, "Error enabling extended thinking");
                false
            });
        }
        if self.settings.enable_web_search {
            let enabled = match self.ensure_web_search().await {
                Ok(enabled) => enabled,
                Err(e) => {
                    error!(error = %e, "Error enabling web search");
                    if let Err(e) = self.page().press("body", "Escape").await {
                        debug!(error = %e, "Escape after web search toggle failed");
                    }
                    false
                }
            };
            ok &= enabled;
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{CompletionDetector, CompletionPolicy};
    use crate::testing::FakePage;
    use tokio_util::sync::CancellationToken;

    fn agent_on(page: Arc<FakePage>, settings: ProviderSettings) -> ClaudeAgent {
        let ctx = AgentContext::new(
            page,
            vec!["Summarise the filing".into()],
            CompletionDetector::new(CompletionPolicy::default()),
            CancellationToken::new(),
            None,
        );
        ClaudeAgent::new(ctx, settings)
    }

    #[test]
    fn test_home_url_prefers_project_url() {
        let page = Arc::new(FakePage::new("about:blank"));
        assert_eq!(agent_on(page.clone(), ProviderSettings::default()).home_url(), "https://claude.ai/new");

        let settings = ProviderSettings {
            project_url: Some("https://claude.ai/project/0199-abc?tab=chats".into()),
            project_id: Some("ignored".into()),
            ..Default::default()
        };
        assert_eq!(agent_on(page.clone(), settings).home_url(), "https://claude.ai/project/0199-abc");

        let settings = ProviderSettings { project_id: Some("p42".into()), ..Default::default() };
        assert_eq!(agent_on(page, settings).home_url(), "https://claude.ai/project/p42");
    }

    #[tokio::test]
    async fn test_get_state_order() {
        let page = Arc::new(FakePage::new("https://claude.ai/new"));
        let agent = agent_on(page.clone(), ProviderSettings::default());
        assert_eq!(agent.get_state().await, AgentState::Unknown);

        page.set_visible(CHAT_INPUTS[1], true);
        assert_eq!(agent.get_state().await, AgentState::Ready);

        page.set_visible(STOP_BUTTONS[0], true);
        assert_eq!(agent.get_state().await, AgentState::Running);

        page.set_visible(LOGIN_BUTTON, true);
        assert_eq!(agent.get_state().await, AgentState::AuthRequired);

        page.set_count(RATE_LIMIT, 1);
        assert_eq!(agent.get_state().await, AgentState::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extended_thinking_already_pressed() {
        let page = Arc::new(FakePage::new("https://claude.ai/new"));
        page.set_visible(EXTENDED_THINKING[0], true);
        page.set_attribute(EXTENDED_THINKING[0], "aria-pressed", "true");
        let settings = ProviderSettings { enable_web_search: false, ..Default::default() };
        let mut agent = agent_on(page.clone(), settings);
        assert!(agent.ensure_features_enabled().await);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_web_search_missing_reports_failure() {
        let page = Arc::new(FakePage::new("https://claude.ai/new"));
        page.set_visible(TOGGLE_MENU[1], true);
        let settings = ProviderSettings { enable_extended_thinking: false, ..Default::default() };
        let mut agent = agent_on(page.clone(), settings);
        assert!(!agent.ensure_features_enabled().await);
        assert_eq!(page.clicks(), vec![TOGGLE_MENU[1].to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_prefers_file_input() {
        let page = Arc::new(FakePage::new("https://claude.ai/new"));
        page.set_count(FILE_INPUT, 1);
        let mut agent = agent_on(page.clone(), ProviderSettings::default());
        assert!(agent.upload_files(&[PathBuf::from("/tmp/input.xlsx")]).await);
        assert_eq!(page.uploads(), vec![(FILE_INPUT.to_string(), vec![PathBuf::from("/tmp/input.xlsx")])]);
        assert!(agent.upload_files(&[]).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_without_controls_fails() {
        let page = Arc::new(FakePage::new("https://claude.ai/new"));
        let mut agent = agent_on(page, ProviderSettings::default());
        assert!(!agent.upload_files(&[PathBuf::from("/tmp/input.xlsx")]).await);
    }

    #[tokio::test]
    async fn test_signals_from_selectors() {
        let page = Arc::new(FakePage::new("https://claude.ai/chat/1"));
        page.set_count(RESPONSE_UNITS, 2);
        page.set_eval(EXTRACT_SCRIPT, serde_json::json!("Here is the summary."));
        let signals = ClaudeSignals::new(page.clone());
        assert!(!signals.is_generating().await.unwrap());
        page.set_count(STREAMING, 1);
        assert!(signals.is_generating().await.unwrap());
        assert_eq!(signals.count_response_units().await.unwrap(), 2);
        assert_eq!(signals.extract_latest_response().await.unwrap().as_deref(), Some("Here is the summary."));
    }
}
