use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserPage;
use crate::config::ProviderSettings;
use crate::detector::PageSignals;
use crate::errors::AutoWebError;
use super::base::{click_download, host_of, wait_attached, AgentContext, AgentState, ConversationMessage, Role, WebAgent};

pub const CHATGPT_BASE_URL: &str = "https://chatgpt.com";
const CHATGPT_HOST: &str = "chatgpt.com";

const EDITOR: &str = r#"div.ProseMirror[contenteditable="true"], p[data-placeholder*="New chat"]"#;
const SEND_BUTTON: &str = r#"button:has-text("Send prompt"), button[aria-label="Send prompt"], [data-testid="send-button"]"#;
const PLUS_MENU: &str = r#"[data-testid="composer-plus-btn"]"#;
const ADD_FILES_MENUITEM: &str = r#"[role="menuitem"]:has-text("Add photos & files")"#;
const ADD_FILES_BUTTON: &str = r#"button:has-text("Add files and more"), button:has-text("Add files"), button[aria-label*="file"]"#;
const MORE_MENUITEM: &str = r#"role=menuitem[name="More"]"#;
const AGENT_MODE_RADIO: &str = r#"role=menuitemradio[name="Agent mode"]"#;

const NAV_TIMEOUT: Duration = Duration::from_secs(60);
const SEND_CONFIRM_WINDOW: Duration = Duration::from_secs(30);

pub(crate) const STATE_SCRIPT: &str = r#"() => {
  const btns = Array.from(document.querySelectorAll('button'));
  const body = document.body ? document.body.innerText : '';
  return {
    hasLogin: btns.some(b => b.textContent.trim() === 'Log in'),
    hasRateLimit: /You've reached (the|your) .*limit|usage cap/i.test(body),
    hasStop: btns.some(b => b.textContent.trim() === 'Stop') || !!document.querySelector('[data-testid="stop-button"]'),
    hasThinking: btns.some(b => b.textContent.includes('Pro thinking')),
    hasInput: !!document.querySelector('div.ProseMirror[contenteditable="true"], p[data-placeholder]'),
  };
}"#;

pub(crate) const IS_GENERATING_SCRIPT: &str = r#"() => {
  const hasStopBtn = !!document.querySelector('[data-testid="stop-button"]');
  const btns = Array.from(document.querySelectorAll('button'));
  const hasStop = btns.some(b => b.textContent.trim() === 'Stop');
  const hasStopAria = btns.some(b => (b.getAttribute('aria-label') || '').includes('Stop'));
  const hasAnswerNow = btns.some(b => b.textContent.trim() === 'Answer now');
  const hasThinking = btns.some(b => b.textContent.includes('Pro thinking'));
  const hasUpdate = btns.some(b => b.textContent.trim() === 'Update');
  const hasStreaming = !!document.querySelector('[class*="result-streaming"]');
  const text = document.body ? document.body.innerText : '';
  const statusText = text.includes('ChatGPT is generating');
  const writingCode = text.includes('Writing code');
  const analyzing = /Analyz(ing|ed)/.test(text) && (hasStop || hasStopBtn);
  return hasStopBtn || hasStop || hasStopAria || hasAnswerNow || hasThinking || hasUpdate
    || hasStreaming || statusText || writingCode || analyzing;
}"#;

pub(crate) const COUNT_SCRIPT: &str = r#"() => Array.from(document.querySelectorAll('article'))
  .filter(a => { const h6 = a.querySelector('h6'); return h6 && h6.textContent.includes('ChatGPT said:'); })
  .length"#;

pub(crate) const EXTRACT_SCRIPT: &str = r#"() => {
  const articles = Array.from(document.querySelectorAll('article'));
  for (let i = articles.length - 1; i >= 0; i--) {
    const h6 = articles[i].querySelector('h6');
    if (h6 && h6.textContent.includes('ChatGPT said:')) {
      const clone = articles[i].cloneNode(true);
      clone.querySelectorAll('pre, code').forEach(n => n.remove());
      return clone.innerText;
    }
  }
  return null;
}"#;

const BUTTON_TEXT_SCRIPT: &str = r#"(t) => Array.from(document.querySelectorAll('button'))
  .some(b => b.textContent.includes(t) || (b.getAttribute('aria-label') || '').includes(t))"#;

const AGENT_ACTIVE_SCRIPT: &str = r#"() => Array.from(document.querySelectorAll('button')).some(b => {
  const text = b.textContent.trim() + ' ' + (b.getAttribute('aria-label') || '');
  return text.includes('Agent') && text.includes('click to remove');
})"#;

/// Tags the download button of every artifact preview card in responses
/// after the baseline and returns `{filename, downloadId}` pairs.
const PREVIEW_CARDS_SCRIPT: &str = r#"(args) => {
  const articles = Array.from(document.querySelectorAll('article')).filter(a => {
    const h6 = a.querySelector('h6');
    return h6 && h6.textContent.includes('ChatGPT said:');
  }).slice(args.baseline);
  const wanted = (t) => args.extensions.some(ext => t.toLowerCase().endsWith(ext));
  const found = [];
  for (const article of articles) {
    const walker = document.createTreeWalker(article, NodeFilter.SHOW_TEXT, { acceptNode: (node) => {
      const text = node.textContent.trim();
      if (!wanted(text) || text.includes('/') || text.includes(' ')) return NodeFilter.FILTER_REJECT;
      for (let el = node.parentElement; el && el !== article; el = el.parentElement) {
        if (el.tagName === 'CODE' || el.tagName === 'PRE') return NodeFilter.FILTER_REJECT;
      }
      return NodeFilter.FILTER_ACCEPT;
    }});
    let node;
    while ((node = walker.nextNode())) {
      let container = node.parentElement;
      for (let depth = 0; depth < 8 && container; depth++) {
        const icons = Array.from(container.querySelectorAll('button')).filter(b =>
          (b.querySelector('img') || b.querySelector('svg')) && b.textContent.trim().length < 5);
        if (icons.length >= 2) {
          const id = 'artifact-dl-' + found.length;
          icons[0].setAttribute('data-artifact-download', id);
          found.push({ filename: node.textContent.trim(), downloadId: id });
          break;
        }
        container = container.parentElement;
      }
    }
  }
  return found;
}"#;

const SANDBOX_LINKS_SCRIPT: &str = r#"(args) => {
  const articles = Array.from(document.querySelectorAll('article')).filter(a => {
    const h6 = a.querySelector('h6');
    return h6 && h6.textContent.includes('ChatGPT said:');
  }).slice(args.baseline);
  const links = [];
  for (const article of articles) {
    for (const a of article.querySelectorAll('a[href*="sandbox"]')) {
      if (a.href && args.extensions.some(ext => a.href.toLowerCase().includes(ext))) {
        const id = 'sandbox-dl-' + links.length;
        a.setAttribute('data-sandbox-download', id);
        links.push({ text: a.textContent.trim(), downloadId: id });
      }
    }
  }
  return links;
}"#;

const HISTORY_SCRIPT: &str = r#"() => Array.from(document.querySelectorAll('article')).map(a => {
  const user = Array.from(a.querySelectorAll('h5')).some(h => h.textContent.includes('You said:'));
  const bot = Array.from(a.querySelectorAll('h6')).some(h => h.textContent.includes('ChatGPT said:'));
  const role = user ? 'user' : (bot ? 'assistant' : null);
  return role ? { role, content: a.innerText.replace('You said:\n', '').replace('ChatGPT said:\n', '').trim() } : null;
}).filter(Boolean)"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PageState {
    has_login: bool,
    has_rate_limit: bool,
    has_stop: bool,
    has_thinking: bool,
    has_input: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaggedDownload {
    #[serde(alias = "text")]
    filename: String,
    download_id: String,
}

#[derive(Debug, Deserialize)]
struct ScrapedMessage {
    role: Role,
    content: String,
}

/// [`PageSignals`] read from the ChatGPT DOM through script evaluation,
/// which stays reliable on CDP-attached tabs where visibility checks are not.
pub struct ChatGptSignals {
    page: Arc<dyn BrowserPage>,
}

impl ChatGptSignals {
    pub fn new(page: Arc<dyn BrowserPage>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl PageSignals for ChatGptSignals {
    async fn is_generating(&self) -> Result<bool, AutoWebError> {
        let v = self.page.evaluate(IS_GENERATING_SCRIPT, Value::Null).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn extract_latest_response(&self) -> Result<Option<String>, AutoWebError> {
        let v = self.page.evaluate(EXTRACT_SCRIPT, Value::Null).await?;
        Ok(v.as_str()
            .map(|t| t.replace("ChatGPT said:\n", "").trim().to_string())
            .filter(|t| !t.is_empty()))
    }

    async fn count_response_units(&self) -> Result<usize, AutoWebError> {
        let v = self.page.evaluate(COUNT_SCRIPT, Value::Null).await?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }
}

/// ChatGPT project chat (`chatgpt.com/g/g-p-…/project`) in agent mode.
pub struct ChatGptAgent {
    ctx: AgentContext,
    settings: ProviderSettings,
    signals: Arc<dyn PageSignals>,
}

impl ChatGptAgent {
    pub fn new(ctx: AgentContext, settings: ProviderSettings) -> Self {
        let signals = Arc::new(ChatGptSignals::new(ctx.page.clone()));
        Self::with_signals(ctx, settings, signals)
    }

    pub fn with_signals(ctx: AgentContext, settings: ProviderSettings, signals: Arc<dyn PageSignals>) -> Self {
        Self { ctx, settings, signals }
    }

    /// Project page when a project is configured, else the new-chat page.
    pub fn project_url(&self) -> String {
        if let Some(url) = self.settings.project_url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        match self.settings.project_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                let slug = self
                    .settings
                    .project_slug
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(|s| format!("-{}", s))
                    .unwrap_or_default();
                format!("{}/g/g-p-{}{}/project", CHATGPT_BASE_URL, id, slug)
            }
            None => format!("{}/", CHATGPT_BASE_URL),
        }
    }

    fn page(&self) -> &dyn BrowserPage {
        self.ctx.page.as_ref()
    }

    async fn button_with_text(&self, text: &str) -> bool {
        self.page()
            .evaluate(BUTTON_TEXT_SCRIPT, json!(text))
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    async fn agent_mode_active(&self) -> bool {
        self.page()
            .evaluate(AGENT_ACTIVE_SCRIPT, Value::Null)
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    async fn dismiss_menu(&self) {
        if let Err(e) = self.page().press("body", "Escape").await {
            debug!(error = %e, "Escape failed");
        }
    }

    async fn enable_agent_mode(&mut self) -> Result<bool, AutoWebError> {
        if self.agent_mode_active().await {
            info!("Agent mode already enabled");
            return Ok(true);
        }
        let page = self.ctx.page.clone();
        page.click(PLUS_MENU, Duration::from_secs(5)).await?;
        self.ctx.pause(Duration::from_millis(1500)).await;
        page.hover(MORE_MENUITEM, Duration::from_secs(5)).await?;
        self.ctx.pause(Duration::from_millis(1500)).await;
        page.click(AGENT_MODE_RADIO, Duration::from_secs(5)).await?;
        self.ctx.pause(Duration::from_secs(2)).await;

        let verified = self.agent_mode_active().await || self.button_with_text("Apps").await;
        if verified {
            info!("Agent mode enabled and verified");
        } else {
            warn!("Agent mode activation could not be verified");
        }
        Ok(verified)
    }

    async fn upload_one(&self, file: &Path) -> Result<(), AutoWebError> {
        let page = self.page();
        let files = [file.to_path_buf()];

        self.dismiss_menu().await;
        if page.count(PLUS_MENU).await? > 0 {
            let via_menu = async {
                page.click(PLUS_MENU, Duration::from_secs(5)).await?;
                if !wait_attached(page, ADD_FILES_MENUITEM, Duration::from_secs(5)).await {
                    return Err(AutoWebError::Upload("'Add photos & files' not in menu".into()));
                }
                page.upload_via_chooser(ADD_FILES_MENUITEM, &files, Duration::from_secs(10)).await
            };
            match via_menu.await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    info!(error = %e, "+ menu upload failed, trying fallback");
                    self.dismiss_menu().await;
                }
            }
        }

        if page.count(ADD_FILES_BUTTON).await? == 0 {
            return Err(AutoWebError::Upload(format!("no upload control for {}", file.display())));
        }
        page.upload_via_chooser(ADD_FILES_BUTTON, &files, Duration::from_secs(10)).await?;
        info!("Used 'Add files' button fallback");
        Ok(())
    }

    async fn download_tagged(
        &self,
        items: Vec<TaggedDownload>,
        attribute: &str,
        dest_dir: &Path,
        keep_card_name: bool,
        timeout: Duration,
    ) -> Vec<PathBuf> {
        let mut saved = Vec::new();
        for item in items {
            let selector = format!(r#"[{}="{}"]"#, attribute, item.download_id);
            info!(file = %item.filename, "Downloading artifact");
            let name = keep_card_name.then_some(item.filename.as_str());
            match click_download(
                self.page(),
                &selector,
                dest_dir,
                self.ctx.browser_download_dir.as_deref(),
                name,
                timeout,
            )
            .await
            {
                Ok(Some(path)) => {
                    info!(path = %path.display(), "Downloaded");
                    saved.push(path);
                }
                Ok(None) => warn!(file = %item.filename, "Download timed out"),
                Err(e) => warn!(file = %item.filename, error = %e, "Download failed"),
            }
        }
        saved
    }

    async fn tagged(&self, script: &str) -> Vec<TaggedDownload> {
        let args = json!({
            "baseline": self.ctx.detector.baseline().unwrap_or(0),
            "extensions": self.settings.expected_extensions.iter().map(|e| e.to_lowercase()).collect::<Vec<_>>(),
        });
        match self.page().evaluate(script, args).await {
            Ok(v) => serde_json::from_value(v).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Artifact scan failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl WebAgent for ChatGptAgent {
    fn context(&self) -> &AgentContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.ctx
    }

    fn home_url(&self) -> String {
        self.project_url()
    }

    fn owns_url(&self, url: &str) -> bool {
        let host = host_of(url);
        host == CHATGPT_HOST || host.ends_with(".chatgpt.com")
    }

    async fn navigate_to_new_chat(&mut self) -> bool {
        let url = self.project_url();
        info!(url = %url, "Navigating to ChatGPT");
        if let Err(e) = self.page().goto(&url, NAV_TIMEOUT).await {
            error!(error = %e, "Navigation failed");
            return false;
        }

        let current = self.page().url().await.unwrap_or_default();
        if !self.owns_url(&current) {
            warn!(url = %current, "Redirected off ChatGPT, login needed");
            return true;
        }
        let state = self.get_state().await;
        if state == AgentState::AuthRequired {
            warn!("Authentication required, please log in");
            return true;
        }
        info!(state = %state, "Page loaded");

        if wait_attached(self.page(), EDITOR, Duration::from_secs(15)).await {
            return true;
        }
        info!("Chat input not attached yet, reloading");
        if let Err(e) = self.page().goto(&url, NAV_TIMEOUT).await {
            error!(error = %e, "Reload failed");
            return false;
        }
        self.ctx.pause(Duration::from_secs(3)).await;
        if wait_attached(self.page(), EDITOR, Duration::from_secs(15)).await {
            return true;
        }
        error!("Could not find chat input on ChatGPT page");
        false
    }

    async fn get_state(&self) -> AgentState {
        let url = match self.page().url().await {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, "State detection failed");
                return AgentState::Error;
            }
        };
        if !self.owns_url(&url) {
            return AgentState::AuthRequired;
        }
        let state: PageState = match self.page().evaluate(STATE_SCRIPT, Value::Null).await {
            Ok(v) => serde_json::from_value(v).unwrap_or_default(),
            Err(e) => {
                error!(error = %e, "State detection failed");
                return AgentState::Error;
            }
        };
        if state.has_login {
            AgentState::AuthRequired
        } else if state.has_rate_limit {
            AgentState::RateLimited
        } else if state.has_stop || state.has_thinking {
            AgentState::Running
        } else if state.has_input {
            AgentState::Ready
        } else {
            AgentState::Unknown
        }
    }

    async fn upload_files(&mut self, files: &[PathBuf]) -> bool {
        for file in files {
            info!(file = %file.display(), "Uploading file");
            if let Err(e) = self.upload_one(file).await {
                error!(error = %e, "File upload failed");
                return false;
            }
            self.ctx.pause(Duration::from_secs(2)).await;

            let name = file.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            let attachment = format!(r#"[role="group"]:has-text("{}")"#, name);
            if wait_attached(self.page(), &attachment, Duration::from_secs(5)).await {
                info!(file = %name, "File attached");
            } else {
                warn!(file = %name, "File attachment not confirmed");
            }
        }
        true
    }

    async fn submit_prompt(&mut self, prompt: &str, prompt_number: u32) -> bool {
        info!(prompt_number, chars = prompt.chars().count(), "Submitting prompt");
        self.ctx.detector.capture_pre_prompt(self.signals.as_ref()).await;

        let page = self.ctx.page.clone();
        if !wait_attached(page.as_ref(), EDITOR, Duration::from_secs(10)).await {
            error!("Chat input not found");
            return false;
        }
        if let Err(e) = page.click(EDITOR, Duration::from_secs(5)).await {
            debug!(error = %e, "Editor click failed");
        }
        if let Err(e) = page.fill(EDITOR, prompt).await {
            error!(error = %e, "Could not enter prompt text");
            return false;
        }
        self.ctx.pause(Duration::from_secs(1)).await;

        if prompt_number == 1 && self.settings.agent_mode && !self.ensure_features_enabled().await {
            error!("Failed to enable agent mode before sending");
            return false;
        }

        let url_before = page.url().await.unwrap_or_default();
        if let Err(e) = page.click(SEND_BUTTON, Duration::from_secs(10)).await {
            info!(error = %e, "Send button not clickable, pressing Enter");
            if let Err(e) = page.press(EDITOR, "Enter").await {
                error!(error = %e, "Could not send prompt");
                return false;
            }
        }
        self.ctx.set_pending_prompt(prompt);

        let in_conversation = url_before.contains("/c/");
        let deadline = Instant::now() + SEND_CONFIRM_WINDOW;
        while Instant::now() < deadline {
            if !self.ctx.pause(Duration::from_secs(1)).await {
                return false;
            }
            let current = page.url().await.unwrap_or_default();
            if current != url_before && current.contains("/c/") {
                info!(url = %current, "Prompt sent, conversation started");
                return true;
            }
            if self.button_with_text("Stop").await {
                info!("Prompt sent (stop button appeared)");
                return true;
            }
            if in_conversation && self.signals.is_generating().await.unwrap_or(false) {
                info!("Prompt sent (generation detected)");
                return true;
            }
        }
        error!(url = %url_before, "Prompt may not have been sent");
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
        if let Err(e) = self
            .page()
            .evaluate("() => window.scrollTo(0, document.body.scrollHeight)", Value::Null)
            .await
        {
            debug!(error = %e, "Scroll to bottom failed");
        }
        self.ctx.pause(Duration::from_secs(2)).await;

        let cards = self.tagged(PREVIEW_CARDS_SCRIPT).await;
        info!(
            cards = cards.len(),
            baseline = self.ctx.detector.baseline().unwrap_or(0),
            "Artifact preview cards found"
        );
        let saved = self
            .download_tagged(cards, "data-artifact-download", dest_dir, true, timeout)
            .await;
        if !saved.is_empty() {
            return saved;
        }

        info!("No preview-card downloads, trying sandbox links");
        let links = self.tagged(SANDBOX_LINKS_SCRIPT).await;
        let saved = self
            .download_tagged(links, "data-sandbox-download", dest_dir, false, timeout)
            .await;
        if saved.is_empty() {
            warn!("No artifacts downloaded");
        }
        saved
    }

    async fn get_conversation_history(&self) -> Vec<ConversationMessage> {
        let scraped = match self.page().evaluate(HISTORY_SCRIPT, Value::Null).await {
            Ok(v) => serde_json::from_value::<Vec<ScrapedMessage>>(v).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Conversation scrape failed");
                Vec::new()
            }
        };
        if scraped.is_empty() {
            return self.ctx.messages.clone();
        }
        scraped
            .into_iter()
            .map(|m| ConversationMessage::new(m.role, m.content))
            .collect()
    }

    async fn ensure_features_enabled(&mut self) -> bool {
        if !self.settings.agent_mode {
            return true;
        }
        self.ctx.pause(Duration::from_secs(2)).await;
        match self.enable_agent_mode().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(error = %e, "Agent mode toggle failed");
                self.dismiss_menu().await;
                false
            }
        }
    }
}
