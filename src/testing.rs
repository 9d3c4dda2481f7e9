//! In-memory doubles for the browser, page signals, agents and validators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentContext, AgentFactory, AgentState, ConversationMessage, WebAgent};
use crate::browser::{BrowserPage, BrowserProvider, BrowserSession};
use crate::config::TaskConfig;
use crate::detector::{CompletionDetector, CompletionPolicy, PageSignals};
use crate::engine::status::TaskStatus;
use crate::errors::AutoWebError;
use crate::validators::{ArtifactValidator, Validation};

// ---------------------------------------------------------------------------
// Page signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Sample {
    generating: bool,
    units: usize,
    text: Option<String>,
    failing: bool,
}

impl Sample {
    pub fn busy(units: usize) -> Self {
        Self { generating: true, units, text: None, failing: false }
    }

    pub fn idle(units: usize) -> Self {
        Self { generating: false, units, text: None, failing: false }
    }

    pub fn text(units: usize, text: &str) -> Self {
        Self { generating: false, units, text: Some(text.to_string()), failing: false }
    }

    pub fn busy_with_text(units: usize, text: &str) -> Self {
        Self { generating: true, units, text: Some(text.to_string()), failing: false }
    }

    pub fn failing() -> Self {
        Self { generating: false, units: 0, text: None, failing: true }
    }
}

struct Script {
    pre_units: usize,
    samples: Vec<Sample>,
    polls: usize,
}

/// Replays one [`Sample`] per `is_generating` call; the last sample repeats.
/// Before the first poll the unit count is `pre_units`.
pub struct ScriptedSignals {
    script: Mutex<Script>,
}

impl ScriptedSignals {
    pub fn new(pre_units: usize, samples: Vec<Sample>) -> Self {
        Self { script: Mutex::new(Script { pre_units, samples, polls: 0 }) }
    }

    pub fn polls(&self) -> usize {
        self.script.lock().unwrap().polls
    }

    pub fn rewind(&self, pre_units: usize, samples: Vec<Sample>) {
        *self.script.lock().unwrap() = Script { pre_units, samples, polls: 0 };
    }

    fn current(&self) -> Option<Sample> {
        let script = self.script.lock().unwrap();
        if script.polls == 0 {
            return None;
        }
        let index = (script.polls - 1).min(script.samples.len().saturating_sub(1));
        script.samples.get(index).cloned()
    }
}

fn scripted_failure() -> AutoWebError {
    AutoWebError::Browser("scripted sampling failure".into())
}

#[async_trait]
impl PageSignals for ScriptedSignals {
    async fn is_generating(&self) -> Result<bool, AutoWebError> {
        self.script.lock().unwrap().polls += 1;
        match self.current() {
            Some(s) if s.failing => Err(scripted_failure()),
            Some(s) => Ok(s.generating),
            None => Ok(false),
        }
    }

    async fn extract_latest_response(&self) -> Result<Option<String>, AutoWebError> {
        match self.current() {
            Some(s) if s.failing => Err(scripted_failure()),
            Some(s) => Ok(s.text),
            None => Ok(None),
        }
    }

    async fn count_response_units(&self) -> Result<usize, AutoWebError> {
        match self.current() {
            Some(s) if s.failing => Err(scripted_failure()),
            Some(s) => Ok(s.units),
            None => Ok(self.script.lock().unwrap().pre_units),
        }
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PageState {
    url: String,
    redirect: Option<String>,
    fail_goto: bool,
    visited: Vec<String>,
    clicks: Vec<String>,
    uploads: Vec<(String, Vec<PathBuf>)>,
    visible: HashSet<String>,
    counts: HashMap<String, usize>,
    evals: HashMap<String, Value>,
    attributes: HashMap<(String, String), String>,
    click_writes: HashMap<String, (PathBuf, Vec<u8>)>,
    closed: bool,
}

/// Page whose DOM answers are configured per selector or script.
pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self { state: Mutex::new(PageState { url: url.to_string(), ..Default::default() }) }
    }

    pub fn set_url(&self, url: &str) {
        self.state.lock().unwrap().url = url.to_string();
    }

    pub fn redirect_to(&self, url: &str) {
        self.state.lock().unwrap().redirect = Some(url.to_string());
    }

    pub fn fail_goto(&self) {
        self.state.lock().unwrap().fail_goto = true;
    }

    pub fn set_visible(&self, selector: &str, visible: bool) {
        let mut state = self.state.lock().unwrap();
        if visible {
            state.visible.insert(selector.to_string());
        } else {
            state.visible.remove(selector);
        }
    }

    pub fn set_count(&self, selector: &str, count: usize) {
        self.state.lock().unwrap().counts.insert(selector.to_string(), count);
    }

    pub fn set_eval(&self, script: &str, value: Value) {
        self.state.lock().unwrap().evals.insert(script.to_string(), value);
    }

    pub fn set_attribute(&self, selector: &str, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .attributes
            .insert((selector.to_string(), name.to_string()), value.to_string());
    }

    /// Clicking `selector` writes `bytes` to `path`, like a browser download.
    pub fn on_click_write(&self, selector: &str, path: PathBuf, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .click_writes
            .insert(selector.to_string(), (path, bytes.to_vec()));
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.lock().unwrap().visited.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<PathBuf>)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), AutoWebError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_goto {
            return Err(AutoWebError::Navigation(format!("{}: net::ERR_CONNECTION_REFUSED", url)));
        }
        state.visited.push(url.to_string());
        state.url = state.redirect.clone().unwrap_or_else(|| url.to_string());
        Ok(())
    }

    async fn url(&self) -> Result<String, AutoWebError> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn evaluate(&self, script: &str, _arg: Value) -> Result<Value, AutoWebError> {
        Ok(self.state.lock().unwrap().evals.get(script).cloned().unwrap_or(Value::Null))
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), AutoWebError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(selector.to_string());
        if let Some((path, bytes)) = state.click_writes.get(selector) {
            std::fs::write(path, bytes)?;
        }
        Ok(())
    }

    async fn hover(&self, _selector: &str, _timeout: Duration) -> Result<(), AutoWebError> {
        Ok(())
    }

    async fn fill(&self, _selector: &str, _text: &str) -> Result<(), AutoWebError> {
        Ok(())
    }

    async fn press(&self, _selector: &str, _key: &str) -> Result<(), AutoWebError> {
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, AutoWebError> {
        Ok(self.state.lock().unwrap().visible.contains(selector))
    }

    async fn count(&self, selector: &str) -> Result<usize, AutoWebError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .counts
            .get(selector)
            .copied()
            .unwrap_or_else(|| usize::from(state.visible.contains(selector))))
    }

    async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>, AutoWebError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attributes
            .get(&(selector.to_string(), name.to_string()))
            .cloned())
    }

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), AutoWebError> {
        self.state.lock().unwrap().uploads.push((selector.to_string(), files.to_vec()));
        Ok(())
    }

    async fn upload_via_chooser(&self, trigger: &str, files: &[PathBuf], _timeout: Duration) -> Result<(), AutoWebError> {
        self.state.lock().unwrap().uploads.push((trigger.to_string(), files.to_vec()));
        Ok(())
    }

    async fn download_via_click(
        &self,
        selector: &str,
        dest_dir: &Path,
        _timeout: Duration,
    ) -> Result<Option<PathBuf>, AutoWebError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(selector.to_string());
        let Some((path, bytes)) = state.click_writes.get(selector) else {
            return Ok(None);
        };
        let target = dest_dir.join(path.file_name().unwrap_or_default());
        std::fs::write(&target, bytes)?;
        Ok(Some(target))
    }

    async fn close(&self) -> Result<(), AutoWebError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Counters shared by a [`FakeProvider`] and every session it hands out.
#[derive(Default)]
pub struct BrowserLog {
    pub connects: AtomicUsize,
    pub pages_opened: AtomicUsize,
    pub auth_saves: AtomicUsize,
    pub sessions_closed: AtomicUsize,
}

pub struct FakeSession {
    log: Arc<BrowserLog>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn close_stale_pages(&self) -> Result<usize, AutoWebError> {
        Ok(0)
    }

    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, AutoWebError> {
        self.log.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePage::new("about:blank")))
    }

    fn download_dir(&self) -> Option<PathBuf> {
        None
    }

    async fn save_auth_state(&self) -> Result<(), AutoWebError> {
        self.log.auth_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), AutoWebError> {
        self.log.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider whose first `failing_connects` connections fail.
#[derive(Default)]
pub struct FakeProvider {
    pub log: Arc<BrowserLog>,
    failing_connects: usize,
}

impl FakeProvider {
    pub fn failing_first(failing_connects: usize) -> Self {
        Self { failing_connects, ..Default::default() }
    }
}

#[async_trait]
impl BrowserProvider for FakeProvider {
    async fn connect(&self) -> Result<Box<dyn BrowserSession>, AutoWebError> {
        let n = self.log.connects.fetch_add(1, Ordering::SeqCst);
        if n < self.failing_connects {
            return Err(AutoWebError::Browser("CDP endpoint not reachable".into()));
        }
        Ok(Box::new(FakeSession { log: self.log.clone() }))
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptBehaviour {
    Respond,
    /// `submit_prompt` fails.
    Reject,
    /// Wait for the attempt token, then report no response.
    Hang,
    Panic,
}

/// What one attempt's agent does.
#[derive(Debug, Clone)]
pub struct AgentScript {
    pub navigate_ok: bool,
    /// Successive `get_state` answers; the last one repeats.
    pub states: Vec<AgentState>,
    pub upload_ok: bool,
    pub prompts: PromptBehaviour,
    /// Files written by `download_all_artifacts`: (name, contents).
    pub artifacts: Vec<(String, Vec<u8>)>,
    /// Drive responses through the real detector with these samples.
    pub signals: Option<(usize, Vec<Sample>)>,
}

impl Default for AgentScript {
    fn default() -> Self {
        Self {
            navigate_ok: true,
            states: vec![AgentState::Ready],
            upload_ok: true,
            prompts: PromptBehaviour::Respond,
            artifacts: vec![("solution.xlsx".into(), b"VALID".to_vec())],
            signals: None,
        }
    }
}

impl AgentScript {
    pub fn navigation_fails() -> Self {
        Self { navigate_ok: false, ..Default::default() }
    }

    pub fn prompts(prompts: PromptBehaviour) -> Self {
        Self { prompts, ..Default::default() }
    }

    pub fn artifacts(artifacts: Vec<(&str, &[u8])>) -> Self {
        Self {
            artifacts: artifacts.into_iter().map(|(n, b)| (n.to_string(), b.to_vec())).collect(),
            ..Default::default()
        }
    }
}

pub const FAKE_HOME: &str = "https://chat.example/new";

pub struct ScriptedAgent {
    ctx: AgentContext,
    pub script: AgentScript,
    /// Per-prompt answers for [`PromptBehaviour::Respond`]; missing entries
    /// get a generated answer, `None` fails the prompt.
    pub responses: Vec<Option<String>>,
    pub submitted: Vec<String>,
    signals: Option<Arc<ScriptedSignals>>,
    state_reads: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new(prompts: Vec<String>) -> Self {
        let ctx = AgentContext::new(
            Arc::new(FakePage::new(FAKE_HOME)),
            prompts,
            CompletionDetector::new(CompletionPolicy::default()),
            CancellationToken::new(),
            None,
        );
        Self::from_script(ctx, AgentScript::default())
    }

    pub fn from_script(ctx: AgentContext, script: AgentScript) -> Self {
        let signals = script
            .signals
            .clone()
            .map(|(pre, samples)| Arc::new(ScriptedSignals::new(pre, samples)));
        Self {
            ctx,
            script,
            responses: Vec::new(),
            submitted: Vec::new(),
            signals,
            state_reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WebAgent for ScriptedAgent {
    fn context(&self) -> &AgentContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut AgentContext {
        &mut self.ctx
    }

    fn home_url(&self) -> String {
        FAKE_HOME.to_string()
    }

    fn owns_url(&self, url: &str) -> bool {
        url.starts_with("https://chat.example")
    }

    async fn navigate_to_new_chat(&mut self) -> bool {
        if self.script.navigate_ok {
            let _ = self.ctx.page.goto(FAKE_HOME, Duration::from_secs(1)).await;
        }
        self.script.navigate_ok
    }

    async fn get_state(&self) -> AgentState {
        let n = self.state_reads.fetch_add(1, Ordering::SeqCst);
        let states = &self.script.states;
        states
            .get(n.min(states.len().saturating_sub(1)))
            .copied()
            .unwrap_or(AgentState::Unknown)
    }

    async fn upload_files(&mut self, _files: &[PathBuf]) -> bool {
        self.script.upload_ok
    }

    async fn submit_prompt(&mut self, prompt: &str, _prompt_number: u32) -> bool {
        if self.script.prompts == PromptBehaviour::Reject {
            return false;
        }
        if let Some(signals) = &self.signals {
            self.ctx.detector.capture_pre_prompt(signals.as_ref()).await;
        }
        self.submitted.push(prompt.to_string());
        self.ctx.set_pending_prompt(prompt);
        true
    }

    async fn wait_for_response(&mut self, prompt_number: u32) -> Option<String> {
        match self.script.prompts {
            PromptBehaviour::Hang => {
                self.ctx.cancel.cancelled().await;
                None
            }
            PromptBehaviour::Panic => panic!("scripted agent panic"),
            _ => {
                if let Some(signals) = self.signals.clone() {
                    return self.ctx.await_response(signals.as_ref(), prompt_number).await;
                }
                let index = prompt_number as usize - 1;
                let response = match self.responses.get(index) {
                    Some(answer) => answer.clone()?,
                    None => format!("Response to prompt {} with enough text to count.", prompt_number),
                };
                let prompt = self.submitted.last().cloned().unwrap_or_default();
                self.ctx.record_exchange(&prompt, &response);
                Some(response)
            }
        }
    }

    async fn download_all_artifacts(&mut self, dest_dir: &Path, _timeout: Duration) -> Vec<PathBuf> {
        let _ = std::fs::create_dir_all(dest_dir);
        self.script
            .artifacts
            .iter()
            .filter_map(|(name, bytes)| {
                let path = dest_dir.join(name);
                std::fs::write(&path, bytes).ok().map(|_| path)
            })
            .collect()
    }

    async fn get_conversation_history(&self) -> Vec<ConversationMessage> {
        self.ctx.messages.clone()
    }

    async fn ensure_features_enabled(&mut self) -> bool {
        true
    }
}

/// Hands out one [`ScriptedAgent`] per attempt, in script order; the last
/// script repeats.
pub struct ScriptedAgentFactory {
    scripts: Mutex<VecDeque<AgentScript>>,
    pub created: AtomicUsize,
}

impl ScriptedAgentFactory {
    pub fn new(scripts: Vec<AgentScript>) -> Self {
        Self { scripts: Mutex::new(scripts.into()), created: AtomicUsize::new(0) }
    }
}

impl AgentFactory for ScriptedAgentFactory {
    fn create(
        &self,
        page: Arc<dyn BrowserPage>,
        config: &TaskConfig,
        browser_download_dir: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> Box<dyn WebAgent> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.len() > 1 {
                scripts.pop_front().unwrap_or_default()
            } else {
                scripts.front().cloned().unwrap_or_default()
            }
        };
        let policy = CompletionPolicy {
            initial_delay: Duration::from_secs(1),
            min_elapsed: Duration::ZERO,
            min_response_chars: 5,
            ..CompletionPolicy::default()
        };
        let ctx = AgentContext::new(
            page,
            config.prompts.clone(),
            CompletionDetector::new(policy),
            cancel,
            browser_download_dir,
        );
        Box::new(ScriptedAgent::from_script(ctx, script))
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Judges files by content: `VALID` passes, `CORRUPT` is corrupted,
/// `NOSHEETS` lacks the required sheets, empty is a failed download.
pub struct FakeValidator;

impl ArtifactValidator for FakeValidator {
    fn validate(&self, path: &Path) -> Validation {
        match std::fs::read(path).unwrap_or_default().as_slice() {
            b"VALID" => Validation::valid("ok"),
            b"CORRUPT" => Validation::invalid(TaskStatus::FileCorrupted, "not a zip archive"),
            b"NOSHEETS" => Validation::invalid(TaskStatus::MissingSheets, "no model sheet"),
            _ => Validation::invalid(TaskStatus::DownloadFailed, "empty file"),
        }
    }
}
