use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{BrowserMode, BrowserSettings};
use crate::errors::AutoWebError;
use super::bridge::NodeBridge;
use super::chrome;
use super::{BrowserPage, BrowserProvider, BrowserSession};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(90);
/// Slack added on top of a Playwright-side timeout before the bridge gives up.
const BRIDGE_SLACK: Duration = Duration::from_secs(5);

/// Resident Playwright helper. Reads one JSON request per line on stdin and
/// answers `{id, ok, result | error}` per line on stdout.
const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const path = require('path');
const pw = require('playwright');

let browser = null;
let context = null;
let mode = 'launch';
const pages = new Map();
let nextPage = 1;

function page(id) {
  const p = pages.get(id);
  if (!p) throw new Error('unknown page ' + id);
  return p;
}

function first(cmd) {
  return page(cmd.page).locator(cmd.selector).first();
}

function isTimeout(e) {
  return e && (e.name === 'TimeoutError' || /Timeout/.test(String(e.message)));
}

const handlers = {
  async connect(cmd) {
    mode = cmd.mode;
    if (mode === 'cdp') {
      browser = await pw.chromium.connectOverCDP(cmd.endpoint);
      const contexts = browser.contexts();
      context = contexts.length ? contexts[0] : await browser.newContext({ ignoreHTTPSErrors: true });
      if (cmd.download_dir) {
        const session = await browser.newBrowserCDPSession();
        await session.send('Browser.setDownloadBehavior', {
          behavior: 'allow', downloadPath: cmd.download_dir, eventsEnabled: true,
        });
      }
    } else {
      browser = await pw[cmd.browser_type || 'chromium'].launch({ headless: !!cmd.headless });
      const options = { ignoreHTTPSErrors: true, acceptDownloads: true };
      if (cmd.storage_state) options.storageState = cmd.storage_state;
      context = await browser.newContext(options);
    }
    context.setDefaultTimeout(cmd.timeout_ms || 30000);
    return { pages: context.pages().length };
  },
  async close_stale_pages() {
    const stale = context.pages();
    for (const p of stale) {
      try { await p.close(); } catch (e) {}
    }
    pages.clear();
    return stale.length;
  },
  async new_page() {
    const id = String(nextPage++);
    pages.set(id, await context.newPage());
    return id;
  },
  async goto(cmd) {
    await page(cmd.page).goto(cmd.url, { waitUntil: 'domcontentloaded', timeout: cmd.timeout_ms });
    return null;
  },
  async url(cmd) { return page(cmd.page).url(); },
  async evaluate(cmd) {
    const r = await page(cmd.page).evaluate(cmd.script, cmd.arg);
    return r === undefined ? null : r;
  },
  async click(cmd) { await first(cmd).click({ timeout: cmd.timeout_ms }); return null; },
  async fill(cmd) { await first(cmd).fill(cmd.text); return null; },
  async press(cmd) { await first(cmd).press(cmd.key); return null; },
  async is_visible(cmd) { return await first(cmd).isVisible(); },
  async count(cmd) { return await page(cmd.page).locator(cmd.selector).count(); },
  async get_attribute(cmd) { return await first(cmd).getAttribute(cmd.name, { timeout: 2000 }); },
  async set_input_files(cmd) { await first(cmd).setInputFiles(cmd.files); return null; },
  async upload_via_chooser(cmd) {
    const [chooser] = await Promise.all([
      page(cmd.page).waitForEvent('filechooser', { timeout: cmd.timeout_ms }),
      first(cmd).click(),
    ]);
    await chooser.setFiles(cmd.files);
    return null;
  },
  async download_via_click(cmd) {
    try {
      const [download] = await Promise.all([
        page(cmd.page).waitForEvent('download', { timeout: cmd.timeout_ms }),
        first(cmd).click(),
      ]);
      const target = path.join(cmd.dir, download.suggestedFilename());
      await download.saveAs(target);
      return target;
    } catch (e) {
      if (isTimeout(e)) return null;
      throw e;
    }
  },
  async close_page(cmd) {
    const p = pages.get(cmd.page);
    pages.delete(cmd.page);
    if (p) await p.close();
    return null;
  },
  async save_auth_state(cmd) {
    await context.storageState({ path: cmd.path });
    return null;
  },
  async shutdown() {
    if (mode !== 'cdp' && browser) await browser.close();
    setTimeout(() => process.exit(0), 50);
    return null;
  },
};

function reply(msg) {
  process.stdout.write(JSON.stringify(msg) + '\n');
}

readline.createInterface({ input: process.stdin }).on('line', async (line) => {
  let cmd;
  try { cmd = JSON.parse(line); } catch (e) { return; }
  const handler = handlers[cmd.action];
  if (!handler) return reply({ id: cmd.id, ok: false, error: 'unknown action ' + cmd.action });
  try {
    reply({ id: cmd.id, ok: true, result: await handler(cmd) });
  } catch (e) {
    reply({ id: cmd.id, ok: false, error: String(e && e.message || e) });
  }
}).on('close', () => process.exit(0));
"#;

/// Opens Playwright sessions in CDP-attach or classic launch mode.
pub struct PlaywrightProvider {
    settings: BrowserSettings,
}

impl PlaywrightProvider {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn cdp_download_dir(&self) -> PathBuf {
        self.settings
            .download_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("autowebprompt-downloads"))
    }
}

#[async_trait]
impl BrowserProvider for PlaywrightProvider {
    async fn connect(&self) -> Result<Box<dyn BrowserSession>, AutoWebError> {
        let auth_state_path = self.settings.auth_state_path();
        let (params, download_dir) = match self.settings.mode {
            BrowserMode::Cdp => {
                let endpoint = chrome::ensure_chrome(&self.settings).await?;
                let download_dir = self.cdp_download_dir();
                tokio::fs::create_dir_all(&download_dir).await?;
                let params = json!({
                    "mode": "cdp",
                    "endpoint": endpoint,
                    "download_dir": download_dir,
                });
                (params, Some(download_dir))
            }
            other => {
                let storage_state = if auth_state_path.exists() {
                    info!(path = %auth_state_path.display(), "Loading auth state");
                    Some(auth_state_path.clone())
                } else {
                    warn!(path = %auth_state_path.display(), "No auth state found, manual login may be needed");
                    None
                };
                let params = json!({
                    "mode": "launch",
                    "browser_type": other.as_str(),
                    "headless": self.settings.headless,
                    "storage_state": storage_state,
                });
                (params, None)
            }
        };

        let bridge = Arc::new(NodeBridge::spawn(&self.settings.node_path, BRIDGE_SCRIPT, DEFAULT_COMMAND_TIMEOUT).await?);
        let connected = bridge.request_with_timeout("connect", params, CONNECT_TIMEOUT).await?;
        info!(
            mode = self.settings.mode.as_str(),
            existing_pages = connected.get("pages").and_then(serde_json::Value::as_u64).unwrap_or(0),
            "Browser session connected"
        );

        Ok(Box::new(PlaywrightSession {
            bridge,
            mode: self.settings.mode,
            auth_state_path,
            download_dir,
        }))
    }
}

pub struct PlaywrightSession {
    bridge: Arc<NodeBridge>,
    mode: BrowserMode,
    auth_state_path: PathBuf,
    download_dir: Option<PathBuf>,
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn close_stale_pages(&self) -> Result<usize, AutoWebError> {
        let closed = self.bridge.request("close_stale_pages", json!({})).await?;
        Ok(closed.as_u64().unwrap_or(0) as usize)
    }

    async fn new_page(&self) -> Result<Arc<dyn BrowserPage>, AutoWebError> {
        let id = self.bridge.request("new_page", json!({})).await?;
        let id = id
            .as_str()
            .ok_or_else(|| AutoWebError::Browser("new_page returned no id".into()))?
            .to_string();
        Ok(Arc::new(PlaywrightPage { bridge: self.bridge.clone(), id }))
    }

    fn download_dir(&self) -> Option<PathBuf> {
        self.download_dir.clone()
    }

    async fn save_auth_state(&self) -> Result<(), AutoWebError> {
        if self.mode == BrowserMode::Cdp {
            // the Chrome profile already keeps the login
            return Ok(());
        }
        if let Some(parent) = self.auth_state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.bridge
            .request("save_auth_state", json!({ "path": self.auth_state_path }))
            .await?;
        info!(path = %self.auth_state_path.display(), "Saved auth state");
        Ok(())
    }

    async fn close(&self) -> Result<(), AutoWebError> {
        self.bridge.shutdown().await;
        Ok(())
    }
}

pub struct PlaywrightPage {
    bridge: Arc<NodeBridge>,
    id: String,
}

impl PlaywrightPage {
    fn with_page(&self, mut params: Value) -> Value {
        if let Value::Object(map) = &mut params {
            map.insert("page".into(), Value::String(self.id.clone()));
        }
        params
    }

    async fn call(&self, action: &str, params: Value) -> Result<Value, AutoWebError> {
        self.bridge.request(action, self.with_page(params)).await
    }

    async fn call_with_timeout(&self, action: &str, params: Value, timeout: Duration) -> Result<Value, AutoWebError> {
        self.bridge
            .request_with_timeout(action, self.with_page(params), timeout + BRIDGE_SLACK)
            .await
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[async_trait]
impl BrowserPage for PlaywrightPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), AutoWebError> {
        self.call_with_timeout("goto", json!({ "url": url, "timeout_ms": millis(timeout) }), timeout)
            .await
            .map_err(|e| AutoWebError::Navigation(format!("{}: {}", url, e)))?;
        Ok(())
    }

    async fn url(&self) -> Result<String, AutoWebError> {
        let url = self.call("url", json!({})).await?;
        Ok(url.as_str().unwrap_or_default().to_string())
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value, AutoWebError> {
        self.call("evaluate", json!({ "script": script, "arg": arg })).await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), AutoWebError> {
        self.call_with_timeout("click", json!({ "selector": selector, "timeout_ms": millis(timeout) }), timeout)
            .await?;
        Ok(())
    }

    async fn hover(&self, selector: &str, timeout: Duration) -> Result<(), AutoWebError> {
        self.call_with_timeout("hover", json!({ "selector": selector, "timeout_ms": millis(timeout) }), timeout)
            .await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), AutoWebError> {
        self.call("fill", json!({ "selector": selector, "text": text })).await?;
        Ok(())
    }

    async fn press(&self, selector: &str, key: &str) -> Result<(), AutoWebError> {
        self.call("press", json!({ "selector": selector, "key": key })).await?;
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, AutoWebError> {
        let visible = self.call("is_visible", json!({ "selector": selector })).await?;
        Ok(visible.as_bool().unwrap_or(false))
    }

    async fn count(&self, selector: &str) -> Result<usize, AutoWebError> {
        let count = self.call("count", json!({ "selector": selector })).await?;
        Ok(count.as_u64().unwrap_or(0) as usize)
    }

    async fn get_attribute(&self, selector: &str, name: &str) -> Result<Option<String>, AutoWebError> {
        let value = self.call("get_attribute", json!({ "selector": selector, "name": name })).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<(), AutoWebError> {
        self.call("set_input_files", json!({ "selector": selector, "files": files }))
            .await
            .map_err(|e| AutoWebError::Upload(e.to_string()))?;
        Ok(())
    }

    async fn upload_via_chooser(&self, trigger: &str, files: &[PathBuf], timeout: Duration) -> Result<(), AutoWebError> {
        self.call_with_timeout(
            "upload_via_chooser",
            json!({ "selector": trigger, "files": files, "timeout_ms": millis(timeout) }),
            timeout,
        )
        .await
        .map_err(|e| AutoWebError::Upload(e.to_string()))?;
        Ok(())
    }

    async fn download_via_click(&self, selector: &str, dest_dir: &Path, timeout: Duration) -> Result<Option<PathBuf>, AutoWebError> {
        let saved = self
            .call_with_timeout(
                "download_via_click",
                json!({ "selector": selector, "dir": dest_dir, "timeout_ms": millis(timeout) }),
                timeout,
            )
            .await
            .map_err(|e| AutoWebError::Download(e.to_string()))?;
        Ok(saved.as_str().map(PathBuf::from))
    }

    async fn close(&self) -> Result<(), AutoWebError> {
        self.call("close_page", json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_script_handles_every_page_action() {
        for action in [
            "connect", "close_stale_pages", "new_page", "goto", "url", "evaluate", "click", "hover", "fill",
            "press", "is_visible", "count", "get_attribute", "set_input_files", "upload_via_chooser",
            "download_via_click", "close_page", "save_auth_state", "shutdown",
        ] {
            assert!(
                BRIDGE_SCRIPT.contains(&format!("async {}(", action)),
                "bridge script lacks handler for {action}"
            );
        }
    }

    #[test]
    fn test_cdp_download_dir_default() {
        let provider = PlaywrightProvider::new(BrowserSettings::default());
        assert!(provider.cdp_download_dir().ends_with("autowebprompt-downloads"));
    }
}
