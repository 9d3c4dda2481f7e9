use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::info;

use crate::config::BrowserSettings;
use crate::errors::AutoWebError;

pub const DEFAULT_CDP_PORT: u16 = 9222;

/// Canary first, then stable Chrome.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary"),
        PathBuf::from("/usr/bin/google-chrome-canary"),
        PathBuf::from("/usr/bin/google-chrome-unstable"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/google-chrome-stable"),
        PathBuf::from("/usr/bin/chromium"),
        PathBuf::from("/usr/bin/chromium-browser"),
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
    ];
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        paths.insert(1, home.join("Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary"));
        paths.push(home.join("Applications/Google Chrome.app/Contents/MacOS/Google Chrome"));
    }
    if let Some(local) = std::env::var_os("LOCALAPPDATA").map(PathBuf::from) {
        paths.push(local.join(r"Google\Chrome SxS\Application\chrome.exe"));
    }
    paths
}

pub fn find_chrome(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    candidate_paths().into_iter().find(|p| p.exists())
}

pub async fn is_cdp_available(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).await.is_ok()
}

pub fn launch_args(port: u16, profile_dir: &Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args
}

/// Make sure a Chrome with remote debugging listens on the configured port,
/// launching one with the persistent profile when nothing does.
///
/// The launched Chrome outlives this process so the logged-in profile is
/// reused by later runs.
pub async fn ensure_chrome(settings: &BrowserSettings) -> Result<String, AutoWebError> {
    let port = settings.cdp_port;
    let endpoint = format!("http://127.0.0.1:{}", port);

    if is_cdp_available(port).await {
        info!(port, "Chrome already running");
        return Ok(endpoint);
    }
    if port != DEFAULT_CDP_PORT {
        return Err(AutoWebError::Browser(format!(
            "Chrome not running on port {}. Launch it with: chrome --remote-debugging-port={}",
            port, port
        )));
    }

    let chrome = find_chrome(settings.chrome_path.as_deref())
        .ok_or_else(|| AutoWebError::Browser("Chrome not found; install Chrome or set browser.chrome_path".into()))?;
    let profile_dir = settings.resolved_profile_dir();
    tokio::fs::create_dir_all(&profile_dir).await?;

    info!(chrome = %chrome.display(), profile = %profile_dir.display(), "Launching Chrome with CDP");
    Command::new(&chrome)
        .args(launch_args(port, &profile_dir, settings.headless))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AutoWebError::Browser(format!("Failed to launch {}: {}", chrome.display(), e)))?;

    wait_for_cdp(port, Duration::from_secs(30)).await?;
    Ok(endpoint)
}

async fn wait_for_cdp(port: u16, timeout: Duration) -> Result<(), AutoWebError> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if is_cdp_available(port).await {
            info!(port, "Chrome is ready for CDP connection");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err(AutoWebError::Browser(format!("Chrome didn't open port {} within {}s", port, timeout.as_secs())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args() {
        let args = launch_args(9222, Path::new("/tmp/profile"), true);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--headless=new"));
        assert!(!launch_args(9222, Path::new("/tmp/p"), false).iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_explicit_chrome_path_must_exist() {
        assert!(find_chrome(Some(Path::new("/definitely/not/chrome"))).is_none());
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, "").unwrap();
        assert_eq!(find_chrome(Some(&fake)), Some(fake));
    }

    #[tokio::test]
    async fn test_cdp_check_sees_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_cdp_available(port).await);
        drop(listener);
    }
}
