use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AutoWebError;

type BridgeResult = Result<Value, String>;
type Pending = Arc<DashMap<String, oneshot::Sender<BridgeResult>>>;

#[derive(Serialize)]
struct Request<'a> {
    id: &'a str,
    action: &'a str,
    #[serde(flatten)]
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    id: String,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// JSON-lines RPC to a resident Node.js helper.
///
/// Requests carry a uuid; a reader task routes each response line to the
/// waiting caller. Responses may arrive out of order.
pub struct NodeBridge {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    reader: JoinHandle<()>,
    stderr_reader: JoinHandle<()>,
    command_timeout: Duration,
}

impl NodeBridge {
    pub async fn spawn(node: &str, script: &str, command_timeout: Duration) -> Result<Self, AutoWebError> {
        let mut child = Command::new(node)
            .arg("-e")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AutoWebError::Browser(format!("Failed to start {}: {}", node, e)))?;

        let stdin = child.stdin.take().ok_or_else(|| AutoWebError::Browser("bridge stdin unavailable".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| AutoWebError::Browser("bridge stdout unavailable".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| AutoWebError::Browser("bridge stderr unavailable".into()))?;

        let pending: Pending = Arc::new(DashMap::new());
        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch(&reader_pending, &line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Bridge stdout read failed");
                        break;
                    }
                }
            }
            fail_all(&reader_pending, "browser bridge exited");
        });

        let stderr_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "playwright", "{}", line);
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            reader,
            stderr_reader,
            command_timeout,
        })
    }

    pub async fn request(&self, action: &str, params: Value) -> Result<Value, AutoWebError> {
        self.request_with_timeout(action, params, self.command_timeout).await
    }

    pub async fn request_with_timeout(
        &self,
        action: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, AutoWebError> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let mut line = serde_json::to_string(&Request { id: &id, action, params })?;
        line.push('\n');
        {
            let mut stdin = self.stdin.lock().await;
            let written = match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                self.pending.remove(&id);
                return Err(AutoWebError::Browser(format!("bridge write failed: {}", e)));
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(AutoWebError::Browser(format!("{}: {}", action, message))),
            Ok(Err(_)) => Err(AutoWebError::Browser("browser bridge closed".into())),
            Err(_) => {
                self.pending.remove(&id);
                Err(AutoWebError::Timeout(format!("{} timed out after {}s", action, timeout.as_secs())))
            }
        }
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self
            .request_with_timeout("shutdown", Value::Object(Default::default()), Duration::from_secs(10))
            .await
        {
            debug!(error = %e, "Bridge shutdown request failed");
        }
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "Bridge process already gone");
        }
    }
}

impl Drop for NodeBridge {
    fn drop(&mut self) {
        self.reader.abort();
        self.stderr_reader.abort();
    }
}

fn dispatch(pending: &Pending, line: &str) {
    let response: Response = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(_) => {
            debug!(target: "playwright", "{}", line);
            return;
        }
    };
    let Some((_, tx)) = pending.remove(&response.id) else {
        debug!(id = %response.id, "Response for unknown or expired request");
        return;
    };
    let result = if response.ok {
        Ok(response.result)
    } else {
        Err(response.error.unwrap_or_else(|| "unknown bridge error".into()))
    };
    let _ = tx.send(result);
}

fn fail_all(pending: &Pending, reason: &str) {
    let ids: Vec<String> = pending.iter().map(|entry| entry.key().clone()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_routes_by_id() {
        let pending: Pending = Arc::new(DashMap::new());
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        pending.insert("a".into(), tx_a);
        pending.insert("b".into(), tx_b);

        dispatch(&pending, r#"{"id":"b","ok":false,"error":"no such selector"}"#);
        dispatch(&pending, r#"{"id":"a","ok":true,"result":3}"#);

        assert_eq!(rx_a.await.unwrap(), Ok(Value::from(3)));
        assert_eq!(rx_b.await.unwrap(), Err("no such selector".to_string()));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_lines_are_ignored() {
        let pending: Pending = Arc::new(DashMap::new());
        let (tx, _rx) = oneshot::channel();
        pending.insert("a".into(), tx);
        dispatch(&pending, "Debugger listening on ws://...");
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_drains_pending() {
        let pending: Pending = Arc::new(DashMap::new());
        let (tx, rx) = oneshot::channel();
        pending.insert("a".into(), tx);
        fail_all(&pending, "gone");
        assert_eq!(rx.await.unwrap(), Err("gone".to_string()));
        assert!(pending.is_empty());
    }
}
