//! Line-delimited JSON-RPC over a child process's standard streams.
//!
//! One child per adapter, started on first use. Request ids are rewritten to
//! gateway-unique integers on the way in and restored on the way out, so
//! clients on different sessions can reuse the same ids.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use crate::adapter::LocalCommand;
use crate::mcp::JsonRpcMessage;
use crate::proxy::{Forward, ProxyError, Reply, Transport};
use crate::session::SessionManager;

/// Lines of stderr kept for the logs endpoint.
const STDERR_TAIL_LINES: usize = 200;

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<JsonRpcMessage>>>;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct StdioBackend {
    adapter: String,
    address: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl StdioBackend {
    /// Start the adapter's process.
    ///
    /// When the process exits, every session pinned to it is invalidated.
    pub fn spawn(
        adapter: &str,
        command: &LocalCommand,
        env: &HashMap<String, String>,
        sessions: Arc<SessionManager>,
    ) -> Result<Self, ProxyError> {
        let unavailable = |reason: String| ProxyError::BackendUnavailable {
            adapter: adapter.to_string(),
            reason,
        };

        let mut child = Command::new(&command.command)
            .args(&command.args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("failed to start '{}': {e}", command.command)))?;

        let pid = child.id().unwrap_or_default();
        let address = format!("stdio://{adapter}#pid={pid}");

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(unavailable("child stdio was not captured".to_string()));
        };

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(read_stdout(
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
            sessions,
            adapter.to_string(),
            address.clone(),
        ));
        tokio::spawn(read_stderr(stderr, Arc::clone(&stderr_tail), adapter.to_string()));

        let name = adapter.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = kill_rx => {
                    let _ = child.kill().await;
                    tracing::debug!(adapter = %name, pid, "Local process stopped");
                }
                status = child.wait() => match status {
                    Ok(status) => tracing::warn!(adapter = %name, pid, %status, "Local process exited"),
                    Err(e) => tracing::warn!(adapter = %name, pid, error = %e, "Lost track of local process"),
                },
            }
        });

        tracing::info!(adapter, pid, command = %command.command, "Local process started");

        Ok(Self {
            adapter: adapter.to_string(),
            address,
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            stderr_tail,
            kill_tx: Mutex::new(Some(kill_tx)),
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> ProxyError {
        ProxyError::BackendUnavailable {
            adapter: self.adapter.clone(),
            reason: reason.into(),
        }
    }

    async fn write(&self, message: &JsonRpcMessage) -> Result<(), ProxyError> {
        let mut line = message.to_bytes();
        line.push(b'\n');

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&line)
            .await
            .map_err(|e| self.unavailable(format!("failed to write to stdin: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| self.unavailable(format!("failed to flush stdin: {e}")))
    }
}

/// Drops the pending entry if the caller gives up before the answer arrives.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

#[async_trait]
impl Transport for StdioBackend {
    fn address(&self) -> &str {
        &self.address
    }

    async fn forward(&self, request: Forward<'_>) -> Result<Reply, ProxyError> {
        if !self.is_alive() {
            return Err(self.unavailable("process has exited"));
        }

        let message = request.message;
        let client_id = match &message.id {
            Some(id) if message.is_request() => id.clone(),
            _ => {
                self.write(message).await?;
                return Ok(Reply::Accepted);
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id,
        };

        let mut outbound = message.clone();
        outbound.id = Some(Value::from(id));
        self.write(&outbound).await?;

        let mut response = rx
            .await
            .map_err(|_| self.unavailable("process exited before answering"))?;
        response.id = Some(client_id);

        Ok(Reply::Messages {
            messages: vec![response],
            backend_session_id: None,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn recent_output(&self, tail: usize) -> Vec<String> {
        let lines = lock(&self.stderr_tail);
        let skip = lines.len().saturating_sub(tail);
        lines.iter().skip(skip).cloned().collect()
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        if let Some(tx) = lock(&self.kill_tx).take() {
            let _ = tx.send(());
        }
    }
}

async fn read_stdout(
    stdout: ChildStdout,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
    sessions: Arc<SessionManager>,
    adapter: String,
    address: String,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let message = match serde_json::from_str::<JsonRpcMessage>(trimmed) {
                    Ok(message) => message,
                    Err(_) => {
                        tracing::debug!(adapter = %adapter, "Skipping non JSON-RPC output line");
                        continue;
                    }
                };
                let waiter = match message.id.as_ref().and_then(Value::as_u64) {
                    Some(id) if message.is_response() => lock(&pending).remove(&id),
                    _ => None,
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => tracing::debug!(
                        adapter = %adapter,
                        method = message.method().unwrap_or("-"),
                        "Dropping unsolicited message from local process"
                    ),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(adapter = %adapter, error = %e, "Failed reading local process output");
                break;
            }
        }
    }

    alive.store(false, Ordering::Release);
    lock(&pending).clear();
    sessions.invalidate_pinned(&adapter, &address).await;
}

async fn read_stderr(stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>, adapter: String) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(adapter = %adapter, "stderr: {}", line);
        let mut buffer = lock(&tail);
        if buffer.len() == STDERR_TAIL_LINES {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }
}
