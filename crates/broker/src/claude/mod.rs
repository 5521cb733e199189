//! LLM-CLI subprocess driver.
//!
//! One subprocess per session, speaking JSON lines over stdio. The
//! broker owns the environment that coerces the subprocess's HTTP calls
//! through the translation proxy: `ANTHROPIC_BASE_URL` points at the
//! loopback proxy and `ANTHROPIC_API_KEY` carries the session's route
//! token.

pub mod discovery;
pub mod interceptor;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use tether_domain::{Error, Result};

use crate::permissions::PermissionManager;
use interceptor::{CliState, ControlInterceptor};

static CONTROL_REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Everything needed to spawn a subprocess for a session.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub session_id: String,
    pub tab_id: String,
    pub workdir: String,
    pub system_prompt: Option<String>,
    pub model: String,
    /// CLI session id to resume from (conversation load / branching).
    pub resume_session_id: Option<String>,
    /// Message uuid to branch at; requires `resume_session_id`.
    pub resume_at_message_uuid: Option<String>,
    pub proxy_base_url: String,
    pub route_token: String,
}

/// A live subprocess attached to a session.
pub struct CliSession {
    pub session_id: String,
    pub tab_id: String,
    /// The CLI's own session id, captured from its first init event.
    pub claude_session_id: Arc<Mutex<Option<String>>>,
    pub state: Arc<Mutex<CliState>>,
    writer: mpsc::Sender<String>,
    /// SDK-visible message stream. One streaming task at a time holds
    /// the receiver; a `send` locks it for the duration of its turn.
    events: tokio::sync::Mutex<mpsc::Receiver<Value>>,
    child: Mutex<Option<Child>>,
}

impl CliSession {
    async fn write_line(&self, line: String) -> Result<()> {
        self.writer
            .send(line)
            .await
            .map_err(|_| Error::Subprocess("subprocess stdin closed".into()))
    }

    /// Submit a user turn and stream the response events through the
    /// callback until the terminal `result` message (inclusive).
    pub async fn send_and_stream<F, Fut>(
        &self,
        content: &str,
        message_uuid: Option<&str>,
        mut on_event: F,
    ) -> Result<()>
    where
        F: FnMut(Value) -> Fut + Send,
        Fut: std::future::Future<Output = ()> + Send,
    {
        // Serialize turns: the reader side belongs to this turn until its
        // result message arrives.
        let mut events = self.events.lock().await;

        let mut user_message = json!({
            "type": "user",
            "message": {"role": "user", "content": content},
            "parent_tool_use_id": null,
        });
        if let Some(uuid) = message_uuid {
            user_message["uuid"] = json!(uuid);
        }
        if let Some(claude_id) = self.claude_session_id.lock().clone() {
            user_message["session_id"] = json!(claude_id);
        }
        self.write_line(user_message.to_string()).await?;

        while let Some(event) = events.recv().await {
            let is_result = event.get("type").and_then(Value::as_str) == Some("result");
            on_event(event).await;
            if is_result {
                return Ok(());
            }
        }
        Err(Error::Subprocess(
            "subprocess stream ended before turn completed".into(),
        ))
    }

    async fn send_control(&self, request: Value) -> Result<()> {
        let request_id = format!(
            "req_{}",
            CONTROL_REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let line = json!({
            "type": "control_request",
            "request_id": request_id,
            "request": request,
        });
        self.write_line(line.to_string()).await
    }

    /// Forward an interrupt to the subprocess.
    pub async fn interrupt(&self) -> Result<()> {
        self.send_control(json!({"subtype": "interrupt"})).await
    }

    /// Change the subprocess's permission mode at runtime.
    pub async fn set_permission_mode(&self, mode: &str) -> Result<()> {
        self.send_control(json!({"subtype": "set_permission_mode", "mode": mode}))
            .await
    }

    fn kill(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.start_kill() {
                tracing::warn!(session_id = %self.session_id, error = %e, "failed to kill subprocess");
            }
        }
    }
}

/// Owner of every subprocess, keyed by broker session id.
pub struct ClaudeInterface {
    permissions: Arc<PermissionManager>,
    sessions: Mutex<HashMap<String, Arc<CliSession>>>,
}

impl ClaudeInterface {
    pub fn new(permissions: Arc<PermissionManager>) -> Self {
        Self {
            permissions,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a subprocess for a session. Three modes: fresh, resume a
    /// prior CLI session, or resume-at-uuid (branching).
    pub async fn create_session(&self, opts: SpawnOptions) -> Result<Arc<CliSession>> {
        let cli_path = discovery::find_cli()
            .ok_or_else(|| Error::Subprocess("LLM CLI binary not found".into()))?;

        let mut command = Command::new(&cli_path);
        command
            .args([
                "--output-format",
                "stream-json",
                "--input-format",
                "stream-json",
                "--verbose",
                "--include-partial-messages",
                "--permission-prompt-tool",
                "stdio",
                "--dangerously-skip-permissions",
                "--max-turns",
                "100",
                "--setting-sources",
                "user,project,local",
            ])
            .arg("--model")
            .arg(&opts.model)
            .current_dir(&opts.workdir)
            .env("ANTHROPIC_BASE_URL", &opts.proxy_base_url)
            .env("ANTHROPIC_API_KEY", &opts.route_token)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(prompt) = &opts.system_prompt {
            command.arg("--system-prompt").arg(prompt);
        }
        if let Some(resume) = &opts.resume_session_id {
            command.arg("--resume").arg(resume);
            if let Some(uuid) = &opts.resume_at_message_uuid {
                command.arg("--resume-session-at").arg(uuid);
            }
        } else if opts.resume_at_message_uuid.is_some() {
            tracing::warn!(
                session_id = %opts.session_id,
                "resume_at_message_uuid without resume_session_id, ignoring"
            );
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Subprocess(format!("failed to spawn CLI: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Subprocess("subprocess stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Subprocess("subprocess stdout unavailable".into()))?;
        let stderr = child.stderr.take();

        // Writer task: owns stdin, fed by an mpsc of JSON lines.
        let (writer_tx, mut writer_rx) = mpsc::channel::<String>(64);
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = writer_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Stderr pump, for diagnostics only.
        if let Some(stderr) = stderr {
            let session_id = opts.session_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(session_id = %session_id, line = %line, "subprocess stderr");
                }
            });
        }

        // Reader task: the interceptor filters control traffic and
        // forwards SDK-visible messages.
        let (events_tx, events_rx) = mpsc::channel::<Value>(256);
        let claude_session_id = Arc::new(Mutex::new(None));
        let state = Arc::new(Mutex::new(CliState::Connecting));
        let intercept = ControlInterceptor {
            permissions: Arc::clone(&self.permissions),
            tab_id: opts.tab_id.clone(),
            writer: writer_tx.clone(),
        };
        tokio::spawn(intercept.run(
            stdout,
            events_tx,
            Arc::clone(&claude_session_id),
            Arc::clone(&state),
        ));

        let mode = match (&opts.resume_session_id, &opts.resume_at_message_uuid) {
            (Some(_), Some(_)) => "resume-at-message",
            (Some(_), None) => "resume",
            _ => "new",
        };
        tracing::info!(
            session_id = %opts.session_id,
            tab_id = %opts.tab_id,
            workdir = %opts.workdir,
            mode,
            "spawned LLM CLI subprocess"
        );

        let session = Arc::new(CliSession {
            session_id: opts.session_id.clone(),
            tab_id: opts.tab_id,
            claude_session_id,
            state,
            writer: writer_tx,
            events: tokio::sync::Mutex::new(events_rx),
            child: Mutex::new(Some(child)),
        });
        self.sessions
            .lock()
            .insert(opts.session_id, Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<CliSession>> {
        self.sessions.lock().get(session_id).cloned()
    }

    /// Disconnect the subprocess, remove it from the registry, log.
    pub fn close_session(&self, session_id: &str) {
        let Some(session) = self.sessions.lock().remove(session_id) else {
            tracing::warn!(session_id, "close for unknown subprocess session");
            return;
        };
        session.kill();
        tracing::info!(session_id, "closed subprocess session");
    }

    pub fn close_all(&self) {
        let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for id in ids {
            self.close_session(&id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
