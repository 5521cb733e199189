//! Control-channel interceptor.
//!
//! Wraps the subprocess's stdout line stream. `can_use_tool` control
//! requests are arbitrated broker-side and answered on the subprocess's
//! stdin instead of reaching the consumer; everything else flows
//! through. This is the decorator that replaces inline CLI permission
//! prompts with asynchronous round-trips to the mobile client.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::mpsc;

use tether_domain::decision::Decision;

use crate::permissions::PermissionManager;
use crate::util::generate_short_id;

/// Subprocess lifecycle, driven by the first `system/init` event and EOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CliState {
    #[default]
    Connecting,
    /// `system/init` seen; the CLI's own session id is captured.
    Connected,
    /// Events are flowing after init.
    Streaming,
    Closed,
}

pub struct ControlInterceptor {
    pub permissions: Arc<PermissionManager>,
    pub tab_id: String,
    /// Lines to the subprocess's stdin (shared with the session writer).
    pub writer: mpsc::Sender<String>,
}

impl ControlInterceptor {
    /// Pump the subprocess stdout: intercept permission control traffic,
    /// forward everything else to `forward`.
    pub async fn run(
        self,
        stdout: ChildStdout,
        forward: mpsc::Sender<Value>,
        claude_session_id: Arc<Mutex<Option<String>>>,
        state: Arc<Mutex<CliState>>,
    ) {
        let mut lines = BufReader::new(stdout).lines();
        let mut intercepted = 0u64;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(tab_id = %self.tab_id, error = %e, "subprocess stdout read error");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(_) => {
                    tracing::debug!(tab_id = %self.tab_id, "non-JSON subprocess line ignored");
                    continue;
                }
            };

            match message.get("type").and_then(Value::as_str) {
                Some("control_request") => {
                    let subtype = message
                        .get("request")
                        .and_then(|r| r.get("subtype"))
                        .and_then(Value::as_str);
                    if subtype == Some("can_use_tool") {
                        intercepted += 1;
                        self.handle_can_use_tool(&message).await;
                        // Answered on stdin; the consumer never sees it.
                        continue;
                    }
                    // Mode changes, interrupts, etc. pass through.
                    if forward.send(message).await.is_err() {
                        break;
                    }
                }
                Some("control_response") => {
                    // Echo of a request we sent to the CLI; consume it.
                    tracing::debug!(tab_id = %self.tab_id, "control_response from CLI consumed");
                }
                Some("system")
                    if message.get("subtype").and_then(Value::as_str) == Some("init") =>
                {
                    let session_id = message
                        .get("session_id")
                        .or_else(|| message.get("data").and_then(|d| d.get("session_id")))
                        .and_then(Value::as_str);
                    if let Some(session_id) = session_id {
                        *claude_session_id.lock() = Some(session_id.to_string());
                        tracing::info!(
                            tab_id = %self.tab_id,
                            claude_session_id = session_id,
                            "subprocess initialized"
                        );
                    }
                    *state.lock() = CliState::Connected;
                    if forward.send(message).await.is_err() {
                        break;
                    }
                }
                _ => {
                    {
                        let mut st = state.lock();
                        if *st == CliState::Connected {
                            *st = CliState::Streaming;
                        }
                    }
                    if forward.send(message).await.is_err() {
                        break;
                    }
                }
            }
        }

        *state.lock() = CliState::Closed;
        tracing::info!(tab_id = %self.tab_id, intercepted, "subprocess stream ended");
    }

    /// Arbitrate one tool use and answer the CLI with its own request id.
    async fn handle_can_use_tool(&self, message: &Value) {
        let Some(cli_request_id) = message.get("request_id").and_then(Value::as_str) else {
            tracing::error!(tab_id = %self.tab_id, "control_request missing request_id");
            return;
        };
        let request = message.get("request").cloned().unwrap_or(json!({}));
        let tool_name = request
            .get("tool_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let tool_input = request.get("input").cloned().unwrap_or(json!({}));

        // The tab id prefix is the sole routing key back to this session.
        let broker_request_id = format!("{}:{}", self.tab_id, generate_short_id());
        tracing::info!(
            tab_id = %self.tab_id,
            tool_name,
            cli_request_id,
            broker_request_id = %broker_request_id,
            "intercepted tool permission request"
        );

        let response = match self
            .permissions
            .get_permission(tool_name, tool_input, &broker_request_id)
            .await
        {
            Ok(decision) => control_response(cli_request_id, &decision),
            Err(e) => {
                tracing::error!(
                    tab_id = %self.tab_id,
                    cli_request_id,
                    error = %e,
                    "permission manager failed"
                );
                control_error_response(cli_request_id, &e.to_string())
            }
        };
        if self.writer.send(response.to_string()).await.is_err() {
            tracing::error!(tab_id = %self.tab_id, "failed to answer control_request; stdin gone");
        }
    }
}

/// Build the `control_response` line the CLI expects for a decision.
fn control_response(cli_request_id: &str, decision: &Decision) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": cli_request_id,
            "response": decision,
        },
    })
}

/// Error-shaped `control_response` for a manager failure.
fn control_error_response(cli_request_id: &str, error: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": cli_request_id,
            "error": error,
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_response_allow_shape() {
        let decision = Decision::allow(json!({"cmd": "ls"}));
        let v = control_response("R1", &decision);
        assert_eq!(v["type"], "control_response");
        assert_eq!(v["response"]["subtype"], "success");
        assert_eq!(v["response"]["request_id"], "R1");
        assert_eq!(v["response"]["response"]["behavior"], "allow");
        assert_eq!(v["response"]["response"]["updatedInput"]["cmd"], "ls");
    }

    #[test]
    fn control_response_deny_shape() {
        let decision = Decision::deny("not allowed");
        let v = control_response("R2", &decision);
        assert_eq!(v["response"]["response"]["behavior"], "deny");
        assert_eq!(v["response"]["response"]["message"], "not allowed");
        assert_eq!(v["response"]["response"]["interrupt"], true);
    }

    #[test]
    fn control_error_response_shape() {
        let v = control_error_response("R3", "permission channel closed");
        assert_eq!(v["type"], "control_response");
        assert_eq!(v["response"]["subtype"], "error");
        assert_eq!(v["response"]["request_id"], "R3");
        assert_eq!(v["response"]["error"], "permission channel closed");
        assert!(v["response"].get("response").is_none());
    }
}
