//! Permission flow handlers: client responses, runtime mode changes,
//! and the prompt notification path back to the client.

use serde_json::{json, Value};
use tether_domain::decision::Decision;
use tether_domain::session::ErrorCode;
use tether_protocol::{ClientDecision, ClientFrame, ServerFrame};

use crate::handlers::{require_session, send_direct, send_error};
use crate::state::AppState;

const VALID_CLI_MODES: &[&str] = &["default", "acceptEdits", "plan", "bypassPermissions"];

/// Translate the client's wire decision. `auto` means allow now and
/// switch the subprocess to acceptEdits afterwards; the mode change must
/// happen only after the resolve or the subprocess deadlocks waiting for
/// its control response.
fn translate_decision(decision: &ClientDecision) -> (Decision, bool) {
    match decision.behavior.as_str() {
        "allow" => (
            Decision::Allow {
                updated_input: decision.updated_input.clone().unwrap_or(Value::Null),
            },
            false,
        ),
        "auto" => (
            Decision::Allow {
                updated_input: decision.updated_input.clone().unwrap_or(Value::Null),
            },
            true,
        ),
        _ => (
            Decision::Deny {
                message: decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Permission denied".into()),
                interrupt: decision.interrupt.unwrap_or(true),
            },
            false,
        ),
    }
}

pub async fn handle_permission_response(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::PermissionResponse {
        tab_id,
        request_id,
        decision,
        ..
    } = frame
    else {
        return;
    };

    let Some(session) = require_session(state, connection_id, &tab_id).await else {
        return;
    };
    let (Some(request_id), Some(decision)) = (request_id, decision) else {
        tracing::warn!(tab_id = %tab_id, "incomplete permission response");
        return;
    };

    tracing::info!(
        request_id = %request_id,
        behavior = %decision.behavior,
        "permission response from client"
    );

    let (resolved, auto_accept) = translate_decision(&decision);
    if !state.permissions.resolve(&request_id, resolved) {
        tracing::warn!(request_id = %request_id, "no pending permission for response");
        return;
    }

    // Auto-accept: the resolve has handed control back to the subprocess;
    // only now is it safe to flip its permission mode.
    if auto_accept {
        let Some(cli) = state.sessions.claude.get(&session.session_id) else {
            tracing::warn!(session_id = %session.session_id, "no subprocess for auto-accept mode change");
            return;
        };
        match cli.set_permission_mode("acceptEdits").await {
            Ok(()) => {
                state.sessions.update(&session.session_id, |s| {
                    s.permission_mode = tether_domain::session::PermissionMode::AcceptEdits;
                });
                let frame = ServerFrame::PermissionModeUpdated {
                    tab_id: tab_id.clone(),
                    mode: "acceptEdits".into(),
                    status: "success".into(),
                    seq: state.sessions.acks.next_seq(&tab_id),
                };
                send_direct(state, connection_id, &frame).await;
            }
            Err(e) => {
                tracing::error!(
                    session_id = %session.session_id,
                    error = %e,
                    "failed to set acceptEdits after auto-accept"
                );
            }
        }
    }
}

pub async fn handle_set_permission_mode(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::SetPermissionMode { tab_id, mode, .. } = frame else {
        return;
    };

    let Some(session) = require_session(state, connection_id, &tab_id).await else {
        return;
    };
    let Some(mode) = mode else {
        send_error(
            state,
            connection_id,
            "Missing 'mode' in set_permission_mode request",
            Some(&tab_id),
            Some(ErrorCode::SystemError),
        )
        .await;
        return;
    };
    if !VALID_CLI_MODES.contains(&mode.as_str()) {
        send_error(
            state,
            connection_id,
            &format!("Invalid permission mode '{mode}'. Valid modes: {VALID_CLI_MODES:?}"),
            Some(&tab_id),
            Some(ErrorCode::SystemError),
        )
        .await;
        return;
    }

    let Some(cli) = state.sessions.claude.get(&session.session_id) else {
        send_error(
            state,
            connection_id,
            "No active session to change permission mode",
            Some(&tab_id),
            Some(ErrorCode::SessionNotFound),
        )
        .await;
        return;
    };

    match cli.set_permission_mode(&mode).await {
        Ok(()) => {
            let parsed: Option<tether_domain::session::PermissionMode> =
                serde_json::from_value(json!(mode.as_str())).ok();
            state.sessions.update(&session.session_id, |s| {
                if let Some(parsed) = parsed {
                    s.permission_mode = parsed;
                }
            });
            let frame = ServerFrame::PermissionModeUpdated {
                tab_id: tab_id.clone(),
                mode,
                status: "success".into(),
                seq: state.sessions.acks.next_seq(&tab_id),
            };
            send_direct(state, connection_id, &frame).await;
        }
        Err(e) => {
            send_error(
                state,
                connection_id,
                &format!("Permission mode change failed: {e}"),
                Some(&tab_id),
                Some(ErrorCode::SystemError),
            )
            .await;
        }
    }
}

/// Deliver a permission prompt to the client. Routed by the tab-id
/// prefix of the request id; buffered through the session so a client
/// that reconnects mid-prompt still sees it on replay.
pub async fn send_permission_request(
    state: &AppState,
    tool_name: String,
    tool_input: Value,
    request_id: String,
) {
    let Some((tab_id, _)) = request_id.split_once(':') else {
        tracing::error!(request_id = %request_id, "malformed permission request id");
        return;
    };
    let Some(session) = state.sessions.get_by_tab(tab_id) else {
        tracing::warn!(tab_id, "permission request for unknown tab");
        return;
    };

    let frame = json!({
        "type": "permission_request",
        "tabId": tab_id,
        "requestId": request_id,
        "toolName": tool_name,
        "toolInput": tool_input,
    });
    let (succeeded, _) = state.sessions.send(&session.session_id, frame).await;
    tracing::info!(
        tab_id,
        request_id = %request_id,
        delivered = succeeded,
        "permission request sent to client"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(behavior: &str) -> ClientDecision {
        ClientDecision {
            behavior: behavior.into(),
            updated_input: None,
            reason: None,
            interrupt: None,
        }
    }

    #[test]
    fn allow_translates_without_mode_change() {
        let (decision, auto) = translate_decision(&wire("allow"));
        assert!(decision.is_allow());
        assert!(!auto);
    }

    #[test]
    fn auto_translates_to_allow_with_mode_change() {
        let (decision, auto) = translate_decision(&wire("auto"));
        assert!(decision.is_allow());
        assert!(auto);
    }

    #[test]
    fn deny_defaults_to_interrupt() {
        let (decision, auto) = translate_decision(&wire("deny"));
        assert!(!auto);
        match decision {
            Decision::Deny { message, interrupt } => {
                assert_eq!(message, "Permission denied");
                assert!(interrupt);
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }

    #[test]
    fn deny_carries_reason() {
        let mut d = wire("deny");
        d.reason = Some("not on my watch".into());
        d.interrupt = Some(false);
        let (decision, _) = translate_decision(&d);
        match decision {
            Decision::Deny { message, interrupt } => {
                assert_eq!(message, "not on my watch");
                assert!(!interrupt);
            }
            other => panic!("expected deny, got {other:?}"),
        }
    }
}
