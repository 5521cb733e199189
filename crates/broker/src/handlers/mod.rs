//! Inbound frame dispatch.
//!
//! Frames carrying a `seq` pass through the ACK engine first: in-order
//! frames execute immediately (plus any reorder-buffer prefix they
//! release), early frames wait unacknowledged, duplicates are re-acked
//! but never re-executed. Frames without a `seq` execute directly.

pub mod ack;
pub mod conversations;
pub mod credentials;
pub mod health;
pub mod message;
pub mod permissions;
pub mod routes;
pub mod session;

use serde_json::Value;
use tether_domain::session::ErrorCode;
use tether_protocol::{ClientFrame, ServerFrame};

use crate::connections::Outbound;
use crate::state::AppState;

/// Handle one raw frame from a connection. Returns `true` when the
/// client asked to shut the connection down.
pub async fn handle_frame(state: &AppState, connection_id: &str, raw: &str) -> bool {
    state.sessions.connections.touch(connection_id);

    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(connection_id, error = %e, "unparseable inbound frame");
            send_error(state, connection_id, "Invalid frame", None, None).await;
            return false;
        }
    };

    // A (re)connecting client restarts its inbound numbering at 1.
    if let ClientFrame::Start { tab_id, .. } = &frame {
        state.sessions.acks.reset_inbound(tab_id);
    }

    match ordering_key(&frame) {
        Some((tab_id, client_seq)) => {
            let as_value = serde_json::to_value(&frame).expect("frame reserializes");
            let ready = state.sessions.acks.process(&tab_id, client_seq, as_value);
            if ready.is_empty() {
                tracing::info!(tab_id = %tab_id, client_seq, "frame held for ordering");
                return false;
            }
            let mut close = false;
            for item in ready {
                send_ack(state, connection_id, &tab_id, item.seq, item.is_duplicate).await;
                if item.is_duplicate {
                    continue;
                }
                if let Some(frame_value) = item.frame {
                    match serde_json::from_value::<ClientFrame>(frame_value) {
                        Ok(frame) => close |= execute(state, connection_id, frame).await,
                        Err(e) => {
                            tracing::error!(error = %e, "buffered frame failed to re-parse")
                        }
                    }
                }
            }
            close
        }
        None => execute(state, connection_id, frame).await,
    }
}

/// `(tab_id, seq)` for frames that participate in ordered processing.
fn ordering_key(frame: &ClientFrame) -> Option<(String, u64)> {
    match frame {
        ClientFrame::Start { tab_id, seq, .. }
        | ClientFrame::Send { tab_id, seq, .. }
        | ClientFrame::SetPermissionMode { tab_id, seq, .. }
        | ClientFrame::PermissionResponse { tab_id, seq, .. } => {
            seq.map(|s| (tab_id.clone(), s))
        }
        ClientFrame::UpdateCredentials {
            tab_id: Some(tab_id),
            seq,
            ..
        } => seq.map(|s| (tab_id.clone(), s)),
        ClientFrame::LoadConversation {
            tab_id: Some(tab_id),
            seq,
            ..
        } => seq.map(|s| (tab_id.clone(), s)),
        _ => None,
    }
}

/// Route an ordered-and-released (or orderless) frame to its handler.
async fn execute(state: &AppState, connection_id: &str, frame: ClientFrame) -> bool {
    match frame {
        ClientFrame::Start { .. } => {
            session::handle_start(state, connection_id, frame).await;
        }
        ClientFrame::Send { .. } => {
            message::handle_send(state, connection_id, frame).await;
        }
        ClientFrame::EditMessage { .. } => {
            message::handle_edit_message(state, connection_id, frame).await;
        }
        ClientFrame::Interrupt { .. } => {
            message::handle_interrupt(state, connection_id, frame).await;
        }
        ClientFrame::SetPermissionMode { .. } => {
            permissions::handle_set_permission_mode(state, connection_id, frame).await;
        }
        ClientFrame::PermissionResponse { .. } => {
            permissions::handle_permission_response(state, connection_id, frame).await;
        }
        ClientFrame::UpdateCredentials { .. } => {
            credentials::handle_update_credentials(state, connection_id, frame).await;
        }
        ClientFrame::Routes { .. }
        | ClientFrame::SetActiveRoute { .. }
        | ClientFrame::SetStableRoute { .. } => {
            routes::handle(state, connection_id, frame).await;
        }
        ClientFrame::ResponseAck { .. } => {
            ack::handle_response_ack(state, connection_id, frame).await;
        }
        ClientFrame::RequestConversations { .. } => {
            conversations::handle_request_conversations(state, connection_id, frame).await;
        }
        ClientFrame::LoadConversation { .. } => {
            conversations::handle_load_conversation(state, connection_id, frame).await;
        }
        ClientFrame::Health {} => {
            health::handle_health(state, connection_id).await;
        }
        ClientFrame::Status {} => {
            health::handle_status(state, connection_id).await;
        }
        ClientFrame::Shutdown {} => {
            tracing::info!(connection_id, "shutdown requested");
            return true;
        }
    }
    false
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared send helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Send a frame straight to one connection, bypassing the session
/// buffer. Used for acks, status, and error frames that only make sense
/// on the connection that provoked them.
pub(crate) async fn send_direct(state: &AppState, connection_id: &str, frame: &ServerFrame) {
    let Some(sink) = state.sessions.connections.sink(connection_id) else {
        tracing::warn!(connection_id, "cannot send, connection gone");
        return;
    };
    if sink.send(Outbound::Frame(frame.to_wire())).await.is_err() {
        tracing::warn!(connection_id, "send to connection failed");
    }
}

pub(crate) async fn send_ack(
    state: &AppState,
    connection_id: &str,
    tab_id: &str,
    ack_seq: u64,
    is_duplicate: bool,
) {
    let seq = state.sessions.acks.next_seq(tab_id);
    let frame = ServerFrame::MessageReceivedAck {
        tab_id: tab_id.to_string(),
        ack_seq,
        seq,
        is_duplicate,
    };
    send_direct(state, connection_id, &frame).await;
}

pub(crate) async fn send_error(
    state: &AppState,
    connection_id: &str,
    error: &str,
    tab_id: Option<&str>,
    error_code: Option<ErrorCode>,
) {
    let seq = tab_id.map(|tab| state.sessions.acks.next_seq(tab));
    let frame = ServerFrame::Error {
        error: error.to_string(),
        tab_id: tab_id.map(str::to_string),
        error_code: error_code.and_then(|c| {
            serde_json::to_value(c)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
        }),
        seq,
    };
    send_direct(state, connection_id, &frame).await;
}

/// Resolve the session for a tab-scoped frame, emitting the error frame
/// on failure.
pub(crate) async fn require_session(
    state: &AppState,
    connection_id: &str,
    tab_id: &str,
) -> Option<tether_domain::session::Session> {
    match state.sessions.get_by_tab(tab_id) {
        Some(session) => Some(session),
        None => {
            send_error(
                state,
                connection_id,
                &format!("No session found for tabId: {tab_id}"),
                Some(tab_id),
                Some(ErrorCode::SessionNotFound),
            )
            .await;
            None
        }
    }
}

/// Build a `claude_event` frame body for the session fanout path.
pub(crate) fn claude_event_frame(tab_id: &str, data: Value) -> Value {
    serde_json::json!({
        "type": "claude_event",
        "tabId": tab_id,
        "data": data,
    })
}
