//! `send`, `edit_message`, and `interrupt` handlers.

use serde_json::json;
use tether_domain::session::{ErrorCode, SessionState};
use tether_protocol::{ClientFrame, ServerFrame};

use crate::claude::SpawnOptions;
use crate::handlers::{claude_event_frame, credentials, require_session, send_direct, send_error};
use crate::sessions::SessionManager;
use crate::state::AppState;

pub async fn handle_send(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::Send {
        tab_id,
        content,
        message_uuid,
        ..
    } = frame
    else {
        return;
    };

    let Some(session) = require_session(state, connection_id, &tab_id).await else {
        return;
    };
    let Some(content) = content.filter(|c| !c.is_empty()) else {
        send_error(
            state,
            connection_id,
            "Missing message content",
            Some(&tab_id),
            Some(ErrorCode::MissingContent),
        )
        .await;
        return;
    };

    if !state.sessions.has_credentials() {
        credentials::request_credentials(state, connection_id).await;
        send_error(
            state,
            connection_id,
            "Credentials required - requesting from client",
            Some(&tab_id),
            Some(ErrorCode::NoActiveRoute),
        )
        .await;
        return;
    }

    let subprocess = state.sessions.claude.get(&session.session_id);
    let active = session.state == SessionState::Active && session.claude_session_id.is_some();

    match (active, subprocess) {
        (true, Some(cli)) => {
            tracing::info!(
                session_id = %session.session_id,
                tab_id = %tab_id,
                uuid = message_uuid.as_deref().unwrap_or(""),
                "dispatching user turn"
            );
            // Streaming runs in the background so this connection's read
            // loop can keep processing frames — permission responses
            // arriving mid-stream must never queue behind the stream.
            let state = state.clone();
            let connection_id = connection_id.to_string();
            let session_id = session.session_id.clone();
            tokio::spawn(async move {
                let sessions = state.sessions.clone();
                let sid = session_id.clone();
                let tab = tab_id.clone();
                let result = cli
                    .send_and_stream(&content, message_uuid.as_deref(), move |event| {
                        let sessions = sessions.clone();
                        let sid = sid.clone();
                        let tab = tab.clone();
                        async move {
                            // Always buffered: the client may reconnect
                            // and replay.
                            sessions.send(&sid, claude_event_frame(&tab, event)).await;
                        }
                    })
                    .await;

                match result {
                    Ok(()) => {
                        tracing::info!(session_id = %session_id, "turn streaming complete")
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "turn streaming failed");
                        send_error(
                            &state,
                            &connection_id,
                            &format!("Streaming failed: {e}"),
                            Some(&tab_id),
                            Some(ErrorCode::ClaudeSendFailed),
                        )
                        .await;
                    }
                }
            });
        }
        _ => {
            // No live subprocess: keep the turn buffered for the session.
            tracing::info!(
                session_id = %session.session_id,
                state = ?session.state,
                "session not active, buffering user turn"
            );
            state
                .sessions
                .send(
                    &session.session_id,
                    json!({
                        "type": "user_message",
                        "tabId": tab_id,
                        "content": content,
                        "timestamp": chrono::Utc::now().timestamp(),
                    }),
                )
                .await;
        }
    }
}

pub async fn handle_edit_message(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::EditMessage {
        tab_id,
        message_uuid,
        new_content,
        ..
    } = frame
    else {
        return;
    };

    let Some(session) = require_session(state, connection_id, &tab_id).await else {
        return;
    };
    let Some(message_uuid) = message_uuid.filter(|u| !u.is_empty()) else {
        send_error(state, connection_id, "messageUuid required for edit", Some(&tab_id), None).await;
        return;
    };
    let Some(new_content) = new_content.filter(|c| !c.is_empty()) else {
        send_error(state, connection_id, "newContent required for edit", Some(&tab_id), None).await;
        return;
    };
    let Some(creds) = state.sessions.credentials() else {
        credentials::request_credentials(state, connection_id).await;
        send_error(
            state,
            connection_id,
            "Credentials required for edit",
            Some(&tab_id),
            Some(ErrorCode::NoActiveRoute),
        )
        .await;
        return;
    };

    tracing::info!(
        session_id = %session.session_id,
        branch_point = %message_uuid,
        "branching session at message"
    );

    // The resumable id is the CLI's own session id, captured from the
    // subprocess's first init event.
    let resume_session_id = state
        .sessions
        .claude
        .get(&session.session_id)
        .and_then(|cli| cli.claude_session_id.lock().clone())
        .or_else(|| session.original_session_id.clone())
        .unwrap_or_else(|| session.session_id.clone());

    // Close the current subprocess before respawning at the branch.
    if session.claude_session_id.is_some() {
        state.sessions.claude.close_session(&session.session_id);
    }
    state.sessions.update(&session.session_id, |s| {
        s.branch_point_uuid = Some(message_uuid.clone());
        if s.original_session_id.is_none() {
            s.original_session_id = Some(resume_session_id.clone());
        }
    });

    let spawn = state
        .sessions
        .claude
        .create_session(SpawnOptions {
            session_id: session.session_id.clone(),
            tab_id: tab_id.clone(),
            workdir: session.workdir.clone(),
            system_prompt: session.system_prompt.clone(),
            model: creds.model.clone(),
            resume_session_id: Some(resume_session_id),
            resume_at_message_uuid: Some(message_uuid.clone()),
            proxy_base_url: state.sessions.proxy_base_url().to_string(),
            route_token: SessionManager::route_token(&session.session_id),
        })
        .await;

    let cli = match spawn {
        Ok(cli) => cli,
        Err(e) => {
            tracing::error!(session_id = %session.session_id, error = %e, "branch respawn failed");
            state
                .sessions
                .update(&session.session_id, |s| s.state = SessionState::Error);
            send_error(
                state,
                connection_id,
                &format!("Failed to branch session: {e}"),
                Some(&tab_id),
                None,
            )
            .await;
            return;
        }
    };

    state.sessions.update(&session.session_id, |s| {
        s.claude_session_id = Some(s.session_id.clone());
        s.state = SessionState::Active;
    });

    // Acknowledge before any streaming begins.
    send_direct(
        state,
        connection_id,
        &ServerFrame::EditAcknowledged {
            tab_id: tab_id.clone(),
            branch_point: message_uuid,
        },
    )
    .await;

    let state = state.clone();
    let connection_id = connection_id.to_string();
    let session_id = session.session_id.clone();
    tokio::spawn(async move {
        let sessions = state.sessions.clone();
        let sid = session_id.clone();
        let tab = tab_id.clone();
        let result = cli
            .send_and_stream(&new_content, None, move |event| {
                let sessions = sessions.clone();
                let sid = sid.clone();
                let tab = tab.clone();
                async move {
                    sessions.send(&sid, claude_event_frame(&tab, event)).await;
                }
            })
            .await;
        if let Err(e) = result {
            tracing::error!(session_id = %session_id, error = %e, "edit streaming failed");
            send_error(
                &state,
                &connection_id,
                &format!("Edit streaming failed: {e}"),
                Some(&tab_id),
                Some(ErrorCode::ClaudeSendFailed),
            )
            .await;
        }
    });
}

pub async fn handle_interrupt(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::Interrupt { tab_id, .. } = frame else {
        return;
    };

    let Some(session) = require_session(state, connection_id, &tab_id).await else {
        return;
    };

    let Some(cli) = state.sessions.claude.get(&session.session_id) else {
        send_error(
            state,
            connection_id,
            "No active subprocess to interrupt",
            Some(&tab_id),
            Some(ErrorCode::SessionNotFound),
        )
        .await;
        return;
    };

    match cli.interrupt().await {
        Ok(()) => {
            tracing::info!(session_id = %session.session_id, "interrupt forwarded");
            // An interrupt resolves any permission still waiting on the
            // client with a deny; the subprocess is abandoning the turn.
            let denied = state.permissions.deny_pending_for_tab(&tab_id);
            if denied > 0 {
                tracing::info!(tab_id = %tab_id, denied, "denied pending permissions on interrupt");
            }

            let frame = ServerFrame::InterruptAcknowledged {
                tab_id: tab_id.clone(),
                status: "success".into(),
                seq: state.sessions.acks.next_seq(&tab_id),
            };
            send_direct(state, connection_id, &frame).await;
        }
        Err(e) => {
            send_error(
                state,
                connection_id,
                &format!("Interrupt failed: {e}"),
                Some(&tab_id),
                Some(ErrorCode::SystemError),
            )
            .await;
        }
    }
}
