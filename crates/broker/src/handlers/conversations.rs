//! Conversation history: enumeration and resume-from-history.

use tether_domain::session::{ErrorCode, PermissionMode, SessionState};
use tether_protocol::{ClientFrame, ServerFrame};

use crate::claude::SpawnOptions;
use crate::conversations;
use crate::handlers::{credentials, send_direct, send_error};
use crate::sessions::SessionManager;
use crate::state::AppState;

pub async fn handle_request_conversations(
    state: &AppState,
    connection_id: &str,
    frame: ClientFrame,
) {
    let ClientFrame::RequestConversations { cwd } = frame else {
        return;
    };
    let Some(cwd) = cwd.filter(|c| !c.is_empty()) else {
        send_error(
            state,
            connection_id,
            "cwd required for requesting conversations",
            None,
            None,
        )
        .await;
        return;
    };

    let list = conversations::list_for_project(&state.config.projects_dir, &cwd);
    tracing::info!(cwd = %cwd, count = list.len(), "listed conversations");

    let frame = ServerFrame::Conversations {
        cwd,
        conversations: list,
    };
    send_direct(state, connection_id, &frame).await;
}

/// Resume a session from an on-disk conversation: spawn the subprocess
/// with `--resume`, then stream the sliced history back as one batch.
pub async fn handle_load_conversation(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::LoadConversation {
        tab_id,
        session_id: conversation_id,
        cwd,
        claude_config,
        ..
    } = frame
    else {
        return;
    };

    let Some(tab_id) = tab_id.filter(|t| !t.is_empty()) else {
        send_error(state, connection_id, "tabId required for loading conversation", None, None)
            .await;
        return;
    };
    let Some(cwd) = cwd.filter(|c| !c.is_empty()) else {
        send_error(
            state,
            connection_id,
            "cwd required for loading conversation",
            Some(&tab_id),
            None,
        )
        .await;
        return;
    };
    let Some(conversation_id) = conversation_id.filter(|s| !s.is_empty()) else {
        send_error(
            state,
            connection_id,
            "sessionId required for loading conversation",
            Some(&tab_id),
            None,
        )
        .await;
        return;
    };

    if let Some(config) = claude_config {
        match credentials::credentials_from_config(&config) {
            Ok(creds) => state.sessions.set_credentials(creds),
            Err(message) => {
                send_error(state, connection_id, &message, Some(&tab_id), None).await;
                return;
            }
        }
    }

    // Reuse or create the broker session for this tab.
    let session = match state.sessions.get_by_tab(&tab_id) {
        Some(session) => {
            // A stale subprocess cannot be rewound; replace it.
            if session.claude_session_id.is_some() {
                tracing::info!(session_id = %session.session_id, "closing subprocess before resume");
                state.sessions.claude.close_session(&session.session_id);
                state
                    .sessions
                    .update(&session.session_id, |s| s.claude_session_id = None);
            }
            session
        }
        None => {
            state
                .sessions
                .create(&tab_id, Some(connection_id), &cwd, None, PermissionMode::Prompt)
                .await
        }
    };

    let Some(creds) = state.sessions.credentials() else {
        send_error(
            state,
            connection_id,
            "Credentials required to load conversation",
            Some(&tab_id),
            Some(ErrorCode::NoActiveRoute),
        )
        .await;
        return;
    };

    tracing::info!(
        session_id = %session.session_id,
        conversation = %conversation_id,
        "resuming conversation from history"
    );
    let spawn = state
        .sessions
        .claude
        .create_session(SpawnOptions {
            session_id: session.session_id.clone(),
            tab_id: tab_id.clone(),
            workdir: cwd.clone(),
            system_prompt: None,
            model: creds.model.clone(),
            resume_session_id: Some(conversation_id.clone()),
            resume_at_message_uuid: None,
            proxy_base_url: state.sessions.proxy_base_url().to_string(),
            route_token: SessionManager::route_token(&session.session_id),
        })
        .await;

    if let Err(e) = spawn {
        tracing::error!(session_id = %session.session_id, error = %e, "resume spawn failed");
        send_error(
            state,
            connection_id,
            &format!("Failed to resume conversation: {e}"),
            Some(&tab_id),
            None,
        )
        .await;
        return;
    }
    state.sessions.update(&session.session_id, |s| {
        s.claude_session_id = Some(s.session_id.clone());
        s.state = SessionState::Active;
    });

    let events = conversations::load_events(&state.config.projects_dir, &cwd, &conversation_id);
    if events.is_empty() {
        send_error(
            state,
            connection_id,
            &format!("No events found for conversation {conversation_id}"),
            Some(&tab_id),
            None,
        )
        .await;
        return;
    }

    let count = events.len();
    state
        .sessions
        .send_batch(&session.session_id, &tab_id, events)
        .await;
    state
        .sessions
        .send(
            &session.session_id,
            serde_json::to_value(ServerFrame::ConversationLoaded {
                tab_id: tab_id.clone(),
                session_id: conversation_id.clone(),
                event_count: count,
            })
            .expect("frame serializes"),
        )
        .await;

    tracing::info!(
        tab_id = %tab_id,
        conversation = %conversation_id,
        events = count,
        "conversation loaded"
    );
}
