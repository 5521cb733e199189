//! `start` and `shutdown` handlers: session creation, reconnection, and
//! subprocess startup.

use tether_domain::session::{ErrorCode, PermissionMode, SessionState};
use tether_protocol::{ClientFrame, ServerFrame};

use crate::claude::SpawnOptions;
use crate::handlers::{credentials, send_direct, send_error};
use crate::sessions::SessionManager;
use crate::state::AppState;

fn parse_permission_mode(raw: Option<&str>) -> PermissionMode {
    match raw {
        Some("default") => PermissionMode::Default,
        Some("acceptEdits") => PermissionMode::AcceptEdits,
        Some("plan") => PermissionMode::Plan,
        Some("bypassPermissions") => PermissionMode::BypassPermissions,
        _ => PermissionMode::Prompt,
    }
}

pub async fn handle_start(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::Start {
        tab_id,
        workdir,
        system_prompt,
        permission_mode,
        claude_config,
        last_received_seq,
        ..
    } = frame
    else {
        return;
    };

    let workdir = workdir.unwrap_or_else(|| "/tmp".to_string());
    let permission_mode = parse_permission_mode(permission_mode.as_deref());

    // Credentials ride along on start; they always refresh the global
    // set so routes are current before the subprocess makes a request.
    if let Some(config) = claude_config {
        match credentials::credentials_from_config(&config) {
            Ok(creds) => state.sessions.set_credentials(creds),
            Err(message) => {
                send_error(state, connection_id, &message, Some(&tab_id), None).await;
                return;
            }
        }
    } else if !state.sessions.has_credentials() {
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

    let existing = state.sessions.get_by_tab(&tab_id);
    let resumed = existing.is_some();
    let session = match existing {
        Some(session) => {
            // Reconnect: refresh the route (staged for next turn), then
            // attach — attach drives the replay, which consults the
            // session's persistent ack state.
            let last_received = last_received_seq.unwrap_or(-1);
            let info = state
                .sessions
                .acks
                .reconnect_info(&session.session_id, last_received);
            tracing::info!(
                tab_id = %tab_id,
                session_id = %session.session_id,
                last_received,
                missed = info.missed_count,
                "client reconnecting to session"
            );
            state.sessions.register_session_route(&session.session_id);
            state.sessions.attach(&session.session_id, connection_id).await;
            session
        }
        None => {
            state
                .sessions
                .create(
                    &tab_id,
                    Some(connection_id),
                    &workdir,
                    system_prompt.clone(),
                    permission_mode,
                )
                .await
        }
    };

    // Start the subprocess when none is attached yet.
    if session.claude_session_id.is_none() {
        let Some(creds) = state.sessions.credentials() else {
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
        };

        let spawn = state
            .sessions
            .claude
            .create_session(SpawnOptions {
                session_id: session.session_id.clone(),
                tab_id: tab_id.clone(),
                workdir: workdir.clone(),
                system_prompt: system_prompt.clone(),
                model: creds.model.clone(),
                resume_session_id: None,
                resume_at_message_uuid: None,
                proxy_base_url: state.sessions.proxy_base_url().to_string(),
                route_token: SessionManager::route_token(&session.session_id),
            })
            .await;

        match spawn {
            Ok(cli) => {
                state.sessions.update(&session.session_id, |s| {
                    s.claude_session_id = Some(s.session_id.clone());
                    s.state = SessionState::Active;
                });

                // Non-prompt initial modes are forwarded to the CLI.
                if permission_mode != PermissionMode::Prompt {
                    if let Err(e) = cli.set_permission_mode(permission_mode.as_cli_mode()).await {
                        tracing::warn!(
                            session_id = %session.session_id,
                            error = %e,
                            "failed to set initial permission mode"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(session_id = %session.session_id, error = %e, "subprocess start failed");
                // The session stays mapped so the client can retry the
                // same tab without remapping.
                state
                    .sessions
                    .update(&session.session_id, |s| s.state = SessionState::Error);
                send_error(
                    state,
                    connection_id,
                    &format!("Failed to start subprocess: {e}"),
                    Some(&tab_id),
                    None,
                )
                .await;
                return;
            }
        }
    }

    let frame = ServerFrame::Status {
        status: Some("ready".into()),
        tab_id: Some(tab_id.clone()),
        resumed: resumed.then_some(true),
        seq: Some(state.sessions.acks.next_seq(&tab_id)),
        stats: None,
        sessions: None,
    };
    send_direct(state, connection_id, &frame).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mode_parsing_defaults_to_prompt() {
        assert_eq!(parse_permission_mode(Some("plan")), PermissionMode::Plan);
        assert_eq!(
            parse_permission_mode(Some("bypassPermissions")),
            PermissionMode::BypassPermissions
        );
        assert_eq!(parse_permission_mode(Some("bogus")), PermissionMode::Prompt);
        assert_eq!(parse_permission_mode(None), PermissionMode::Prompt);
    }
}
