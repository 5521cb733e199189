//! Health and status diagnostics over the control channel.

use tether_protocol::ServerFrame;

use crate::handlers::send_direct;
use crate::state::AppState;

pub async fn handle_health(state: &AppState, connection_id: &str) {
    let frame = ServerFrame::Health {
        status: "ok".into(),
        broker_running: true,
        has_credentials: state.sessions.has_credentials(),
    };
    send_direct(state, connection_id, &frame).await;
}

pub async fn handle_status(state: &AppState, connection_id: &str) {
    let frame = ServerFrame::Status {
        status: None,
        tab_id: None,
        resumed: None,
        seq: None,
        stats: Some(state.sessions.stats()),
        sessions: Some(state.sessions.list_sessions()),
    };
    send_direct(state, connection_id, &frame).await;
}
