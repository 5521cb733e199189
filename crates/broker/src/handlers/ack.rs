//! Cumulative outbound-frame acknowledgements from the client.

use tether_protocol::ClientFrame;

use crate::handlers::require_session;
use crate::state::AppState;

pub async fn handle_response_ack(state: &AppState, connection_id: &str, frame: ClientFrame) {
    let ClientFrame::ResponseAck { tab_id, seq } = frame else {
        return;
    };
    let Some(session) = require_session(state, connection_id, &tab_id).await else {
        return;
    };
    let Some(seq) = seq else {
        tracing::warn!(tab_id = %tab_id, "response_ack without seq");
        return;
    };

    let cleared = state.sessions.acks.ack_from_client(&session.session_id, seq);
    let marked = state.sessions.buffer.ack_up_to(&session.session_id, seq);
    tracing::debug!(
        session_id = %session.session_id,
        seq,
        cleared,
        marked,
        "client acknowledged outbound frames"
    );
}
