//! Control-channel WebSocket endpoint.
//!
//! One socket serves every tab of a client. Flow:
//! 1. Client connects; broker sends an unsolicited
//!    `{type:"system", status:"connected", connection_id, seq}` greeting.
//! 2. Reader loop dispatches each JSON frame through the handlers.
//! 3. A writer task drains the connection's outbound channel to the
//!    socket, so registry locks never wait on socket I/O.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tether_protocol::{ServerFrame, MAX_FRAME_BYTES};
use tokio::sync::mpsc;

use crate::connections::Outbound;
use crate::handlers;
use crate::state::AppState;
use crate::util::generate_short_id;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/ws", get(upgrade))
        .with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = format!("conn_{}", generate_short_id());
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(256);
    state.sessions.connections.add(&connection_id, outbound_tx.clone());
    tracing::info!(connection_id = %connection_id, "client connected");

    // Writer task: the only place that touches the sink.
    let writer = tokio::spawn(async move {
        while let Some(cmd) = outbound_rx.recv().await {
            match cmd {
                Outbound::Frame(frame) => {
                    if ws_sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Greeting, sequenced under a connection-local scope.
    let greeting = ServerFrame::System {
        status: "connected".into(),
        connection_id: connection_id.clone(),
        seq: state.sessions.acks.next_seq(&connection_id),
    };
    if outbound_tx
        .send(Outbound::Frame(greeting.to_wire()))
        .await
        .is_err()
    {
        state.sessions.connection_closed(&connection_id);
        return;
    }

    // Reader loop.
    while let Some(message) = ws_stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                tracing::info!(connection_id = %connection_id, error = %e, "socket error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let close_requested = handlers::handle_frame(&state, &connection_id, &text).await;
                if close_requested {
                    let _ = outbound_tx.send(Outbound::Close).await;
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                // The client drives heartbeats; just refresh liveness.
                state.sessions.connections.touch(&connection_id);
            }
            Message::Binary(_) => {
                tracing::debug!(connection_id = %connection_id, "ignoring binary frame");
            }
        }
    }

    // Detach sessions (those left without a connection go inactive),
    // then stop the writer.
    state.sessions.connection_closed(&connection_id);
    state.sessions.acks.remove(&connection_id);
    writer.abort();
    tracing::info!(connection_id = %connection_id, "client disconnected");
}
