//! Session manager: the authoritative owner of session state.
//!
//! Coordinates lifecycle (create/attach/detach/destroy), the per-session
//! proxy route, outbound frame flow (seq allocation → buffer → fanout),
//! and replay on reattach.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use tether_domain::config::BrokerConfig;
use tether_domain::route::Credentials;
use tether_domain::session::{PermissionMode, Session, SessionState};
use tether_protocol::ServerFrame;
use tether_proxy::RouteRegistry;

use crate::ack::AckEngine;
use crate::buffer::MessageBuffer;
use crate::claude::ClaudeInterface;
use crate::connections::{ConnectionManager, Outbound};
use crate::util::generate_session_suffix;

pub struct SessionManager {
    pub connections: Arc<ConnectionManager>,
    pub buffer: Arc<MessageBuffer>,
    pub acks: Arc<AckEngine>,
    pub registry: Arc<RouteRegistry>,
    pub claude: Arc<ClaudeInterface>,
    /// Client-supplied global credentials; copied into route entries.
    credentials: RwLock<Option<Credentials>>,
    sessions: Mutex<HashMap<String, Session>>,
    tab_index: Mutex<HashMap<String, String>>,
    session_timeout_secs: u64,
    proxy_base_url: String,
}

impl SessionManager {
    pub fn new(
        config: &BrokerConfig,
        connections: Arc<ConnectionManager>,
        buffer: Arc<MessageBuffer>,
        acks: Arc<AckEngine>,
        registry: Arc<RouteRegistry>,
        claude: Arc<ClaudeInterface>,
    ) -> Self {
        Self {
            connections,
            buffer,
            acks,
            registry,
            claude,
            credentials: RwLock::new(None),
            sessions: Mutex::new(HashMap::new()),
            tab_index: Mutex::new(HashMap::new()),
            session_timeout_secs: config.session_timeout_secs,
            proxy_base_url: config.proxy_base_url(),
        }
    }

    // ── Credentials ────────────────────────────────────────────────

    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write() = Some(credentials);
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().clone()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.read().is_some()
    }

    pub fn proxy_base_url(&self) -> &str {
        &self.proxy_base_url
    }

    // ── Routes ─────────────────────────────────────────────────────

    /// The opaque token a session's subprocess authenticates with.
    pub fn route_token(session_id: &str) -> String {
        let suffix = session_id.strip_prefix("session_").unwrap_or(session_id);
        format!("tether-{suffix}")
    }

    /// (Re-)register a session's proxy route from the global credentials.
    /// For existing tokens this stages the config for the next turn.
    pub fn register_session_route(&self, session_id: &str) {
        let Some(credentials) = self.credentials() else {
            tracing::warn!(session_id, "no credentials for route registration");
            return;
        };
        self.registry
            .register(&Self::route_token(session_id), credentials.to_route_config());
    }

    /// Queue a credential swap for every session with a live subprocess.
    /// Each applies on that session's next turn.
    pub fn queue_credential_updates(&self, credentials: &Credentials) -> usize {
        let sessions = self.sessions.lock();
        let mut updated = 0;
        for session in sessions.values() {
            if session.claude_session_id.is_some() {
                self.registry.update(
                    &Self::route_token(&session.session_id),
                    credentials.to_route_config(),
                );
                updated += 1;
            }
        }
        tracing::info!(updated, "queued credential updates for active sessions");
        updated
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Create a session for a tab, or return the existing one. The
    /// proxy route is registered before any subprocess can start so the
    /// first HTTP request already resolves.
    pub async fn create(
        &self,
        tab_id: &str,
        initial_connection: Option<&str>,
        workdir: &str,
        system_prompt: Option<String>,
        permission_mode: PermissionMode,
    ) -> Session {
        let existing = {
            let tabs = self.tab_index.lock();
            tabs.get(tab_id).cloned()
        };
        if let Some(session_id) = existing {
            if let Some(session) = self.get(&session_id) {
                tracing::info!(tab_id, session_id = %session_id, "tab already has a session");
                if let Some(connection_id) = initial_connection {
                    self.attach(&session_id, connection_id).await;
                }
                return session;
            }
        }

        let session_id = format!("session_{}", generate_session_suffix());
        let session = Session::new(
            session_id.clone(),
            tab_id.to_string(),
            workdir.to_string(),
            system_prompt,
            permission_mode,
        );
        self.sessions.lock().insert(session_id.clone(), session.clone());
        self.tab_index
            .lock()
            .insert(tab_id.to_string(), session_id.clone());
        tracing::info!(tab_id, session_id = %session_id, workdir, "session created");

        self.register_session_route(&session_id);

        if let Some(connection_id) = initial_connection {
            self.attach(&session_id, connection_id).await;
        } else {
            self.update(&session_id, |s| s.state = SessionState::Ready);
        }

        self.get(&session_id).unwrap_or(session)
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn get_by_tab(&self, tab_id: &str) -> Option<Session> {
        let session_id = self.tab_index.lock().get(tab_id).cloned()?;
        self.get(&session_id)
    }

    /// Mutate a session under the registry lock.
    pub fn update<F: FnOnce(&mut Session)>(&self, session_id: &str, f: F) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(session) => {
                f(session);
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Attach a connection; transitions to active and replays missed
    /// frames to the newly attached socket.
    pub async fn attach(&self, session_id: &str, connection_id: &str) -> bool {
        if self.get(session_id).is_none() {
            tracing::error!(session_id, "attach to unknown session");
            return false;
        }
        if !self.connections.attach(connection_id, session_id).await {
            return false;
        }
        self.update(session_id, |s| s.state = SessionState::Active);
        self.replay(session_id, connection_id).await;
        true
    }

    /// A connection died or closed: detach it everywhere; sessions left
    /// without a live connection go inactive (their routes stay).
    pub fn connection_closed(&self, connection_id: &str) {
        let affected = self.connections.remove(connection_id);
        for session_id in affected {
            if self.connections.session_connection_ids(&session_id).is_empty() {
                self.update(&session_id, |s| {
                    if s.state == SessionState::Active {
                        s.state = SessionState::Inactive;
                    }
                });
                tracing::info!(session_id = %session_id, "session inactive, no live connections");
            }
        }
    }

    /// Destroy a session: route unregistered, connections closed, buffer
    /// and ack state cleared, subprocess terminated, tab unmapped.
    pub async fn destroy(&self, session_id: &str, explicit: bool) {
        let Some(session) = self.sessions.lock().remove(session_id) else {
            return;
        };
        self.tab_index.lock().remove(&session.tab_id);
        self.registry.unregister(&Self::route_token(session_id));

        for connection_id in self.connections.session_connection_ids(session_id) {
            self.connections.close(&connection_id).await;
        }

        self.buffer.clear(session_id);
        self.acks.remove(session_id);
        self.acks.remove(&session.tab_id);
        self.claude.close_session(session_id);
        tracing::info!(session_id, explicit, "session destroyed");
    }

    // ── Outbound flow ──────────────────────────────────────────────

    /// Send one frame to a session: allocate seq, buffer, fan out. No
    /// live connection is not an error; the frame waits for replay.
    pub async fn send(&self, session_id: &str, mut content: Value) -> (usize, usize) {
        let seq = self.acks.next_seq(session_id);
        content["seq"] = json!(seq);
        self.buffer.append(session_id, seq, content.clone());

        let (succeeded, failed) = self.connections.send_to_session(session_id, &content).await;
        if succeeded == 0 && failed == 0 {
            tracing::debug!(session_id, seq, "frame buffered, no live connections");
        } else if failed > 0 {
            tracing::warn!(session_id, seq, failed, "partial fanout failure");
        }
        (succeeded, failed)
    }

    /// One frame carrying a batch of events (conversation load path).
    pub async fn send_batch(
        &self,
        session_id: &str,
        tab_id: &str,
        events: Vec<Value>,
    ) -> (usize, usize) {
        let seq = self.acks.next_seq(session_id);
        let frame = ServerFrame::ConversationEventsBatch {
            tab_id: tab_id.to_string(),
            event_count: events.len(),
            events,
            seq: Some(seq),
        };
        let content = serde_json::to_value(&frame).expect("batch frame serializes");
        self.buffer.append(session_id, seq, content.clone());
        self.connections.send_to_session(session_id, &content).await
    }

    // ── Replay ─────────────────────────────────────────────────────

    /// Replay every frame past the session's persistent last-acked seq
    /// to one connection, bracketed by sync_status markers. Driven by
    /// ack-engine state, never per-connection bookkeeping.
    async fn replay(&self, session_id: &str, connection_id: &str) {
        let Some(session) = self.get(session_id) else {
            return;
        };
        let Some(sink) = self.connections.sink(connection_id) else {
            return;
        };

        let last_acked = self.acks.client_last_acked(session_id);
        let missed = self.buffer.since(session_id, last_acked);
        if missed.is_empty() {
            tracing::debug!(session_id, connection_id, "nothing to replay");
            return;
        }
        tracing::info!(
            session_id,
            connection_id,
            last_acked,
            count = missed.len(),
            "replaying missed frames"
        );

        let start = ServerFrame::SyncStatus {
            tab_id: session.tab_id.clone(),
            sync: {
                let mut snapshot = self.acks.sync_status(session_id);
                snapshot.is_synced = false;
                snapshot
            },
            missed_count: missed.len(),
            seq: self.acks.next_seq(session_id),
        };
        if sink.send(Outbound::Frame(start.to_wire())).await.is_err() {
            return;
        }

        for msg in missed {
            let mut frame = msg.content.clone();
            frame["replay"] = json!(true);
            if sink.send(Outbound::Frame(frame.to_string())).await.is_err() {
                tracing::warn!(session_id, seq = msg.seq, "replay interrupted, connection gone");
                return;
            }
        }

        let end = ServerFrame::SyncStatus {
            tab_id: session.tab_id,
            sync: {
                let mut snapshot = self.acks.sync_status(session_id);
                snapshot.is_synced = true;
                snapshot
            },
            missed_count: 0,
            seq: self.acks.next_seq(session_id),
        };
        let _ = sink.send(Outbound::Frame(end.to_wire())).await;
    }

    // ── Sweeps & stats ─────────────────────────────────────────────

    /// Destroy inactive sessions idle past the configured timeout.
    /// Disabled when the timeout is zero.
    pub async fn sweep_idle(&self) {
        if self.session_timeout_secs == 0 {
            return;
        }
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .values()
                .filter(|s| {
                    s.state == SessionState::Inactive
                        && now.signed_duration_since(s.last_activity).num_seconds()
                            > self.session_timeout_secs as i64
                })
                .map(|s| s.session_id.clone())
                .collect()
        };
        for session_id in expired {
            tracing::info!(session_id = %session_id, "destroying idle session");
            self.destroy(&session_id, false).await;
        }
    }

    pub fn stats(&self) -> Value {
        let sessions = self.sessions.lock();
        let (buffer_sessions, buffered, unacked) = self.buffer.stats();
        json!({
            "total_sessions": sessions.len(),
            "active_sessions": sessions.values().filter(|s| s.state == SessionState::Active).count(),
            "inactive_sessions": sessions.values().filter(|s| s.state == SessionState::Inactive).count(),
            "subprocesses": self.claude.session_count(),
            "connection_stats": self.connections.stats(),
            "buffer_stats": {
                "sessions": buffer_sessions,
                "total_messages": buffered,
                "total_unacked": unacked,
            },
        })
    }

    pub fn list_sessions(&self) -> Value {
        let sessions = self.sessions.lock();
        json!(sessions
            .values()
            .map(|s| {
                json!({
                    "session_id": s.session_id,
                    "tab_id": s.tab_id,
                    "state": s.state,
                    "workdir": s.workdir,
                    "created_at": s.created_at.to_rfc3339(),
                    "last_activity": s.last_activity.to_rfc3339(),
                    "has_subprocess": s.claude_session_id.is_some(),
                })
            })
            .collect::<Vec<_>>())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
