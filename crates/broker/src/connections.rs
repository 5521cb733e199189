//! Control-channel connection registry.
//!
//! Connections are decoupled from sessions: the mobile client multiplexes
//! every tab over one WebSocket, and a session may be served by several
//! connections (multi-device). Socket writes happen in per-connection
//! writer tasks fed by mpsc sinks, so nothing here blocks on a slow peer.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// Commands for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    Close,
}

pub type ConnSink = mpsc::Sender<Outbound>;

/// A live control-channel connection.
pub struct Connection {
    pub connection_id: String,
    pub sink: ConnSink,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub client_info: HashMap<String, String>,
}

struct Registry {
    connections: HashMap<String, Connection>,
    /// session_id → connection ids serving it (N:M with the above).
    session_connections: HashMap<String, HashSet<String>>,
}

/// Thread-safe connection manager.
pub struct ConnectionManager {
    inner: Mutex<Registry>,
    max_per_session: usize,
    /// Idle threshold in seconds; 0 disables idleness-based pruning.
    idle_timeout_secs: u64,
}

impl ConnectionManager {
    pub fn new(max_per_session: usize, idle_timeout_secs: u64) -> Self {
        Self {
            inner: Mutex::new(Registry {
                connections: HashMap::new(),
                session_connections: HashMap::new(),
            }),
            max_per_session,
            idle_timeout_secs,
        }
    }

    /// Register a connection. Idempotent on connection id.
    pub fn add(&self, connection_id: &str, sink: ConnSink) {
        let mut inner = self.inner.lock();
        if inner.connections.contains_key(connection_id) {
            tracing::warn!(connection_id, "connection already registered");
            return;
        }
        let now = Utc::now();
        inner.connections.insert(
            connection_id.to_string(),
            Connection {
                connection_id: connection_id.to_string(),
                sink,
                connected_at: now,
                last_activity: now,
                client_info: HashMap::new(),
            },
        );
        tracing::info!(connection_id, "connection added");
    }

    pub fn update_client_info(&self, connection_id: &str, updates: HashMap<String, String>) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.connections.get_mut(connection_id) {
            conn.client_info.extend(updates);
        }
    }

    pub fn touch(&self, connection_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.connections.get_mut(connection_id) {
            conn.last_activity = Utc::now();
        }
    }

    /// Associate a connection with a session (additive: the connection
    /// keeps serving its other sessions). When the session is already at
    /// the connection cap, the oldest connection is closed after the
    /// registry lock is released.
    pub async fn attach(&self, connection_id: &str, session_id: &str) -> bool {
        let oldest_to_close;
        {
            let mut inner = self.inner.lock();
            if !inner.connections.contains_key(connection_id) {
                tracing::error!(connection_id, "cannot attach unknown connection");
                return false;
            }

            let over_cap: Option<Vec<String>> = match inner.session_connections.get(session_id) {
                Some(serving)
                    if serving.len() >= self.max_per_session
                        && !serving.contains(connection_id) =>
                {
                    Some(serving.iter().cloned().collect())
                }
                _ => None,
            };
            oldest_to_close = over_cap.and_then(|ids| {
                ids.into_iter().min_by_key(|id| {
                    inner
                        .connections
                        .get(id)
                        .map(|c| c.connected_at)
                        .unwrap_or_else(Utc::now)
                })
            });

            inner
                .session_connections
                .entry(session_id.to_string())
                .or_default()
                .insert(connection_id.to_string());
            if let Some(conn) = inner.connections.get_mut(connection_id) {
                conn.last_activity = Utc::now();
            }
            tracing::info!(connection_id, session_id, "connection attached to session");
        }

        if let Some(old) = oldest_to_close {
            tracing::info!(
                connection_id = %old,
                session_id,
                "session at connection cap, closing oldest"
            );
            self.close(&old).await;
        }
        true
    }

    /// Detach one connection from one session.
    pub fn detach(&self, connection_id: &str, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(serving) = inner.session_connections.get_mut(session_id) {
            serving.remove(connection_id);
            if serving.is_empty() {
                inner.session_connections.remove(session_id);
            }
        }
    }

    /// Remove a connection entirely. Returns the sessions it served, so
    /// the session manager can decide which go inactive.
    pub fn remove(&self, connection_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.connections.remove(connection_id);
        let mut affected = Vec::new();
        inner.session_connections.retain(|session_id, serving| {
            if serving.remove(connection_id) {
                affected.push(session_id.clone());
            }
            !serving.is_empty()
        });
        tracing::info!(connection_id, sessions = affected.len(), "connection removed");
        affected
    }

    /// Close a connection's socket and drop it from the registry.
    pub async fn close(&self, connection_id: &str) -> Vec<String> {
        let sink = {
            let inner = self.inner.lock();
            inner.connections.get(connection_id).map(|c| c.sink.clone())
        };
        if let Some(sink) = sink {
            let _ = sink.send(Outbound::Close).await;
        }
        self.remove(connection_id)
    }

    /// Connection ids with live sinks serving a session.
    pub fn session_connection_ids(&self, session_id: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .session_connections
            .get(session_id)
            .map(|serving| {
                serving
                    .iter()
                    .filter(|id| {
                        inner
                            .connections
                            .get(*id)
                            .map(|c| !c.sink.is_closed())
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sink(&self, connection_id: &str) -> Option<ConnSink> {
        let inner = self.inner.lock();
        inner
            .connections
            .get(connection_id)
            .filter(|c| !c.sink.is_closed())
            .map(|c| c.sink.clone())
    }

    /// Fan a frame out to every connection of a session. The frame is
    /// serialized once. Returns `(succeeded, failed)`; `(0, 0)` means
    /// nothing was connected and the caller should rely on the buffer.
    pub async fn send_to_session(&self, session_id: &str, frame: &Value) -> (usize, usize) {
        let sinks: Vec<(String, ConnSink)> = {
            let inner = self.inner.lock();
            inner
                .session_connections
                .get(session_id)
                .map(|serving| {
                    serving
                        .iter()
                        .filter_map(|id| {
                            inner.connections.get(id).map(|c| (id.clone(), c.sink.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        if sinks.is_empty() {
            tracing::warn!(session_id, "no connections for session, frame stays buffered");
            return (0, 0);
        }

        let serialized = frame.to_string();
        let mut succeeded = 0;
        let mut failed = 0;
        let mut dead = Vec::new();

        for (connection_id, sink) in sinks {
            if sink.send(Outbound::Frame(serialized.clone())).await.is_ok() {
                succeeded += 1;
                self.touch(&connection_id);
            } else {
                tracing::warn!(connection_id = %connection_id, "send failed, scheduling close");
                failed += 1;
                dead.push(connection_id);
            }
        }

        for connection_id in dead {
            self.remove(&connection_id);
        }

        (succeeded, failed)
    }

    /// Sweep dead connections: closed sinks always, idle ones when an
    /// idle threshold is configured. Returns removed connection ids with
    /// the sessions they served.
    pub fn prune_dead(&self) -> Vec<(String, Vec<String>)> {
        let to_remove: Vec<String> = {
            let inner = self.inner.lock();
            let now = Utc::now();
            inner
                .connections
                .values()
                .filter(|c| {
                    if c.sink.is_closed() {
                        return true;
                    }
                    self.idle_timeout_secs > 0
                        && now.signed_duration_since(c.last_activity).num_seconds()
                            > self.idle_timeout_secs as i64
                })
                .map(|c| c.connection_id.clone())
                .collect()
        };

        to_remove
            .into_iter()
            .map(|id| {
                let affected = self.remove(&id);
                (id, affected)
            })
            .collect()
    }

    pub fn stats(&self) -> Value {
        let inner = self.inner.lock();
        serde_json::json!({
            "total_connections": inner.connections.len(),
            "active_sessions": inner.session_connections.len(),
            "connections_per_session": inner
                .session_connections
                .iter()
                .map(|(k, v)| (k.clone(), v.len()))
                .collect::<HashMap<String, usize>>(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
