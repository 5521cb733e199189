//! Control-channel protocol: the JSON frames exchanged between the mobile
//! client and the broker over a single multiplexed WebSocket.
//!
//! Every frame is a JSON object tagged by `type`. One connection carries
//! many tabs; frames that target a session carry `tabId`. Frames that
//! participate in ordered delivery carry `seq`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Max control-channel frame size (10 MiB).
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Credentials pushed by the client inside `start`, `update_credentials`
/// or `load_conversation`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub auth_method: Option<String>,
    #[serde(default)]
    pub extra_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub azure_deployment: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
}

/// Permission decision as sent by the client. `behavior` may be `allow`,
/// `deny` or `auto`; `auto` is translated to `allow` at the handler layer
/// before it reaches the permission manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDecision {
    pub behavior: String,
    #[serde(rename = "updatedInput", default, skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<bool>,
}

/// A route catalog entry for the legacy `routes` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub token: String,
    #[serde(default)]
    pub config: Value,
}

/// Per-direction sequencing snapshot, broker → client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundSync {
    pub next_seq: u64,
    pub last_acked: i64,
    pub pending_count: usize,
}

/// Per-direction sequencing snapshot, client → broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSync {
    pub next_seq: u64,
    pub last_sent_ack: i64,
    pub pending_count: usize,
}

/// Body of a `sync_status` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub is_synced: bool,
    pub broker_to_ios: OutboundSync,
    pub ios_to_broker: InboundSync,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client → broker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Create or resume a session for a tab.
    #[serde(rename = "start")]
    Start {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(default)]
        workdir: Option<String>,
        #[serde(rename = "systemPrompt", default)]
        system_prompt: Option<String>,
        #[serde(rename = "permissionMode", default)]
        permission_mode: Option<String>,
        #[serde(rename = "claudeConfig", default)]
        claude_config: Option<ClaudeConfig>,
        #[serde(default)]
        seq: Option<u64>,
        /// Last broker seq the client saw; drives reconnect replay.
        #[serde(default)]
        last_received_seq: Option<i64>,
    },

    /// Append a user turn to a session.
    #[serde(rename = "send")]
    Send {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(rename = "messageUuid", default)]
        message_uuid: Option<String>,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Branch the session at a message uuid with replacement content.
    #[serde(rename = "edit_message")]
    EditMessage {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "messageUuid", default)]
        message_uuid: Option<String>,
        #[serde(rename = "newContent", default)]
        new_content: Option<String>,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Interrupt the session's subprocess.
    #[serde(rename = "interrupt")]
    Interrupt {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Change the subprocess permission mode at runtime.
    #[serde(rename = "set_permission_mode")]
    SetPermissionMode {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(default)]
        mode: Option<String>,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Resolve a pending permission request.
    #[serde(rename = "permission_response")]
    PermissionResponse {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
        #[serde(default)]
        decision: Option<ClientDecision>,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Swap the global credentials; applied to session routes next turn.
    #[serde(rename = "update_credentials")]
    UpdateCredentials {
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
        #[serde(rename = "claudeConfig", default)]
        claude_config: Option<ClaudeConfig>,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Legacy static route catalog: register (payload given) or query.
    #[serde(rename = "routes")]
    Routes {
        #[serde(default)]
        payload: Option<Vec<RouteEntry>>,
        #[serde(rename = "routesPayload", default)]
        routes_payload: Option<Vec<RouteEntry>>,
    },

    #[serde(rename = "set_active_route")]
    SetActiveRoute {
        #[serde(default)]
        token: Option<String>,
    },

    #[serde(rename = "set_stable_route")]
    SetStableRoute {
        #[serde(default)]
        token: Option<String>,
    },

    /// Cumulative ack of broker frames up to `seq`.
    #[serde(rename = "response_ack")]
    ResponseAck {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Enumerate on-disk conversation history for a working directory.
    #[serde(rename = "request_conversations")]
    RequestConversations {
        #[serde(default)]
        cwd: Option<String>,
    },

    /// Resume a session from an on-disk conversation file.
    #[serde(rename = "load_conversation")]
    LoadConversation {
        #[serde(rename = "tabId", default)]
        tab_id: Option<String>,
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(rename = "claudeConfig", default)]
        claude_config: Option<ClaudeConfig>,
        #[serde(default)]
        seq: Option<u64>,
    },

    /// Close this connection; sessions detach but survive.
    #[serde(rename = "shutdown")]
    Shutdown {},

    #[serde(rename = "health")]
    Health {},

    #[serde(rename = "status")]
    Status {},
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broker → client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Unsolicited greeting on connect.
    #[serde(rename = "system")]
    System {
        status: String,
        connection_id: String,
        seq: u64,
    },

    /// `status: "ready"` after session start, or a stats report when the
    /// client asked for diagnostics (then `stats`/`sessions` are set).
    #[serde(rename = "status")]
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resumed: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stats: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sessions: Option<Value>,
    },

    /// Ack of an inbound client frame. `ack_seq` is the client seq being
    /// acknowledged; `seq` is the broker's own outbound counter.
    #[serde(rename = "message_received_ack")]
    MessageReceivedAck {
        #[serde(rename = "tabId")]
        tab_id: String,
        ack_seq: u64,
        seq: u64,
        is_duplicate: bool,
    },

    /// One event from the session's subprocess stream.
    #[serde(rename = "claude_event")]
    ClaudeEvent {
        #[serde(rename = "tabId")]
        tab_id: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },

    /// Batched history events from a conversation load.
    #[serde(rename = "conversation_events_batch")]
    ConversationEventsBatch {
        #[serde(rename = "tabId")]
        tab_id: String,
        events: Vec<Value>,
        #[serde(rename = "eventCount")]
        event_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },

    /// Tool-permission prompt forwarded from the subprocess.
    #[serde(rename = "permission_request")]
    PermissionRequest {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(rename = "toolInput")]
        tool_input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },

    #[serde(rename = "permission_mode_updated")]
    PermissionModeUpdated {
        #[serde(rename = "tabId")]
        tab_id: String,
        mode: String,
        status: String,
        seq: u64,
    },

    #[serde(rename = "interrupt_acknowledged")]
    InterruptAcknowledged {
        #[serde(rename = "tabId")]
        tab_id: String,
        status: String,
        seq: u64,
    },

    /// Replay bracket: `is_synced: false` before missed frames,
    /// `is_synced: true` after.
    #[serde(rename = "sync_status")]
    SyncStatus {
        #[serde(rename = "tabId")]
        tab_id: String,
        sync: SyncSnapshot,
        missed_count: usize,
        seq: u64,
    },

    /// Sent before streaming begins on an edit/branch.
    #[serde(rename = "edit_acknowledged")]
    EditAcknowledged {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "branchPoint")]
        branch_point: String,
    },

    #[serde(rename = "conversations")]
    Conversations {
        cwd: String,
        conversations: Vec<Value>,
    },

    #[serde(rename = "conversation_loaded")]
    ConversationLoaded {
        #[serde(rename = "tabId")]
        tab_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "eventCount")]
        event_count: usize,
    },

    #[serde(rename = "credentials_updated")]
    CredentialsUpdated {
        status: String,
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },

    /// Broker-initiated ask when it holds no credentials.
    #[serde(rename = "request_credentials")]
    RequestCredentials { reason: String },

    #[serde(rename = "routes_registered")]
    RoutesRegistered {
        tokens: Vec<String>,
        routes: Value,
        #[serde(rename = "activeRoute", default, skip_serializing_if = "Option::is_none")]
        active_route: Option<String>,
        #[serde(rename = "stableRoute")]
        stable_route: String,
    },

    #[serde(rename = "routes")]
    Routes {
        routes: Value,
        #[serde(rename = "activeRoute", default, skip_serializing_if = "Option::is_none")]
        active_route: Option<String>,
        #[serde(rename = "stableRoute")]
        stable_route: String,
    },

    #[serde(rename = "route_updated")]
    RouteUpdated {
        success: bool,
        #[serde(rename = "activeRoute", default, skip_serializing_if = "Option::is_none")]
        active_route: Option<String>,
        #[serde(rename = "stableRoute", default, skip_serializing_if = "Option::is_none")]
        stable_route: Option<String>,
    },

    #[serde(rename = "health")]
    Health {
        status: String,
        broker_running: bool,
        has_credentials: bool,
    },

    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
        tab_id: Option<String>,
        #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl ServerFrame {
    /// Serialize to the wire string. Frames are plain JSON objects.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("server frame serialization cannot fail")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_frame_parses_camel_case() {
        let raw = json!({
            "type": "start",
            "tabId": "t1",
            "workdir": "/tmp/project",
            "permissionMode": "prompt",
            "claudeConfig": {
                "provider": "anthropic",
                "apiKey": "k",
                "model": "claude-3-5-sonnet-latest",
                "baseUrl": "https://api.anthropic.com",
                "authMethod": "api_key"
            },
            "seq": 1
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::Start {
                tab_id,
                claude_config,
                seq,
                last_received_seq,
                ..
            } => {
                assert_eq!(tab_id, "t1");
                assert_eq!(seq, Some(1));
                assert_eq!(last_received_seq, None);
                let cfg = claude_config.unwrap();
                assert_eq!(cfg.provider.as_deref(), Some("anthropic"));
                assert_eq!(cfg.api_key.as_deref(), Some("k"));
            }
            other => panic!("expected Start, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        let raw = r#"{"type":"resend_all_the_things"}"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn permission_response_auto_behavior() {
        let raw = json!({
            "type": "permission_response",
            "tabId": "t1",
            "requestId": "t1:abcd1234",
            "decision": {"behavior": "auto"},
            "seq": 3
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::PermissionResponse { decision, .. } => {
                assert_eq!(decision.unwrap().behavior, "auto");
            }
            other => panic!("expected PermissionResponse, got {other:?}"),
        }
    }

    #[test]
    fn ack_frame_wire_shape() {
        let frame = ServerFrame::MessageReceivedAck {
            tab_id: "t1".into(),
            ack_seq: 4,
            seq: 10,
            is_duplicate: false,
        };
        let v: Value = serde_json::from_str(&frame.to_wire()).unwrap();
        assert_eq!(v["type"], "message_received_ack");
        assert_eq!(v["tabId"], "t1");
        assert_eq!(v["ack_seq"], 4);
        assert_eq!(v["seq"], 10);
        assert_eq!(v["is_duplicate"], false);
    }

    #[test]
    fn status_ready_omits_report_fields() {
        let frame = ServerFrame::Status {
            status: Some("ready".into()),
            tab_id: Some("t1".into()),
            resumed: None,
            seq: Some(2),
            stats: None,
            sessions: None,
        };
        let v: Value = serde_json::from_str(&frame.to_wire()).unwrap();
        assert_eq!(v["type"], "status");
        assert_eq!(v["status"], "ready");
        assert!(v.get("stats").is_none());
        assert!(v.get("resumed").is_none());
    }

    #[test]
    fn sync_status_round_trip() {
        let frame = ServerFrame::SyncStatus {
            tab_id: "t1".into(),
            sync: SyncSnapshot {
                is_synced: false,
                broker_to_ios: OutboundSync {
                    next_seq: 5,
                    last_acked: 2,
                    pending_count: 2,
                },
                ios_to_broker: InboundSync {
                    next_seq: 0,
                    last_sent_ack: -1,
                    pending_count: 0,
                },
            },
            missed_count: 2,
            seq: 5,
        };
        let v: Value = serde_json::from_str(&frame.to_wire()).unwrap();
        assert_eq!(v["sync"]["is_synced"], false);
        assert_eq!(v["sync"]["broker_to_ios"]["last_acked"], 2);
        assert_eq!(v["missed_count"], 2);
    }

    #[test]
    fn routes_frame_accepts_either_payload_key() {
        let a: ClientFrame = serde_json::from_value(json!({
            "type": "routes",
            "payload": [{"token": "tk", "config": {"provider": "openai"}}]
        }))
        .unwrap();
        let b: ClientFrame = serde_json::from_value(json!({
            "type": "routes",
            "routesPayload": [{"token": "tk", "config": {}}]
        }))
        .unwrap();
        match (a, b) {
            (
                ClientFrame::Routes { payload: Some(p), .. },
                ClientFrame::Routes {
                    routes_payload: Some(rp),
                    ..
                },
            ) => {
                assert_eq!(p[0].token, "tk");
                assert_eq!(rp[0].token, "tk");
            }
            other => panic!("unexpected parse {other:?}"),
        }
    }
}
