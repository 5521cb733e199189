//! Session model: the broker's authoritative unit of conversation state.
//!
//! A session is keyed internally by `session_id`; the mobile client only
//! ever sees `tab_id`. Sessions outlive WebSocket connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initializing,
    Ready,
    Active,
    /// No live connection; buffered frames await replay.
    Inactive,
    Error,
    Terminated,
}

/// Permission modes the client can request for a session's subprocess.
///
/// `Prompt` is broker-side (every tool use round-trips to the client);
/// the others are forwarded to the CLI as its native modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionMode {
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "acceptEdits")]
    AcceptEdits,
    #[serde(rename = "plan")]
    Plan,
    #[serde(rename = "bypassPermissions")]
    BypassPermissions,
    #[serde(rename = "prompt")]
    Prompt,
}

impl PermissionMode {
    /// The mode string the CLI understands. `prompt` has no CLI
    /// equivalent and maps to `default`; prompting happens broker-side.
    pub fn as_cli_mode(&self) -> &'static str {
        match self {
            PermissionMode::Default | PermissionMode::Prompt => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Core session record.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    /// Client-facing key. Unique across live sessions.
    pub tab_id: String,
    pub state: SessionState,
    pub workdir: String,
    pub system_prompt: Option<String>,
    pub permission_mode: PermissionMode,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Set iff an LLM-CLI subprocess is attached; captured from the
    /// subprocess's first `system/init` event.
    pub claude_session_id: Option<String>,
    /// Message uuid where the last edit/branch occurred.
    pub branch_point_uuid: Option<String>,
    /// Original session id when this session is a branch.
    pub original_session_id: Option<String>,
}

impl Session {
    pub fn new(
        session_id: String,
        tab_id: String,
        workdir: String,
        system_prompt: Option<String>,
        permission_mode: PermissionMode,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            tab_id,
            state: SessionState::Initializing,
            workdir,
            system_prompt,
            permission_mode,
            created_at: now,
            last_activity: now,
            claude_session_id: None,
            branch_point_uuid: None,
            original_session_id: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

/// Error codes surfaced to the client in `error` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingTabId,
    MissingContent,
    NoActiveRoute,
    SessionNotFound,
    InvalidRouteToken,
    ClaudeSendFailed,
    SystemError,
}
