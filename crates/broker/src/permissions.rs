//! Runtime-mutable tool-permission arbiter.
//!
//! The mode, rules, and client notifier can all change while sessions
//! are live. Prompted requests park a oneshot in the pending table and
//! wait — with no broker-side timeout; the client either answers or
//! interrupts the session, which resolves the wait with a deny.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;

use tether_domain::decision::Decision;
use tether_domain::{Error, Result};

use crate::util::canonical_cache_key;

/// Arbitration mode, changeable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArbitrationMode {
    Allow,
    Deny,
    #[default]
    Prompt,
    Cached,
    Custom,
}

impl ArbitrationMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "prompt" => Some(Self::Prompt),
            "cached" => Some(Self::Cached),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }
}

/// Callback used to surface a prompt to the client. Must not block; the
/// installed notifier spawns the actual delivery.
pub type ClientNotifier = Arc<dyn Fn(String, Value, String) + Send + Sync>;

struct PendingRequest {
    tool_name: String,
    tool_input: Value,
    respond: oneshot::Sender<Decision>,
    created_at: Instant,
}

struct CachedDecision {
    decision: Decision,
    cached_at: Instant,
}

#[derive(Debug, Default, Clone)]
pub struct PermissionStats {
    pub total_requests: u64,
    pub allowed: u64,
    pub denied: u64,
    pub escalated: u64,
}

/// The arbiter.
pub struct PermissionManager {
    mode: RwLock<ArbitrationMode>,
    notifier: RwLock<Option<ClientNotifier>>,
    /// tool name → "allow" | "deny".
    rules: RwLock<HashMap<String, String>>,
    cache: Mutex<HashMap<String, CachedDecision>>,
    cache_ttl: Duration,
    pending: Mutex<HashMap<String, PendingRequest>>,
    stats: Mutex<PermissionStats>,
}

impl PermissionManager {
    pub fn new(initial_mode: ArbitrationMode) -> Self {
        Self {
            mode: RwLock::new(initial_mode),
            notifier: RwLock::new(None),
            rules: RwLock::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(300),
            pending: Mutex::new(HashMap::new()),
            stats: Mutex::new(PermissionStats::default()),
        }
    }

    pub fn set_mode(&self, mode: ArbitrationMode) {
        let old = *self.mode.read();
        *self.mode.write() = mode;
        tracing::info!(?old, new = ?mode, "permission mode changed");
    }

    pub fn mode(&self) -> ArbitrationMode {
        *self.mode.read()
    }

    pub fn set_notifier(&self, notifier: Option<ClientNotifier>) {
        let installed = notifier.is_some();
        *self.notifier.write() = notifier;
        tracing::info!(installed, "client notifier updated");
    }

    pub fn update_rules(&self, rules: HashMap<String, String>) {
        let count = rules.len();
        self.rules.write().extend(rules);
        tracing::info!(count, "permission rules updated");
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Arbitrate one tool use. Consults the *current* runtime state on
    /// every call; prompted requests await the client without timeout.
    ///
    /// Errs only on manager failure — the pending channel closing before
    /// a resolution arrives. Policy outcomes, including "no notifier
    /// installed", are ordinary deny decisions.
    pub async fn get_permission(
        &self,
        tool_name: &str,
        tool_input: Value,
        request_id: &str,
    ) -> Result<Decision> {
        self.stats.lock().total_requests += 1;

        match self.mode() {
            ArbitrationMode::Allow => {
                self.stats.lock().allowed += 1;
                return Ok(Decision::allow(tool_input));
            }
            ArbitrationMode::Deny => {
                self.stats.lock().denied += 1;
                return Ok(Decision::deny("All tools denied by current mode"));
            }
            ArbitrationMode::Cached => {
                let key = canonical_cache_key(tool_name, &tool_input);
                let cached = {
                    let cache = self.cache.lock();
                    cache.get(&key).and_then(|entry| {
                        (entry.cached_at.elapsed() < self.cache_ttl)
                            .then(|| entry.decision.clone())
                    })
                };
                if let Some(mut decision) = cached {
                    tracing::debug!(tool_name, "cached permission decision");
                    if let Decision::Allow { updated_input } = &mut decision {
                        if updated_input.is_null() {
                            *updated_input = tool_input;
                        }
                    }
                    return Ok(decision);
                }
            }
            ArbitrationMode::Custom => {
                let behavior = self.rules.read().get(tool_name).cloned();
                match behavior.as_deref() {
                    Some("allow") => {
                        self.stats.lock().allowed += 1;
                        return Ok(Decision::allow(tool_input));
                    }
                    Some(_) => {
                        self.stats.lock().denied += 1;
                        return Ok(Decision::deny(format!("Tool {tool_name} denied by rule")));
                    }
                    None => {}
                }
            }
            ArbitrationMode::Prompt => {}
        }

        self.prompt_client(tool_name, tool_input, request_id).await
    }

    async fn prompt_client(
        &self,
        tool_name: &str,
        tool_input: Value,
        request_id: &str,
    ) -> Result<Decision> {
        let notifier = self.notifier.read().clone();
        let Some(notifier) = notifier else {
            tracing::warn!(tool_name, "no client notifier for permission prompt");
            self.stats.lock().denied += 1;
            return Ok(Decision::deny("No permission handler available"));
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id.to_string(),
            PendingRequest {
                tool_name: tool_name.to_string(),
                tool_input: tool_input.clone(),
                respond: tx,
                created_at: Instant::now(),
            },
        );

        notifier(tool_name.to_string(), tool_input.clone(), request_id.to_string());

        // No timeout here: the client answers or interrupts. A closed
        // channel means the pending entry was torn down without a
        // decision, which is a manager failure, not a policy outcome.
        let decision = match rx.await {
            Ok(decision) => decision,
            Err(_) => {
                self.pending.lock().remove(request_id);
                tracing::error!(request_id, "pending permission dropped before resolution");
                return Err(Error::Other(format!(
                    "permission channel closed before resolution of {request_id}"
                )));
            }
        };
        self.pending.lock().remove(request_id);

        {
            let mut stats = self.stats.lock();
            stats.escalated += 1;
            if decision.is_allow() {
                stats.allowed += 1;
            } else {
                stats.denied += 1;
            }
        }

        if self.mode() == ArbitrationMode::Cached {
            let key = canonical_cache_key(tool_name, &tool_input);
            self.cache.lock().insert(
                key,
                CachedDecision {
                    decision: decision.clone(),
                    cached_at: Instant::now(),
                },
            );
        }

        Ok(decision)
    }

    /// Resolve a pending request with the client's decision. Allow
    /// decisions missing `updatedInput` get the originally submitted
    /// input; `null` is never forwarded to the subprocess.
    pub fn resolve(&self, request_id: &str, mut decision: Decision) -> bool {
        let Some(pending) = self.pending.lock().remove(request_id) else {
            tracing::warn!(request_id, "no pending permission request");
            return false;
        };

        if let Decision::Allow { updated_input } = &mut decision {
            if updated_input.is_null() {
                *updated_input = pending.tool_input.clone();
            }
        }

        tracing::info!(
            request_id,
            tool_name = %pending.tool_name,
            allow = decision.is_allow(),
            waited_ms = pending.created_at.elapsed().as_millis() as u64,
            "permission resolved"
        );
        pending.respond.send(decision).is_ok()
    }

    /// Deny every pending request for a tab (session interrupt).
    pub fn deny_pending_for_tab(&self, tab_id: &str) -> usize {
        let prefix = format!("{tab_id}:");
        let ids: Vec<String> = {
            let pending = self.pending.lock();
            pending
                .keys()
                .filter(|id| id.starts_with(&prefix))
                .cloned()
                .collect()
        };
        let count = ids.len();
        for id in ids {
            self.resolve(&id, Decision::deny("Session interrupted"));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> PermissionStats {
        self.stats.lock().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn allow_mode_returns_input() {
        let mgr = PermissionManager::new(ArbitrationMode::Allow);
        let decision = mgr
            .get_permission("Bash", json!({"cmd": "ls"}), "t1:aa")
            .await
            .unwrap();
        assert_eq!(decision, Decision::allow(json!({"cmd": "ls"})));
    }

    #[tokio::test]
    async fn deny_mode_denies_everything() {
        let mgr = PermissionManager::new(ArbitrationMode::Deny);
        let decision = mgr.get_permission("Bash", json!({}), "t1:aa").await.unwrap();
        assert!(!decision.is_allow());
    }

    #[tokio::test]
    async fn prompt_without_notifier_denies() {
        let mgr = PermissionManager::new(ArbitrationMode::Prompt);
        let decision = mgr.get_permission("Bash", json!({}), "t1:aa").await.unwrap();
        assert!(!decision.is_allow());
    }

    #[tokio::test]
    async fn prompt_round_trip() {
        let mgr = Arc::new(PermissionManager::new(ArbitrationMode::Prompt));
        let (notified_tx, notified_rx) = std::sync::mpsc::channel();
        mgr.set_notifier(Some(Arc::new(move |tool, input, request_id| {
            let _ = notified_tx.send((tool, input, request_id));
        })));

        let mgr2 = mgr.clone();
        let waiter = tokio::spawn(async move {
            mgr2.get_permission("Bash", json!({"cmd": "ls"}), "t1:abcd1234")
                .await
        });

        // Wait for the notifier to fire, then resolve.
        let (tool, input, request_id) =
            tokio::task::spawn_blocking(move || notified_rx.recv().unwrap())
                .await
                .unwrap();
        assert_eq!(tool, "Bash");
        assert_eq!(input["cmd"], "ls");
        assert_eq!(request_id, "t1:abcd1234");

        assert!(mgr.resolve("t1:abcd1234", Decision::allow(json!({"cmd": "ls -la"}))));
        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision, Decision::allow(json!({"cmd": "ls -la"})));
        assert_eq!(mgr.pending_count(), 0);
    }

    #[tokio::test]
    async fn resolve_fills_missing_updated_input() {
        let mgr = Arc::new(PermissionManager::new(ArbitrationMode::Prompt));
        mgr.set_notifier(Some(Arc::new(|_, _, _| {})));

        let mgr2 = mgr.clone();
        let waiter = tokio::spawn(async move {
            mgr2.get_permission("Edit", json!({"path": "/x"}), "t1:1").await
        });

        // Let the waiter park its oneshot.
        tokio::task::yield_now().await;
        while mgr.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Client allowed without updatedInput (null): original input used.
        assert!(mgr.resolve("t1:1", Decision::allow(Value::Null)));
        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision, Decision::allow(json!({"path": "/x"})));
    }

    #[tokio::test]
    async fn custom_rules_short_circuit() {
        let mgr = PermissionManager::new(ArbitrationMode::Custom);
        mgr.update_rules(HashMap::from([
            ("Bash".to_string(), "deny".to_string()),
            ("Read".to_string(), "allow".to_string()),
        ]));
        assert!(!mgr
            .get_permission("Bash", json!({}), "t:1")
            .await
            .unwrap()
            .is_allow());
        assert!(mgr
            .get_permission("Read", json!({}), "t:2")
            .await
            .unwrap()
            .is_allow());
    }

    #[tokio::test]
    async fn resolve_unknown_request_is_false() {
        let mgr = PermissionManager::new(ArbitrationMode::Prompt);
        assert!(!mgr.resolve("t1:missing", Decision::allow(json!({}))));
    }

    #[tokio::test]
    async fn interrupt_denies_pending_for_tab() {
        let mgr = Arc::new(PermissionManager::new(ArbitrationMode::Prompt));
        mgr.set_notifier(Some(Arc::new(|_, _, _| {})));

        let mgr2 = mgr.clone();
        let waiter =
            tokio::spawn(async move { mgr2.get_permission("Bash", json!({}), "t9:zz").await });
        while mgr.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(mgr.deny_pending_for_tab("t9"), 1);
        assert!(!waiter.await.unwrap().unwrap().is_allow());
    }

    #[tokio::test]
    async fn closed_channel_is_a_manager_error() {
        let mgr = Arc::new(PermissionManager::new(ArbitrationMode::Prompt));
        mgr.set_notifier(Some(Arc::new(|_, _, _| {})));

        let mgr2 = mgr.clone();
        let waiter =
            tokio::spawn(async move { mgr2.get_permission("Bash", json!({}), "t1:gone").await });
        while mgr.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Tear the pending entry down without resolving: the sender
        // drops and the waiter must surface a manager error, not a deny.
        mgr.pending.lock().remove("t1:gone");
        let result = waiter.await.unwrap();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("t1:gone"));
        assert_eq!(mgr.pending_count(), 0);
    }
}
