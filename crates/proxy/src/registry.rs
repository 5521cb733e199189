//! In-memory route registry with two-slot credential staging.
//!
//! A subprocess may fire several HTTP requests inside one user turn (tool
//! calls, follow-ups). Rotating credentials mid-turn would split the turn
//! across upstreams, so updates land in a `pending` slot and become
//! `current` on the next read. A turn is a burst of requests driven by a
//! single client frame, so swap-on-read gives "rotate on the next
//! request" semantics, which is as fine-grained as the turn boundary gets.

use std::collections::HashMap;

use parking_lot::Mutex;
use tether_domain::mask_secret;
use tether_domain::route::RouteConfig;

/// Current + staged configuration for one route token.
struct RouteState {
    current: RouteConfig,
    pending: Option<RouteConfig>,
}

/// Thread-safe token → upstream-configuration registry.
#[derive(Default)]
pub struct RouteRegistry {
    routes: Mutex<HashMap<String, RouteState>>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a route. New tokens become current
    /// immediately; existing tokens have the config queued for the next
    /// turn.
    pub fn register(&self, token: &str, cfg: RouteConfig) {
        let mut routes = self.routes.lock();
        match routes.get_mut(token) {
            Some(state) => {
                state.pending = Some(cfg);
                tracing::debug!(token = %mask_secret(token), "queued route update");
            }
            None => {
                tracing::info!(
                    token = %mask_secret(token),
                    provider = %cfg.provider,
                    model = %cfg.model,
                    "registered route"
                );
                routes.insert(
                    token.to_string(),
                    RouteState {
                        current: cfg,
                        pending: None,
                    },
                );
            }
        }
    }

    /// Queue a credential update for an existing token; registers the
    /// token when it does not exist yet.
    pub fn update(&self, token: &str, cfg: RouteConfig) {
        let mut routes = self.routes.lock();
        match routes.get_mut(token) {
            Some(state) => state.pending = Some(cfg),
            None => {
                routes.insert(
                    token.to_string(),
                    RouteState {
                        current: cfg,
                        pending: None,
                    },
                );
            }
        }
    }

    /// Resolve a token. Performs the pending → current swap, so staged
    /// credentials take effect on the first request of the next turn.
    pub fn get(&self, token: &str) -> Option<RouteConfig> {
        let mut routes = self.routes.lock();
        let state = routes.get_mut(token)?;
        if let Some(pending) = state.pending.take() {
            tracing::info!(token = %mask_secret(token), "applied staged credentials");
            state.current = pending;
        }
        Some(state.current.clone())
    }

    pub fn unregister(&self, token: &str) {
        if self.routes.lock().remove(token).is_some() {
            tracing::info!(token = %mask_secret(token), "unregistered route");
        }
    }

    pub fn clear(&self) {
        self.routes.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(key: &str) -> RouteConfig {
        RouteConfig {
            api_key: key.into(),
            ..Default::default()
        }
    }

    #[test]
    fn new_token_is_current_immediately() {
        let reg = RouteRegistry::new();
        reg.register("tk", cfg("a"));
        assert_eq!(reg.get("tk").unwrap().api_key, "a");
    }

    #[test]
    fn unknown_token_misses() {
        let reg = RouteRegistry::new();
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn reregister_defers_until_next_read() {
        let reg = RouteRegistry::new();
        reg.register("tk", cfg("a"));
        assert_eq!(reg.get("tk").unwrap().api_key, "a");

        // Re-registration queues; the queued config applies on the next get.
        reg.register("tk", cfg("b"));
        assert_eq!(reg.get("tk").unwrap().api_key, "b");
        assert_eq!(reg.get("tk").unwrap().api_key, "b");
    }

    #[test]
    fn update_respects_turn_boundary() {
        let reg = RouteRegistry::new();
        reg.register("tk", cfg("a"));

        // Simulate an in-flight turn: the config was already read.
        let in_flight = reg.get("tk").unwrap();
        reg.update("tk", cfg("b"));
        assert_eq!(in_flight.api_key, "a");

        // Next turn's first read picks up the staged credentials.
        assert_eq!(reg.get("tk").unwrap().api_key, "b");
    }

    #[test]
    fn update_on_missing_token_registers() {
        let reg = RouteRegistry::new();
        reg.update("tk", cfg("a"));
        assert_eq!(reg.get("tk").unwrap().api_key, "a");
    }

    #[test]
    fn unregister_and_clear() {
        let reg = RouteRegistry::new();
        reg.register("a", cfg("1"));
        reg.register("b", cfg("2"));
        reg.unregister("a");
        assert!(reg.get("a").is_none());
        assert_eq!(reg.len(), 1);
        reg.clear();
        assert!(reg.is_empty());
    }
}
