//! Legacy static route catalog.
//!
//! Session routes flow exclusively through the global-credentials path;
//! this surface remains for clients that manage a named route catalog
//! with active/stable pointers. Registered entries are mirrored into
//! the proxy registry so their tokens resolve.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tether_domain::mask_secret;
use tether_domain::route::{AuthMethod, RouteConfig};
use tether_domain::session::ErrorCode;
use tether_protocol::{ClientFrame, RouteEntry, ServerFrame};

use crate::handlers::{send_direct, send_error};
use crate::state::AppState;

pub const STABLE_ROUTE_TOKEN: &str = "tether-active";

/// The catalog: token → config, plus active/stable pointers.
pub struct StaticRouteCatalog {
    inner: Mutex<CatalogState>,
}

struct CatalogState {
    routes: HashMap<String, RouteConfig>,
    active: Option<String>,
    stable: String,
}

impl Default for StaticRouteCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticRouteCatalog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CatalogState {
                routes: HashMap::new(),
                active: None,
                stable: STABLE_ROUTE_TOKEN.to_string(),
            }),
        }
    }

    pub fn active(&self) -> Option<String> {
        self.inner.lock().active.clone()
    }

    pub fn stable(&self) -> String {
        self.inner.lock().stable.clone()
    }

    pub fn set_active(&self, token: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.routes.contains_key(token) {
            return false;
        }
        inner.active = Some(token.to_string());
        true
    }

    pub fn set_stable(&self, token: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.routes.contains_key(token) {
            return false;
        }
        inner.stable = token.to_string();
        true
    }

    pub fn insert(&self, token: &str, config: RouteConfig) {
        let mut inner = self.inner.lock();
        inner.routes.insert(token.to_string(), config);
        if inner.active.is_none() {
            inner.active = Some(token.to_string());
        }
    }

    pub fn get(&self, token: &str) -> Option<RouteConfig> {
        self.inner.lock().routes.get(token).cloned()
    }

    /// Serializable view for the client (keys in wire casing).
    pub fn as_wire(&self) -> Value {
        let inner = self.inner.lock();
        let mut out = serde_json::Map::new();
        for (token, config) in &inner.routes {
            out.insert(
                token.clone(),
                json!({
                    "token": token,
                    "config": {
                        "provider": config.provider,
                        "base_url": config.base_url,
                        "api_key": config.api_key,
                        "model": config.model,
                        "auth_method": config.auth_method,
                        "extra_headers": config.extra_headers,
                        "azure_deployment": config.azure_deployment,
                        "azure_api_version": config.azure_api_version,
                        "system_instruction": config.system_instruction,
                    },
                }),
            );
        }
        Value::Object(out)
    }
}

/// Parse the loosely-typed wire config into a [`RouteConfig`]. Both
/// snake_case and camelCase key spellings occur in the wild.
fn parse_route_config(config: &Value) -> Option<RouteConfig> {
    let string_field = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| config.get(*k).and_then(Value::as_str))
            .map(str::to_string)
    };

    let api_key = string_field(&["api_key", "apiKey"]).filter(|k| !k.is_empty())?;
    let auth_method = match string_field(&["auth_method", "authMethod"]).as_deref() {
        Some("oauth") => AuthMethod::Oauth,
        _ => AuthMethod::ApiKey,
    };
    let extra_headers = config
        .get("extra_headers")
        .or_else(|| config.get("extraHeaders"))
        .and_then(Value::as_object)
        .map(|o| {
            o.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(RouteConfig {
        provider: string_field(&["provider"]).unwrap_or_else(|| "openai".into()),
        base_url: string_field(&["base_url", "baseUrl"])
            .unwrap_or_else(|| "https://api.openai.com/v1".into()),
        api_key,
        model: string_field(&["model"]).unwrap_or_else(|| "gpt-4o".into()),
        auth_method,
        extra_headers,
        azure_deployment: string_field(&["azure_deployment", "azureDeployment"]),
        azure_api_version: string_field(&["azure_api_version", "azureApiVersion"]),
        system_instruction: string_field(&["system_instruction", "systemInstruction"]),
    })
}

pub async fn handle(state: &AppState, connection_id: &str, frame: ClientFrame) {
    match frame {
        ClientFrame::Routes {
            payload,
            routes_payload,
        } => {
            let entries = payload.or(routes_payload);
            match entries {
                Some(entries) => register_routes(state, connection_id, entries).await,
                None => {
                    let frame = ServerFrame::Routes {
                        routes: state.static_routes.as_wire(),
                        active_route: state.static_routes.active(),
                        stable_route: state.static_routes.stable(),
                    };
                    send_direct(state, connection_id, &frame).await;
                }
            }
        }
        ClientFrame::SetActiveRoute { token } => {
            set_pointer(state, connection_id, token, true).await;
        }
        ClientFrame::SetStableRoute { token } => {
            set_pointer(state, connection_id, token, false).await;
        }
        _ => {}
    }
}

async fn register_routes(state: &AppState, connection_id: &str, entries: Vec<RouteEntry>) {
    let mut tokens = Vec::new();
    for entry in &entries {
        if entry.token.is_empty() {
            tracing::warn!("route entry missing token, skipping");
            continue;
        }
        let config_value = if entry.config.is_null() {
            json!({})
        } else {
            entry.config.clone()
        };
        let Some(config) = parse_route_config(&config_value) else {
            tracing::warn!(token = %entry.token, "route configuration missing api_key, skipping");
            continue;
        };
        tracing::info!(
            token = %entry.token,
            provider = %config.provider,
            model = %config.model,
            key = %mask_secret(&config.api_key),
            "registering catalog route"
        );
        state.static_routes.insert(&entry.token, config.clone());
        state.sessions.registry.register(&entry.token, config);
        tokens.push(entry.token.clone());
    }

    let frame = ServerFrame::RoutesRegistered {
        tokens,
        routes: state.static_routes.as_wire(),
        active_route: state.static_routes.active(),
        stable_route: state.static_routes.stable(),
    };
    send_direct(state, connection_id, &frame).await;
}

async fn set_pointer(state: &AppState, connection_id: &str, token: Option<String>, active: bool) {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        send_error(
            state,
            connection_id,
            "Missing route token",
            None,
            Some(ErrorCode::InvalidRouteToken),
        )
        .await;
        return;
    };

    let success = if active {
        state.static_routes.set_active(&token)
    } else {
        state.static_routes.set_stable(&token)
    };
    if success && active {
        // Keep the stable alias resolving to the active config.
        if let Some(config) = state.static_routes.get(&token) {
            state
                .sessions
                .registry
                .register(&state.static_routes.stable(), config);
        }
    }
    tracing::info!(token = %token, active, success, "route pointer update");

    let frame = ServerFrame::RouteUpdated {
        success,
        active_route: if active {
            Some(if success { token.clone() } else { state.static_routes.active().unwrap_or_default() })
        } else {
            None
        },
        stable_route: if active { None } else { Some(state.static_routes.stable()) },
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
    fn parse_accepts_both_casings() {
        let snake = json!({"provider": "groq", "api_key": "k", "base_url": "https://api.groq.com/v1"});
        let camel = json!({"provider": "groq", "apiKey": "k", "baseUrl": "https://api.groq.com/v1"});
        for config in [snake, camel] {
            let parsed = parse_route_config(&config).unwrap();
            assert_eq!(parsed.provider, "groq");
            assert_eq!(parsed.api_key, "k");
            assert_eq!(parsed.base_url, "https://api.groq.com/v1");
        }
    }

    #[test]
    fn parse_requires_api_key() {
        assert!(parse_route_config(&json!({"provider": "openai"})).is_none());
        assert!(parse_route_config(&json!({"api_key": ""})).is_none());
    }

    #[test]
    fn first_registered_route_becomes_active() {
        let catalog = StaticRouteCatalog::new();
        catalog.insert("tk1", RouteConfig::default());
        catalog.insert("tk2", RouteConfig::default());
        assert_eq!(catalog.active().as_deref(), Some("tk1"));
        assert!(catalog.set_active("tk2"));
        assert_eq!(catalog.active().as_deref(), Some("tk2"));
        assert!(!catalog.set_active("missing"));
    }

    #[test]
    fn stable_defaults_and_updates() {
        let catalog = StaticRouteCatalog::new();
        assert_eq!(catalog.stable(), STABLE_ROUTE_TOKEN);
        catalog.insert("tk1", RouteConfig::default());
        assert!(catalog.set_stable("tk1"));
        assert_eq!(catalog.stable(), "tk1");
    }
}
