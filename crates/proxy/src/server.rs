//! Loopback HTTP surface of the translation proxy.
//!
//! `POST /v1/messages` carries the canonical Anthropic-shaped request.
//! The bearer token (or `x-api-key`) is the opaque route token the
//! broker registered for the calling subprocess's session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tether_domain::route::AuthMethod;
use tether_domain::{mask_secret, Error, Result};

use crate::error::anthropic_error_payload;
use crate::executors;
use crate::registry::RouteRegistry;

/// Shared state for all proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<RouteRegistry>,
    pub client: reqwest::Client,
    /// Runtime-togglable verbose request logging (`/logging`).
    pub verbose: Arc<AtomicBool>,
}

impl ProxyState {
    pub fn new(registry: Arc<RouteRegistry>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            registry,
            client,
            verbose: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Build the proxy router.
pub fn make_app(state: ProxyState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/keep-alive", get(handle_keep_alive))
        .route("/logging", get(handle_get_logging).post(handle_set_logging))
        .route("/v1/models", get(handle_models))
        .route("/v1/messages", post(handle_messages))
        .with_state(state)
}

/// Bind the loopback listener and serve until the process exits.
pub async fn start_proxy(state: ProxyState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "translation proxy listening");
    axum::serve(listener, make_app(state))
        .await
        .map_err(|e| Error::Http(e.to_string()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn handle_keep_alive() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_models() -> Json<Value> {
    // The CLI only probes this for liveness; a static catalog suffices.
    Json(json!({"data": [{"id": "claude-3-5-sonnet-latest", "type": "model"}]}))
}

async fn handle_get_logging(State(state): State<ProxyState>) -> Json<Value> {
    Json(json!({"enabled": state.verbose.load(Ordering::Relaxed)}))
}

async fn handle_set_logging(
    State(state): State<ProxyState>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid JSON"})),
            )
        }
    };
    let enabled = parsed.get("enabled").and_then(Value::as_bool).unwrap_or(false);
    state.verbose.store(enabled, Ordering::Relaxed);
    tracing::info!(enabled, "proxy verbose logging toggled");
    (StatusCode::OK, Json(json!({"enabled": enabled})))
}

/// Extract the route token from `Authorization: Bearer` or `x-api-key`.
pub(crate) fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let mut parts = auth.trim().splitn(2, char::is_whitespace);
        if let (Some(scheme), Some(token)) = (parts.next(), parts.next()) {
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
                return Some(token.trim().to_string());
            }
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// `alt`/`$alt` query handling: `sse` is the default streaming transport
/// and collapses to `None`; any other value is forwarded as a custom alt.
pub(crate) fn extract_alt(query: &HashMap<String, String>) -> Option<String> {
    let alt = query.get("alt").or_else(|| query.get("$alt"))?;
    if alt == "sse" {
        None
    } else {
        Some(alt.clone())
    }
}

async fn handle_messages(
    State(state): State<ProxyState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let token = match extract_token(&headers) {
        Some(t) => t,
        None => {
            tracing::info!("auth failed: missing Authorization or x-api-key");
            return (StatusCode::UNAUTHORIZED, "missing Authorization or x-api-key")
                .into_response();
        }
    };

    let route = match state.registry.get(&token) {
        Some(r) => r,
        None => {
            tracing::info!(token = %mask_secret(&token), "auth failed: unknown route token");
            return (StatusCode::UNAUTHORIZED, "unknown route token").into_response();
        }
    };

    let body: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            return executors::json_response(
                StatusCode::BAD_REQUEST,
                &anthropic_error_payload("Invalid JSON body", "invalid_request_error"),
            )
        }
    };

    let requested_model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    tracing::info!(
        provider = %route.provider,
        model = %if requested_model.is_empty() { route.model.clone() } else { requested_model.clone() },
        "proxy request"
    );
    if state.verbose.load(Ordering::Relaxed) {
        tracing::info!(
            token = %mask_secret(&token),
            base_url = %route.base_url,
            key = %mask_secret(&route.api_key),
            "proxy request detail"
        );
    }

    if route.api_key.is_empty() {
        return executors::json_response(
            StatusCode::BAD_REQUEST,
            &anthropic_error_payload("Route is missing an api_key", "invalid_request_error"),
        );
    }

    let alt = extract_alt(&query);

    // countTokens rides the same path with an action marker.
    let action = body
        .get("metadata")
        .and_then(|m| m.get("action"))
        .and_then(Value::as_str);
    if action == Some("countTokens") {
        let google_oauth = route.provider.eq_ignore_ascii_case("google")
            && route.auth_method == AuthMethod::Oauth;
        if google_oauth {
            return executors::gemini_cli::count_tokens(
                &state.client,
                route,
                body,
                requested_model,
            )
            .await;
        }
        return executors::json_response(
            StatusCode::BAD_REQUEST,
            &anthropic_error_payload(
                "Provider does not support token counting",
                "not_supported_error",
            ),
        );
    }

    executors::execute(&state.client, route, body, requested_model, alt).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer tok-123"));
        assert_eq!(extract_token(&headers).as_deref(), Some("tok-123"));
    }

    #[test]
    fn x_api_key_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("xk-1"));
        assert_eq!(extract_token(&headers).as_deref(), Some("xk-1"));
    }

    #[test]
    fn bearer_wins_over_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("bearer b"));
        headers.insert("x-api-key", HeaderValue::from_static("x"));
        assert_eq!(extract_token(&headers).as_deref(), Some("b"));
    }

    #[test]
    fn non_bearer_scheme_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic Zm9v"));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn alt_extraction() {
        let mut query = HashMap::new();
        assert_eq!(extract_alt(&query), None);
        query.insert("alt".into(), "sse".into());
        assert_eq!(extract_alt(&query), None);
        query.insert("alt".into(), "json".into());
        assert_eq!(extract_alt(&query).as_deref(), Some("json"));
        let mut query = HashMap::new();
        query.insert("$alt".into(), "media".into());
        assert_eq!(extract_alt(&query).as_deref(), Some("media"));
    }
}
