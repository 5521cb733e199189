//! Anthropic native executor: passthrough with header rewriting.
//!
//! The request body is already Anthropic-shaped, so translation is
//! limited to headers, the OAuth beta query flag, and reasoning-budget
//! injection. Streaming responses are forwarded byte-for-byte.

use axum::http::StatusCode;
use bytes::Bytes;
use serde_json::{json, Value};
use tether_domain::route::{AuthMethod, RouteConfig};

use crate::auth::resolve_auth;
use crate::error::extract_error_details;
use crate::executors::{error_response, json_response, read_error_json, sse_response, wants_stream};
use crate::metadata::ensure_metadata;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Reasoning-level → thinking budget (tokens) for native Anthropic.
fn thinking_budget(level: &str) -> Option<u64> {
    match level.to_lowercase().as_str() {
        "low" => Some(2048),
        "medium" => Some(8192),
        "high" => Some(32768),
        _ => None,
    }
}

/// Header set that makes OAuth requests look like the first-party CLI.
const OAUTH_MASQUERADE_HEADERS: &[(&str, &str)] = &[
    (
        "anthropic-beta",
        "claude-code-20250219,oauth-2025-04-20,interleaved-thinking-2025-05-14,fine-grained-tool-streaming-2025-05-14",
    ),
    ("user-agent", "claude-cli/1.0.83 (external, cli)"),
    ("x-app", "cli"),
    ("x-stainless-helper-method", "stream"),
    ("x-stainless-lang", "js"),
    ("x-stainless-runtime", "node"),
    ("x-stainless-runtime-version", "v24.3.0"),
    ("x-stainless-package-version", "0.55.1"),
    ("anthropic-dangerous-direct-browser-access", "true"),
];

pub async fn execute(
    client: &reqwest::Client,
    cfg: RouteConfig,
    body: Value,
) -> axum::response::Response {
    let stream = wants_stream(&body);

    let mut body = body;
    if body.get("metadata").is_none() {
        body["metadata"] = ensure_metadata(&body);
    }
    body["model"] = json!(cfg.model);

    if let Some(budget) = cfg.reasoning_level().and_then(thinking_budget) {
        body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
    }

    let base = if cfg.base_url.is_empty() {
        "https://api.anthropic.com".to_string()
    } else {
        cfg.base_url.trim_end_matches('/').to_string()
    };
    let oauth = cfg.auth_method == AuthMethod::Oauth;
    let url = if oauth {
        format!("{base}/v1/messages?beta=true")
    } else {
        format!("{base}/v1/messages")
    };

    let mut request = client
        .post(&url)
        .header("content-type", "application/json")
        .header("anthropic-version", ANTHROPIC_VERSION);
    if oauth {
        for (name, value) in OAUTH_MASQUERADE_HEADERS {
            request = request.header(*name, *value);
        }
    }
    for (name, value) in resolve_auth(&cfg).headers {
        request = request.header(name, value);
    }
    for (name, value) in cfg.forwardable_headers() {
        request = request.header(name, value);
    }

    tracing::debug!(url = %url, model = %cfg.model, stream, "anthropic upstream request");

    let upstream = match request.json(&body).send().await {
        Ok(resp) => resp,
        Err(e) => {
            return error_response(
                StatusCode::BAD_GATEWAY,
                &format!("Upstream error: {e}"),
                "api_error",
                stream,
            )
        }
    };

    let status = upstream.status();
    if !status.is_success() {
        let error_body = read_error_json(upstream).await;
        let (error_type, message) = extract_error_details(&error_body);
        return error_response(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            &message,
            &error_type,
            stream,
        );
    }

    if stream {
        // Upstream already speaks the client's dialect; forward the wire
        // framing untouched.
        let forwarded = async_stream::stream! {
            let mut upstream = upstream;
            loop {
                match upstream.chunk().await {
                    Ok(Some(bytes)) => yield Ok::<Bytes, std::io::Error>(bytes),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "anthropic upstream stream error");
                        break;
                    }
                }
            }
        };
        return sse_response(StatusCode::OK, forwarded);
    }

    match upstream.json::<Value>().await {
        Ok(payload) => json_response(StatusCode::OK, &payload),
        Err(e) => error_response(
            StatusCode::BAD_GATEWAY,
            &format!("Upstream read error: {e}"),
            "api_error",
            false,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_mapping() {
        assert_eq!(thinking_budget("low"), Some(2048));
        assert_eq!(thinking_budget("MEDIUM"), Some(8192));
        assert_eq!(thinking_budget("high"), Some(32768));
        assert_eq!(thinking_budget("auto"), None);
    }

    #[test]
    fn masquerade_set_includes_beta_features() {
        let beta = OAUTH_MASQUERADE_HEADERS
            .iter()
            .find(|(n, _)| *n == "anthropic-beta")
            .unwrap()
            .1;
        assert!(beta.contains("oauth-2025-04-20"));
        assert!(beta.contains("claude-code-20250219"));
    }
}
