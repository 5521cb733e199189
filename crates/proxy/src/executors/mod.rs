//! Provider executors: one per upstream dialect.
//!
//! Routing (by route `provider`, not auth method, except for Google):
//! - `openai`            → Codex protocol (ChatGPT backend)
//! - `anthropic`         → native passthrough
//! - `google` + oauth    → Gemini CLI (Cloud Code Assist)
//! - `google` + api_key  → Gemini native
//! - `gemini`            → Gemini native
//! - everything else     → OpenAI v1 chat.completions

pub mod anthropic;
pub mod codex;
pub mod gemini;
pub mod gemini_cli;
pub mod openai_v1;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures_core::Stream;
use serde_json::Value;
use tether_domain::route::{AuthMethod, RouteConfig};

use crate::error::anthropic_error_payload;
use crate::sse::sse_event;

/// Dispatch a `/v1/messages` request to the executor for its provider.
pub async fn execute(
    client: &reqwest::Client,
    cfg: RouteConfig,
    body: Value,
    requested_model: String,
    alt: Option<String>,
) -> Response {
    match cfg.provider.to_lowercase().as_str() {
        "openai" => codex::execute(client, cfg, body, requested_model).await,
        "anthropic" => anthropic::execute(client, cfg, body).await,
        "google" => {
            if cfg.auth_method == AuthMethod::Oauth {
                gemini_cli::execute(client, cfg, body, requested_model, alt).await
            } else {
                gemini::execute(client, cfg, body, requested_model, alt).await
            }
        }
        "gemini" => gemini::execute(client, cfg, body, requested_model, alt).await,
        _ => openai_v1::execute(client, cfg, body, requested_model).await,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn json_response(status: StatusCode, value: &Value) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(value.to_string()))
        .expect("static response parts")
}

pub(crate) fn sse_response<S>(status: StatusCode, stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
        .expect("static response parts")
}

/// Error surface: an SSE `error` event followed by `message_stop` when
/// the client asked for streaming, a plain JSON envelope otherwise.
pub(crate) fn error_response(
    status: StatusCode,
    message: &str,
    error_type: &str,
    stream: bool,
) -> Response {
    let payload = anthropic_error_payload(message, error_type);
    if stream {
        let frames = vec![
            Ok::<Bytes, std::io::Error>(sse_event("error", &payload)),
            Ok(sse_event(
                "message_stop",
                &serde_json::json!({"type": "message_stop", "stop_reason": "error"}),
            )),
        ];
        sse_response(status, futures_util::stream::iter(frames))
    } else {
        json_response(status, &payload)
    }
}

/// Read an upstream error body as JSON, tolerating plain-text bodies.
pub(crate) async fn read_error_json(resp: reqwest::Response) -> Value {
    match resp.text().await {
        Ok(text) => match serde_json::from_str::<Value>(&text) {
            Ok(v) if v.is_object() => v,
            _ => serde_json::json!({"message": text}),
        },
        Err(_) => serde_json::json!({"message": "unknown upstream error"}),
    }
}

/// Whether the inbound request asked for a streamed response.
pub(crate) fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_stream_defaults_false() {
        assert!(!wants_stream(&serde_json::json!({})));
        assert!(wants_stream(&serde_json::json!({"stream": true})));
        assert!(!wants_stream(&serde_json::json!({"stream": "yes"})));
    }
}
