//! Codex executor: the ChatGPT backend responses API.
//!
//! The proxy, not the route config, owns the endpoint. Upstream is
//! always streamed; when the client asked for JSON the SSE is buffered
//! server-side and the final message is assembled from the terminal
//! `response.completed` event.

use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use serde_json::{json, Value};
use tether_domain::route::{AuthMethod, RouteConfig};
use uuid::Uuid;

use crate::auth::resolve_auth;
use crate::context::TranslationContext;
use crate::error::anthropic_error_payload;
use crate::executors::{error_response, json_response, read_error_json, sse_response, wants_stream};
use crate::sse::{drain_data_lines, sse_event};
use crate::translators::codex::{event_to_anthropic, message_from_completed, request_to_codex};

const CHATGPT_ENDPOINT: &str = "https://chatgpt.com";

pub async fn execute(
    client: &reqwest::Client,
    cfg: RouteConfig,
    body: Value,
    requested_model: String,
) -> Response {
    let stream = wants_stream(&body);
    let mut ctx = TranslationContext::new(if requested_model.is_empty() {
        &cfg.model
    } else {
        &requested_model
    });

    let auth_method = match cfg.auth_method {
        AuthMethod::Oauth => "oauth",
        AuthMethod::ApiKey => "api_key",
    };
    let mut upstream_body = request_to_codex(
        &body,
        &mut ctx,
        &cfg.provider,
        auth_method,
        cfg.system_instruction.as_deref(),
        cfg.reasoning_level(),
    );
    // Codex only answers over SSE; non-stream clients are served from the
    // buffered stream below.
    upstream_body["stream"] = json!(true);

    let url = format!("{CHATGPT_ENDPOINT}/backend-api/codex/responses");
    let mut request = client
        .post(&url)
        .header("content-type", "application/json")
        .header("version", "0.21.0")
        .header("openai-beta", "responses=experimental")
        .header("session_id", Uuid::new_v4().to_string())
        .header("accept", "text/event-stream");
    if cfg.auth_method != AuthMethod::ApiKey {
        request = request.header("originator", "codex_cli_rs");
    }
    for (name, value) in resolve_auth(&cfg).headers {
        request = request.header(name, value);
    }
    for (name, value) in cfg.forwardable_headers() {
        request = request.header(name, value);
    }

    tracing::debug!(
        model = %upstream_body["model"],
        effort = %upstream_body["reasoning"]["effort"],
        stream,
        "codex upstream request"
    );

    let upstream = match request.json(&upstream_body).send().await {
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
        let (error_type, message) = crate::error::extract_error_details(&error_body);
        return error_response(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            &message,
            &error_type,
            stream,
        );
    }

    if stream {
        stream_response(upstream, ctx)
    } else {
        non_stream_response(upstream, ctx).await
    }
}

/// Translate the Codex SSE into Anthropic SSE on the fly.
fn stream_response(upstream: reqwest::Response, mut ctx: TranslationContext) -> Response {
    let translated = async_stream::stream! {
        let mut upstream = upstream;
        let mut buffer = String::new();

        loop {
            let chunk = match upstream.chunk().await {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "codex upstream stream error");
                    yield Ok::<Bytes, std::io::Error>(sse_event(
                        "error",
                        &anthropic_error_payload(&format!("stream error: {e}"), "api_error"),
                    ));
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Codex multiplexes the event name into the data payload, so
            // data lines alone are enough.
            for payload in drain_data_lines(&mut buffer) {
                let data: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(error = %e, "unparseable codex data line");
                        continue;
                    }
                };
                let event_name = data.get("type").and_then(Value::as_str).unwrap_or("").to_string();
                if event_name.is_empty() {
                    continue;
                }
                for (name, event) in event_to_anthropic(&event_name, &data, &mut ctx) {
                    yield Ok(sse_event(&name, &event));
                }
            }
        }

        if !ctx.streaming.stop_sent {
            yield Ok(sse_event("message_stop", &json!({"type": "message_stop"})));
        }
    };
    sse_response(StatusCode::OK, translated)
}

/// Buffer the SSE and synthesize one JSON message from the terminal
/// `response.completed` event.
async fn non_stream_response(upstream: reqwest::Response, ctx: TranslationContext) -> Response {
    let raw = match upstream.text().await {
        Ok(text) => text,
        Err(e) => {
            return error_response(
                StatusCode::BAD_GATEWAY,
                &format!("Upstream read error: {e}"),
                "api_error",
                false,
            )
        }
    };

    let completed = raw
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty() && *data != "[DONE]")
        .filter_map(|data| serde_json::from_str::<Value>(data).ok())
        .find(|evt| evt.get("type").and_then(Value::as_str) == Some("response.completed"));

    match completed {
        Some(evt) => json_response(StatusCode::OK, &message_from_completed(&evt, &ctx)),
        None => error_response(
            StatusCode::REQUEST_TIMEOUT,
            "stream error: disconnected before completion (missing response.completed)",
            "api_error",
            false,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_event_is_found_among_noise() {
        let raw = "event: response.created\n\
                   data: {\"type\":\"response.created\"}\n\n\
                   data: [DONE]\n\
                   data: {\"type\":\"response.completed\",\"response\":{\"id\":\"r1\"}}\n\n";
        let completed = raw
            .lines()
            .filter_map(|line| line.trim().strip_prefix("data:"))
            .map(str::trim)
            .filter(|d| !d.is_empty() && *d != "[DONE]")
            .filter_map(|d| serde_json::from_str::<Value>(d).ok())
            .find(|e| e.get("type").and_then(Value::as_str) == Some("response.completed"));
        assert_eq!(completed.unwrap()["response"]["id"], "r1");
    }
}
