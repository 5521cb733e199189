//! OpenAI-v1 executor: every OpenAI-compatible provider except the
//! ChatGPT backend (openrouter, groq, azure, ollama, ...).

use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use serde_json::{json, Value};
use tether_domain::route::RouteConfig;

use crate::auth::resolve_auth;
use crate::context::TranslationContext;
use crate::error::{anthropic_error_payload, extract_error_details};
use crate::executors::{error_response, json_response, read_error_json, sse_response, wants_stream};
use crate::sse::{drain_data_lines, sse_event};
use crate::translators::openai::{chunk_to_anthropic_events, request_to_openai, response_to_anthropic};

fn build_url(cfg: &RouteConfig) -> String {
    let base = cfg.base_url.trim_end_matches('/');
    if cfg.provider == "azure" {
        if let (Some(deployment), Some(api_version)) =
            (&cfg.azure_deployment, &cfg.azure_api_version)
        {
            return format!(
                "{base}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            );
        }
    }
    format!("{base}/chat/completions")
}

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

    let (mut upstream_body, _tool_id_map) = request_to_openai(&body);

    // The configured model wins over the Anthropic-side name.
    if !cfg.model.is_empty() {
        upstream_body["model"] = json!(cfg.model);
        ctx.effective_model = Some(cfg.model.clone());
    }
    if let Some(level) = cfg.reasoning_level() {
        let level = level.to_lowercase();
        if matches!(level.as_str(), "low" | "medium" | "high") {
            upstream_body["reasoning_effort"] = json!(level);
        }
    }

    let url = build_url(&cfg);
    let mut request = client.post(&url).header("content-type", "application/json");
    for (name, value) in resolve_auth(&cfg).headers {
        request = request.header(name, value);
    }
    for (name, value) in cfg.forwardable_headers() {
        request = request.header(name, value);
    }

    tracing::debug!(url = %url, model = %cfg.model, stream, "openai-v1 upstream request");

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
        let (error_type, message) = extract_error_details(&error_body);
        return error_response(
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            &message,
            &error_type,
            stream,
        );
    }

    if stream {
        return stream_response(upstream, ctx);
    }

    match upstream.json::<Value>().await {
        Ok(payload) => json_response(StatusCode::OK, &response_to_anthropic(&payload, &mut ctx)),
        Err(e) => error_response(
            StatusCode::BAD_GATEWAY,
            &format!("Upstream read error: {e}"),
            "api_error",
            false,
        ),
    }
}

fn stream_response(upstream: reqwest::Response, mut ctx: TranslationContext) -> Response {
    let translated = async_stream::stream! {
        let mut upstream = upstream;
        let mut buffer = String::new();

        loop {
            let chunk = match upstream.chunk().await {
                Ok(Some(c)) => c,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "openai-v1 upstream stream error");
                    yield Ok::<Bytes, std::io::Error>(sse_event(
                        "error",
                        &anthropic_error_payload(&format!("stream error: {e}"), "api_error"),
                    ));
                    break;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for payload in drain_data_lines(&mut buffer) {
                let data: Value = match serde_json::from_str(&payload) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                for (name, event) in chunk_to_anthropic_events(&data, &mut ctx) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_url() {
        let cfg = RouteConfig {
            base_url: "https://openrouter.ai/api/v1/".into(),
            provider: "openrouter".into(),
            ..Default::default()
        };
        assert_eq!(build_url(&cfg), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn azure_url_uses_deployment() {
        let cfg = RouteConfig {
            provider: "azure".into(),
            base_url: "https://example.openai.azure.com".into(),
            azure_deployment: Some("gpt4o".into()),
            azure_api_version: Some("2024-06-01".into()),
            ..Default::default()
        };
        assert_eq!(
            build_url(&cfg),
            "https://example.openai.azure.com/openai/deployments/gpt4o/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn azure_without_deployment_falls_back() {
        let cfg = RouteConfig {
            provider: "azure".into(),
            base_url: "https://example.openai.azure.com".into(),
            ..Default::default()
        };
        assert_eq!(
            build_url(&cfg),
            "https://example.openai.azure.com/chat/completions"
        );
    }
}
